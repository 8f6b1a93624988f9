//! Numbering plan constants
//!
//! The plan is an input to the migration, not something it derives. The
//! defaults encode the restructuring the tool was written for; a config
//! file can override any of them.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::FatalConfigurationError;

/// Constants driving realm and member renumbering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NumberingPlan {
    /// Legacy realm with its own fixed target
    pub special_realm: u16,
    /// Target of `special_realm`
    pub special_realm_target: u16,
    /// First realm of the legacy contiguous range
    pub range_start: u16,
    /// Last realm (inclusive) of the legacy contiguous range
    pub range_end: u16,
    /// Target of `range_start`; the rest of the range follows contiguously
    pub range_target_start: u16,
    /// Offset added to every other realm
    pub default_realm_offset: u16,
    /// Members at or above this number are user members
    pub user_threshold: u64,
    /// Offset added to user member numbers
    pub user_member_offset: u64,
    /// Legacy infrastructure members are encoded as `realm * digit_base + n`
    pub digit_base: u64,
    /// Remainders above this bound are folded
    pub fold_bound: u64,
    /// Added to `remainder % 10` when folding
    pub fold_offset: u64,
    /// Infrastructure members are offset by `new_realm * realm_stride`
    pub realm_stride: u64,
}

impl Default for NumberingPlan {
    fn default() -> Self {
        Self {
            special_realm: 42,
            special_realm_target: 16,
            range_start: 20,
            range_end: 21,
            range_target_start: 60,
            default_realm_offset: 16,
            user_threshold: 1000,
            user_member_offset: 0xFFAA_0001_0000 - 1000,
            digit_base: 10,
            fold_bound: 9,
            fold_offset: 10,
            realm_stride: 256,
        }
    }
}

impl NumberingPlan {
    /// Create the default plan
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Legacy realms handled by the range rule
    #[inline]
    #[must_use]
    pub fn legacy_range(&self) -> RangeInclusive<u16> {
        self.range_start..=self.range_end
    }

    /// Targets of the range rule (widened so an overflowing end stays visible)
    #[inline]
    #[must_use]
    pub fn target_range(&self) -> RangeInclusive<u32> {
        let start = u32::from(self.range_target_start);
        start..=start + u32::from(self.range_end.saturating_sub(self.range_start))
    }

    /// Check the constants for internal consistency
    ///
    /// # Errors
    /// Returns [`FatalConfigurationError::InvalidPlan`] when rules overlap or
    /// constants make the member rule meaningless.
    pub fn validate(&self) -> Result<(), FatalConfigurationError> {
        if self.range_start > self.range_end {
            return Err(FatalConfigurationError::InvalidPlan(format!(
                "legacy range {}..={} is empty",
                self.range_start, self.range_end
            )));
        }
        if self.legacy_range().contains(&self.special_realm) {
            return Err(FatalConfigurationError::InvalidPlan(format!(
                "special realm {} lies inside the legacy range",
                self.special_realm
            )));
        }
        let targets = self.target_range();
        if *targets.end() > u32::from(u16::MAX) {
            return Err(FatalConfigurationError::InvalidPlan(
                "range target exceeds the realm width".into(),
            ));
        }
        if targets.contains(&u32::from(self.special_realm_target)) {
            return Err(FatalConfigurationError::InvalidPlan(format!(
                "special target {} overlaps the range target",
                self.special_realm_target
            )));
        }
        if self.digit_base == 0 || self.realm_stride == 0 {
            return Err(FatalConfigurationError::InvalidPlan(
                "digit base and realm stride must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_plan_is_valid() {
        assert!(NumberingPlan::default().validate().is_ok());
    }

    #[test]
    fn special_inside_range_rejected() {
        let plan = NumberingPlan {
            special_realm: 20,
            ..NumberingPlan::default()
        };
        assert!(matches!(
            plan.validate(),
            Err(FatalConfigurationError::InvalidPlan(_))
        ));
    }

    #[test]
    fn overlapping_targets_rejected() {
        let plan = NumberingPlan {
            special_realm_target: 61,
            ..NumberingPlan::default()
        };
        assert!(plan.validate().is_err());
    }

    #[test]
    fn target_range_follows_legacy_range() {
        let plan = NumberingPlan::default();
        assert_eq!(plan.target_range(), 60..=61);
        assert_eq!(plan.legacy_range(), 20..=21);
    }

    #[test]
    fn partial_plan_deserializes_with_defaults() {
        let plan: NumberingPlan = toml::from_str("default_realm_offset = 32").unwrap();
        assert_eq!(plan.default_realm_offset, 32);
        assert_eq!(plan.special_realm, 42);
    }
}
