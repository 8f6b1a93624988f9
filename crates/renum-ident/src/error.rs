//! Error types for identifier parsing and mapping
//!
//! - [`ParseError`]: malformed identifier or service name text
//! - [`MapError`]: an identifier that cannot be mapped under the plan
//! - [`FatalConfigurationError`]: plan constants that do not fit the data

use crate::identifier::Identifier;

/// Errors while parsing identifier or service name strings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Identifier text is not `<realm>-<member>`
    #[error("invalid identifier '{input}': {reason}")]
    InvalidIdentifier {
        /// Offending text
        input: String,
        /// What was wrong with it
        reason: String,
    },

    /// Service or router name does not have the `<code><realm>-<member>-<index>` shape
    #[error("invalid service name '{0}': expected <code><realm>-<member>-<index>")]
    NameFormat(String),
}

impl ParseError {
    /// Create invalid identifier error
    pub fn invalid(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// Plan constants produced a value the target scheme cannot represent
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FatalConfigurationError {
    /// Mapped realm does not fit the realm width
    #[error("realm {old} maps to {new}, beyond the 16-bit realm width")]
    RealmOutOfRange {
        /// Legacy realm
        old: u16,
        /// Computed realm (widened)
        new: u64,
    },

    /// Mapped member does not fit the member width
    #[error("member {id} maps to {new:#x}, beyond the 48-bit member width")]
    MemberOutOfRange {
        /// Legacy identifier
        id: Identifier,
        /// Computed member number
        new: u128,
    },

    /// A default-mapped realm landed on a special or range target
    #[error("realm {old} maps to {new}, which is reserved by another plan rule")]
    RealmCollision {
        /// Legacy realm
        old: u16,
        /// Colliding target realm
        new: u16,
    },

    /// Plan constants are inconsistent with each other
    #[error("invalid numbering plan: {0}")]
    InvalidPlan(String),
}

/// Errors while mapping a legacy identifier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// Infrastructure member number is below its realm's legacy base
    #[error("member {id} is below the legacy base {base} of its realm")]
    BelowRealmBase {
        /// Offending identifier
        id: Identifier,
        /// `realm * digit_base`
        base: u64,
    },

    /// Identifier is not present in the lookup table
    #[error("unresolved reference to {0}")]
    Unresolved(Identifier),

    /// Plan constants are wrong for the data set
    #[error(transparent)]
    Fatal(#[from] FatalConfigurationError),
}

impl MapError {
    /// Whether the error must abort the whole run
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_format_display() {
        let err = ParseError::NameFormat("bs1-11".to_string());
        assert!(err.to_string().contains("bs1-11"));
    }

    #[test]
    fn fatal_is_fatal() {
        let err: MapError = FatalConfigurationError::InvalidPlan("x".into()).into();
        assert!(err.is_fatal());
        assert!(!MapError::Unresolved(Identifier::new(1, 11)).is_fatal());
    }
}
