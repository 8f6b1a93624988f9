//! Identifier mapping
//!
//! [`IdentifierMapper`] is a pure function of the [`NumberingPlan`]. Callers
//! that map the same identifiers repeatedly own a [`MapCache`]; descriptor
//! rewriting goes through the [`IdentifierResolver`] seam so it can use either
//! the mapper or an [`IdentifierTable`] built from already-mapped members.

use std::collections::HashMap;

use crate::error::{FatalConfigurationError, MapError};
use crate::identifier::{Identifier, MAX_MEMBER};
use crate::plan::NumberingPlan;

/// Maps legacy identifiers to the new numbering scheme
#[derive(Debug, Clone)]
pub struct IdentifierMapper {
    plan: NumberingPlan,
}

impl IdentifierMapper {
    /// Create mapper for a plan
    ///
    /// # Errors
    /// Returns error if the plan is internally inconsistent.
    pub fn new(plan: NumberingPlan) -> Result<Self, FatalConfigurationError> {
        plan.validate()?;
        Ok(Self { plan })
    }

    /// Plan in use
    #[inline]
    #[must_use]
    pub fn plan(&self) -> &NumberingPlan {
        &self.plan
    }

    /// Map a legacy realm number
    ///
    /// Special realm first, then the legacy range, then the default offset.
    ///
    /// # Errors
    /// Returns error if the result exceeds 16 bits or a default-mapped realm
    /// lands on a target reserved by the other two rules.
    pub fn map_realm(&self, old: u16) -> Result<u16, FatalConfigurationError> {
        let plan = &self.plan;

        if old == plan.special_realm {
            return Ok(plan.special_realm_target);
        }

        if plan.legacy_range().contains(&old) {
            let new = u64::from(plan.range_target_start) + u64::from(old - plan.range_start);
            return u16::try_from(new)
                .map_err(|_| FatalConfigurationError::RealmOutOfRange { old, new });
        }

        let new = u64::from(old) + u64::from(plan.default_realm_offset);
        let new =
            u16::try_from(new).map_err(|_| FatalConfigurationError::RealmOutOfRange { old, new })?;

        if new == plan.special_realm_target || plan.target_range().contains(&u32::from(new)) {
            return Err(FatalConfigurationError::RealmCollision { old, new });
        }
        Ok(new)
    }

    /// Map a legacy identifier
    ///
    /// # Errors
    /// - [`MapError::BelowRealmBase`] for an infrastructure member that is not
    ///   a valid legacy encoding of its realm
    /// - [`MapError::Fatal`] when the result does not fit the new scheme
    pub fn map_identifier(&self, old: Identifier) -> Result<Identifier, MapError> {
        let plan = &self.plan;
        let new_realm = self.map_realm(old.realm())?;

        let new_member = if old.member() >= plan.user_threshold {
            u128::from(old.member()) + u128::from(plan.user_member_offset)
        } else {
            let local = if old.realm() == plan.special_realm {
                old.member()
            } else {
                self.fold_infrastructure(old)?
            };
            u128::from(new_realm) * u128::from(plan.realm_stride) + u128::from(local)
        };

        let member = u64::try_from(new_member)
            .ok()
            .filter(|m| *m <= MAX_MEMBER)
            .ok_or(FatalConfigurationError::MemberOutOfRange { id: old, new: new_member })?;

        Ok(Identifier::new(new_realm, member))
    }

    /// Strip the realm digits from a legacy infrastructure member
    fn fold_infrastructure(&self, old: Identifier) -> Result<u64, MapError> {
        let plan = &self.plan;
        let base = u64::from(old.realm()) * plan.digit_base;
        let remainder = old
            .member()
            .checked_sub(base)
            .ok_or(MapError::BelowRealmBase { id: old, base })?;

        if remainder > plan.fold_bound {
            Ok(remainder % plan.digit_base + plan.fold_offset)
        } else {
            Ok(remainder)
        }
    }
}

/// Caller-owned memo of mapped identifiers
///
/// Clear it (or drop it) between runs with different plans.
#[derive(Debug, Default, Clone)]
pub struct MapCache {
    entries: HashMap<Identifier, Identifier>,
    hits: u64,
    misses: u64,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached identifiers
    pub entry_count: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that had to compute
    pub misses: u64,
}

impl MapCache {
    /// Create empty cache
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached mapping, computing and storing it on first use
    ///
    /// # Errors
    /// Propagates mapping errors; failures are not cached.
    pub fn get_or_map(
        &mut self,
        mapper: &IdentifierMapper,
        old: Identifier,
    ) -> Result<Identifier, MapError> {
        if let Some(new) = self.entries.get(&old) {
            self.hits += 1;
            return Ok(*new);
        }
        self.misses += 1;
        let new = mapper.map_identifier(old)?;
        self.entries.insert(old, new);
        Ok(new)
    }

    /// Drop all entries
    #[inline]
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    /// Number of cached entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counters
    #[inline]
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

/// Translates an old identifier into its new one
pub trait IdentifierResolver {
    /// Resolve `old`
    ///
    /// # Errors
    /// Returns error if `old` cannot be translated.
    fn resolve(&mut self, old: Identifier) -> Result<Identifier, MapError>;
}

/// Mapper plus cache, resolving by computation
#[derive(Debug)]
pub struct Memoized<'a> {
    mapper: &'a IdentifierMapper,
    cache: &'a mut MapCache,
}

impl<'a> Memoized<'a> {
    /// Pair a mapper with a cache
    #[inline]
    pub fn new(mapper: &'a IdentifierMapper, cache: &'a mut MapCache) -> Self {
        Self { mapper, cache }
    }
}

impl IdentifierResolver for Memoized<'_> {
    fn resolve(&mut self, old: Identifier) -> Result<Identifier, MapError> {
        self.cache.get_or_map(self.mapper, old)
    }
}

/// Old → new lookup of identifiers that actually exist in the data set
///
/// Resolving an identifier absent from the table is an unresolved reference,
/// so descriptors rewritten through it never point at unknown members.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IdentifierTable {
    forward: HashMap<Identifier, Identifier>,
    reverse: HashMap<Identifier, Identifier>,
}

impl IdentifierTable {
    /// Create empty table
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mapping
    ///
    /// # Errors
    /// Returns [`FatalConfigurationError::InvalidPlan`] if two different old
    /// identifiers map to the same new one.
    pub fn insert(&mut self, old: Identifier, new: Identifier) -> Result<(), FatalConfigurationError> {
        if let Some(existing) = self.reverse.get(&new) {
            if *existing != old {
                return Err(FatalConfigurationError::InvalidPlan(format!(
                    "{existing} and {old} both map to {}",
                    new.standard()
                )));
            }
        }
        self.forward.insert(old, new);
        self.reverse.insert(new, old);
        Ok(())
    }

    /// Merge another table into this one
    ///
    /// # Errors
    /// Returns error on the first colliding mapping.
    pub fn extend(&mut self, other: &Self) -> Result<(), FatalConfigurationError> {
        for (old, new) in &other.forward {
            self.insert(*old, *new)?;
        }
        Ok(())
    }

    /// New identifier for `old`, if known
    #[inline]
    #[must_use]
    pub fn get(&self, old: &Identifier) -> Option<Identifier> {
        self.forward.get(old).copied()
    }

    /// Legacy identifier that maps to `new`, if recorded
    #[inline]
    #[must_use]
    pub fn old_of(&self, new: &Identifier) -> Option<Identifier> {
        self.reverse.get(new).copied()
    }

    /// Whether `new` is the new identifier of some recorded member
    #[inline]
    #[must_use]
    pub fn contains_new(&self, new: &Identifier) -> bool {
        self.reverse.contains_key(new)
    }

    /// Number of mappings
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether the table is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

impl IdentifierResolver for IdentifierTable {
    fn resolve(&mut self, old: Identifier) -> Result<Identifier, MapError> {
        self.get(&old).ok_or(MapError::Unresolved(old))
    }
}

impl IdentifierResolver for &IdentifierTable {
    fn resolve(&mut self, old: Identifier) -> Result<Identifier, MapError> {
        self.get(&old).ok_or(MapError::Unresolved(old))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> IdentifierMapper {
        IdentifierMapper::new(NumberingPlan::default()).unwrap()
    }

    fn map(realm: u16, member: u64) -> Identifier {
        mapper().map_identifier(Identifier::new(realm, member)).unwrap()
    }

    #[test]
    fn known_values() {
        assert_eq!(map(1, 11).standard(), "17-0:1101");
        assert_eq!(map(1, 102).standard(), "17-0:110c");
        assert_eq!(map(42, 1).standard(), "16-0:1001");
        assert_eq!(map(20, 201).standard(), "60-0:3c01");
    }

    #[test]
    fn realm_rules_in_order() {
        let m = mapper();
        assert_eq!(m.map_realm(42).unwrap(), 16);
        assert_eq!(m.map_realm(20).unwrap(), 60);
        assert_eq!(m.map_realm(21).unwrap(), 61);
        assert_eq!(m.map_realm(19).unwrap(), 35);
        assert_eq!(m.map_realm(22).unwrap(), 38);
    }

    #[test]
    fn default_rule_collision_is_fatal() {
        let m = mapper();
        assert!(matches!(
            m.map_realm(44),
            Err(FatalConfigurationError::RealmCollision { old: 44, new: 60 })
        ));
        assert!(matches!(
            m.map_realm(0),
            Err(FatalConfigurationError::RealmCollision { old: 0, new: 16 })
        ));
    }

    #[test]
    fn realm_overflow_is_fatal() {
        let m = mapper();
        assert!(matches!(
            m.map_realm(u16::MAX),
            Err(FatalConfigurationError::RealmOutOfRange { .. })
        ));
    }

    #[test]
    fn user_members_ignore_realm() {
        assert_eq!(map(1, 1000).member(), 0xFFAA_0001_0000);
        assert_eq!(map(3, 1001).member(), 0xFFAA_0001_0001);
        assert_eq!(map(1, 1001).standard(), "17-ffaa:1:1");
    }

    #[test]
    fn special_realm_skips_digit_transform() {
        assert_eq!(map(42, 7).member(), 16 * 256 + 7);
    }

    #[test]
    fn member_below_base_rejected() {
        let result = mapper().map_identifier(Identifier::new(20, 5));
        assert!(matches!(result, Err(MapError::BelowRealmBase { base: 200, .. })));
    }

    #[test]
    fn member_overflow_is_fatal() {
        let plan = NumberingPlan {
            user_member_offset: MAX_MEMBER,
            ..NumberingPlan::default()
        };
        let m = IdentifierMapper::new(plan).unwrap();
        let result = m.map_identifier(Identifier::new(1, 1000));
        assert!(matches!(result, Err(MapError::Fatal(_))));
    }

    #[test]
    fn cache_counts_hits() {
        let m = mapper();
        let mut cache = MapCache::new();
        let a = cache.get_or_map(&m, Identifier::new(1, 11)).unwrap();
        let b = cache.get_or_map(&m, Identifier::new(1, 11)).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.stats(), CacheStats { entry_count: 1, hits: 1, misses: 1 });

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn table_detects_collisions() {
        let mut table = IdentifierTable::new();
        let new = Identifier::new(17, 0x110a);
        table.insert(Identifier::new(1, 20), new).unwrap();
        table.insert(Identifier::new(1, 20), new).unwrap();
        assert!(table.insert(Identifier::new(1, 30), new).is_err());
    }

    #[test]
    fn table_resolves_known_only() {
        let mut table = IdentifierTable::new();
        table.insert(Identifier::new(1, 11), map(1, 11)).unwrap();
        assert_eq!(table.resolve(Identifier::new(1, 11)).unwrap(), map(1, 11));
        assert!(matches!(
            table.resolve(Identifier::new(1, 12)),
            Err(MapError::Unresolved(_))
        ));
        assert!(table.contains_new(&map(1, 11)));
        assert_eq!(table.old_of(&map(1, 11)), Some(Identifier::new(1, 11)));
        assert_eq!(table.old_of(&map(1, 12)), None);
    }

    #[test]
    fn fold_region_is_not_injective() {
        assert_eq!(map(1, 22), map(1, 32));
        assert_eq!(map(1, 22).standard(), "17-0:110c");
        assert_ne!(map(1, 22), map(1, 23));

        let mut table = IdentifierTable::new();
        table.insert(Identifier::new(1, 22), map(1, 22)).unwrap();
        assert!(matches!(
            table.insert(Identifier::new(1, 32), map(1, 32)),
            Err(FatalConfigurationError::InvalidPlan(_))
        ));
    }
}
