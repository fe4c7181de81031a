//! Feature deduplication across tile borders.
//!
//! Features that are not clipped to tile bounds, such as large polygons, are
//! reported by every tile they touch. The registry remembers which resident
//! tile built a feature first so neighbours can skip it, and forgets those
//! ids when that tile is disposed.

use std::collections::{HashMap, HashSet};

use tilestream_index::QuadKey;

use crate::projection::Projection;

/// Which resident tile owns each materialized feature.
#[derive(Debug, Default)]
pub struct FeatureRegistry {
    owners: HashMap<u64, QuadKey>,
    local: HashMap<QuadKey, HashSet<u64>>,
}

impl FeatureRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `owner` materialized feature `id`.
    ///
    /// Returns `false` if the feature is already owned by a resident tile,
    /// in which case nothing changes.
    pub fn register(&mut self, owner: QuadKey, id: u64) -> bool {
        if self.owners.contains_key(&id) {
            return false;
        }
        self.owners.insert(id, owner);
        self.local.entry(owner).or_default().insert(id);
        true
    }

    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.owners.contains_key(&id)
    }

    #[must_use]
    pub fn owner(&self, id: u64) -> Option<QuadKey> {
        self.owners.get(&id).copied()
    }

    /// Ids registered by one tile.
    pub fn local_ids(&self, owner: QuadKey) -> impl Iterator<Item = u64> + '_ {
        self.local.get(&owner).into_iter().flatten().copied()
    }

    /// Forget every id owned by `owner`. Returns how many were released.
    pub fn release(&mut self, owner: QuadKey) -> usize {
        let Some(ids) = self.local.remove(&owner) else {
            return 0;
        };
        for id in &ids {
            self.owners.remove(id);
        }
        ids.len()
    }

    /// Number of registered features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// View of one tile handed to the model builder while it consumes records.
pub struct TileScope<'a> {
    quadkey: QuadKey,
    projection: &'a dyn Projection,
    registry: &'a mut FeatureRegistry,
}

impl<'a> TileScope<'a> {
    pub(crate) fn new(
        quadkey: QuadKey,
        projection: &'a dyn Projection,
        registry: &'a mut FeatureRegistry,
    ) -> Self {
        Self {
            quadkey,
            projection,
            registry,
        }
    }

    /// The tile the records belong to.
    #[must_use]
    pub fn quadkey(&self) -> QuadKey {
        self.quadkey
    }

    #[must_use]
    pub fn projection(&self) -> &dyn Projection {
        self.projection
    }

    /// Whether any resident tile already materialized the feature.
    #[must_use]
    pub fn is_registered(&self, id: u64) -> bool {
        self.registry.contains(id)
    }

    /// Claim the feature for this tile. Returns `false` if another resident
    /// tile (or this one) already owns it.
    pub fn register(&mut self, id: u64) -> bool {
        self.registry.register(self.quadkey, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::SphericalProjection;

    fn quadkey(s: &str) -> QuadKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_feature_owned_by_one_tile() {
        let mut registry = FeatureRegistry::new();
        let a = quadkey("120");
        let b = quadkey("121");

        assert!(registry.register(a, 42));
        assert!(!registry.register(b, 42));
        assert!(!registry.register(a, 42));
        assert_eq!(registry.owner(42), Some(a));
        assert_eq!(registry.local_ids(b).count(), 0);
    }

    #[test]
    fn test_release_allows_reregistration() {
        let mut registry = FeatureRegistry::new();
        let a = quadkey("120");
        let b = quadkey("121");

        registry.register(a, 1);
        registry.register(a, 2);
        registry.register(b, 3);
        assert_eq!(registry.len(), 3);

        assert_eq!(registry.release(a), 2);
        assert!(!registry.contains(1));
        assert!(registry.contains(3));

        // Once the owner is gone the feature can be built by a neighbour.
        assert!(registry.register(b, 1));
        assert_eq!(registry.owner(1), Some(b));

        // Releasing twice is a no-op.
        assert_eq!(registry.release(a), 0);
    }

    #[test]
    fn test_scope_registers_for_its_tile() {
        let mut registry = FeatureRegistry::new();
        let projection = SphericalProjection::new(1.0);
        let key = quadkey("3");

        let mut scope = TileScope::new(key, &projection, &mut registry);
        assert!(!scope.is_registered(9));
        assert!(scope.register(9));
        assert!(scope.is_registered(9));
        assert_eq!(scope.quadkey(), key);

        let mut ids: Vec<_> = registry.local_ids(key).collect();
        ids.sort_unstable();
        assert_eq!(ids, [9]);
    }
}
