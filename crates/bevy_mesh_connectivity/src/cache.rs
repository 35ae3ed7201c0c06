use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use bevy::prelude::*;

use crate::MeshConnectivity;

/// Lazily built connectivity graphs keyed by mesh identity.
///
/// Graphs are immutable once built and handed out as `Arc`s, so several hands
/// can read the same mesh without coordination. Owners evict entries when the
/// underlying mesh changes or unloads.
#[derive(Debug)]
pub struct MeshConnectivityCache<K> {
    entries: HashMap<K, Arc<MeshConnectivity>>,
}

impl<K> Default for MeshConnectivityCache<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone + std::fmt::Debug> MeshConnectivityCache<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<Arc<MeshConnectivity>> {
        self.entries.get(key).cloned()
    }

    /// Return the cached graph for `key`, building it with `build` on a miss.
    ///
    /// A build that yields `None` is not cached, so it is retried next call.
    pub fn get_or_build(
        &mut self,
        key: K,
        build: impl FnOnce() -> Option<MeshConnectivity>,
    ) -> Option<Arc<MeshConnectivity>> {
        if let Some(existing) = self.entries.get(&key) {
            return Some(existing.clone());
        }

        let connectivity = Arc::new(build()?);
        debug!(
            "Built mesh connectivity for {:?}: {} triangles, {} vertices",
            key,
            connectivity.triangle_count(),
            connectivity.vertex_count()
        );
        self.entries.insert(key, connectivity.clone());
        Some(connectivity)
    }

    pub fn evict(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
