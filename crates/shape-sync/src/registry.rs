//! Bounded StructureID → definition cache.
//!
//! Entries are kept in an [`IndexMap`] whose order is recency: the front is
//! the least recently looked-up definition and is evicted first.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::config::DEFAULT_MAX_REGISTRY_ENTRIES;
use crate::error::{Result, SyncError};
use crate::shape::{StructureDefinition, StructureId};

#[derive(Debug, Clone)]
pub struct StructureRegistry {
    entries: IndexMap<StructureId, StructureDefinition>,
    capacity: usize,
    collision_count: u64,
}

/// Portable registry contents, least recently used first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub entries: Vec<StructureDefinition>,
}

impl Default for StructureRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REGISTRY_ENTRIES)
    }
}

impl StructureRegistry {
    /// A registry holding at most `capacity` definitions. A capacity of zero
    /// caches nothing.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity,
            collision_count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct shapes seen under one id during this registry's lifetime.
    pub fn collision_count(&self) -> u64 {
        self.collision_count
    }

    /// Membership test that does not count as a lookup.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Cached ids, least recently used first.
    pub fn ids(&self) -> impl Iterator<Item = &StructureId> {
        self.entries.keys()
    }

    /// Insert or refresh a definition, then enforce the capacity bound.
    /// Returns the ids evicted to make room.
    pub fn put(&mut self, definition: StructureDefinition) -> Vec<StructureId> {
        if let Some(existing) = self.entries.shift_remove(&definition.id) {
            if existing.signature() != definition.signature() {
                self.collision_count += 1;
                warn!(
                    id = %definition.id,
                    collisions = self.collision_count,
                    "structure id collision, replacing cached shape"
                );
            }
        }
        self.entries.insert(definition.id.clone(), definition);
        self.evict_if_over_capacity()
    }

    /// Look up a definition and mark it most recently used.
    pub fn get(&mut self, id: &str) -> Option<&StructureDefinition> {
        let (key, definition) = self.entries.shift_remove_entry(id)?;
        trace!(id, "structure registry hit");
        let (index, _) = self.entries.insert_full(key, definition);
        self.entries.get_index(index).map(|(_, definition)| definition)
    }

    pub fn evict_if_over_capacity(&mut self) -> Vec<StructureId> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            match self.entries.shift_remove_index(0) {
                Some((id, _)) => {
                    debug!(id = %id, capacity = self.capacity, "evicted structure definition");
                    evicted.push(id);
                }
                None => break,
            }
        }
        evicted
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.collision_count = 0;
    }

    pub fn export_registry(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            entries: self.entries.values().cloned().collect(),
        }
    }

    /// Merge a snapshot into this registry, preserving its recency order.
    /// Every entry is validated before anything is inserted.
    pub fn import_registry(&mut self, snapshot: RegistrySnapshot) -> Result<Vec<StructureId>> {
        for definition in &snapshot.entries {
            if let Some(reason) = definition.mismatch() {
                return Err(SyncError::InvalidSnapshot(format!("entry {reason}")));
            }
        }
        let mut evicted = Vec::new();
        for definition in snapshot.entries {
            evicted.extend(self.put(definition));
        }
        Ok(evicted)
    }
}

/// Registry handle for hosts that run several sessions over one cache.
/// Every operation takes the lock for its whole duration.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<Mutex<StructureRegistry>>,
}

impl SharedRegistry {
    pub fn new(registry: StructureRegistry) -> Self {
        Self {
            inner: Arc::new(Mutex::new(registry)),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(StructureRegistry::new(capacity))
    }

    pub fn lock(&self) -> MutexGuard<'_, StructureRegistry> {
        self.inner.lock()
    }

    pub fn put(&self, definition: StructureDefinition) -> Vec<StructureId> {
        self.lock().put(definition)
    }

    pub fn get(&self, id: &str) -> Option<StructureDefinition> {
        self.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    pub fn collision_count(&self) -> u64 {
        self.lock().collision_count()
    }

    pub fn export_registry(&self) -> RegistrySnapshot {
        self.lock().export_registry()
    }

    pub fn import_registry(&self, snapshot: RegistrySnapshot) -> Result<Vec<StructureId>> {
        self.lock().import_registry(snapshot)
    }
}
