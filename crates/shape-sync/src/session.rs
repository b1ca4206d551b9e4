//! Per-channel state for one end of a sync exchange.

use std::collections::HashMap;

use crate::registry::SharedRegistry;
use crate::shape::StructureId;
use crate::tracker::TrackedId;
use crate::value::Value;

/// What one end of a channel remembers between packets.
///
/// - the structure registry (shared only if the host shares it explicitly)
/// - the last materialized object per StructureID, the base for
///   differential packets
/// - which tracked value was last sent whole under each StructureID, the
///   only value a differential may be computed from
/// - which structure each request key resolved to last time
#[derive(Debug, Default)]
pub struct Session {
    registry: SharedRegistry,
    materialized: HashMap<StructureId, Value>,
    sent_from: HashMap<StructureId, TrackedId>,
    request_structures: HashMap<String, StructureId>,
}

impl Session {
    pub fn new(registry_capacity: usize) -> Self {
        Self::with_registry(SharedRegistry::with_capacity(registry_capacity))
    }

    pub fn with_registry(registry: SharedRegistry) -> Self {
        Self {
            registry,
            materialized: HashMap::new(),
            sent_from: HashMap::new(),
            request_structures: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn materialized(&self, id: &str) -> Option<&Value> {
        self.materialized.get(id)
    }

    pub(crate) fn store_materialized(&mut self, id: StructureId, value: Value) {
        self.materialized.insert(id, value);
    }

    pub fn forget_materialized(&mut self, id: &str) -> Option<Value> {
        self.materialized.remove(id)
    }

    /// The tracked value whose full leaf set was last sent under `id`.
    pub fn last_sent_from(&self, id: &str) -> Option<TrackedId> {
        self.sent_from.get(id).copied()
    }

    /// Record what the peer now holds for `id`. An untracked send clears the
    /// entry.
    pub(crate) fn record_sent(&mut self, id: &str, source: Option<TrackedId>) {
        match source {
            Some(source) => {
                self.sent_from.insert(id.to_string(), source);
            }
            None => {
                self.sent_from.remove(id);
            }
        }
    }

    /// Drop per-id state whose definitions were evicted from the registry.
    pub(crate) fn forget_evicted(&mut self, evicted: &[StructureId]) {
        for id in evicted {
            self.materialized.remove(id);
            self.sent_from.remove(id);
        }
    }

    /// Remember that `request_key` (a URL, a route name) resolved to `id`.
    pub fn remember_request(&mut self, request_key: impl Into<String>, id: StructureId) {
        self.request_structures.insert(request_key.into(), id);
    }

    /// The structure to announce as known for `request_key`, if it is still
    /// cached.
    pub fn structure_for_request(&self, request_key: &str) -> Option<StructureId> {
        self.request_structures
            .get(request_key)
            .filter(|id| self.registry.contains(id))
            .cloned()
    }
}
