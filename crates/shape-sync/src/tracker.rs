//! Read/write interception over one live value.
//!
//! [`Tracked`] owns the value and routes every path access through an
//! [`AccessHooks`] implementation. [`AccessTracker`] is the hooks
//! implementation that accumulates an [`AccessPattern`] for one session.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use shape_sync_path::{format_dot_path, parse_dot_path};
use tracing::trace;

use crate::error::{Result, SyncError};
use crate::value::Value;

/// Identity token assigned when a value enters tracked scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackedId(u64);

impl TrackedId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TrackedId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// `None` when the write created the key.
    pub old_value: Option<Value>,
    pub new_value: Value,
}

/// Snapshot of what one session touched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AccessPattern {
    pub accessed: BTreeSet<String>,
    pub mutated: BTreeMap<String, Mutation>,
    /// Milliseconds since the Unix epoch when the snapshot was taken.
    pub timestamp: i64,
}

impl AccessPattern {
    pub fn is_empty(&self) -> bool {
        self.accessed.is_empty() && self.mutated.is_empty()
    }

    /// Accessed and mutated paths together, sorted and deduplicated.
    pub fn touched_paths(&self) -> BTreeSet<String> {
        self.accessed
            .iter()
            .chain(self.mutated.keys())
            .cloned()
            .collect()
    }
}

/// Interception points a mutable-state layer reports through.
pub trait AccessHooks {
    fn on_read(&self, path: &str);
    fn on_write(&self, path: &str, old_value: Option<&Value>, new_value: &Value);
}

#[derive(Debug, Default)]
struct TrackerState {
    accessed: BTreeSet<String>,
    mutated: BTreeMap<String, Mutation>,
    disposed: bool,
}

/// Per-session access recorder. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct AccessTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl AccessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(SyncError::TrackerDisposed);
        }
        state.accessed.insert(path.to_string());
        Ok(())
    }

    /// Later writes to the same path replace the earlier record.
    pub fn record_write(
        &self,
        path: &str,
        old_value: Option<&Value>,
        new_value: &Value,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(SyncError::TrackerDisposed);
        }
        state.mutated.insert(
            path.to_string(),
            Mutation {
                old_value: old_value.cloned(),
                new_value: new_value.clone(),
            },
        );
        Ok(())
    }

    pub fn access_pattern(&self) -> Result<AccessPattern> {
        let state = self.state.lock();
        if state.disposed {
            return Err(SyncError::TrackerDisposed);
        }
        Ok(AccessPattern {
            accessed: state.accessed.clone(),
            mutated: state.mutated.clone(),
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Stop recording and drop what was recorded. Idempotent.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        state.disposed = true;
        state.accessed.clear();
        state.mutated.clear();
    }
}

impl AccessHooks for AccessTracker {
    fn on_read(&self, path: &str) {
        if self.record_read(path).is_err() {
            trace!(path, "read after dispose not recorded");
        }
    }

    fn on_write(&self, path: &str, old_value: Option<&Value>, new_value: &Value) {
        if self.record_write(path, old_value, new_value).is_err() {
            trace!(path, "write after dispose not recorded");
        }
    }
}

/// A live value whose path reads and writes are reported to `H`.
#[derive(Debug)]
pub struct Tracked<H: AccessHooks = AccessTracker> {
    id: TrackedId,
    value: Value,
    hooks: H,
}

impl Tracked<AccessTracker> {
    pub fn new(value: Value) -> Self {
        Self::with_hooks(value, AccessTracker::new())
    }

    pub fn tracker(&self) -> &AccessTracker {
        &self.hooks
    }

    pub fn access_pattern(&self) -> Result<AccessPattern> {
        self.hooks.access_pattern()
    }
}

impl<H: AccessHooks> Tracked<H> {
    pub fn with_hooks(value: Value, hooks: H) -> Self {
        Self {
            id: TrackedId::next(),
            value,
            hooks,
        }
    }

    pub fn id(&self) -> TrackedId {
        self.id
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Read without reporting. Used by the encoder.
    pub fn peek(&self) -> &Value {
        &self.value
    }

    pub fn into_inner(self) -> Value {
        self.value
    }

    /// Read the node at `path`, reporting the read.
    pub fn get(&self, path: &str) -> Result<Option<&Value>> {
        let found = self.value.get_path(path)?;
        self.hooks.on_read(path);
        Ok(found)
    }

    /// Write `new_value` at `path` and return what was there.
    ///
    /// The parent must exist. Object parents accept new keys; array parents
    /// only accept existing indices.
    pub fn set(&mut self, path: &str, new_value: impl Into<Value>) -> Result<Option<Value>> {
        let new_value = new_value.into();
        let mut components =
            parse_dot_path(path).map_err(|err| SyncError::from_path_error(path, err))?;
        let last = components
            .pop()
            .ok_or_else(|| SyncError::invalid_path(path, "the root cannot be replaced"))?;
        let parent = self
            .value
            .get_components_mut(&components)
            .ok_or_else(|| SyncError::invalid_path(path, "parent does not exist"))?;
        let old = match parent {
            Value::Object(obj) => obj.insert(last, new_value.clone()),
            Value::Array(arr) => {
                let slot = match last.parse::<usize>() {
                    Ok(i) => arr.get_mut(i),
                    Err(_) => None,
                }
                .ok_or_else(|| SyncError::invalid_path(path, "array index out of bounds"))?;
                Some(std::mem::replace(slot, new_value.clone()))
            }
            _ => {
                return Err(SyncError::invalid_path(
                    &format_dot_path(&components),
                    "not an object or array",
                ))
            }
        };
        self.hooks.on_write(path, old.as_ref(), &new_value);
        Ok(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tracked(v: serde_json::Value) -> Tracked {
        Tracked::new(Value::from(v))
    }

    #[test]
    fn reads_record_full_paths() {
        let state = tracked(json!({"stats": {"totalUsers": 10}}));
        assert_eq!(state.get("stats.totalUsers").unwrap(), Some(&Value::from(10)));
        state.get("stats.totalUsers").unwrap();
        let pattern = state.access_pattern().unwrap();
        assert_eq!(pattern.accessed.iter().collect::<Vec<_>>(), vec!["stats.totalUsers"]);
        assert!(pattern.mutated.is_empty());
    }

    #[test]
    fn peek_is_not_recorded() {
        let state = tracked(json!({"a": 1}));
        let _ = state.peek();
        assert!(state.access_pattern().unwrap().is_empty());
    }

    #[test]
    fn last_write_per_path_wins() {
        let mut state = tracked(json!({"stats": {"totalUsers": 10}}));
        state.set("stats.totalUsers", 11).unwrap();
        state.set("stats.totalUsers", 12).unwrap();
        let pattern = state.access_pattern().unwrap();
        assert_eq!(pattern.mutated.len(), 1);
        let m = &pattern.mutated["stats.totalUsers"];
        assert_eq!(m.old_value, Some(Value::from(11)));
        assert_eq!(m.new_value, Value::from(12));
        assert!(pattern.accessed.is_empty());
        assert_eq!(state.peek(), &Value::from(json!({"stats": {"totalUsers": 12}})));
    }

    #[test]
    fn new_keys_have_no_old_value() {
        let mut state = tracked(json!({"a": {}}));
        assert_eq!(state.set("a.b", "x").unwrap(), None);
        assert_eq!(state.access_pattern().unwrap().mutated["a.b"].old_value, None);
    }

    #[test]
    fn writes_into_arrays_need_existing_index() {
        let mut state = tracked(json!({"rows": [1, 2]}));
        assert_eq!(state.set("rows.1", 5).unwrap(), Some(Value::from(2)));
        assert!(matches!(state.set("rows.2", 5), Err(SyncError::InvalidPath { .. })));
        assert!(matches!(state.set("rows.0.x", 5), Err(SyncError::InvalidPath { .. })));
        assert!(matches!(state.set("", 5), Err(SyncError::InvalidPath { .. })));
    }

    #[test]
    fn dispose_is_idempotent_and_stops_recording() {
        let mut state = tracked(json!({"a": 1}));
        state.get("a").unwrap();
        state.tracker().dispose();
        state.tracker().dispose();
        assert!(state.tracker().is_disposed());
        // normal access keeps working
        state.set("a", 2).unwrap();
        assert_eq!(state.get("a").unwrap(), Some(&Value::from(2)));
        assert!(matches!(state.access_pattern(), Err(SyncError::TrackerDisposed)));
        assert!(matches!(
            state.tracker().record_read("a"),
            Err(SyncError::TrackerDisposed)
        ));
    }

    #[test]
    fn ids_are_distinct() {
        let a = tracked(json!({}));
        let b = tracked(json!({}));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn custom_hooks_receive_events() {
        #[derive(Default)]
        struct Log(Mutex<Vec<String>>);
        impl AccessHooks for Log {
            fn on_read(&self, path: &str) {
                self.0.lock().push(format!("r:{path}"));
            }
            fn on_write(&self, path: &str, _old: Option<&Value>, new_value: &Value) {
                self.0.lock().push(format!("w:{path}={new_value:?}"));
            }
        }
        let mut state = Tracked::with_hooks(Value::from(json!({"x": 1})), Log::default());
        state.get("x").unwrap();
        state.set("x", true).unwrap();
        assert_eq!(
            *state.hooks().0.lock(),
            vec!["r:x".to_string(), "w:x=Bool(true)".to_string()]
        );
    }
}
