//! Request-scoped ownership of trackers.

use std::collections::HashMap;

use chrono::Utc;
use rand::Rng;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::tracker::{AccessPattern, AccessTracker, Tracked, TrackedId};
use crate::value::Value;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Creates tracked values for one request and disposes every tracker when the
/// request ends, including on early return, error or cancellation (drop).
///
/// The side-table maps each value's [`TrackedId`] to its tracker only; it
/// never holds the value itself.
#[derive(Debug)]
pub struct RequestContext {
    request_id: String,
    trackers: HashMap<TrackedId, AccessTracker>,
    disposed: bool,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self::with_request_id(generate_request_id())
    }

    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            trackers: HashMap::new(),
            disposed: false,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Bring a value into tracked scope with a fresh tracker.
    pub fn create_state(&mut self, initial: Value) -> Result<Tracked> {
        if self.disposed {
            return Err(SyncError::TrackerDisposed);
        }
        let tracked = Tracked::new(initial);
        self.trackers.insert(tracked.id(), tracked.tracker().clone());
        Ok(tracked)
    }

    /// `Ok(None)` if `id` was never tracked here or was already released.
    pub fn access_pattern(&self, id: TrackedId) -> Result<Option<AccessPattern>> {
        if self.disposed {
            return Err(SyncError::TrackerDisposed);
        }
        self.trackers
            .get(&id)
            .map(AccessTracker::access_pattern)
            .transpose()
    }

    pub fn tracked_count(&self) -> usize {
        self.trackers.len()
    }

    /// Dispose one tracker before the request ends.
    pub fn release(&mut self, id: TrackedId) {
        if let Some(tracker) = self.trackers.remove(&id) {
            tracker.dispose();
        }
    }

    /// Dispose every tracker. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        for (_, tracker) in self.trackers.drain() {
            tracker.dispose();
        }
        self.disposed = true;
        debug!(request_id = %self.request_id, "request context disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn generate_request_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("req-{}-{}", Utc::now().timestamp_millis(), suffix)
}
