//! Per-call context threaded through every engine operation.

use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;

/// Caller-supplied values and an optional deadline for storage round trips.
///
/// Claim builders and overridden functions receive the same context the
/// embedding application passed in, so they can read request-scoped values.
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    values: Map<String, Value>,
    deadline: Option<Instant>,
}

impl UserContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Storage calls made with this context fail with `StorageUnavailable`
    /// once the deadline passes.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
