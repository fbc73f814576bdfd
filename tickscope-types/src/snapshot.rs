//! Snapshot - one timestamped, fully merged collection cycle.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The result of one collection cycle.
///
/// `data` holds one entry per provider, keyed by provider id. Snapshots are
/// created once both collection phases have finished and are never mutated
/// afterwards; the collector shares them behind an `Arc`.
///
/// Serializes as `{"time": <epoch-ms>, "data": {...}}`, which is both the
/// streaming update message and the element type of an exported history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unix timestamp in milliseconds, taken when the cycle started.
    pub time: u64,

    /// Provider output keyed by provider id, in merge order: synchronous
    /// providers first, then the rest, each in registration order.
    pub data: Map<String, Value>,
}

impl Snapshot {
    /// Create a snapshot from a timestamp and merged provider data.
    pub fn new(time: u64, data: Map<String, Value>) -> Self {
        Self { time, data }
    }

    /// Create a builder for constructing snapshots.
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::new()
    }

    /// Get the value gathered by a provider.
    pub fn get(&self, provider: &str) -> Option<&Value> {
        self.data.get(provider)
    }

    /// Check whether a provider contributed to this snapshot.
    pub fn contains(&self, provider: &str) -> bool {
        self.data.contains_key(provider)
    }

    /// Number of providers in the snapshot.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the snapshot is empty (no providers).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Serialize to the single-line JSON text sent over a streaming socket.
    pub fn to_message(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Builder for constructing `Snapshot` instances.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    time: Option<u64>,
    data: Map<String, Value>,
}

impl SnapshotBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a specific timestamp (milliseconds since Unix epoch).
    pub fn time(mut self, time: u64) -> Self {
        self.time = Some(time);
        self
    }

    /// Add a provider entry.
    pub fn entry(mut self, provider: impl Into<String>, value: Value) -> Self {
        self.data.insert(provider.into(), value);
        self
    }

    /// Build the snapshot, stamping it with the current time if none was set.
    pub fn build(self) -> Snapshot {
        Snapshot {
            time: self.time.unwrap_or_else(current_timestamp_ms),
            data: self.data,
        }
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
