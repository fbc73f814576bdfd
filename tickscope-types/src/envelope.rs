//! Publish envelope - the document uploaded to the content store.

use serde::{Deserialize, Serialize};

use crate::Snapshot;

/// Value of the `type` field for monitoring uploads.
pub const MONITORING_TYPE: &str = "monitoring";

/// Content type used for uploads.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A full-history upload.
///
/// The viewer loads `data` to draw the initial charts and then attaches to
/// `socket` for live updates.
///
/// ```json
/// {"type": "monitoring", "data": [{"time": 1, "data": {}}], "socket": "wss://host/path"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishEnvelope {
    /// Payload kind, always [`MONITORING_TYPE`] for uploads produced here.
    #[serde(rename = "type")]
    pub kind: String,

    /// Exported history, in the collector's storage order.
    pub data: Vec<Snapshot>,

    /// Streaming address the viewer should connect to.
    pub socket: String,
}

impl PublishEnvelope {
    /// Create a monitoring envelope.
    pub fn new(data: Vec<Snapshot>, socket: impl Into<String>) -> Self {
        Self {
            kind: MONITORING_TYPE.to_string(),
            data,
            socket: socket.into(),
        }
    }
}
