//! # tickscope-types
//!
//! Wire types shared by the tickscope collector and its viewers.
//!
//! A collection cycle produces one [`Snapshot`]: a timestamp plus a JSON
//! object keyed by provider id. The same shape is used for the per-cycle
//! streaming message and for each entry of an exported history, so a viewer
//! only ever needs to understand one record type.
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use tickscope_types::{PublishEnvelope, Snapshot};
//!
//! let snapshot = Snapshot::builder()
//!     .time(1_554_828_641_000)
//!     .entry("tps", json!({ "5s": 20.0 }))
//!     .build();
//!
//! let envelope = PublishEnvelope::new(vec![snapshot], "wss://sockets.example/abc");
//! let json = serde_json::to_value(&envelope).unwrap();
//! assert_eq!(json["type"], "monitoring");
//! ```

mod envelope;
mod event;
mod snapshot;

pub use envelope::*;
pub use event::*;
pub use snapshot::*;
