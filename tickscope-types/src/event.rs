//! Socket lifecycle events reported by the publisher.

use serde::{Deserialize, Serialize};

/// Something that happened to the publisher's streaming socket.
///
/// Events are logged by the publisher and handed to its event hook, so
/// an embedding application can surface connection state without
/// parsing log lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SocketEvent {
    /// The socket finished its opening handshake.
    Opened { socket: u64, url: String },

    /// The remote end started a graceful close.
    Closing { socket: u64, code: u16, reason: String },

    /// The socket closed gracefully. No reconnect follows.
    Closed { socket: u64, code: u16, reason: String },

    /// The socket terminated abnormally.
    Failed { socket: u64, error: String },

    /// A reconnect has been scheduled.
    Reconnecting { attempt: u32, delay_ms: u64 },

    /// Reconnection gave up after `attempts` consecutive failures.
    ReconnectExhausted { attempts: u32 },
}

impl SocketEvent {
    /// Id of the socket the event concerns, if it concerns a single socket.
    pub fn socket_id(&self) -> Option<u64> {
        match self {
            SocketEvent::Opened { socket, .. }
            | SocketEvent::Closing { socket, .. }
            | SocketEvent::Closed { socket, .. }
            | SocketEvent::Failed { socket, .. } => Some(*socket),
            SocketEvent::Reconnecting { .. } | SocketEvent::ReconnectExhausted { .. } => None,
        }
    }

    /// Whether this event leaves the publisher without a socket.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SocketEvent::Closed { .. } | SocketEvent::ReconnectExhausted { .. }
        )
    }
}
