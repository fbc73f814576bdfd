//! Error types for the collection and publishing pipeline.

use thiserror::Error;

/// Error returned by a provider's `gather()`.
///
/// Providers wrap whatever went wrong in their platform reads; the manager
/// only logs it and leaves the provider's key out of that cycle.
pub type ProviderError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from the monitoring manager itself.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// No tokio runtime was supplied and none is running on this thread.
    #[error("No tokio runtime available for the collection worker")]
    NoRuntime,
}

/// Errors from the socket handshake and streaming connection.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The handshake request failed.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The handshake response did not carry a streaming address.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An address could not be parsed or upgraded to a streaming scheme.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Connection failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The streaming connection failed after it was established.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Timeout waiting for response.
    #[error("Request timed out")]
    Timeout,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connection(err.to_string())
        } else {
            TransportError::Http(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::WebSocket(err.to_string())
    }
}

/// Errors from the durable content store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The store answered with a non-success status.
    #[error("Content store returned status {0}")]
    Status(u16),

    /// The store accepted the upload but did not say where it lives.
    #[error("Content store response did not include a key")]
    MissingKey,

    /// Timeout waiting for response.
    #[error("Request timed out")]
    Timeout,
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Http(err.to_string())
        }
    }
}

/// Errors surfaced by the publisher to whoever asked for a setup or upload.
#[derive(Debug, Error)]
pub enum PublishError {
    /// A socket could not be established. Retry by calling setup again.
    #[error("Unable to set up socket: {0}")]
    Setup(#[from] TransportError),

    /// `publish()` was called without a live socket.
    #[error("Socket not set up")]
    NotConnected,

    /// The durable upload failed.
    #[error("Upload failed: {0}")]
    Upload(#[from] StoreError),

    /// The payload could not be serialized or compressed.
    #[error("Failed to encode payload: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for PublishError {
    fn from(err: serde_json::Error) -> Self {
        PublishError::Encode(err.to_string())
    }
}

impl From<std::io::Error> for PublishError {
    fn from(err: std::io::Error) -> Self {
        PublishError::Encode(err.to_string())
    }
}
