//! # tickscope-sdk
//!
//! Collection, history and publishing pipeline for runtime telemetry.
//!
//! A [`MonitoringManager`] runs collection cycles over registered
//! [`DataProvider`]s, keeps a bounded history of the resulting snapshots and
//! notifies [`DataListener`]s. A [`MonitoringPublisher`] is one such listener:
//! it streams each snapshot to a viewer socket and uploads the full history
//! to a content store on request.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tickscope_sdk::{
//!     providers, BytebinClient, MonitoringManager, MonitoringPublisher, SocketTransport,
//!     TickRateCalculator, TpsProvider,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = MonitoringManager::builder().history_length(60).build()?;
//!
//!     // Feed the calculator from the host loop with `on_tick()`
//!     let ticks = Arc::new(TickRateCalculator::new());
//!     manager.add_provider(providers::TPS, Arc::new(TpsProvider::new(ticks.clone())));
//!     providers::register_system(&manager);
//!
//!     let publisher = MonitoringPublisher::builder()
//!         .transport(Arc::new(SocketTransport::builder().build()?))
//!         .store(Arc::new(BytebinClient::builder().build()?))
//!         .manager(&manager)
//!         .build()?;
//!
//!     let collection = manager.start(Duration::from_secs(5));
//!
//!     publisher.ensure_socket_setup(None).await?;
//!     let key = publisher.publish().await?;
//!     println!("{}", publisher.viewer_url(&key));
//!
//!     collection.stop();
//!     manager.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Two-phase cycles**: providers that must run on the triggering thread
//!   do, everything else runs on a background worker
//! - **Ordered completion**: snapshots reach history and listeners in trigger order
//! - **Isolation**: a failing or panicking provider or listener only loses its own part
//! - **Resilient streaming**: failed sockets reconnect with bounded backoff

mod content;
mod error;
mod history;
mod listener;
mod manager;
mod provider;
mod publisher;
mod rolling;
mod transport;

pub mod providers;

#[cfg(test)]
mod testing;

pub use content::{
    BytebinClient, BytebinClientBuilder, Content, ContentStore, DEFAULT_CONTENT_URL,
    DEFAULT_VIEWER_URL,
};
pub use error::{ManagerError, ProviderError, PublishError, StoreError, TransportError};
pub use history::{History, DEFAULT_HISTORY_LENGTH};
pub use listener::DataListener;
pub use manager::{
    CollectionHandle, HistoryView, MonitoringManager, MonitoringManagerBuilder, PendingCycle,
};
pub use provider::{DataProvider, FnProvider};
pub use providers::TpsProvider;
pub use publisher::{
    CommandSender, MonitoringPublisher, MonitoringPublisherBuilder, ReconnectPolicy,
    SocketEventHook,
};
pub use rolling::{
    RollingWindowAverage, TickRateCalculator, SAMPLE_INTERVAL, STANDARD_WINDOWS, TARGET_TICK_RATE,
};
pub use transport::{
    default_user_agent, ConnectRequest, Outbound, Socket, SocketListener, SocketTransport,
    SocketTransportBuilder, Transport, DEFAULT_SOCKET_HOST, GOING_AWAY,
};

// Re-export types for convenience
pub use tickscope_types::{PublishEnvelope, Snapshot, SocketEvent};
