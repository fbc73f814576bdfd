//! # tickscope
//!
//! Runtime telemetry daemon built on [`tickscope_sdk`].
//!
//! The daemon drives a host tick loop on a dedicated thread, samples CPU,
//! memory and tick rate every collection interval, streams each snapshot to
//! a viewer socket once one is set up, and publishes the full history on
//! request.
//!
//! ```text
//!  tick-loop thread            tokio runtime
//! ┌──────────────────┐   ┌───────────────────────────────────────┐
//! │ on_tick() ──────▶│   │ collection worker ──▶ history         │
//! │ every interval:  │──▶│        │                              │
//! │   manager.tick() │   │        └──▶ listeners ──▶ publisher ──┼──▶ socket
//! └──────────────────┘   │ console: monitoring / tps / export ───┼──▶ content store
//!                        └───────────────────────────────────────┘
//! ```
//!
//! - **[`config`]**: layered settings (defaults, TOML file, `TICKSCOPE_*` env, flags)
//! - **[`ticker`]**: the fixed-rate tick loop that triggers collection cycles
//! - **[`console`]**: stdin commands
//! - **[`duration`]**: human duration strings such as `"5s"` and `"500ms"`
//!
//! ## Usage
//!
//! ```bash
//! # Collect every 5s, keep 60 snapshots
//! tickscope
//!
//! # Collect every second, keep 10 minutes, publish on startup
//! tickscope --interval 1s --history 600 --publish
//!
//! # Settings from a file, overridden from the environment
//! TICKSCOPE_TICK_RATE=50 tickscope --config tickscope.toml
//! ```
//!
//! ### Embedding the console
//!
//! ```
//! use std::sync::Arc;
//! use tickscope::console::{Console, Flow, Stdout};
//! use tickscope_sdk::{
//!     BytebinClient, MonitoringManager, MonitoringPublisher, SocketTransport, TickRateCalculator,
//! };
//!
//! # tokio_test::block_on(async {
//! let manager = MonitoringManager::builder().build().unwrap();
//! let publisher = MonitoringPublisher::builder()
//!     .transport(Arc::new(SocketTransport::builder().build().unwrap()))
//!     .store(Arc::new(BytebinClient::builder().build().unwrap()))
//!     .manager(&manager)
//!     .build()
//!     .unwrap();
//!
//! let console = Console::new(manager, publisher, Arc::new(TickRateCalculator::new()));
//! assert_eq!(console.handle_line("tps", &Stdout).await, Flow::Continue);
//! # });
//! ```

pub mod config;
pub mod console;
pub mod duration;
pub mod ticker;

pub use config::{Overrides, Settings};
pub use console::{Command, Console, Flow};
pub use ticker::TickLoop;
