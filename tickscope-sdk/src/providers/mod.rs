//! Built-in providers.
//!
//! | id | provider | needs |
//! |---|---|---|
//! | `cpu` | [`CpuProvider`] | `system` feature |
//! | `memory` | [`MemoryProvider`] | `system` feature |
//! | `tps` | [`TpsProvider`] | a [`TickRateCalculator`](crate::TickRateCalculator) fed by the host loop |

#[cfg(feature = "system")]
mod cpu;
#[cfg(feature = "system")]
mod memory;
mod tps;

#[cfg(feature = "system")]
pub use cpu::CpuProvider;
#[cfg(feature = "system")]
pub use memory::MemoryProvider;
pub use tps::TpsProvider;

pub const CPU: &str = "cpu";
pub const MEMORY: &str = "memory";
pub const TPS: &str = "tps";

/// Register the `cpu` and `memory` providers.
#[cfg(feature = "system")]
pub fn register_system(manager: &crate::MonitoringManager) {
    use std::sync::Arc;

    manager.add_provider(CPU, Arc::new(CpuProvider::new()));
    manager.add_provider(MEMORY, Arc::new(MemoryProvider::new()));
}

/// Round to four decimal places.
#[cfg(feature = "system")]
fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
