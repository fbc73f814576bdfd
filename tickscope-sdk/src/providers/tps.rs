//! Tick rate provider.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::ProviderError;
use crate::provider::DataProvider;
use crate::rolling::TickRateCalculator;

/// Reports the host loop's tick rate over the standard windows.
///
/// The calculator is fed by whoever owns the tick loop; this provider only
/// reads it. After `close()` the provider lets go of the calculator and
/// gathers nothing.
pub struct TpsProvider {
    calculator: Mutex<Option<Arc<TickRateCalculator>>>,
}

impl TpsProvider {
    pub fn new(calculator: Arc<TickRateCalculator>) -> Self {
        Self {
            calculator: Mutex::new(Some(calculator)),
        }
    }

    /// Whether the provider is still attached to its tick source.
    pub fn is_attached(&self) -> bool {
        self.calculator.lock().is_some()
    }
}

impl DataProvider for TpsProvider {
    fn gather(&self) -> Result<Value, ProviderError> {
        let calculator = self
            .calculator
            .lock()
            .clone()
            .ok_or("Tick source detached")?;
        Ok(calculator.to_json())
    }

    fn close(&self) {
        self.calculator.lock().take();
    }
}
