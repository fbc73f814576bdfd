//! Processor load and process timing.

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use sysinfo::{Pid, ProcessesToUpdate, System};

use super::round4;
use crate::error::ProviderError;
use crate::provider::DataProvider;

/// CPU figures for the host and this process.
///
/// Loads are fractions in `0..=1`; the process load is normalised by the
/// number of processors. Usage is measured between consecutive gathers, so
/// the first reading after creation reports zero load.
///
/// ```json
/// {"availableProcessors": 8, "systemLoadAverage": 1.2, "systemCpuLoad": 0.31,
///  "processCpuLoad": 0.05, "processCpuTime": 123456, "vmStart": 1700000000000,
///  "vmUptime": 3600000}
/// ```
pub struct CpuProvider {
    system: Mutex<System>,
    pid: Option<Pid>,
    processors: usize,
}

impl CpuProvider {
    pub fn new() -> Self {
        let processors = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
            processors,
        }
    }
}

impl Default for CpuProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DataProvider for CpuProvider {
    fn gather(&self) -> Result<Value, ProviderError> {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();

        let mut data = Map::new();
        data.insert("availableProcessors".into(), json!(self.processors));
        data.insert(
            "systemLoadAverage".into(),
            json!(round4(System::load_average().one)),
        );
        data.insert(
            "systemCpuLoad".into(),
            json!(round4(f64::from(system.global_cpu_usage()) / 100.0)),
        );

        if let Some(pid) = self.pid {
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
            if let Some(process) = system.process(pid) {
                let load = f64::from(process.cpu_usage()) / 100.0 / self.processors as f64;
                data.insert("processCpuLoad".into(), json!(round4(load.clamp(0.0, 1.0))));
                data.insert("processCpuTime".into(), json!(process.accumulated_cpu_time()));
                data.insert("vmStart".into(), json!(process.start_time() * 1000));
                data.insert("vmUptime".into(), json!(process.run_time() * 1000));
            }
        }

        Ok(Value::Object(data))
    }
}
