//! Process and system memory.

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::error::ProviderError;
use crate::provider::DataProvider;

/// Memory figures in bytes.
///
/// ```json
/// {"process": {"resident": 104857600, "virtual": 2147483648},
///  "system": {"used": 8e9, "total": 16e9, "available": 8e9, "swapUsed": 0, "swapTotal": 2e9}}
/// ```
pub struct MemoryProvider {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DataProvider for MemoryProvider {
    fn gather(&self) -> Result<Value, ProviderError> {
        let mut system = self.system.lock();
        system.refresh_memory();

        let mut data = Map::new();
        data.insert(
            "system".into(),
            json!({
                "used": system.used_memory(),
                "total": system.total_memory(),
                "available": system.available_memory(),
                "swapUsed": system.used_swap(),
                "swapTotal": system.total_swap(),
            }),
        );

        if let Some(pid) = self.pid {
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
            if let Some(process) = system.process(pid) {
                data.insert(
                    "process".into(),
                    json!({
                        "resident": process.memory(),
                        "virtual": process.virtual_memory(),
                    }),
                );
            }
        }

        Ok(Value::Object(data))
    }
}
