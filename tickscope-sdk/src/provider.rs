//! Data providers and the registry the manager collects from.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::ProviderError;

/// A named unit of metric collection.
///
/// Providers are registered on a [`MonitoringManager`](crate::MonitoringManager)
/// under a unique id; each cycle calls [`gather`](DataProvider::gather) and
/// stores the result under that id.
///
/// # Example
///
/// ```rust
/// use serde_json::{json, Value};
/// use tickscope_sdk::{DataProvider, ProviderError};
///
/// struct Players;
///
/// impl DataProvider for Players {
///     fn gather(&self) -> Result<Value, ProviderError> {
///         Ok(json!({ "online": 12 }))
///     }
/// }
/// ```
pub trait DataProvider: Send + Sync {
    /// Read the current values.
    ///
    /// Must not touch manager state. When [`requires_sync`](DataProvider::requires_sync)
    /// is true this runs on the trigger's thread and has to return quickly.
    fn gather(&self) -> Result<Value, ProviderError>;

    /// Whether `gather()` must run on the thread that triggered the cycle.
    ///
    /// Read once at registration.
    fn requires_sync(&self) -> bool {
        false
    }

    /// Release anything the provider holds. Called by `MonitoringManager::close()`.
    fn close(&self) {}
}

/// A provider backed by a closure.
///
/// ```rust
/// use serde_json::json;
/// use tickscope_sdk::FnProvider;
///
/// let uptime = FnProvider::new(|| Ok(json!(3600)));
/// let tick_phase = FnProvider::sync(|| Ok(json!("idle")));
/// ```
pub struct FnProvider<F> {
    gather: F,
    requires_sync: bool,
}

impl<F> FnProvider<F>
where
    F: Fn() -> Result<Value, ProviderError> + Send + Sync,
{
    /// A provider gathered on the background worker.
    pub fn new(gather: F) -> Self {
        Self {
            gather,
            requires_sync: false,
        }
    }

    /// A provider gathered on the triggering thread.
    pub fn sync(gather: F) -> Self {
        Self {
            gather,
            requires_sync: true,
        }
    }
}

impl<F> DataProvider for FnProvider<F>
where
    F: Fn() -> Result<Value, ProviderError> + Send + Sync,
{
    fn gather(&self) -> Result<Value, ProviderError> {
        (self.gather)()
    }

    fn requires_sync(&self) -> bool {
        self.requires_sync
    }
}

/// A registered provider together with its id and fixed sync flag.
#[derive(Clone)]
pub struct ProviderEntry {
    pub id: String,
    pub provider: Arc<dyn DataProvider>,
    pub requires_sync: bool,
}

impl ProviderEntry {
    /// Gather this provider's value into `data`.
    ///
    /// Errors and panics are logged and the key is left out, so one broken
    /// provider cannot take the rest of the cycle down with it.
    pub fn gather_into(&self, data: &mut Map<String, Value>) {
        match catch_unwind(AssertUnwindSafe(|| self.provider.gather())) {
            Ok(Ok(value)) => {
                data.insert(self.id.clone(), value);
            }
            Ok(Err(e)) => {
                warn!(provider = %self.id, error = %e, "Provider failed to gather data");
            }
            Err(_) => {
                warn!(provider = %self.id, "Provider panicked while gathering data");
            }
        }
    }
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("id", &self.id)
            .field("requires_sync", &self.requires_sync)
            .finish()
    }
}

/// Registration-ordered provider map.
///
/// The lock is only held to mutate or to copy the entry list; collection
/// iterates over the copy.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: RwLock<Vec<ProviderEntry>>,
}

impl ProviderRegistry {
    /// Register a provider. An existing id is replaced in place and keeps its position.
    pub fn register(&self, id: &str, provider: Arc<dyn DataProvider>) {
        let entry = ProviderEntry {
            id: id.to_string(),
            requires_sync: provider.requires_sync(),
            provider,
        };

        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| e.id == id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    /// Remove a provider. Returns `true` if it was registered.
    pub fn unregister(&self, id: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Look up a provider by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn DataProvider>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.provider.clone())
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.id.clone()).collect()
    }

    /// Copy of the current entries, safe to iterate while others register.
    pub fn entries(&self) -> Vec<ProviderEntry> {
        self.entries.read().clone()
    }

    /// Remove and return every entry.
    pub fn drain(&self) -> Vec<ProviderEntry> {
        std::mem::take(&mut *self.entries.write())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}
