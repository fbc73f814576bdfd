//! Listeners notified with every completed snapshot.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tickscope_types::Snapshot;
use tracing::warn;

/// Receives every completed snapshot, in cycle order.
///
/// Called on the collection worker; implementations that do I/O should hand
/// the work off rather than block the next cycle.
pub trait DataListener: Send + Sync {
    /// Called once per completed cycle.
    fn on_data_collection(&self, snapshot: &Arc<Snapshot>);

    /// Release anything the listener holds. Called by `MonitoringManager::close()`.
    fn close(&self) {}
}

/// Copy-on-write listener list.
///
/// Mutation swaps in a new `Arc<Vec<_>>`; notification clones the current
/// `Arc` and iterates it with no lock held, so listeners may add or remove
/// listeners (including themselves) while being notified.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Arc<Vec<Arc<dyn DataListener>>>>,
}

impl ListenerRegistry {
    /// Add a listener. It sees only cycles that complete after this call.
    pub fn add(&self, listener: Arc<dyn DataListener>) {
        let mut guard = self.listeners.write();
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(listener);
        *guard = Arc::new(next);
    }

    /// Remove a listener by identity. Returns `true` if it was registered.
    pub fn remove(&self, listener: &Arc<dyn DataListener>) -> bool {
        let mut guard = self.listeners.write();
        let next: Vec<_> = guard
            .iter()
            .filter(|l| !same_listener(l, listener))
            .cloned()
            .collect();
        let removed = next.len() != guard.len();
        *guard = Arc::new(next);
        removed
    }

    /// Current listeners, in registration order.
    pub fn current(&self) -> Arc<Vec<Arc<dyn DataListener>>> {
        self.listeners.read().clone()
    }

    /// Notify every listener, isolating panics so the rest still run.
    pub fn notify(&self, snapshot: &Arc<Snapshot>) {
        let listeners = self.current();
        for (index, listener) in listeners.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| listener.on_data_collection(snapshot))).is_err() {
                warn!(listener = index, time = snapshot.time, "Listener panicked during notification");
            }
        }
    }

    /// Remove and return every listener.
    pub fn drain(&self) -> Vec<Arc<dyn DataListener>> {
        let previous = std::mem::take(&mut *self.listeners.write());
        previous.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.len())
            .finish()
    }
}

fn same_listener(a: &Arc<dyn DataListener>, b: &Arc<dyn DataListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
