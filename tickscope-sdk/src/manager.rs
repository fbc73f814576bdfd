//! The MonitoringManager: two-phase collection, history and listener fan-out.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tickscope_types::{current_timestamp_ms, Snapshot};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::ManagerError;
use crate::history::{History, DEFAULT_HISTORY_LENGTH};
use crate::listener::{DataListener, ListenerRegistry};
use crate::provider::{DataProvider, ProviderEntry, ProviderRegistry};

/// Orchestrates collection cycles.
///
/// Each call to [`tick`](MonitoringManager::tick) is one cycle:
///
/// 1. providers with `requires_sync() == true` are gathered on the calling thread;
/// 2. the partial snapshot is handed to a background worker, which gathers
///    the remaining providers;
/// 3. the completed snapshot is pushed to the front of the bounded history
///    and every listener is notified in registration order.
///
/// The worker completes cycles strictly in the order they were triggered.
/// The handle is cheap to clone; clones share the same registries and history.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use serde_json::json;
/// use tickscope_sdk::{FnProvider, MonitoringManager};
///
/// # tokio_test::block_on(async {
/// let manager = MonitoringManager::builder().history_length(3).build().unwrap();
/// manager.add_provider("cpu", Arc::new(FnProvider::sync(|| Ok(json!({ "load": 0.3 })))));
/// manager.add_provider("memory", Arc::new(FnProvider::new(|| Ok(json!({ "used": 1024 })))));
///
/// let snapshot = manager.tick().wait().await.unwrap();
/// assert!(snapshot.contains("cpu") && snapshot.contains("memory"));
/// assert_eq!(manager.history_len(), 1);
/// # });
/// ```
#[derive(Clone)]
pub struct MonitoringManager {
    state: Arc<ManagerState>,
    runtime: Handle,
}

struct ManagerState {
    providers: ProviderRegistry,
    listeners: ListenerRegistry,
    history: HistoryView,
    worker: Mutex<Option<mpsc::UnboundedSender<PartialCycle>>>,
    cycles: AtomicU64,
}

/// A cycle whose sync phase has finished.
struct PartialCycle {
    cycle: u64,
    time: u64,
    data: Map<String, Value>,
    deferred: Vec<ProviderEntry>,
    done: oneshot::Sender<Arc<Snapshot>>,
}

impl MonitoringManager {
    /// Create a builder for configuring the manager.
    pub fn builder() -> MonitoringManagerBuilder {
        MonitoringManagerBuilder::new()
    }

    /// Register a provider under `id`, replacing any provider already using it.
    pub fn add_provider(&self, id: &str, provider: Arc<dyn DataProvider>) {
        debug!(provider = id, sync = provider.requires_sync(), "Registering provider");
        self.state.providers.register(id, provider);
    }

    /// Unregister a provider. Returns `true` if it was registered.
    pub fn remove_provider(&self, id: &str) -> bool {
        self.state.providers.unregister(id)
    }

    /// Look up a registered provider.
    pub fn provider(&self, id: &str) -> Option<Arc<dyn DataProvider>> {
        self.state.providers.get(id)
    }

    /// Registered provider ids, in registration order.
    pub fn provider_ids(&self) -> Vec<String> {
        self.state.providers.ids()
    }

    /// Add a listener. It receives cycles completing after this call.
    pub fn add_listener(&self, listener: Arc<dyn DataListener>) {
        self.state.listeners.add(listener);
    }

    /// Remove a listener by identity. Returns `true` if it was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn DataListener>) -> bool {
        self.state.listeners.remove(listener)
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.state.listeners.len()
    }

    /// Run one collection cycle.
    ///
    /// Sync providers are gathered before this returns; everything else
    /// happens on the worker. The returned [`PendingCycle`] can be awaited for
    /// the completed snapshot or simply dropped.
    ///
    /// Safe to call from threads outside the tokio runtime.
    pub fn tick(&self) -> PendingCycle {
        let Some(worker) = self.state.worker.lock().clone() else {
            return PendingCycle { receiver: None };
        };

        let cycle = self.state.cycles.fetch_add(1, Ordering::Relaxed);
        let time = current_timestamp_ms();

        let (sync, deferred): (Vec<_>, Vec<_>) = self
            .state
            .providers
            .entries()
            .into_iter()
            .partition(|entry| entry.requires_sync);

        let mut data = Map::new();
        for entry in &sync {
            entry.gather_into(&mut data);
        }

        let (done, receiver) = oneshot::channel();
        let partial = PartialCycle {
            cycle,
            time,
            data,
            deferred,
            done,
        };

        if worker.send(partial).is_err() {
            debug!(cycle, "Collection worker has stopped, dropping cycle");
        }

        PendingCycle {
            receiver: Some(receiver),
        }
    }

    /// Start triggering cycles on a fixed interval.
    ///
    /// Returns a handle that stops the trigger when `stop()` is called or
    /// when the handle is dropped.
    pub fn start(&self, interval: Duration) -> CollectionHandle {
        use tokio::sync::watch;

        let (stop_tx, stop_rx) = watch::channel(false);
        let manager = self.clone();

        self.runtime.spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            let mut stop_rx = stop_rx;

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        if manager.is_closed() {
                            break;
                        }
                        drop(manager.tick());
                    }
                    changed = stop_rx.changed() => {
                        // A dropped handle closes the channel.
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        CollectionHandle { stop_tx }
    }

    /// Runtime the collection worker runs on.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Every retained snapshot, most-recent-first.
    pub fn export(&self) -> Vec<Snapshot> {
        self.state.history.export()
    }

    /// Shared read access to the history, for collaborators such as the publisher.
    pub fn history(&self) -> HistoryView {
        self.state.history.clone()
    }

    /// Number of retained snapshots.
    pub fn history_len(&self) -> usize {
        self.state.history.len()
    }

    /// Most recently completed snapshot.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.state.history.latest()
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.worker.lock().is_none()
    }

    /// Close every listener and provider and clear both registries.
    ///
    /// Failures in individual `close()` calls are logged and skipped. Cycles
    /// triggered afterwards resolve to `None`.
    pub fn close(&self) {
        self.state.worker.lock().take();

        for listener in self.state.listeners.drain() {
            if catch_unwind(AssertUnwindSafe(|| listener.close())).is_err() {
                warn!("Listener panicked while closing");
            }
        }

        for entry in self.state.providers.drain() {
            if catch_unwind(AssertUnwindSafe(|| entry.provider.close())).is_err() {
                warn!(provider = %entry.id, "Provider panicked while closing");
            }
        }
    }
}

impl ManagerState {
    /// Async phase and notification for one cycle. Runs on a blocking thread.
    fn complete(&self, partial: PartialCycle) {
        let PartialCycle {
            cycle,
            time,
            mut data,
            deferred,
            done,
        } = partial;

        for entry in &deferred {
            entry.gather_into(&mut data);
        }

        let snapshot = Arc::new(Snapshot::new(time, data));
        self.history.push(snapshot.clone());
        self.listeners.notify(&snapshot);

        debug!(cycle, time, providers = snapshot.len(), "Collection cycle complete");
        let _ = done.send(snapshot);
    }
}

async fn run_worker(state: Weak<ManagerState>, mut rx: mpsc::UnboundedReceiver<PartialCycle>) {
    while let Some(partial) = rx.recv().await {
        let Some(state) = state.upgrade() else {
            break;
        };
        let cycle = partial.cycle;
        if let Err(e) = tokio::task::spawn_blocking(move || state.complete(partial)).await {
            warn!(cycle, error = %e, "Collection cycle failed");
        }
    }
    debug!("Collection worker stopped");
}

impl std::fmt::Debug for MonitoringManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoringManager")
            .field("providers", &self.state.providers)
            .field("listeners", &self.state.listeners)
            .field("history_len", &self.history_len())
            .finish()
    }
}

/// Shared, read-mostly handle on the manager's history.
#[derive(Debug, Clone)]
pub struct HistoryView {
    inner: Arc<RwLock<History>>,
}

impl HistoryView {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(History::new(capacity))),
        }
    }

    fn push(&self, snapshot: Arc<Snapshot>) {
        self.inner.write().push(snapshot);
    }

    /// Every retained snapshot, most-recent-first.
    pub fn export(&self) -> Vec<Snapshot> {
        self.inner.read().export()
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.inner.read().latest().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().capacity()
    }
}

/// Completion of a triggered cycle.
///
/// Resolves to the completed snapshot, or `None` if the manager was closed
/// before the cycle could finish.
#[derive(Debug)]
pub struct PendingCycle {
    receiver: Option<oneshot::Receiver<Arc<Snapshot>>>,
}

impl PendingCycle {
    /// Wait for the cycle to complete.
    pub async fn wait(self) -> Option<Arc<Snapshot>> {
        self.await
    }
}

impl Future for PendingCycle {
    type Output = Option<Arc<Snapshot>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.receiver.as_mut() {
            Some(receiver) => Pin::new(receiver).poll(cx).map(Result::ok),
            None => Poll::Ready(None),
        }
    }
}

/// Builder for configuring a MonitoringManager.
#[derive(Debug, Default)]
pub struct MonitoringManagerBuilder {
    history_length: Option<usize>,
    runtime: Option<Handle>,
}

impl MonitoringManagerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how many snapshots to retain.
    ///
    /// Defaults to 60 if not specified.
    pub fn history_length(mut self, length: usize) -> Self {
        self.history_length = Some(length);
        self
    }

    /// Run the collection worker on this runtime.
    ///
    /// Defaults to the runtime the builder is used from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the manager and spawn its collection worker.
    pub fn build(self) -> Result<MonitoringManager, ManagerError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| ManagerError::NoRuntime)?,
        };

        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let state = Arc::new(ManagerState {
            providers: ProviderRegistry::default(),
            listeners: ListenerRegistry::default(),
            history: HistoryView::new(self.history_length.unwrap_or(DEFAULT_HISTORY_LENGTH)),
            worker: Mutex::new(Some(worker_tx)),
            cycles: AtomicU64::new(0),
        });

        runtime.spawn(run_worker(Arc::downgrade(&state), worker_rx));

        Ok(MonitoringManager { state, runtime })
    }
}

/// Handle for controlling the built-in periodic trigger.
pub struct CollectionHandle {
    stop_tx: tokio::sync::watch::Sender<bool>,
}

impl CollectionHandle {
    /// Stop triggering cycles. Dropping the handle does the same.
    pub fn stop(self) {
        let _ = self.stop_tx.send(true);
    }
}
