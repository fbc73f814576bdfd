//! The publisher: live socket updates and durable full-history uploads.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use tickscope_types::{PublishEnvelope, Snapshot, SocketEvent, JSON_CONTENT_TYPE};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::content::{Content, ContentStore};
use crate::error::{PublishError, TransportError};
use crate::listener::DataListener;
use crate::manager::{HistoryView, MonitoringManager};
use crate::transport::{Socket, SocketListener, Transport, GOING_AWAY};

/// Whoever asked for a socket or an upload, and should hear how it went.
pub trait CommandSender: Send + Sync {
    fn send_message(&self, message: &str);
}

/// Callback receiving every [`SocketEvent`].
pub type SocketEventHook = Arc<dyn Fn(&SocketEvent) + Send + Sync>;

/// How hard to try to get a failed socket back.
///
/// The delay before attempt `n` is `initial_delay * 2^(n-1)`, capped at
/// `max_delay`. After `max_attempts` consecutive failures the publisher stays
/// disconnected until set up again. A socket that opens resets the count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Never reconnect.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before the given 1-based attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << doublings)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

/// Streams each completed snapshot to a viewer socket and uploads the
/// full history on request.
///
/// Register it as a listener on the manager (the builder does this when
/// given one). Until [`ensure_socket_setup`](Self::ensure_socket_setup)
/// succeeds, collection cycles are ignored.
///
/// The current socket lives in an atomic slot: callbacks, the listener and
/// `publish()` all read it with a single load, and reconnects swap it in one
/// step. Callbacks for a socket that is no longer in the slot are ignored.
#[derive(Clone)]
pub struct MonitoringPublisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn ContentStore>,
    history: HistoryView,
    runtime: Handle,
    policy: ReconnectPolicy,
    on_event: Option<SocketEventHook>,
    socket: ArcSwapOption<Socket>,
    setup: tokio::sync::Mutex<()>,
    content: tokio::sync::Mutex<Option<Content>>,
    attempts: AtomicU32,
}

impl MonitoringPublisher {
    pub fn builder() -> MonitoringPublisherBuilder {
        MonitoringPublisherBuilder::default()
    }

    /// Whether a live socket is set up.
    pub fn is_connected(&self) -> bool {
        self.inner
            .socket
            .load_full()
            .is_some_and(|socket| socket.is_open())
    }

    /// Id of the current socket.
    pub fn socket_id(&self) -> Option<u64> {
        self.inner.socket.load_full().map(|s| s.id())
    }

    /// Streaming address viewers should attach to.
    pub fn socket_url(&self) -> Option<String> {
        self.inner
            .socket
            .load_full()
            .map(|s| s.request().streaming_url())
    }

    /// Key of the uploaded document, once `publish()` has succeeded.
    pub async fn content_key(&self) -> Option<String> {
        self.inner.content.lock().await.as_ref().map(|c| c.key.clone())
    }

    /// Viewer link for a content key.
    pub fn viewer_url(&self, key: &str) -> String {
        self.inner.store.viewer_url(key)
    }

    /// Make sure a socket is set up, running the handshake if there is none.
    ///
    /// A no-op while connected. Concurrent callers share one handshake.
    /// On failure the publisher stays disconnected and `sender` is told.
    pub async fn ensure_socket_setup(
        &self,
        sender: Option<&dyn CommandSender>,
    ) -> Result<(), PublishError> {
        if self.is_connected() {
            return Ok(());
        }

        let _setup = self.inner.setup.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        if let Some(sender) = sender {
            sender.send_message("Creating a new socket, please wait...");
        }

        let callbacks = self.inner.listener();
        match self.inner.transport.new_socket(callbacks.clone()).await {
            Ok(socket) => {
                info!(socket = socket.id(), url = %socket.request().url, "Socket set up");
                self.inner.attempts.store(0, Ordering::Relaxed);
                self.inner.socket.store(Some(Arc::new(socket)));
                callbacks.install();
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Unable to set up socket");
                if let Some(sender) = sender {
                    sender.send_message("An error occurred whilst creating a new socket.");
                }
                Err(PublishError::Setup(e))
            }
        }
    }

    /// Upload the full history, returning the content key.
    ///
    /// The first call creates the document; later calls overwrite it, so the
    /// key stays the same for the publisher's lifetime. Fails with
    /// [`PublishError::NotConnected`] unless the socket is live.
    pub async fn publish(&self) -> Result<String, PublishError> {
        let socket = self
            .inner
            .socket
            .load_full()
            .filter(|socket| socket.is_open())
            .ok_or(PublishError::NotConnected)?;

        let history = self.inner.history.export();
        let snapshots = history.len();
        let envelope = PublishEnvelope::new(history, socket.request().streaming_url());
        let bytes = gzip_json(&envelope)?;

        let mut content = self.inner.content.lock().await;
        let key = match content.clone() {
            Some(existing) => {
                self.inner
                    .store
                    .update(&existing, bytes, JSON_CONTENT_TYPE)
                    .await
                    .inspect_err(|e| error!(key = %existing.key, error = %e, "Upload failed"))?;
                existing.key
            }
            None => {
                let created = self
                    .inner
                    .store
                    .create(bytes, JSON_CONTENT_TYPE, true)
                    .await
                    .inspect_err(|e| error!(error = %e, "Upload failed"))?;
                let key = created.key.clone();
                *content = Some(created);
                key
            }
        };

        info!(key = %key, snapshots, "Published monitoring data");
        Ok(key)
    }

    /// Close the socket with 1001 and stop any reconnect in progress.
    pub fn disconnect(&self) {
        self.inner.attempts.store(0, Ordering::Relaxed);
        if let Some(socket) = self.inner.socket.swap(None) {
            info!(socket = socket.id(), "Disconnecting socket");
            socket.close(GOING_AWAY, "Publisher disconnected");
        }
    }
}

impl DataListener for MonitoringPublisher {
    fn on_data_collection(&self, snapshot: &Arc<Snapshot>) {
        let Some(socket) = self.inner.socket.load_full() else {
            return;
        };
        let snapshot = snapshot.clone();

        self.inner.runtime.spawn(async move {
            match snapshot.to_message() {
                Ok(message) => {
                    if !socket.send(message) {
                        debug!(socket = socket.id(), time = snapshot.time, "Socket gone, update dropped");
                    }
                }
                Err(e) => warn!(time = snapshot.time, error = %e, "Failed to serialize update"),
            }
        });
    }

    fn close(&self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for MonitoringPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoringPublisher")
            .field("socket", &self.socket_id())
            .field("policy", &self.inner.policy)
            .finish()
    }
}

impl PublisherInner {
    fn listener(self: &Arc<Self>) -> Arc<Callbacks> {
        Arc::new(Callbacks {
            publisher: Arc::downgrade(self),
            held: Mutex::new(Some(Vec::new())),
        })
    }

    fn is_current(&self, id: u64) -> bool {
        self.socket.load_full().is_some_and(|s| s.id() == id)
    }

    /// Empty the slot if it still holds socket `id`. Returns the removed socket.
    fn clear(&self, id: u64) -> Option<Arc<Socket>> {
        let previous = self.socket.rcu(|current| match current {
            Some(socket) if socket.id() == id => None,
            other => other.clone(),
        });
        previous.filter(|socket| socket.id() == id)
    }

    fn emit(&self, event: SocketEvent) {
        match &event {
            SocketEvent::Opened { socket, url } => info!(socket, url = %url, "Socket opened"),
            SocketEvent::Closing { socket, code, reason } => {
                info!(socket, code, reason = %reason, "Socket closing")
            }
            SocketEvent::Closed { socket, code, reason } => {
                info!(socket, code, reason = %reason, "Socket closed")
            }
            SocketEvent::Failed { socket, error } => {
                warn!(socket, error = %error, "Socket failure")
            }
            SocketEvent::Reconnecting { attempt, delay_ms } => {
                info!(attempt, delay_ms, "Reconnecting socket")
            }
            SocketEvent::ReconnectExhausted { attempts } => {
                error!(attempts, "Giving up on socket reconnection")
            }
        }
        if let Some(hook) = &self.on_event {
            hook(&event);
        }
    }

    fn socket_failed(self: &Arc<Self>, id: u64, error: &TransportError) {
        let stale = !self.is_current(id);
        self.emit(SocketEvent::Failed {
            socket: id,
            error: error.to_string(),
        });
        if stale {
            debug!(socket = id, "Ignoring failure of a replaced socket");
            return;
        }
        let Some(failed) = self.clear(id) else {
            return;
        };

        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        if attempt > self.policy.max_attempts {
            self.emit(SocketEvent::ReconnectExhausted {
                attempts: self.policy.max_attempts,
            });
            return;
        }

        let delay = self.policy.delay(attempt);
        self.emit(SocketEvent::Reconnecting {
            attempt,
            delay_ms: delay.as_millis() as u64,
        });

        let inner = self.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            inner.reconnect(&failed);
        });
    }

    fn reconnect(self: &Arc<Self>, failed: &Socket) {
        // A setup or disconnect in the meantime wins over the retry.
        if self.socket.load_full().is_some() || self.attempts.load(Ordering::Relaxed) == 0 {
            debug!(socket = failed.id(), "Reconnect superseded");
            return;
        }

        let callbacks = self.listener();
        let socket = Arc::new(
            self.transport
                .connect_request(failed.request(), callbacks.clone()),
        );
        let previous = self.socket.rcu(|current| match current {
            None => Some(socket.clone()),
            Some(existing) => Some(existing.clone()),
        });
        if previous.is_some() {
            socket.close(GOING_AWAY, "Superseded");
        } else {
            debug!(old = failed.id(), new = socket.id(), "Socket replaced");
        }
        callbacks.install();
    }
}

/// Something the transport reported about one socket.
enum Signal {
    Open(u64),
    Closing(u64, u16, String),
    Closed(u64, u16, String),
    Failure(u64, TransportError),
}

/// Transport callbacks, bound weakly so a dropped publisher stops reacting.
///
/// Signals are held back until [`install`](Self::install) is called, which
/// happens once the socket they belong to is in the slot. A dial that fails
/// before `connect_request` returns is then still seen as the current
/// socket failing.
struct Callbacks {
    publisher: Weak<PublisherInner>,
    held: Mutex<Option<Vec<Signal>>>,
}

impl Callbacks {
    /// Deliver held signals and pass later ones straight through.
    fn install(&self) {
        let mut held = self.held.lock();
        for signal in held.take().unwrap_or_default() {
            self.dispatch(signal);
        }
    }

    fn deliver(&self, signal: Signal) {
        let mut held = self.held.lock();
        match &mut *held {
            Some(queue) => queue.push(signal),
            None => self.dispatch(signal),
        }
    }

    fn dispatch(&self, signal: Signal) {
        let Some(inner) = self.publisher.upgrade() else {
            return;
        };
        match signal {
            Signal::Open(socket) => opened(&inner, socket),
            Signal::Closing(socket, code, reason) => {
                inner.emit(SocketEvent::Closing { socket, code, reason });
                inner.clear(socket);
            }
            Signal::Closed(socket, code, reason) => {
                inner.emit(SocketEvent::Closed { socket, code, reason });
                inner.clear(socket);
            }
            Signal::Failure(socket, error) => inner.socket_failed(socket, &error),
        }
    }
}

impl SocketListener for Callbacks {
    fn on_open(&self, socket: u64) {
        self.deliver(Signal::Open(socket));
    }

    fn on_closing(&self, socket: u64, code: u16, reason: &str) {
        self.deliver(Signal::Closing(socket, code, reason.to_string()));
    }

    fn on_closed(&self, socket: u64, code: u16, reason: &str) {
        self.deliver(Signal::Closed(socket, code, reason.to_string()));
    }

    fn on_failure(&self, socket: u64, error: &TransportError) {
        self.deliver(Signal::Failure(socket, error.clone()));
    }
}

fn opened(inner: &PublisherInner, socket: u64) {
    if inner.is_current(socket) {
        inner.attempts.store(0, Ordering::Relaxed);
    }
    let url = inner
        .socket
        .load_full()
        .filter(|s| s.id() == socket)
        .map(|s| s.request().streaming_url())
        .unwrap_or_default();
    inner.emit(SocketEvent::Opened { socket, url });
}

fn gzip_json(envelope: &PublishEnvelope) -> Result<Vec<u8>, PublishError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    serde_json::to_writer(&mut encoder, envelope)?;
    Ok(encoder.finish()?)
}

/// Builder for [`MonitoringPublisher`].
#[derive(Default)]
pub struct MonitoringPublisherBuilder {
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn ContentStore>>,
    history: Option<HistoryView>,
    manager: Option<MonitoringManager>,
    runtime: Option<Handle>,
    policy: ReconnectPolicy,
    on_event: Option<SocketEventHook>,
}

impl MonitoringPublisherBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Publish this manager's history and register as its listener on build.
    pub fn manager(mut self, manager: &MonitoringManager) -> Self {
        self.manager = Some(manager.clone());
        self
    }

    /// Publish from a history without registering anywhere.
    pub fn history(mut self, history: HistoryView) -> Self {
        self.history = Some(history);
        self
    }

    /// Runtime for sends and reconnects. Defaults to the manager's, then the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn on_socket_event<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SocketEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<MonitoringPublisher, PublishError> {
        let missing = |what: &str| {
            PublishError::Setup(TransportError::Connection(format!(
                "Publisher built without a {what}"
            )))
        };

        let transport = self.transport.ok_or_else(|| missing("transport"))?;
        let store = self.store.ok_or_else(|| missing("content store"))?;
        let history = match (&self.history, &self.manager) {
            (Some(history), _) => history.clone(),
            (None, Some(manager)) => manager.history(),
            (None, None) => return Err(missing("history")),
        };
        let runtime = match (self.runtime, &self.manager) {
            (Some(runtime), _) => runtime,
            (None, Some(manager)) => manager.runtime().clone(),
            (None, None) => Handle::try_current()
                .map_err(|e| missing(&format!("runtime ({e})")))?,
        };

        let publisher = MonitoringPublisher {
            inner: Arc::new(PublisherInner {
                transport,
                store,
                history,
                runtime,
                policy: self.policy,
                on_event: self.on_event,
                socket: ArcSwapOption::empty(),
                setup: tokio::sync::Mutex::new(()),
                content: tokio::sync::Mutex::new(None),
                attempts: AtomicU32::new(0),
            }),
        };

        if let Some(manager) = &self.manager {
            manager.add_listener(Arc::new(publisher.clone()));
        }

        Ok(publisher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::provider::FnProvider;
    use crate::transport::{ConnectRequest, Outbound};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::io::Read;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tokio::sync::mpsc;

    const RELAY_URL: &str = "https://relay.test/s/abc";

    struct FakeSocket {
        id: u64,
        request: ConnectRequest,
        outbound: Option<mpsc::UnboundedReceiver<Outbound>>,
        listener: Arc<dyn SocketListener>,
    }

    #[derive(Default)]
    struct FakeTransport {
        handshakes: AtomicUsize,
        fail_handshake: AtomicBool,
        fail_dials: AtomicBool,
        reconnects: Mutex<Vec<ConnectRequest>>,
        sockets: Mutex<Vec<FakeSocket>>,
    }

    impl FakeTransport {
        fn open(&self, request: ConnectRequest, listener: Arc<dyn SocketListener>) -> Socket {
            let (socket, rx) = Socket::channel(request.clone());
            self.sockets.lock().push(FakeSocket {
                id: socket.id(),
                request,
                outbound: Some(rx),
                listener,
            });
            socket
        }

        fn socket_count(&self) -> usize {
            self.sockets.lock().len()
        }

        fn last(&self) -> (u64, Arc<dyn SocketListener>) {
            let sockets = self.sockets.lock();
            let last = sockets.last().expect("no socket opened");
            (last.id, last.listener.clone())
        }

        fn take_outbound(&self, id: u64) -> mpsc::UnboundedReceiver<Outbound> {
            self.sockets
                .lock()
                .iter_mut()
                .find(|s| s.id == id)
                .and_then(|s| s.outbound.take())
                .expect("outbound already taken")
        }

        fn fail_last(&self) {
            let (id, listener) = self.last();
            listener.on_failure(id, &TransportError::WebSocket("connection reset".to_string()));
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn new_socket(
            &self,
            listener: Arc<dyn SocketListener>,
        ) -> Result<Socket, TransportError> {
            self.handshakes.fetch_add(1, Ordering::SeqCst);
            if self.fail_handshake.load(Ordering::SeqCst) {
                return Err(TransportError::Protocol("No address returned".to_string()));
            }
            Ok(self.open(ConnectRequest::new(RELAY_URL, "tickscope-test"), listener))
        }

        fn connect_request(
            &self,
            request: &ConnectRequest,
            listener: Arc<dyn SocketListener>,
        ) -> Socket {
            self.reconnects.lock().push(request.clone());
            if self.fail_dials.load(Ordering::SeqCst) {
                // The dial dies before this returns, taking its driver with it.
                let (socket, outbound) = Socket::channel(request.clone());
                drop(outbound);
                listener.on_failure(
                    socket.id(),
                    &TransportError::Connection("connection refused".to_string()),
                );
                return socket;
            }
            self.open(request.clone(), listener)
        }
    }

    #[derive(Default)]
    struct FakeStore {
        creates: AtomicUsize,
        updates: AtomicUsize,
        fail: AtomicBool,
        last_upload: Mutex<Vec<u8>>,
    }

    #[async_trait]
    impl ContentStore for FakeStore {
        async fn create(
            &self,
            bytes: Vec<u8>,
            content_type: &str,
            public: bool,
        ) -> Result<Content, StoreError> {
            assert_eq!(content_type, JSON_CONTENT_TYPE);
            assert!(public);
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Status(500));
            }
            let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
            *self.last_upload.lock() = bytes;
            Ok(Content {
                key: format!("key-{n}"),
                modification_key: Some("secret".to_string()),
            })
        }

        async fn update(
            &self,
            content: &Content,
            bytes: Vec<u8>,
            _content_type: &str,
        ) -> Result<(), StoreError> {
            assert_eq!(content.modification_key.as_deref(), Some("secret"));
            self.updates.fetch_add(1, Ordering::SeqCst);
            *self.last_upload.lock() = bytes;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Messages(Mutex<Vec<String>>);

    impl CommandSender for Messages {
        fn send_message(&self, message: &str) {
            self.0.lock().push(message.to_string());
        }
    }

    struct Fixture {
        manager: MonitoringManager,
        transport: Arc<FakeTransport>,
        store: Arc<FakeStore>,
        publisher: MonitoringPublisher,
        events: Arc<Mutex<Vec<SocketEvent>>>,
    }

    fn fixture(policy: ReconnectPolicy) -> Fixture {
        let manager = MonitoringManager::builder().history_length(5).build().unwrap();
        manager.add_provider("tps", Arc::new(FnProvider::new(|| Ok(json!({ "5s": 20.0 })))));

        let transport = Arc::new(FakeTransport::default());
        let store = Arc::new(FakeStore::default());
        let events: Arc<Mutex<Vec<SocketEvent>>> = Arc::default();
        let recorded = events.clone();

        let publisher = MonitoringPublisher::builder()
            .transport(transport.clone())
            .store(store.clone())
            .manager(&manager)
            .reconnect_policy(policy)
            .on_socket_event(move |event| recorded.lock().push(event.clone()))
            .build()
            .unwrap();

        Fixture {
            manager,
            transport,
            store,
            publisher,
            events,
        }
    }

    fn quick_retries(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_attempts,
        }
    }

    async fn eventually(what: &str, condition: impl Fn() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    fn gunzip(bytes: &[u8]) -> Value {
        let mut json = String::new();
        flate2::read::GzDecoder::new(bytes)
            .read_to_string(&mut json)
            .unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
        assert_eq!(policy.delay(7), Duration::from_secs(60));
        assert_eq!(policy.delay(40), Duration::from_secs(60));
        assert_eq!(ReconnectPolicy::disabled().max_attempts, 0);
    }

    #[tokio::test]
    async fn setup_twice_performs_one_handshake() {
        let f = fixture(ReconnectPolicy::default());

        f.publisher.ensure_socket_setup(None).await.unwrap();
        f.publisher.ensure_socket_setup(None).await.unwrap();

        assert_eq!(f.transport.handshakes.load(Ordering::SeqCst), 1);
        assert!(f.publisher.is_connected());
        assert_eq!(
            f.publisher.socket_url().as_deref(),
            Some("wss://relay.test/s/abc")
        );
    }

    #[tokio::test]
    async fn setup_failure_is_reported_to_sender() {
        let f = fixture(ReconnectPolicy::default());
        f.transport.fail_handshake.store(true, Ordering::SeqCst);
        let sender = Messages::default();

        let result = f.publisher.ensure_socket_setup(Some(&sender)).await;

        assert!(matches!(
            result,
            Err(PublishError::Setup(TransportError::Protocol(_)))
        ));
        assert!(!f.publisher.is_connected());
        assert_eq!(
            *sender.0.lock(),
            vec![
                "Creating a new socket, please wait...".to_string(),
                "An error occurred whilst creating a new socket.".to_string(),
            ]
        );

        // Setup can simply be retried.
        f.transport.fail_handshake.store(false, Ordering::SeqCst);
        f.publisher.ensure_socket_setup(Some(&sender)).await.unwrap();
        assert!(f.publisher.is_connected());
    }

    #[tokio::test]
    async fn publish_requires_a_socket() {
        let f = fixture(ReconnectPolicy::default());
        assert!(matches!(
            f.publisher.publish().await,
            Err(PublishError::NotConnected)
        ));
        assert_eq!(f.store.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn publish_refuses_a_dead_socket() {
        let f = fixture(ReconnectPolicy::disabled());
        f.publisher.ensure_socket_setup(None).await.unwrap();
        let (id, _) = f.transport.last();
        drop(f.transport.take_outbound(id));

        assert!(!f.publisher.is_connected());
        assert!(matches!(
            f.publisher.publish().await,
            Err(PublishError::NotConnected)
        ));
        assert_eq!(f.store.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn publish_twice_keeps_the_key() {
        let f = fixture(ReconnectPolicy::default());
        f.manager.tick().await.unwrap();
        f.manager.tick().await.unwrap();
        f.publisher.ensure_socket_setup(None).await.unwrap();

        let first = f.publisher.publish().await.unwrap();
        let second = f.publisher.publish().await.unwrap();

        assert_eq!(first, "key-1");
        assert_eq!(first, second);
        assert_eq!(f.store.creates.load(Ordering::SeqCst), 1);
        assert_eq!(f.store.updates.load(Ordering::SeqCst), 1);
        assert_eq!(f.publisher.content_key().await.as_deref(), Some("key-1"));

        let uploaded = gunzip(&f.store.last_upload.lock());
        assert_eq!(uploaded["type"], "monitoring");
        assert_eq!(uploaded["socket"], "wss://relay.test/s/abc");
        let data = uploaded["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert!(data[0]["time"].as_u64() >= data[1]["time"].as_u64());
        assert_eq!(data[0]["data"]["tps"]["5s"], 20.0);
    }

    #[tokio::test]
    async fn upload_failure_surfaces_and_leaves_no_key() {
        let f = fixture(ReconnectPolicy::default());
        f.store.fail.store(true, Ordering::SeqCst);
        f.publisher.ensure_socket_setup(None).await.unwrap();

        let result = f.publisher.publish().await;
        assert!(matches!(
            result,
            Err(PublishError::Upload(StoreError::Status(500)))
        ));
        assert_eq!(f.publisher.content_key().await, None);
    }

    #[tokio::test]
    async fn streams_each_cycle_while_connected() {
        let f = fixture(ReconnectPolicy::default());
        f.publisher.ensure_socket_setup(None).await.unwrap();
        let (id, _) = f.transport.last();
        let mut outbound = f.transport.take_outbound(id);

        let snapshot = f.manager.tick().await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), outbound.recv())
            .await
            .unwrap()
            .unwrap();
        let Outbound::Text(text) = frame else {
            panic!("expected a text frame, got {frame:?}");
        };
        let message: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(message["time"], snapshot.time);
        assert_eq!(message["data"]["tps"]["5s"], 20.0);
    }

    #[tokio::test]
    async fn cycles_are_ignored_while_disconnected() {
        let f = fixture(ReconnectPolicy::default());

        let snapshot = f.manager.tick().await;
        assert!(snapshot.is_some());
        assert_eq!(f.transport.socket_count(), 0);
        assert!(!f.publisher.is_connected());
    }

    #[tokio::test]
    async fn disconnect_closes_with_going_away() {
        let f = fixture(ReconnectPolicy::default());
        f.publisher.ensure_socket_setup(None).await.unwrap();
        let (id, _) = f.transport.last();
        let mut outbound = f.transport.take_outbound(id);

        f.publisher.disconnect();

        assert!(!f.publisher.is_connected());
        assert_eq!(
            outbound.recv().await,
            Some(Outbound::Close {
                code: GOING_AWAY,
                reason: "Publisher disconnected".to_string()
            })
        );
    }

    #[tokio::test]
    async fn graceful_close_clears_without_reconnect() {
        let f = fixture(quick_retries(3));
        f.publisher.ensure_socket_setup(None).await.unwrap();
        let (id, listener) = f.transport.last();

        listener.on_closing(id, 1000, "server restart");
        listener.on_closed(id, 1000, "server restart");
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!f.publisher.is_connected());
        assert!(f.transport.reconnects.lock().is_empty());
        assert!(f
            .events
            .lock()
            .iter()
            .any(|e| matches!(e, SocketEvent::Closed { code: 1000, .. })));
    }

    #[tokio::test]
    async fn failure_reconnects_with_the_original_request() {
        let f = fixture(quick_retries(3));
        f.publisher.ensure_socket_setup(None).await.unwrap();
        let first = f.publisher.socket_id().unwrap();

        f.transport.fail_last();
        eventually("reconnect", || f.publisher.is_connected()).await;

        let reconnects = f.transport.reconnects.lock().clone();
        assert_eq!(reconnects.len(), 1);
        assert_eq!(reconnects[0].url, RELAY_URL);
        assert_eq!(f.transport.handshakes.load(Ordering::SeqCst), 1);
        assert_ne!(f.publisher.socket_id(), Some(first));
    }

    #[tokio::test]
    async fn callbacks_from_replaced_socket_are_ignored() {
        let f = fixture(quick_retries(3));
        f.publisher.ensure_socket_setup(None).await.unwrap();
        let (old_id, old_listener) = f.transport.last();

        f.transport.fail_last();
        eventually("reconnect", || f.publisher.is_connected()).await;
        let current = f.publisher.socket_id();

        old_listener.on_closed(old_id, 1006, "late");
        old_listener.on_failure(old_id, &TransportError::WebSocket("late".to_string()));
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(f.publisher.is_connected());
        assert_eq!(f.publisher.socket_id(), current);
        assert_eq!(f.transport.reconnects.lock().len(), 1);
    }

    #[tokio::test]
    async fn reconnect_gives_up_after_max_attempts() {
        let f = fixture(quick_retries(2));
        f.publisher.ensure_socket_setup(None).await.unwrap();

        for expected in 1..=2 {
            f.transport.fail_last();
            eventually("reconnect", || f.transport.reconnects.lock().len() == expected).await;
            eventually("socket swap", || f.publisher.is_connected()).await;
        }
        f.transport.fail_last();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!f.publisher.is_connected());
        assert_eq!(f.transport.reconnects.lock().len(), 2);
        let events = f.events.lock();
        assert!(events.contains(&SocketEvent::ReconnectExhausted { attempts: 2 }));
        let retries = events
            .iter()
            .filter(|e| matches!(e, SocketEvent::Reconnecting { .. }))
            .count();
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn dials_failing_before_they_return_keep_retrying_until_exhausted() {
        let f = fixture(quick_retries(5));
        f.publisher.ensure_socket_setup(None).await.unwrap();
        f.transport.fail_dials.store(true, Ordering::SeqCst);

        f.transport.fail_last();
        eventually("exhaustion", || {
            f.events
                .lock()
                .contains(&SocketEvent::ReconnectExhausted { attempts: 5 })
        })
        .await;

        assert_eq!(f.transport.reconnects.lock().len(), 5);
        assert!(!f.publisher.is_connected());
        assert_eq!(f.publisher.socket_id(), None);
        assert!(matches!(
            f.publisher.publish().await,
            Err(PublishError::NotConnected)
        ));
        assert_eq!(f.store.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn open_resets_the_attempt_counter() {
        let f = fixture(quick_retries(1));
        f.publisher.ensure_socket_setup(None).await.unwrap();

        f.transport.fail_last();
        eventually("reconnect", || f.publisher.is_connected()).await;
        let (id, listener) = f.transport.last();
        listener.on_open(id);

        f.transport.fail_last();
        eventually("second reconnect", || f.transport.reconnects.lock().len() == 2).await;
        assert!(!f
            .events
            .lock()
            .iter()
            .any(|e| matches!(e, SocketEvent::ReconnectExhausted { .. })));
    }

    #[tokio::test]
    async fn closing_the_manager_disconnects() {
        let f = fixture(ReconnectPolicy::default());
        f.publisher.ensure_socket_setup(None).await.unwrap();

        f.manager.close();
        assert!(!f.publisher.is_connected());
    }
}
