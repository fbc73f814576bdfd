//! Streaming socket transport: the HTTP handshake and the WebSocket driver.
//!
//! A socket is set up in two steps. The handshake `POST`s to
//! `https://<host>/create` and reads the streaming address from the
//! response's `Location` header; the transport then dials that address
//! (rewritten to `ws://`/`wss://`) and spawns a task that owns the stream.
//! Callers get a [`Socket`] handle back immediately and learn how the
//! connection went through their [`SocketListener`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::header::{CONTENT_TYPE, LOCATION, USER_AGENT};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message, Utf8Bytes};
use tracing::{debug, info, warn};

use crate::error::TransportError;

/// Default host of the socket relay.
pub const DEFAULT_SOCKET_HOST: &str = "sockets.tickscope.dev";

/// Close code sent when the publisher goes away on purpose.
pub const GOING_AWAY: u16 = 1001;

/// Close code reported when the peer closed without a status.
const NO_STATUS: u16 = 1005;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// `tickscope/<version>`.
pub fn default_user_agent() -> String {
    format!("tickscope/{}", env!("CARGO_PKG_VERSION"))
}

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// Everything needed to dial a streaming address again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Address returned by the handshake, as given.
    pub url: String,
    /// User agent sent with the upgrade request.
    pub user_agent: String,
}

impl ConnectRequest {
    pub fn new(url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_agent: user_agent.into(),
        }
    }

    /// The address with `http`/`https` rewritten to `ws`/`wss`.
    pub fn streaming_url(&self) -> String {
        if let Some(rest) = self.url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.url.clone()
        }
    }
}

/// A frame queued for the socket's driver task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Handle on one streaming connection.
///
/// Sending only queues the frame; the driver task writes it. Once the
/// connection is gone `send` returns `false`. Dropping every handle closes
/// the connection with [`GOING_AWAY`].
#[derive(Debug)]
pub struct Socket {
    id: u64,
    request: ConnectRequest,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Socket {
    /// Create a handle with a fresh id, returning the receiving end of its
    /// outbound queue. Transports hand the receiver to whatever drives the
    /// connection.
    pub fn channel(request: ConnectRequest) -> (Socket, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let socket = Socket {
            id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
            request,
            outbound,
        };
        (socket, rx)
    }

    /// Unique id; listener callbacks carry it so stale sockets can be told apart.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Parameters this socket was dialed with.
    pub fn request(&self) -> &ConnectRequest {
        &self.request
    }

    /// Queue a text frame. Returns `false` if the connection is gone.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.outbound.send(Outbound::Text(text.into())).is_ok()
    }

    /// Start a graceful close.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.outbound
            .send(Outbound::Close {
                code,
                reason: reason.to_string(),
            })
            .is_ok()
    }

    /// Whether the driver is still accepting frames.
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }
}

/// Connection lifecycle callbacks.
///
/// Each call carries the id of the socket it concerns. Callbacks run on the
/// driver task and should return promptly.
pub trait SocketListener: Send + Sync {
    fn on_open(&self, _socket: u64) {}

    fn on_message(&self, _socket: u64, _text: &str) {}

    /// The remote end sent a close frame.
    fn on_closing(&self, socket: u64, code: u16, reason: &str);

    /// The close handshake finished.
    fn on_closed(&self, socket: u64, code: u16, reason: &str);

    /// The connection could not be opened or broke without a close handshake.
    fn on_failure(&self, socket: u64, error: &TransportError);
}

/// Opens streaming sockets.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run the handshake and dial the address it returns.
    async fn new_socket(&self, listener: Arc<dyn SocketListener>) -> Result<Socket, TransportError>;

    /// Dial a known address again, skipping the handshake.
    ///
    /// The dial runs in the background; `listener` may hear about it before
    /// this returns.
    fn connect_request(&self, request: &ConnectRequest, listener: Arc<dyn SocketListener>) -> Socket;
}

/// [`Transport`] backed by reqwest for the handshake and tokio-tungstenite for the stream.
#[derive(Debug, Clone)]
pub struct SocketTransport {
    base_url: String,
    user_agent: String,
    client: reqwest::Client,
    runtime: Handle,
}

impl SocketTransport {
    pub fn builder() -> SocketTransportBuilder {
        SocketTransportBuilder::new()
    }

    /// Handshake endpoint.
    pub fn create_url(&self) -> String {
        format!("{}/create", self.base_url)
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Dial `address` directly with this transport's user agent.
    pub fn connect(&self, address: &str, listener: Arc<dyn SocketListener>) -> Socket {
        let request = ConnectRequest::new(address, self.user_agent.clone());
        self.connect_request(&request, listener)
    }

    async fn handshake(&self) -> Result<String, TransportError> {
        let response = self
            .client
            .post(self.create_url())
            .header(USER_AGENT, &self.user_agent)
            .header(CONTENT_TYPE, "text/plain")
            .body(Vec::new())
            .send()
            .await?;

        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(TransportError::Http(format!(
                "Handshake returned status {status}"
            )));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                TransportError::Protocol("No address returned from the create request".to_string())
            })?;

        // Relative locations resolve against the endpoint that issued them.
        let address = response
            .url()
            .join(location)
            .map_err(|e| TransportError::InvalidAddress(format!("{location}: {e}")))?;
        Ok(address.to_string())
    }
}

#[async_trait]
impl Transport for SocketTransport {
    async fn new_socket(&self, listener: Arc<dyn SocketListener>) -> Result<Socket, TransportError> {
        let address = self.handshake().await?;
        debug!(url = %address, "Handshake complete");
        Ok(self.connect(&address, listener))
    }

    fn connect_request(&self, request: &ConnectRequest, listener: Arc<dyn SocketListener>) -> Socket {
        let (socket, outbound) = Socket::channel(request.clone());
        self.runtime
            .spawn(drive(socket.id(), request.clone(), outbound, listener));
        socket
    }
}

/// Builder for [`SocketTransport`].
#[derive(Debug, Clone)]
pub struct SocketTransportBuilder {
    base_url: String,
    user_agent: String,
    timeout: Duration,
    runtime: Option<Handle>,
}

impl SocketTransportBuilder {
    pub fn new() -> Self {
        Self {
            base_url: format!("https://{DEFAULT_SOCKET_HOST}"),
            user_agent: default_user_agent(),
            timeout: HANDSHAKE_TIMEOUT,
            runtime: None,
        }
    }

    /// Relay host; the handshake goes to `https://<host>/create`.
    pub fn host(mut self, host: &str) -> Self {
        self.base_url = format!("https://{host}");
        self
    }

    /// Full base URL including the scheme, e.g. `http://127.0.0.1:8080`.
    pub fn base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Handshake request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runtime the socket driver tasks are spawned on. Defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<SocketTransport, TransportError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current()
                .map_err(|e| TransportError::Connection(format!("No tokio runtime: {e}")))?,
        };

        // Redirects are the answer here, so they must not be followed.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(self.timeout)
            .build()?;

        Ok(SocketTransport {
            base_url: self.base_url,
            user_agent: self.user_agent,
            client,
            runtime,
        })
    }
}

impl Default for SocketTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns one WebSocket stream until it ends, reporting to `listener`.
async fn drive(
    id: u64,
    request: ConnectRequest,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    listener: Arc<dyn SocketListener>,
) {
    let stream = match open(&request).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(socket = id, url = %request.url, error = %e, "Unable to open socket");
            listener.on_failure(id, &e);
            return;
        }
    };

    info!(socket = id, url = %request.streaming_url(), "Socket open");
    listener.on_open(id);

    let (mut sink, mut stream) = stream.split();
    let mut accepting = true;
    let mut close_status: Option<(u16, String)> = None;

    loop {
        tokio::select! {
            frame = outbound.recv(), if accepting => {
                let message = match frame {
                    Some(Outbound::Text(text)) => Message::text(text),
                    Some(Outbound::Close { code, reason }) => {
                        accepting = false;
                        close_message(code, reason)
                    }
                    None => {
                        accepting = false;
                        close_message(GOING_AWAY, String::new())
                    }
                };
                if let Err(e) = sink.send(message).await {
                    finish(id, &listener, close_status.take(), e);
                    return;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                        .unwrap_or((NO_STATUS, String::new()));
                    listener.on_closing(id, code, &reason);
                    close_status = Some((code, reason));
                }
                Some(Ok(Message::Text(text))) => listener.on_message(id, text.as_str()),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    finish(id, &listener, close_status.take(), e);
                    return;
                }
                None => {
                    let (code, reason) = close_status.take().unwrap_or((NO_STATUS, String::new()));
                    listener.on_closed(id, code, &reason);
                    return;
                }
            }
        }
    }
}

/// Report the end of a stream that ended with an error.
///
/// Once a close frame has been seen, `ConnectionClosed` is the normal end of
/// the close handshake rather than a failure.
fn finish(
    id: u64,
    listener: &Arc<dyn SocketListener>,
    close_status: Option<(u16, String)>,
    error: WsError,
) {
    match (close_status, error) {
        (Some((code, reason)), WsError::ConnectionClosed | WsError::AlreadyClosed) => {
            listener.on_closed(id, code, &reason);
        }
        (_, error) => {
            let error = TransportError::from(error);
            warn!(socket = id, error = %error, "Socket failed");
            listener.on_failure(id, &error);
        }
    }
}

fn close_message(code: u16, reason: String) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: Utf8Bytes::from(reason),
    }))
}

async fn open(
    request: &ConnectRequest,
) -> Result<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    TransportError,
> {
    let url = request.streaming_url();
    let mut upgrade = url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::InvalidAddress(format!("{url}: {e}")))?;
    let agent = HeaderValue::from_str(&request.user_agent)
        .map_err(|e| TransportError::InvalidAddress(format!("user agent: {e}")))?;
    upgrade.headers_mut().insert(USER_AGENT, agent);

    let (stream, _response) = tokio_tungstenite::connect_async(upgrade).await?;
    Ok(stream)
}
