//! Streaming Connection Manager
//!
//! Owns the single WebSocket connection to the broker's streaming endpoint
//! and multiplexes request/response subscriptions over it.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──ack──► Connected ──close()──► Closing ──► Closed
//!       ▲                         │
//!       └──── dial/handshake ─────┘
//!                 failure
//! ```
//!
//! # Read Loop
//!
//! One background task per connection decodes inbound frames in wire order:
//!
//! - `A` (data): deliver the payload, close the subscription, queue `unsub`
//! - `C` (continue): nothing, more frames follow
//! - `E` (error): close the subscription without payload, queue `unsub`
//! - malformed or unknown: log and keep reading
//!
//! `unsub` frames are written by a separate task, so the read loop never
//! waits on the write half. A subscription whose receiver is dropped before
//! it resolves is forgotten and queued for `unsub` the same way.
//!
//! Cancellation, a transport error, a failed write, or a server close tears
//! the connection down and closes every open subscription.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, ConnectOptions, FrameCodec, FrameState};
use super::publisher::SubscriptionRegistry;
use crate::application::ports::{PendingSubscription, SubscribeError, SubscriptionPort};
use crate::domain::subscription::{FIRST_SUBSCRIPTION_ID, SubscriptionId, SubscriptionRequest};
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Default protocol version sent in the `connect` frame.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 31;

/// Default bound on dialing and on waiting for the handshake ack.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Error Type
// =============================================================================

/// Errors raised by the connection manager.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Subscribe attempted before `connect()`.
    #[error("not connected")]
    NotConnected,

    /// Subscribe or connect attempted after `close()`.
    #[error("connection closed")]
    ConnectionClosed,

    /// Dial, handshake send, or handshake ack failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    Transport(#[from] tungstenite::Error),

    /// Frame encoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl From<StreamError> for SubscribeError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::NotConnected => Self::NotConnected,
            StreamError::ConnectionClosed => Self::ConnectionClosed,
            other => Self::Send(other.to_string()),
        }
    }
}

// =============================================================================
// State and Configuration
// =============================================================================

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection has been established.
    #[default]
    Disconnected,
    /// Dialing and handshaking.
    Connecting,
    /// Handshake acknowledged, read loop running.
    Connected,
    /// Teardown in progress.
    Closing,
    /// Torn down; the instance cannot be reused.
    Closed,
}

impl ConnectionState {
    /// State name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

/// Configuration for the streaming connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL of the streaming endpoint.
    pub url: String,
    /// Protocol version sent in the `connect` frame.
    pub protocol_version: u32,
    /// Handshake options sent in the `connect` frame.
    pub connect_options: ConnectOptions,
    /// Bound on dialing and on waiting for the handshake ack.
    pub connect_timeout: Duration,
}

impl ConnectionConfig {
    /// Configuration with default protocol settings for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            connect_options: ConnectOptions::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Write half plus ID allocation, guarded by one lock so that IDs are
/// handed out in the same order frames hit the wire.
struct Link {
    writer: Option<WsSink>,
    next_id: SubscriptionId,
}

// =============================================================================
// Stream Connection
// =============================================================================

/// Single multiplexed connection to the streaming endpoint.
///
/// `subscribe()` returns once the `sub` frame is written; the response is
/// awaited through the returned [`PendingSubscription`].
pub struct StreamConnection {
    config: ConnectionConfig,
    codec: FrameCodec,
    registry: Arc<SubscriptionRegistry>,
    link: Mutex<Link>,
    state: RwLock<ConnectionState>,
    shutdown: CancellationToken,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    unsub_tx: mpsc::UnboundedSender<SubscriptionId>,
    unsub_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<SubscriptionId>>>,
}

impl StreamConnection {
    /// Create a disconnected instance.
    ///
    /// Cancelling `cancel` stops the read loop and tears the connection down.
    #[must_use]
    pub fn new(config: ConnectionConfig, cancel: &CancellationToken) -> Self {
        let (unsub_tx, unsub_rx) = mpsc::unbounded_channel();

        Self {
            config,
            codec: FrameCodec::new(),
            registry: Arc::new(SubscriptionRegistry::new()),
            link: Mutex::new(Link {
                writer: None,
                next_id: FIRST_SUBSCRIPTION_ID,
            }),
            state: RwLock::new(ConnectionState::Disconnected),
            shutdown: cancel.child_token(),
            reader: parking_lot::Mutex::new(None),
            unsub_tx,
            unsub_rx: parking_lot::Mutex::new(Some(unsub_rx)),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Number of subscriptions still waiting for a response.
    #[must_use]
    pub fn open_subscriptions(&self) -> usize {
        self.registry.len()
    }

    /// Dial, handshake, and start the read loop.
    ///
    /// Returns immediately if already connected.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::HandshakeFailed`] if dialing, sending the
    /// `connect` frame, or reading its ack fails, and
    /// [`StreamError::ConnectionClosed`] after `close()`.
    pub async fn connect(self: &Arc<Self>) -> Result<(), StreamError> {
        let mut link = self.link.lock().await;

        match self.state() {
            ConnectionState::Connected => {
                tracing::debug!("Already connected");
                return Ok(());
            }
            ConnectionState::Closing | ConnectionState::Closed => {
                return Err(StreamError::ConnectionClosed);
            }
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        self.set_state(ConnectionState::Connecting);
        tracing::info!(url = %self.config.url, "Connecting to streaming endpoint");

        let (writer, reader) = match self.dial().await {
            Ok(halves) => halves,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        link.writer = Some(writer);
        link.next_id = FIRST_SUBSCRIPTION_ID;
        self.set_state(ConnectionState::Connected);

        let this = Arc::clone(self);
        *self.reader.lock() = Some(tokio::spawn(this.read_loop(reader)));

        if let Some(queue) = self.unsub_rx.lock().take() {
            tokio::spawn(Arc::clone(self).unsub_loop(queue));
        }

        tracing::info!("Streaming connection established");
        Ok(())
    }

    /// Send a `sub` frame and return the subscription's mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::NotConnected`] before `connect()`,
    /// [`StreamError::ConnectionClosed`] after `close()` or a failed write,
    /// and a transport or codec error if the frame cannot be written. A
    /// failed write takes the connection down.
    pub async fn subscribe(
        &self,
        request: SubscriptionRequest,
    ) -> Result<PendingSubscription, StreamError> {
        let mut guard = self.link.lock().await;

        match self.state() {
            ConnectionState::Connected => {}
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                return Err(StreamError::NotConnected);
            }
            ConnectionState::Closing | ConnectionState::Closed => {
                return Err(StreamError::ConnectionClosed);
            }
        }

        let Link { writer, next_id } = &mut *guard;
        let writer = writer.as_mut().ok_or(StreamError::NotConnected)?;

        let id = *next_id;
        let text = self.codec.encode_subscribe(id, &request)?;
        let pending = self.send_subscribe(writer, id, text).await?;
        *next_id += 1;

        metrics::record_subscription_opened(request.kind);
        tracing::debug!(
            subscription_id = id,
            kind = %request.kind,
            id = ?request.id,
            after = ?request.after,
            "Subscription sent"
        );

        Ok(pending)
    }

    /// Tear the connection down.
    ///
    /// Stops the read loop, closes the socket, and closes every open
    /// subscription. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the close handshake fails on a socket
    /// that was still open.
    pub async fn close(&self) -> Result<(), StreamError> {
        let mut link = self.link.lock().await;

        let Some(mut writer) = link.writer.take() else {
            self.set_state(ConnectionState::Closed);
            self.shutdown.cancel();
            return Ok(());
        };

        self.set_state(ConnectionState::Closing);
        self.shutdown.cancel();

        let result = writer.close().await;

        self.set_state(ConnectionState::Closed);
        let abandoned = self.registry.close_all();
        tracing::info!(abandoned_subscriptions = abandoned, "Streaming connection closed");

        match result {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Wait for the read loop to exit.
    pub async fn closed(&self) {
        let handle = self.reader.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "Read loop task failed");
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Register the mailbox for `id`, then write its `sub` frame.
    ///
    /// Registration comes first so a fast response cannot miss its mailbox.
    /// A failed write un-registers it and takes the connection down.
    async fn send_subscribe<W>(
        &self,
        writer: &mut W,
        id: SubscriptionId,
        text: String,
    ) -> Result<PendingSubscription, StreamError>
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let registry = Arc::clone(&self.registry);
        let unsub = self.unsub_tx.clone();
        let pending = self.registry.subscribe(id).with_release(move |id| {
            if registry.close(id) {
                tracing::debug!(subscription_id = id, "Subscription abandoned");
                let _ = unsub.send(id);
            }
        });

        if let Err(e) = writer.send(Message::Text(text.into())).await {
            self.registry.close(id);
            self.fail_link(&e);
            return Err(e.into());
        }

        Ok(pending)
    }

    /// Mark a connection whose write half failed as closing and stop the
    /// read loop, which finishes the teardown.
    fn fail_link(&self, error: &tungstenite::Error) {
        tracing::warn!(error = %error, "Streaming write failed, closing connection");
        self.set_state(ConnectionState::Closing);
        self.shutdown.cancel();
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::debug!(from = previous.as_str(), to = state.as_str(), "Connection state");
        }
    }

    async fn dial(&self) -> Result<(WsSink, WsSource), StreamError> {
        let timeout = self.config.connect_timeout;

        let (ws_stream, _response) =
            tokio::time::timeout(timeout, connect_async(self.config.url.as_str()))
                .await
                .map_err(|_| StreamError::HandshakeFailed(format!("dial timed out after {timeout:?}")))?
                .map_err(|e| StreamError::HandshakeFailed(format!("dial failed: {e}")))?;

        let (mut write, mut read) = ws_stream.split();

        let connect = self
            .codec
            .encode_connect(self.config.protocol_version, &self.config.connect_options)
            .map_err(|e| StreamError::HandshakeFailed(format!("failed to encode connect: {e}")))?;

        write
            .send(Message::Text(connect.into()))
            .await
            .map_err(|e| StreamError::HandshakeFailed(format!("failed to send connect: {e}")))?;

        // The first frame back acknowledges the handshake; its content is not used.
        let ack = tokio::time::timeout(timeout, read.next())
            .await
            .map_err(|_| StreamError::HandshakeFailed("handshake ack timed out".to_string()))?
            .ok_or_else(|| {
                StreamError::HandshakeFailed("stream ended before handshake ack".to_string())
            })?
            .map_err(|e| StreamError::HandshakeFailed(format!("failed to read ack: {e}")))?;

        if let Message::Close(frame) = ack {
            return Err(StreamError::HandshakeFailed(format!(
                "server closed during handshake: {frame:?}"
            )));
        }

        tracing::debug!("Handshake acknowledged");
        Ok((write, read))
    }

    async fn read_loop(self: Arc<Self>, mut read: WsSource) {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    tracing::debug!("Read loop cancelled");
                    break;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(text.as_str());
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Server sent close frame");
                            break;
                        }
                        Some(Ok(_)) => {
                            // Ping/pong/binary carry no subscription data
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Streaming read failed");
                            break;
                        }
                        None => {
                            tracing::info!("WebSocket stream ended");
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = self.close().await {
            tracing::debug!(error = %e, "Close after read loop exit failed");
        }
    }

    fn handle_text(&self, text: &str) {
        let frame = match self.codec.decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                metrics::record_malformed_frame();
                tracing::warn!(error = %e, "Skipping malformed frame");
                return;
            }
        };

        metrics::record_frame_received(&frame.state);

        match frame.state {
            FrameState::Data => {
                tracing::debug!(
                    subscription_id = frame.id,
                    bytes = frame.payload.len(),
                    "Data frame received"
                );
                self.registry.publish(frame.id, frame.payload);
                self.registry.close(frame.id);
                self.queue_unsubscribe(frame.id);
            }
            FrameState::Continue => {
                tracing::trace!(subscription_id = frame.id, "Continue frame received");
            }
            FrameState::Error => {
                tracing::warn!(
                    subscription_id = frame.id,
                    error = %String::from_utf8_lossy(&frame.payload),
                    "Server rejected subscription"
                );
                self.registry.close(frame.id);
                self.queue_unsubscribe(frame.id);
            }
            FrameState::Unknown(code) => {
                tracing::debug!(
                    subscription_id = frame.id,
                    code = %code,
                    "Ignoring unknown frame state"
                );
            }
        }
    }

    fn queue_unsubscribe(&self, id: SubscriptionId) {
        if self.unsub_tx.send(id).is_err() {
            tracing::debug!(subscription_id = id, "Unsub queue closed");
        }
    }

    async fn unsub_loop(self: Arc<Self>, mut queue: mpsc::UnboundedReceiver<SubscriptionId>) {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                next = queue.recv() => match next {
                    Some(id) => self.unsubscribe(id).await,
                    None => break,
                },
            }
        }
    }

    /// Best-effort `unsub`; the outcome of the subscription is already settled.
    async fn unsubscribe(&self, id: SubscriptionId) {
        let mut link = self.link.lock().await;

        if self.state() != ConnectionState::Connected {
            return;
        }
        let Some(writer) = link.writer.as_mut() else {
            return;
        };

        let text = self.codec.encode_unsubscribe(id);
        if let Err(e) = writer.send(Message::Text(text.into())).await {
            tracing::warn!(subscription_id = id, "Failed to send unsub");
            self.fail_link(&e);
        }
    }
}

#[async_trait]
impl SubscriptionPort for StreamConnection {
    async fn subscribe(
        &self,
        request: SubscriptionRequest,
    ) -> Result<PendingSubscription, SubscribeError> {
        Ok(Self::subscribe(self, request).await?)
    }
}

// =============================================================================
// Tests
// =============================================================================
