//! Port Interfaces
//!
//! Contracts between the orchestration logic and the outside world,
//! following the Hexagonal Architecture pattern. These are the contracts
//! that infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SubscriptionPort`: issue a subscription over the streaming connection
//! - `TokenSource`: read-only access to the session credentials
//! - `PayloadSink`: persist raw response bodies
//! - `EventBusPort`: topic-keyed fan-out of events to `EventHandler`s

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

use crate::domain::events::{Event, Topic};
use crate::domain::subscription::{SubscriptionId, SubscriptionRequest};

// =============================================================================
// Pending Subscription
// =============================================================================

/// Errors observed while waiting for a subscription's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The mailbox closed without a payload (error frame, teardown, or the
    /// ID was re-registered).
    #[error("subscription {0} closed without a response")]
    Closed(SubscriptionId),

    /// No response arrived in time.
    #[error("subscription {id} timed out after {timeout:?}")]
    Timeout {
        /// Subscription ID.
        id: SubscriptionId,
        /// Time waited.
        timeout: Duration,
    },
}

type Release = Box<dyn FnOnce(SubscriptionId) + Send>;

/// Receiving end of one subscription.
///
/// Resolves at most once: either with the response body or with
/// [`SubscriptionError::Closed`]. Dropping it before it resolves, including
/// on a timeout, runs the release hook so the issuer can forget the
/// subscription.
pub struct PendingSubscription {
    id: SubscriptionId,
    rx: oneshot::Receiver<Bytes>,
    release: Option<Release>,
}

impl PendingSubscription {
    /// Wrap the receiving half of a subscription mailbox.
    #[must_use]
    pub fn new(id: SubscriptionId, rx: oneshot::Receiver<Bytes>) -> Self {
        Self {
            id,
            rx,
            release: None,
        }
    }

    /// Run `release` if this subscription is dropped before it resolves.
    #[must_use]
    pub fn with_release<F>(mut self, release: F) -> Self
    where
        F: FnOnce(SubscriptionId) + Send + 'static,
    {
        self.release = Some(Box::new(release));
        self
    }

    /// Subscription ID.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the response body.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::Closed`] if the mailbox closes first.
    pub async fn recv(mut self) -> Result<Bytes, SubscriptionError> {
        let outcome = (&mut self.rx).await;
        self.release = None;
        outcome.map_err(|_| SubscriptionError::Closed(self.id))
    }

    /// Wait for the response body, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::Timeout`] on expiry, or
    /// [`SubscriptionError::Closed`] if the mailbox closes first.
    pub async fn recv_timeout(self, timeout: Duration) -> Result<Bytes, SubscriptionError> {
        let id = self.id;
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| SubscriptionError::Timeout { id, timeout })?
    }
}

impl Drop for PendingSubscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.id);
        }
    }
}

impl fmt::Debug for PendingSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSubscription")
            .field("id", &self.id)
            .field("armed", &self.release.is_some())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Ports
// =============================================================================

/// Errors issuing a subscription.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    /// The connection has not been established yet.
    #[error("not connected")]
    NotConnected,

    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The `sub` frame could not be written.
    #[error("subscribe failed: {0}")]
    Send(String),
}

/// Issues subscriptions over the streaming connection.
///
/// Returns as soon as the request is on the wire; the response is awaited
/// separately through the returned [`PendingSubscription`].
#[async_trait]
pub trait SubscriptionPort: Send + Sync {
    /// Send a subscribe request.
    async fn subscribe(
        &self,
        request: SubscriptionRequest,
    ) -> Result<PendingSubscription, SubscribeError>;
}

/// Errors from one request/response exchange.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The subscription could not be issued.
    #[error(transparent)]
    Subscribe(#[from] SubscribeError),

    /// The response never arrived.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

/// Session and refresh tokens of the logged-in user.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionTokens {
    /// Session token sent with every subscription.
    pub session: String,
    /// Refresh token, if the credential source has one.
    pub refresh: Option<String>,
}

impl fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokens")
            .field("session", &"[REDACTED]")
            .field("refresh", &self.refresh.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Read-only credential source.
#[cfg_attr(test, mockall::automock)]
pub trait TokenSource: Send + Sync {
    /// Current tokens.
    fn tokens(&self) -> SessionTokens;
}

/// Errors from a [`PayloadSink`].
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Logical path is empty, absolute, or escapes the sink root.
    #[error("invalid logical path: {0}")]
    InvalidPath(String),

    /// Underlying I/O failed.
    #[error("I/O error writing {path}: {source}")]
    Io {
        /// Logical path being written.
        path: String,
        /// Cause.
        #[source]
        source: std::io::Error,
    },
}

/// Destination for raw response bodies.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayloadSink: Send + Sync {
    /// Write `payload` under `logical_path`, replacing any previous content.
    async fn write_bytes(&self, logical_path: &str, payload: Bytes) -> Result<(), SinkError>;
}

// =============================================================================
// Event Bus
// =============================================================================

/// Errors returned by event handlers. Logged at the bus boundary, never
/// surfaced to publishers.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// A cascaded request failed.
    #[error("request failed: {0}")]
    Request(#[from] RequestError),

    /// Writing to the payload sink failed.
    #[error("sink write failed: {0}")]
    Sink(#[from] SinkError),

    /// Response body could not be interpreted.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// Some cascaded requests of one event failed.
    #[error("{failed} of {total} requests failed")]
    Partial {
        /// Requests that failed.
        failed: usize,
        /// Requests attempted.
        total: usize,
    },
}

/// Reacts to events on the topics it is subscribed to.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name for logs.
    fn name(&self) -> &'static str;

    /// Handle one event.
    async fn handle(&self, event: Event) -> Result<(), HandlerError>;
}

/// Topic-keyed, fire-and-forget event fan-out.
#[async_trait]
pub trait EventBusPort: Send + Sync {
    /// Register `handler` on `topic`.
    fn subscribe(&self, topic: Topic, handler: Arc<dyn EventHandler>);

    /// Dispatch `event` to the handlers registered on its topic without
    /// waiting for them. Returns how many handlers it was dispatched to.
    fn publish(&self, event: Event) -> usize;

    /// Wait until every dispatched handler, including those dispatched by
    /// handlers meanwhile, has finished.
    async fn wait_idle(&self);
}
