//! Subscription Registry
//!
//! Maps subscription IDs to single-slot mailboxes and routes inbound
//! payloads to the task waiting on them.
//!
//! # Delivery
//!
//! Each subscription owns a `oneshot` mailbox. Delivering never blocks the
//! caller. A mailbox carries at most one payload; delivering consumes it.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::application::ports::PendingSubscription;
use crate::domain::subscription::SubscriptionId;
use crate::infrastructure::metrics;

/// Outcome of [`SubscriptionRegistry::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The payload was handed to the waiting receiver.
    Delivered,
    /// No mailbox was registered for the ID; the payload was dropped.
    Unmatched,
    /// The receiver had already gone away; the payload was dropped.
    ReceiverDropped,
}

/// Process-local broker from subscription ID to mailbox.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    mailboxes: Mutex<HashMap<SubscriptionId, oneshot::Sender<Bytes>>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mailbox for `id` and return its receiving end.
    ///
    /// Registering an ID that is still open replaces the previous mailbox;
    /// its receiver then observes a closed channel.
    pub fn subscribe(&self, id: SubscriptionId) -> PendingSubscription {
        let (tx, rx) = oneshot::channel();

        if self.mailboxes.lock().insert(id, tx).is_some() {
            tracing::warn!(
                subscription_id = id,
                "Subscription re-registered while open, previous receiver closed"
            );
        }

        PendingSubscription::new(id, rx)
    }

    /// Deliver `payload` to the mailbox registered for `id`.
    ///
    /// Unknown IDs are logged and dropped, never reported as an error.
    pub fn publish(&self, id: SubscriptionId, payload: Bytes) -> Delivery {
        // Take the sender out under the lock, send outside of it.
        let sender = self.mailboxes.lock().remove(&id);

        let Some(sender) = sender else {
            tracing::warn!(
                subscription_id = id,
                bytes = payload.len(),
                "No subscription registered for payload, dropping"
            );
            metrics::record_unmatched_payload();
            return Delivery::Unmatched;
        };

        if sender.send(payload).is_err() {
            tracing::debug!(subscription_id = id, "Subscriber gone, payload dropped");
            return Delivery::ReceiverDropped;
        }

        Delivery::Delivered
    }

    /// Close the mailbox for `id` and forget it.
    ///
    /// Idempotent. Returns `true` if a mailbox was removed.
    pub fn close(&self, id: SubscriptionId) -> bool {
        let removed = self.mailboxes.lock().remove(&id);
        removed.is_some()
    }

    /// Close every open mailbox. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.mailboxes.lock().drain().collect();
        drained.len()
    }

    /// Whether a mailbox is registered for `id`.
    #[must_use]
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.mailboxes.lock().contains_key(&id)
    }

    /// Number of open mailboxes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mailboxes.lock().len()
    }

    /// Whether no mailbox is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mailboxes.lock().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
