//! Event Bus
//!
//! Topic-keyed, fire-and-forget fan-out that decouples the producers of
//! subscription results from the handlers reacting to them.
//!
//! # Dispatch Policy
//!
//! `publish` snapshots the handlers registered on the event's topic and
//! spawns one task per handler, then returns without waiting. Spawning is
//! unbounded so the publisher never blocks; execution is bounded by a shared
//! semaphore (`max_concurrent_handlers`), so a burst of events queues up as
//! parked tasks instead of flooding the server with subscriptions. There is
//! no ordering between handlers of one publish, nor between publishes.
//!
//! A failing or panicking handler only affects its own task.
//!
//! All spawned tasks are tracked, so [`EventBus::wait_idle`] can wait for a
//! cascade of handlers publishing further events to drain completely.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

use crate::application::ports::{EventBusPort, EventHandler};
use crate::domain::events::{Event, Topic};
use crate::infrastructure::config::EventBusSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Event bus configuration.
#[derive(Debug, Clone, Copy)]
pub struct EventBusConfig {
    /// Handlers allowed to run at once (0 = unbounded).
    pub max_concurrent_handlers: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: 16,
        }
    }
}

impl From<EventBusSettings> for EventBusConfig {
    fn from(settings: EventBusSettings) -> Self {
        Self {
            max_concurrent_handlers: settings.max_concurrent_handlers,
        }
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Topic-keyed publish/subscribe bus.
///
/// # Example
///
/// ```rust,no_run
/// use history_exporter::infrastructure::event_bus::{EventBus, EventBusConfig};
///
/// # async fn demo() {
/// let bus = EventBus::new(EventBusConfig::default());
/// // bus.subscribe(Topic::TransactionsPage, handler);
/// // bus.publish(event);
/// bus.wait_idle().await;
/// # }
/// ```
pub struct EventBus {
    handlers: RwLock<HashMap<Topic, Vec<Arc<dyn EventHandler>>>>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl EventBus {
    /// Create a bus with the given configuration.
    #[must_use]
    pub fn new(config: EventBusConfig) -> Self {
        let permits = match config.max_concurrent_handlers {
            0 => Semaphore::MAX_PERMITS,
            n => n,
        };

        Self {
            handlers: RwLock::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(permits)),
            tracker: TaskTracker::new(),
        }
    }

    /// Create a bus with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(EventBusConfig::default())
    }

    /// Register `handler` on `topic`.
    pub fn subscribe(&self, topic: Topic, handler: Arc<dyn EventHandler>) {
        tracing::debug!(topic = %topic, handler = handler.name(), "Handler registered");
        self.handlers.write().entry(topic).or_default().push(handler);
    }

    /// Dispatch `event` to every handler currently registered on its topic.
    ///
    /// Returns the number of handlers the event was dispatched to. Must be
    /// called from within a Tokio runtime.
    pub fn publish(&self, event: Event) -> usize {
        let topic = event.topic();
        let handlers = self
            .handlers
            .read()
            .get(&topic)
            .cloned()
            .unwrap_or_default();

        metrics::record_event_published(topic);

        if handlers.is_empty() {
            tracing::trace!(topic = %topic, id = %event.id, "No handlers for event");
            return 0;
        }

        tracing::debug!(
            topic = %topic,
            name = event.name,
            id = %event.id,
            handlers = handlers.len(),
            "Publishing event"
        );

        let count = handlers.len();
        for handler in handlers {
            let event = event.clone();
            let permits = Arc::clone(&self.permits);

            self.tracker.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };

                let id = event.id.clone();
                if let Err(e) = handler.handle(event).await {
                    metrics::record_handler_failure(topic);
                    tracing::warn!(
                        topic = %topic,
                        handler = handler.name(),
                        id = %id,
                        error = %e,
                        "Event handler failed"
                    );
                }
            });
        }

        count
    }

    /// Number of handlers registered on `topic`.
    #[must_use]
    pub fn handler_count(&self, topic: Topic) -> usize {
        self.handlers.read().get(&topic).map_or(0, Vec::len)
    }

    /// Number of handler tasks spawned and not yet finished.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every handler task, including those spawned by handlers
    /// while waiting, has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[async_trait]
impl EventBusPort for EventBus {
    fn subscribe(&self, topic: Topic, handler: Arc<dyn EventHandler>) {
        Self::subscribe(self, topic, handler);
    }

    fn publish(&self, event: Event) -> usize {
        Self::publish(self, event)
    }

    async fn wait_idle(&self) {
        Self::wait_idle(self).await;
    }
}

// =============================================================================
// Tests
// =============================================================================
