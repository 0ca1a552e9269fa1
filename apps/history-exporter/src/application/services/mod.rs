//! Application Services
//!
//! Services that sequence the export on top of raw subscriptions.
//!
//! - `MessageClient`: typed request/response calls with timeouts
//! - `TransactionPager`: cursor pagination over the transaction timeline
//! - `TransactionDetailFetcher`, `InstrumentFetcher`: cascading fetches
//! - `RawPayloadWriter`: persists every raw response body
//! - `HistoryExport`: wires the handlers and drives one export run

mod export;
mod handlers;
mod message_client;
mod pagination;

pub use export::{ExportSummary, HistoryExport};
pub use handlers::{
    InstrumentFetcher, RawPayloadWriter, TransactionDetailFetcher, payload_path, referenced_isins,
};
pub use message_client::MessageClient;
pub use pagination::{PaginationError, PaginationSummary, TransactionPager, parse_page};

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted [`SubscriptionPort`] and recording [`EventBusPort`] for
    //! service tests.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    use crate::application::ports::{
        EventBusPort, EventHandler, PendingSubscription, SubscribeError, SubscriptionPort,
    };
    use crate::domain::events::{Event, Topic};
    use crate::domain::subscription::{FIRST_SUBSCRIPTION_ID, SubscriptionRequest};

    type Responder = Box<dyn Fn(&SubscriptionRequest) -> Option<Bytes> + Send + Sync>;

    /// Answers each subscription immediately from a closure. `None` closes
    /// the subscription without a payload.
    pub struct ScriptedPort {
        respond: Option<Responder>,
        requests: Mutex<Vec<SubscriptionRequest>>,
        parked: Mutex<Vec<oneshot::Sender<Bytes>>>,
        next_id: AtomicU64,
    }

    impl ScriptedPort {
        pub fn new<F>(respond: F) -> Arc<Self>
        where
            F: Fn(&SubscriptionRequest) -> Option<Bytes> + Send + Sync + 'static,
        {
            Arc::new(Self {
                respond: Some(Box::new(respond)),
                requests: Mutex::new(Vec::new()),
                parked: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(FIRST_SUBSCRIPTION_ID),
            })
        }

        /// A port that never answers.
        pub fn silent() -> Arc<Self> {
            Arc::new(Self {
                respond: None,
                requests: Mutex::new(Vec::new()),
                parked: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(FIRST_SUBSCRIPTION_ID),
            })
        }

        pub fn requests(&self) -> Vec<SubscriptionRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl SubscriptionPort for ScriptedPort {
        async fn subscribe(
            &self,
            request: SubscriptionRequest,
        ) -> Result<PendingSubscription, SubscribeError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = oneshot::channel();

            match &self.respond {
                Some(respond) => {
                    if let Some(body) = respond(&request) {
                        let _ = tx.send(body);
                    }
                }
                None => self.parked.lock().push(tx),
            }

            self.requests.lock().push(request);
            Ok(PendingSubscription::new(id, rx))
        }
    }

    /// Records published events without dispatching them.
    #[derive(Default)]
    pub struct RecordingBus {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingBus {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }

        pub fn published(&self, topic: Topic) -> usize {
            self.events.lock().iter().filter(|e| e.topic() == topic).count()
        }
    }

    #[async_trait]
    impl EventBusPort for RecordingBus {
        fn subscribe(&self, _topic: Topic, _handler: Arc<dyn EventHandler>) {}

        fn publish(&self, event: Event) -> usize {
            self.events.lock().push(event);
            0
        }

        async fn wait_idle(&self) {}
    }
}
