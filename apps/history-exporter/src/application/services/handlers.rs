//! Event Handlers
//!
//! Business reactions to subscription results:
//!
//! | Handler                     | Topic              | Effect                                      |
//! |-----------------------------|--------------------|---------------------------------------------|
//! | `TransactionDetailFetcher`  | transactions page  | one detail subscription per transaction     |
//! | `InstrumentFetcher`         | transaction detail | one instrument subscription per new ISIN    |
//! | `RawPayloadWriter`          | every topic        | raw body written to the payload sink        |

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;

use super::message_client::MessageClient;
use crate::application::ports::{EventBusPort, EventHandler, HandlerError, PayloadSink, SinkError};
use crate::domain::events::{Event, EventPayload, Instrument, TransactionDetail};

/// Action type that links a detail section to an instrument.
const INSTRUMENT_ACTION: &str = "instrumentDetail";

// =============================================================================
// Transaction Details
// =============================================================================

/// Fetches the detail view of every transaction listed on a page.
pub struct TransactionDetailFetcher {
    client: Arc<MessageClient>,
    bus: Arc<dyn EventBusPort>,
}

impl TransactionDetailFetcher {
    /// Create the fetcher.
    #[must_use]
    pub const fn new(client: Arc<MessageClient>, bus: Arc<dyn EventBusPort>) -> Self {
        Self { client, bus }
    }
}

#[async_trait]
impl EventHandler for TransactionDetailFetcher {
    fn name(&self) -> &'static str {
        "transaction_detail_fetcher"
    }

    async fn handle(&self, event: Event) -> Result<(), HandlerError> {
        let EventPayload::TransactionsPage(page) = event.payload else {
            return Ok(());
        };

        let total = page.transaction_ids.len();
        let results = join_all(page.transaction_ids.into_iter().map(|id| async move {
            match self.client.transaction_detail(&id).await {
                Ok(raw) => {
                    self.bus.publish(Event::transaction_detail(TransactionDetail {
                        transaction_id: id,
                        raw,
                    }));
                    true
                }
                Err(e) => {
                    tracing::warn!(transaction_id = %id, error = %e, "Detail fetch failed");
                    false
                }
            }
        }))
        .await;

        let failed = results.iter().filter(|ok| !**ok).count();
        tracing::debug!(page = page.page, total, failed, "Page details fetched");

        if failed > 0 {
            return Err(HandlerError::Partial { failed, total });
        }
        Ok(())
    }
}

// =============================================================================
// Instruments
// =============================================================================

/// Collect the ISINs referenced by a transaction detail body.
///
/// An instrument is referenced by any object of the form
/// `{"type": "instrumentDetail", "payload": "<ISIN>"}` at any depth.
/// Order of first appearance is kept, duplicates are dropped.
#[must_use]
pub fn referenced_isins(detail: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_isins(detail, &mut found);
    found
}

fn collect_isins(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some(INSTRUMENT_ACTION)
                && let Some(isin) = map.get("payload").and_then(Value::as_str)
                && !isin.is_empty()
                && !found.iter().any(|f| f == isin)
            {
                found.push(isin.to_string());
            }
            for nested in map.values() {
                collect_isins(nested, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_isins(item, found);
            }
        }
        _ => {}
    }
}

/// Fetches instrument data for each ISIN referenced by a transaction detail,
/// once per ISIN for the lifetime of the fetcher.
pub struct InstrumentFetcher {
    client: Arc<MessageClient>,
    bus: Arc<dyn EventBusPort>,
    requested: Mutex<HashSet<String>>,
}

impl InstrumentFetcher {
    /// Create the fetcher.
    #[must_use]
    pub fn new(client: Arc<MessageClient>, bus: Arc<dyn EventBusPort>) -> Self {
        Self {
            client,
            bus,
            requested: Mutex::new(HashSet::new()),
        }
    }

    /// ISINs requested so far.
    #[must_use]
    pub fn requested(&self) -> usize {
        self.requested.lock().len()
    }

    fn claim(&self, isins: Vec<String>) -> Vec<String> {
        let mut requested = self.requested.lock();
        isins
            .into_iter()
            .filter(|isin| requested.insert(isin.clone()))
            .collect()
    }
}

#[async_trait]
impl EventHandler for InstrumentFetcher {
    fn name(&self) -> &'static str {
        "instrument_fetcher"
    }

    async fn handle(&self, event: Event) -> Result<(), HandlerError> {
        let EventPayload::TransactionDetail(detail) = event.payload else {
            return Ok(());
        };

        let body: Value = serde_json::from_slice(&detail.raw)?;
        let isins = self.claim(referenced_isins(&body));
        if isins.is_empty() {
            return Ok(());
        }

        let total = isins.len();
        let results = join_all(isins.into_iter().map(|isin| async move {
            match self.client.instrument(&isin).await {
                Ok(raw) => {
                    self.bus.publish(Event::instrument(Instrument { isin, raw }));
                    true
                }
                Err(e) => {
                    tracing::warn!(isin = %isin, error = %e, "Instrument fetch failed");
                    // Let a later detail retry it.
                    self.requested.lock().remove(&isin);
                    false
                }
            }
        }))
        .await;

        let failed = results.iter().filter(|ok| !**ok).count();
        if failed > 0 {
            return Err(HandlerError::Partial { failed, total });
        }
        Ok(())
    }
}

// =============================================================================
// Raw Payloads
// =============================================================================

/// Logical sink path for an event's raw body.
///
/// - `transactions/page-0001.json`
/// - `details/<transaction-id>.json`
/// - `instruments/<isin>.json`
///
/// IDs are escaped so that distinct IDs never share a file. Returns `None`
/// for an empty ID.
#[must_use]
pub fn payload_path(payload: &EventPayload) -> Option<String> {
    match payload {
        EventPayload::TransactionsPage(page) => {
            Some(format!("transactions/page-{:04}.json", page.page))
        }
        EventPayload::TransactionDetail(detail) => {
            file_stem(&detail.transaction_id).map(|stem| format!("details/{stem}.json"))
        }
        EventPayload::Instrument(instrument) => {
            file_stem(&instrument.isin).map(|stem| format!("instruments/{stem}.json"))
        }
    }
}

/// Percent-escapes path separators, NUL, `%` itself, and a leading dot.
fn file_stem(id: &str) -> Option<String> {
    if id.is_empty() {
        return None;
    }

    let mut stem = String::with_capacity(id.len());
    for (i, c) in id.chars().enumerate() {
        match c {
            '%' => stem.push_str("%25"),
            '/' => stem.push_str("%2F"),
            '\\' => stem.push_str("%5C"),
            '\0' => stem.push_str("%00"),
            '.' if i == 0 => stem.push_str("%2E"),
            c => stem.push(c),
        }
    }
    Some(stem)
}

/// Writes the raw body of every event it receives to a [`PayloadSink`].
pub struct RawPayloadWriter {
    sink: Arc<dyn PayloadSink>,
}

impl RawPayloadWriter {
    /// Create the writer.
    #[must_use]
    pub fn new(sink: Arc<dyn PayloadSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl EventHandler for RawPayloadWriter {
    fn name(&self) -> &'static str {
        "raw_payload_writer"
    }

    async fn handle(&self, event: Event) -> Result<(), HandlerError> {
        let Some(path) = payload_path(&event.payload) else {
            return Err(SinkError::InvalidPath(format!("{} event without id", event.topic())).into());
        };
        self.sink
            .write_bytes(&path, event.payload.raw().clone())
            .await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
