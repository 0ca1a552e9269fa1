//! History Export
//!
//! Wires the handlers onto the event bus and drives one export run:
//!
//! ```text
//! TransactionPager ──page──► TransactionDetailFetcher ──detail──► InstrumentFetcher ──instrument──►
//!        │                              │                                 │
//!        └──────────────────────────────┴─────────────► RawPayloadWriter ◄┘
//! ```

use std::sync::Arc;

use super::handlers::{InstrumentFetcher, RawPayloadWriter, TransactionDetailFetcher};
use super::message_client::MessageClient;
use super::pagination::{PaginationError, TransactionPager};
use crate::application::ports::{EventBusPort, PayloadSink};
use crate::domain::events::Topic;

/// Outcome of a completed export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    /// Transaction pages fetched.
    pub pages: u32,
    /// Transactions listed across all pages.
    pub transactions: usize,
    /// Distinct instruments fetched.
    pub instruments: usize,
}

/// One export of the transaction history.
pub struct HistoryExport {
    bus: Arc<dyn EventBusPort>,
    pager: TransactionPager,
    instruments: Arc<InstrumentFetcher>,
}

impl HistoryExport {
    /// Register the export handlers on `bus`.
    #[must_use]
    pub fn new(
        client: Arc<MessageClient>,
        sink: Arc<dyn PayloadSink>,
        bus: Arc<dyn EventBusPort>,
        max_pages: u32,
    ) -> Self {
        let details = Arc::new(TransactionDetailFetcher::new(
            Arc::clone(&client),
            Arc::clone(&bus),
        ));
        let instruments = Arc::new(InstrumentFetcher::new(
            Arc::clone(&client),
            Arc::clone(&bus),
        ));
        let writer = Arc::new(RawPayloadWriter::new(sink));

        bus.subscribe(Topic::TransactionsPage, details);
        bus.subscribe(Topic::TransactionDetail, Arc::clone(&instruments) as _);
        for topic in Topic::all() {
            bus.subscribe(*topic, Arc::clone(&writer) as _);
        }

        Self {
            pager: TransactionPager::new(client, Arc::clone(&bus), max_pages),
            bus,
            instruments,
        }
    }

    /// Paginate the timeline and wait for every cascaded fetch and write.
    ///
    /// # Errors
    ///
    /// Returns the pagination error, after the cascade of the pages fetched
    /// before it has drained.
    pub async fn run(&self) -> Result<ExportSummary, PaginationError> {
        let result = self.pager.run().await;
        self.bus.wait_idle().await;

        let summary = result?;
        Ok(ExportSummary {
            pages: summary.pages,
            transactions: summary.transactions,
            instruments: self.instruments.requested(),
        })
    }
}
