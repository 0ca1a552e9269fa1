//! Event Types
//!
//! Events carried by the in-process event bus. The payload is a sum type with
//! one variant per topic, so a handler registered on a topic always receives
//! the payload shape that topic promises.

use std::fmt;

use bytes::Bytes;

/// Routing key of the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// A page of the transaction timeline arrived.
    TransactionsPage,
    /// The detail view of one transaction arrived.
    TransactionDetail,
    /// Static data of one instrument arrived.
    Instrument,
}

impl Topic {
    /// All topics.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::TransactionsPage, Self::TransactionDetail, Self::Instrument]
    }

    /// Topic name used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TransactionsPage => "timeline.transactions",
            Self::TransactionDetail => "timeline.detail",
            Self::Instrument => "instrument",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// One page of the transaction timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionsPage {
    /// Page counter, starting at 1.
    pub page: u32,
    /// Transaction IDs listed on this page, in server order.
    pub transaction_ids: Vec<String>,
    /// Cursor for the following page, if any.
    pub next_cursor: Option<String>,
    /// Raw response body.
    pub raw: Bytes,
}

/// Detail view of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDetail {
    /// Transaction ID the detail belongs to.
    pub transaction_id: String,
    /// Raw response body.
    pub raw: Bytes,
}

/// Static data of one instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrument {
    /// ISIN of the instrument.
    pub isin: String,
    /// Raw response body.
    pub raw: Bytes,
}

/// Payload of an [`Event`], one variant per [`Topic`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// Payload of [`Topic::TransactionsPage`].
    TransactionsPage(TransactionsPage),
    /// Payload of [`Topic::TransactionDetail`].
    TransactionDetail(TransactionDetail),
    /// Payload of [`Topic::Instrument`].
    Instrument(Instrument),
}

impl EventPayload {
    /// Topic this payload is published on.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        match self {
            Self::TransactionsPage(_) => Topic::TransactionsPage,
            Self::TransactionDetail(_) => Topic::TransactionDetail,
            Self::Instrument(_) => Topic::Instrument,
        }
    }

    /// Raw response body the payload was built from.
    #[must_use]
    pub const fn raw(&self) -> &Bytes {
        match self {
            Self::TransactionsPage(p) => &p.raw,
            Self::TransactionDetail(d) => &d.raw,
            Self::Instrument(i) => &i.raw,
        }
    }
}

// =============================================================================
// Event
// =============================================================================

/// An event routed by the event bus.
///
/// Cloning is cheap: raw bodies are reference-counted [`Bytes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Correlates the event to a domain entity (page number, transaction ID, ISIN).
    pub id: String,
    /// Semantic event name.
    pub name: &'static str,
    /// Typed payload.
    pub payload: EventPayload,
}

impl Event {
    /// Event name for a received transactions page.
    pub const TRANSACTIONS_PAGE_RECEIVED: &'static str = "transactions_page_received";
    /// Event name for a received transaction detail.
    pub const DETAIL_RECEIVED: &'static str = "detail_received";
    /// Event name for received instrument data.
    pub const INSTRUMENT_RECEIVED: &'static str = "instrument_received";

    /// Build a "transactions page received" event.
    #[must_use]
    pub fn transactions_page(page: TransactionsPage) -> Self {
        Self {
            id: page.page.to_string(),
            name: Self::TRANSACTIONS_PAGE_RECEIVED,
            payload: EventPayload::TransactionsPage(page),
        }
    }

    /// Build a "detail received" event.
    #[must_use]
    pub fn transaction_detail(detail: TransactionDetail) -> Self {
        Self {
            id: detail.transaction_id.clone(),
            name: Self::DETAIL_RECEIVED,
            payload: EventPayload::TransactionDetail(detail),
        }
    }

    /// Build an "instrument received" event.
    #[must_use]
    pub fn instrument(instrument: Instrument) -> Self {
        Self {
            id: instrument.isin.clone(),
            name: Self::INSTRUMENT_RECEIVED,
            payload: EventPayload::Instrument(instrument),
        }
    }

    /// Topic the event is routed on.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        self.payload.topic()
    }
}
