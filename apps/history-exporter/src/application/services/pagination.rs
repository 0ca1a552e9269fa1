//! Transaction Pagination
//!
//! Walks the transaction timeline page by page. Each response is published
//! as a "transactions page received" event before the next page is
//! requested; the cascade of detail and instrument fetches hangs off those
//! events.
//!
//! # Termination
//!
//! ```text
//! page 1 (no cursor) ──► cursor "c1" ──► page 2 ──► cursor "c2" ──► page 3 ──► no cursor ──► done
//! ```
//!
//! An absent, null, or empty cursor ends the walk. A cursor the server has
//! already handed out aborts with [`PaginationError::CursorCycle`], and an
//! optional page limit aborts with [`PaginationError::PageLimitReached`].

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;

use super::message_client::MessageClient;
use crate::application::ports::RequestError;
use crate::domain::events::{Event, TransactionsPage};
use crate::application::ports::EventBusPort;
use crate::domain::subscription::PageCursor;

/// Errors that end pagination.
#[derive(Debug, thiserror::Error)]
pub enum PaginationError {
    /// A page request failed.
    #[error("page request failed: {0}")]
    Request(#[from] RequestError),

    /// A page body could not be parsed.
    #[error("invalid page: {0}")]
    InvalidPage(#[from] serde_json::Error),

    /// The server returned a cursor it had already returned.
    #[error("cursor {0:?} returned twice")]
    CursorCycle(String),

    /// More pages remain but the configured limit was reached.
    #[error("page limit of {0} reached")]
    PageLimitReached(u32),
}

/// Result of a completed pagination run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationSummary {
    /// Pages fetched.
    pub pages: u32,
    /// Transaction IDs seen across all pages.
    pub transactions: usize,
}

#[derive(Debug, Deserialize)]
struct PageBody {
    #[serde(default)]
    items: Vec<PageItem>,
    #[serde(default)]
    cursors: Option<Cursors>,
}

#[derive(Debug, Deserialize)]
struct PageItem {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Cursors {
    #[serde(default)]
    after: Option<String>,
}

/// Parse a transactions page body into its transaction IDs and next cursor.
///
/// # Errors
///
/// Returns an error if the body is not a JSON object of the expected shape.
pub fn parse_page(raw: &[u8]) -> Result<(Vec<String>, Option<String>), serde_json::Error> {
    let body: PageBody = serde_json::from_slice(raw)?;
    let ids = body
        .items
        .into_iter()
        .filter_map(|item| item.id)
        .filter(|id| !id.is_empty())
        .collect();
    let next = body.cursors.and_then(|c| c.after);
    Ok((ids, next))
}

/// Sequential cursor pagination over the transaction timeline.
pub struct TransactionPager {
    client: Arc<MessageClient>,
    bus: Arc<dyn EventBusPort>,
    max_pages: u32,
}

impl TransactionPager {
    /// Create a pager. `max_pages` of 0 means unlimited.
    #[must_use]
    pub const fn new(client: Arc<MessageClient>, bus: Arc<dyn EventBusPort>, max_pages: u32) -> Self {
        Self {
            client,
            bus,
            max_pages,
        }
    }

    /// Fetch every page, publishing one event per page.
    ///
    /// # Errors
    ///
    /// Returns the first [`PaginationError`]; pages published before the
    /// error stay published.
    pub async fn run(&self) -> Result<PaginationSummary, PaginationError> {
        let mut cursor = PageCursor::new();
        let mut seen_cursors = HashSet::new();
        let mut transactions = 0;

        loop {
            if self.max_pages != 0 && cursor.page() >= self.max_pages {
                return Err(PaginationError::PageLimitReached(self.max_pages));
            }

            let raw = self.client.transactions(cursor.after()).await?;
            let page = cursor.begin_page();
            let (transaction_ids, next_cursor) = parse_page(&raw)?;

            tracing::info!(
                page,
                transactions = transaction_ids.len(),
                more = next_cursor.is_some(),
                "Transactions page received"
            );

            transactions += transaction_ids.len();
            self.bus.publish(Event::transactions_page(TransactionsPage {
                page,
                transaction_ids,
                next_cursor: next_cursor.clone(),
                raw,
            }));

            if !cursor.advance(next_cursor) {
                break;
            }

            if let Some(after) = cursor.after()
                && !seen_cursors.insert(after.to_string())
            {
                return Err(PaginationError::CursorCycle(after.to_string()));
            }
        }

        Ok(PaginationSummary {
            pages: cursor.page(),
            transactions,
        })
    }
}
