//! Subscription Types
//!
//! Domain types for the logical request/response conversations that are
//! multiplexed over the single streaming connection.
//!
//! # Design
//!
//! - A [`SubscriptionId`] is allocated per connection, starting at 1 and
//!   strictly increasing. IDs are never reused while a subscription with the
//!   same value is still open.
//! - A [`SubscriptionRequest`] is the JSON body carried by a `sub` frame. Its
//!   shape depends on the [`SubscriptionKind`].
//! - [`PageCursor`] is the transient pagination state the orchestrator keeps
//!   while walking a transaction list.

use std::fmt;

use serde::Serialize;

// =============================================================================
// Types
// =============================================================================

/// Identifier of one subscription on one connection.
pub type SubscriptionId = u64;

/// First ID handed out on a fresh connection.
pub const FIRST_SUBSCRIPTION_ID: SubscriptionId = 1;

/// Kind of data a subscription asks the server for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SubscriptionKind {
    /// One page of the transaction timeline.
    #[serde(rename = "timelineTransactions")]
    TimelineTransactions,
    /// Detail view of a single transaction.
    #[serde(rename = "timelineDetailV2")]
    TimelineDetail,
    /// Static data of a single instrument.
    #[serde(rename = "instrument")]
    Instrument,
}

impl SubscriptionKind {
    /// Wire name of this kind, as sent in the `type` field.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TimelineTransactions => "timelineTransactions",
            Self::TimelineDetail => "timelineDetailV2",
            Self::Instrument => "instrument",
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Subscription Request
// =============================================================================

/// JSON body of a `sub` frame.
///
/// Optional fields are omitted from the encoded body when unset, so a first
/// transactions page is sent as `{"type":"timelineTransactions","token":"..."}`.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    /// Subscription kind.
    #[serde(rename = "type")]
    pub kind: SubscriptionKind,
    /// Session token of the authenticated user.
    pub token: String,
    /// Pagination cursor for transaction pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    /// Entity identifier (transaction ID or ISIN).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Jurisdiction used to resolve instrument data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
}

impl SubscriptionRequest {
    /// Request one page of the transaction timeline.
    ///
    /// `after` is `None` for the first page.
    #[must_use]
    pub fn transactions(token: impl Into<String>, after: Option<String>) -> Self {
        Self {
            kind: SubscriptionKind::TimelineTransactions,
            token: token.into(),
            after,
            id: None,
            jurisdiction: None,
        }
    }

    /// Request the detail view of one transaction.
    #[must_use]
    pub fn transaction_detail(token: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self {
            kind: SubscriptionKind::TimelineDetail,
            token: token.into(),
            after: None,
            id: Some(transaction_id.into()),
            jurisdiction: None,
        }
    }

    /// Request the static data of one instrument.
    #[must_use]
    pub fn instrument(
        token: impl Into<String>,
        isin: impl Into<String>,
        jurisdiction: Option<String>,
    ) -> Self {
        Self {
            kind: SubscriptionKind::Instrument,
            token: token.into(),
            after: None,
            id: Some(isin.into()),
            jurisdiction,
        }
    }

    /// Encode the request body as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl fmt::Debug for SubscriptionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRequest")
            .field("kind", &self.kind)
            .field("token", &"[REDACTED]")
            .field("after", &self.after)
            .field("id", &self.id)
            .field("jurisdiction", &self.jurisdiction)
            .finish()
    }
}

// =============================================================================
// Pagination State
// =============================================================================

/// Cursor-pagination state for one transactions stream.
///
/// The page counter only correlates pages in events and logs. Pagination
/// ends when the server returns no next cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursor {
    after: Option<String>,
    page: u32,
}

impl PageCursor {
    /// Start at the first page (no cursor, counter 0).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            after: None,
            page: 0,
        }
    }

    /// Cursor to send with the next request.
    #[must_use]
    pub fn after(&self) -> Option<&str> {
        self.after.as_deref()
    }

    /// Number of pages requested so far.
    #[must_use]
    pub const fn page(&self) -> u32 {
        self.page
    }

    /// Record that a request is about to be issued and return its page number.
    pub const fn begin_page(&mut self) -> u32 {
        self.page += 1;
        self.page
    }

    /// Record the next cursor returned by the server.
    ///
    /// Returns `true` while more pages remain.
    pub fn advance(&mut self, next: Option<String>) -> bool {
        self.after = next.filter(|c| !c.is_empty());
        self.after.is_some()
    }
}

// =============================================================================
// Tests
// =============================================================================
