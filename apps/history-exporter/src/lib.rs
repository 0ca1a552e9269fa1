#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! History Exporter - Transaction Timeline Export
//!
//! Exports a broker account's transaction history over the broker's
//! streaming API: one WebSocket connection carries many request/response
//! subscriptions, and an in-process event bus cascades each transactions
//! page into detail and instrument fetches, writing every raw response to
//! disk.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `subscription`: Subscription IDs, kinds, request bodies, page cursor
//!   - `events`: Event bus topics and typed payloads
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Interfaces for subscriptions, credentials, payload sink,
//!     event bus and its handlers
//!   - `services`: Message client, pagination, cascading fetch handlers
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `stream`: Frame codec, subscription registry, connection manager
//!   - `event_bus`: Topic-keyed fan-out with bounded handler concurrency
//!   - `config`: Configuration from the environment
//!   - `auth`, `storage`: Token source and filesystem sink
//!   - `metrics`, `telemetry`: Prometheus metrics and tracing
//!
//! # Data Flow
//!
//! ```text
//!                 sub <id> <json>              ┌──────────────┐
//!  ┌──────────┐ ───────────────►  WebSocket ──►│  read loop   │
//!  │ Services │                                │  <id> A ...  │
//!  └──────────┘ ◄── mailbox (id) ◄── Registry ◄┘──────────────┘
//!       │
//!       └──► EventBus ──► handlers ──► more subscriptions / FileSink
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::events::{Event, EventPayload, Topic};
pub use domain::subscription::{PageCursor, SubscriptionId, SubscriptionKind, SubscriptionRequest};

// Ports
pub use application::ports::{
    EventBusPort, EventHandler, HandlerError, PayloadSink, PendingSubscription, RequestError,
    SessionTokens, SinkError, SubscribeError, SubscriptionError, SubscriptionPort, TokenSource,
};

// Services
pub use application::services::{
    ExportSummary, HistoryExport, MessageClient, PaginationError, TransactionPager,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, Credentials, ExporterConfig};

// Streaming connection
pub use infrastructure::stream::{
    ConnectionConfig, ConnectionState, FrameCodec, StreamConnection, StreamError,
    SubscriptionRegistry,
};

// Event bus
pub use infrastructure::event_bus::{EventBus, EventBusConfig};

// Adapters
pub use infrastructure::auth::StaticTokenSource;
pub use infrastructure::storage::FileSink;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
