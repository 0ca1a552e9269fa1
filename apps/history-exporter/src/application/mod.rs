//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the export services and the port interfaces that
//! define how they reach the streaming connection, credentials, and storage.

/// Port interfaces for external systems (subscriptions, credentials, sink,
/// event bus).
pub mod ports;

/// Pagination, cascading fetches, and payload persistence.
pub mod services;
