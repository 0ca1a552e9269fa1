//! Domain Layer - Core subscription and event types.
//!
//! Pure types shared by the transport and the orchestration logic. Nothing
//! in here performs I/O.

/// Events routed by the in-process event bus.
pub mod events;

/// Subscription identifiers, request bodies, and pagination state.
pub mod subscription;
