//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Session credential sources.
pub mod auth;

/// Configuration loading.
pub mod config;

/// Topic-keyed event fan-out.
pub mod event_bus;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Filesystem payload sink.
pub mod storage;

/// Streaming connection: frame codec, subscription registry, connection manager.
pub mod stream;

/// OpenTelemetry tracing integration.
pub mod telemetry;
