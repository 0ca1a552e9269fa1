//! Configuration Module
//!
//! Configuration loading for the history exporter.

mod settings;

pub use settings::{
    ConfigError, Credentials, DEFAULT_STREAM_URL, EventBusSettings, ExportSettings,
    ExporterConfig, ServerSettings, StreamSettings,
};
