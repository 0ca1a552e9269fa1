//! History Exporter Binary
//!
//! Exports the transaction history of the configured session and exits.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin history-exporter
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `EXPORTER_SESSION_TOKEN`: Session token of the logged-in user
//!
//! ## Optional
//! - `EXPORTER_REFRESH_TOKEN`: Refresh token
//! - `EXPORTER_STREAM_URL`: WebSocket endpoint (default: wss://api.traderepublic.com)
//! - `EXPORTER_PROTOCOL_VERSION`: Handshake protocol version (default: 31)
//! - `EXPORTER_LOCALE`: Response locale (default: en)
//! - `EXPORTER_JURISDICTION`: Jurisdiction for instrument requests
//! - `EXPORTER_OUTPUT_DIR`: Output directory (default: ./export)
//! - `EXPORTER_CONNECT_TIMEOUT_SECS`: Dial and handshake timeout (default: 10)
//! - `EXPORTER_RESPONSE_TIMEOUT_SECS`: Per-response timeout (default: 30)
//! - `EXPORTER_MAX_PAGES`: Page limit, 0 for unlimited (default: 0)
//! - `EXPORTER_MAX_CONCURRENT_HANDLERS`: Concurrent event handlers (default: 16)
//! - `EXPORTER_METRICS_PORT`: Prometheus metrics port, 0 to disable (default: 0)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: history-exporter)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use history_exporter::infrastructure::telemetry;
use history_exporter::{
    EventBus, ExporterConfig, FileSink, HistoryExport, MessageClient, PaginationError,
    StaticTokenSource, StreamConnection, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Bound on waiting for the read loop after close.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting history exporter");

    let config = ExporterConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    init_metrics(config.server.metrics_port).context("failed to start metrics exporter")?;

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    let connection = Arc::new(StreamConnection::new(
        config.connection_config(),
        &shutdown_token,
    ));
    connection
        .connect()
        .await
        .context("failed to connect to stream")?;

    let tokens = Arc::new(StaticTokenSource::from(config.credentials.clone()));
    let client = Arc::new(
        MessageClient::new(
            Arc::clone(&connection) as _,
            tokens,
            config.export.response_timeout,
        )
        .with_jurisdiction(config.export.jurisdiction.clone()),
    );
    let sink = Arc::new(FileSink::new(&config.export.output_dir));
    let bus = Arc::new(EventBus::new(config.event_bus.into()));
    let export = HistoryExport::new(client, sink, bus, config.export.max_pages);

    let outcome = tokio::select! {
        result = export.run() => Some(result),
        () = shutdown_token.cancelled() => None,
    };

    connection.close().await?;
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, connection.closed())
        .await
        .is_err()
    {
        tracing::warn!("Read loop did not stop in time");
    }

    match outcome {
        Some(Ok(summary)) => {
            tracing::info!(
                pages = summary.pages,
                transactions = summary.transactions,
                instruments = summary.instruments,
                output_dir = %config.export.output_dir.display(),
                "Export complete"
            );
            Ok(())
        }
        Some(Err(PaginationError::PageLimitReached(limit))) => {
            tracing::warn!(limit, "Export stopped at page limit");
            Ok(())
        }
        Some(Err(e)) => {
            tracing::error!(error = %e, "Export failed");
            Err(e.into())
        }
        None => {
            tracing::info!("Export interrupted");
            Ok(())
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ExporterConfig) {
    tracing::info!(
        stream_url = %config.stream.url,
        protocol_version = config.stream.protocol_version,
        locale = %config.stream.locale,
        output_dir = %config.export.output_dir.display(),
        max_pages = config.export.max_pages,
        max_concurrent_handlers = config.event_bus.max_concurrent_handlers,
        metrics_port = config.server.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(credentials = ?config.credentials, "Credentials loaded");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT), then cancel `shutdown_token`.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => return,
    }

    shutdown_token.cancel();
}
