//! Exporter Configuration Settings
//!
//! Configuration types for the history exporter, loaded from environment
//! variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::application::ports::SessionTokens;
use crate::infrastructure::stream::{
    ConnectOptions, ConnectionConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PROTOCOL_VERSION,
};

/// Default streaming endpoint.
pub const DEFAULT_STREAM_URL: &str = "wss://api.traderepublic.com";

/// Session credentials of the logged-in user.
#[derive(Clone)]
pub struct Credentials {
    session_token: String,
    refresh_token: Option<String>,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(session_token: String, refresh_token: Option<String>) -> Self {
        Self {
            session_token,
            refresh_token,
        }
    }

    /// Get the session token.
    #[must_use]
    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    /// Get the refresh token, if configured.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Convert into the token pair handed to subscriptions.
    #[must_use]
    pub fn into_tokens(self) -> SessionTokens {
        SessionTokens {
            session: self.session_token,
            refresh: self.refresh_token,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("session_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Streaming connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// WebSocket endpoint.
    pub url: String,
    /// Protocol version sent in the `connect` frame.
    pub protocol_version: u32,
    /// Locale sent in the `connect` frame.
    pub locale: String,
    /// Bound on dialing and on waiting for the handshake ack.
    pub connect_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            locale: "en".to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl From<StreamSettings> for ConnectionConfig {
    fn from(settings: StreamSettings) -> Self {
        Self {
            url: settings.url,
            protocol_version: settings.protocol_version,
            connect_options: ConnectOptions::with_locale(settings.locale),
            connect_timeout: settings.connect_timeout,
        }
    }
}

/// Export run settings.
#[derive(Debug, Clone)]
pub struct ExportSettings {
    /// Directory raw payloads are written under.
    pub output_dir: PathBuf,
    /// Jurisdiction sent with instrument requests.
    pub jurisdiction: Option<String>,
    /// Bound on waiting for each subscription response.
    pub response_timeout: Duration,
    /// Maximum transaction pages to fetch (0 = unlimited).
    pub max_pages: u32,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./export"),
            jurisdiction: None,
            response_timeout: Duration::from_secs(30),
            max_pages: 0,
        }
    }
}

/// Event bus settings.
#[derive(Debug, Clone, Copy)]
pub struct EventBusSettings {
    /// Handlers allowed to run at once (0 = unbounded).
    pub max_concurrent_handlers: usize,
}

impl Default for EventBusSettings {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: 16,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

/// Complete exporter configuration.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Session credentials.
    pub credentials: Credentials,
    /// Streaming connection settings.
    pub stream: StreamSettings,
    /// Export run settings.
    pub export: ExportSettings,
    /// Event bus settings.
    pub event_bus: EventBusSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl ExporterConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or a
    /// value cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Unset keys fall back to their defaults; set keys must parse.
    ///
    /// # Errors
    ///
    /// Returns an error if required keys are missing or a value cannot be
    /// parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let session_token = env
            .get("EXPORTER_SESSION_TOKEN")
            .ok_or_else(|| ConfigError::MissingEnvVar("EXPORTER_SESSION_TOKEN".to_string()))?;

        if session_token.is_empty() {
            return Err(ConfigError::EmptyValue(
                "EXPORTER_SESSION_TOKEN".to_string(),
            ));
        }

        let refresh_token = env.get_non_empty("EXPORTER_REFRESH_TOKEN");

        let stream_defaults = StreamSettings::default();
        let url = env
            .get_non_empty("EXPORTER_STREAM_URL")
            .unwrap_or(stream_defaults.url);
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue {
                key: "EXPORTER_STREAM_URL".to_string(),
                value: url,
            });
        }

        let stream = StreamSettings {
            url,
            protocol_version: env
                .parse("EXPORTER_PROTOCOL_VERSION")?
                .unwrap_or(stream_defaults.protocol_version),
            locale: env
                .get_non_empty("EXPORTER_LOCALE")
                .unwrap_or(stream_defaults.locale),
            connect_timeout: env
                .parse("EXPORTER_CONNECT_TIMEOUT_SECS")?
                .map_or(stream_defaults.connect_timeout, Duration::from_secs),
        };

        let export_defaults = ExportSettings::default();
        let export = ExportSettings {
            output_dir: env
                .get_non_empty("EXPORTER_OUTPUT_DIR")
                .map_or(export_defaults.output_dir, PathBuf::from),
            jurisdiction: env.get_non_empty("EXPORTER_JURISDICTION"),
            response_timeout: env
                .parse("EXPORTER_RESPONSE_TIMEOUT_SECS")?
                .map_or(export_defaults.response_timeout, Duration::from_secs),
            max_pages: env
                .parse("EXPORTER_MAX_PAGES")?
                .unwrap_or(export_defaults.max_pages),
        };

        let event_bus = EventBusSettings {
            max_concurrent_handlers: env
                .parse("EXPORTER_MAX_CONCURRENT_HANDLERS")?
                .unwrap_or(EventBusSettings::default().max_concurrent_handlers),
        };

        let server = ServerSettings {
            metrics_port: env
                .parse("EXPORTER_METRICS_PORT")?
                .unwrap_or(ServerSettings::default().metrics_port),
        };

        Ok(Self {
            credentials: Credentials::new(session_token, refresh_token),
            stream,
            export,
            event_bus,
            server,
        })
    }

    /// Connection configuration for the streaming endpoint.
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        self.stream.clone().into()
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable is set but cannot be interpreted.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn get_non_empty(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.get_non_empty(key)
            .map(|v| {
                v.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: v,
                })
            })
            .transpose()
    }
}
