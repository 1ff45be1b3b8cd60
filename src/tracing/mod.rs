//! Logging initialization
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and either the
//! plain-text or the JSON `fmt` layer. `RUST_LOG` overrides the configured
//! level when set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Tracing error types
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("Initialization error: {0}")]
    InitError(String),

    #[error("Unknown log format: {0}")]
    UnknownFormat(String),
}

/// Tracing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TracingConfig {
    /// Enable logging
    pub enabled: bool,
    /// Service name
    pub service_name: String,
    /// Log level or `EnvFilter` directive
    pub log_level: String,
    /// Output format
    pub export_format: ExportFormat,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "livepoll".to_string(),
            log_level: "info".to_string(),
            export_format: ExportFormat::Text,
        }
    }
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// JSON format (structured logging)
    Json,
    /// Plain text format
    #[default]
    Text,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => f.write_str("json"),
            ExportFormat::Text => f.write_str("text"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = TracingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "text" | "pretty" => Ok(ExportFormat::Text),
            other => Err(TracingError::UnknownFormat(other.to_string())),
        }
    }
}

/// Build the filter: `RUST_LOG` if set and valid, else the configured level.
fn build_filter(config: &TracingConfig) -> Result<EnvFilter, TracingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.log_level)
        .map_err(|e| TracingError::InitError(format!("invalid log level: {}", e)))
}

/// Initialize tracing with the given configuration
pub fn init_tracing(config: &TracingConfig) -> Result<(), TracingError> {
    if !config.enabled {
        return Ok(());
    }

    let env_filter = build_filter(config)?;

    let result = match config.export_format {
        ExportFormat::Json => Registry::default()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        ExportFormat::Text => Registry::default()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
    };
    result.map_err(|e| TracingError::InitError(e.to_string()))?;

    info!(
        service = %config.service_name,
        format = %config.export_format,
        "Tracing initialized"
    );
    Ok(())
}
