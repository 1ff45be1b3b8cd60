//! Typed configuration structures
//!
//! Every section has defaults, so a partial (or missing) file still yields a
//! runnable configuration.

use serde::{Deserialize, Serialize};

use crate::polls::DEFAULT_MAX_QUESTION_LENGTH;
use crate::tracing::TracingConfig;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Listener and CORS settings
    pub server: ServerConfig,

    /// Poll engine limits and countdown cadence
    pub polls: PollsConfig,

    /// Logging configuration
    pub logging: TracingConfig,
}

/// Listener configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,

    /// Bind port
    pub port: u16,

    /// Allowed browser origin, or `*` for any
    pub cors_origin: String,
}

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            cors_origin: DEFAULT_CORS_ORIGIN.to_string(),
        }
    }
}

impl ServerConfig {
    /// `host:port`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Poll engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollsConfig {
    /// Longest accepted question, in characters
    pub max_question_length: usize,

    /// Countdown broadcast period in milliseconds
    pub tick_interval_ms: u64,

    /// History page size when the caller gives none
    pub history_page_size: usize,
}

impl Default for PollsConfig {
    fn default() -> Self {
        Self {
            max_question_length: DEFAULT_MAX_QUESTION_LENGTH,
            tick_interval_ms: 1000,
            history_page_size: 10,
        }
    }
}

/// A single configuration problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(path: &str, message: &str) -> Self {
        Self {
            path: path.to_string(),
            message: message.to_string(),
        }
    }
}

/// Collect every problem that would stop the server from starting.
pub fn validate_config(config: &Config) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if config.server.host.trim().is_empty() {
        issues.push(ValidationIssue::new("server.host", "must not be empty"));
    }
    if config.server.port == 0 {
        issues.push(ValidationIssue::new("server.port", "must be between 1 and 65535"));
    }
    if config.server.cors_origin.trim().is_empty() {
        issues.push(ValidationIssue::new(
            "server.corsOrigin",
            "must be an origin or \"*\"",
        ));
    }
    if config.polls.max_question_length == 0 {
        issues.push(ValidationIssue::new(
            "polls.maxQuestionLength",
            "must be greater than 0",
        ));
    }
    if config.polls.tick_interval_ms == 0 {
        issues.push(ValidationIssue::new(
            "polls.tickIntervalMs",
            "must be greater than 0",
        ));
    }
    if config.polls.history_page_size == 0 {
        issues.push(ValidationIssue::new(
            "polls.historyPageSize",
            "must be greater than 0",
        ));
    }

    issues
}
