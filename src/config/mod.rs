//! Configuration loading
//!
//! Reads a JSON5 file (`$LIVEPOLL_CONFIG_PATH`, else `./livepoll.json5`), then
//! applies environment overrides. A missing file is not an error.

mod types;

pub use types::{
    validate_config, Config, PollsConfig, ServerConfig, ValidationIssue, DEFAULT_CORS_ORIGIN,
    DEFAULT_HOST, DEFAULT_PORT,
};

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::tracing::ExportFormat;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "LIVEPOLL_CONFIG_PATH";

/// Used when `LIVEPOLL_CONFIG_PATH` is unset
pub const DEFAULT_CONFIG_FILE: &str = "livepoll.json5";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {var}: {message}")]
    Env { var: String, message: String },

    #[error("Invalid configuration: {}", format_issues(.0))]
    Invalid(Vec<ValidationIssue>),
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("{} {}", issue.path, issue.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Resolved config file path.
pub fn get_config_path() -> PathBuf {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

/// Load from the resolved path and apply process environment overrides.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&get_config_path())
}

/// Load from `path` and apply process environment overrides.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let mut config = load_config_uncached(path)?;
    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    Ok(config)
}

/// Parse the file alone, without environment overrides.
pub fn load_config_uncached(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        debug!(path = %path.display(), "No config file, using defaults");
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&raw).map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Parse JSON5 text. Blank text yields defaults.
pub fn parse_config(raw: &str) -> Result<Config, String> {
    if raw.trim().is_empty() {
        return Ok(Config::default());
    }
    json5::from_str(raw).map_err(|e| e.to_string())
}

/// Apply `PORT`, `HOST`, `SOCKET_CORS_ORIGIN`, `LOG_LEVEL` and `LOG_FORMAT`.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

    if let Some(port) = get("PORT") {
        config.server.port = port.trim().parse().map_err(|_| ConfigError::Env {
            var: "PORT".to_string(),
            message: format!("'{}' is not a port number", port),
        })?;
    }
    if let Some(host) = get("HOST") {
        config.server.host = host;
    }
    if let Some(origin) = get("SOCKET_CORS_ORIGIN") {
        config.server.cors_origin = origin;
    }
    if let Some(level) = get("LOG_LEVEL") {
        config.logging.log_level = level;
    }
    if let Some(format) = get("LOG_FORMAT") {
        config.logging.export_format =
            format.parse::<ExportFormat>().map_err(|e| ConfigError::Env {
                var: "LOG_FORMAT".to_string(),
                message: e.to_string(),
            })?;
    }
    Ok(())
}

/// Fail with every validation issue at once.
pub fn ensure_valid(config: &Config) -> Result<(), ConfigError> {
    let issues = validate_config(config);
    if issues.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_uncached(&dir.path().join("absent.json5")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_json5_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                // comments are allowed
                server: {{ port: 8080, corsOrigin: "*" }},
                polls: {{ maxQuestionLength: 140, }},
                logging: {{ exportFormat: "json" }},
            }}"#
        )
        .unwrap();

        let config = load_config_uncached(file.path()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.cors_origin, "*");
        assert_eq!(config.server.host, DEFAULT_HOST);
        assert_eq!(config.polls.max_question_length, 140);
        assert_eq!(config.polls.tick_interval_ms, 1000);
        assert_eq!(config.logging.export_format, ExportFormat::Json);
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ server: ").unwrap();
        let err = load_config_uncached(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("PORT", "7000"),
                ("HOST", "127.0.0.1"),
                ("SOCKET_CORS_ORIGIN", "https://class.example"),
                ("LOG_LEVEL", "debug"),
                ("LOG_FORMAT", "json"),
            ]),
        )
        .unwrap();
        assert_eq!(config.server.bind_address(), "127.0.0.1:7000");
        assert_eq!(config.server.cors_origin, "https://class.example");
        assert_eq!(config.logging.log_level, "debug");
        assert_eq!(config.logging.export_format, ExportFormat::Json);
    }

    #[test]
    fn test_bad_env_port() {
        let mut config = Config::default();
        let err = apply_env_overrides(&mut config, env(&[("PORT", "http")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));
        assert_eq!(config.server.port, DEFAULT_PORT);
    }

    #[test]
    fn test_ensure_valid_lists_issues() {
        let mut config = Config::default();
        config.polls.max_question_length = 0;
        let err = ensure_valid(&config).unwrap_err();
        assert!(err.to_string().contains("polls.maxQuestionLength"));
    }
}
