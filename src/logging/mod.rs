//! Process logging
//!
//! One `tracing` subscriber per process, writing to stderr as text or JSON.
//! The filter comes from `RUST_LOG` when set, otherwise from `LOG_LEVEL`.

use std::io::Write;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },

    #[error("invalid log format '{0}', expected 'json' or 'text'")]
    Format(String),

    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

impl std::str::FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "pretty" => Ok(LogFormat::Text),
            other => Err(LoggingError::Format(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `debug` or `dialpilot=debug,hyper=info`
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "debug".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, LoggingError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, LoggingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();
        if let Some(filter) = non_blank("RUST_LOG").or_else(|| non_blank("LOG_LEVEL")) {
            config.filter = filter;
        }
        if let Some(format) = non_blank("LOG_FORMAT") {
            config.format = format.parse()?;
        }
        Ok(config)
    }

    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        EnvFilter::try_new(&self.filter).map_err(|e| LoggingError::Filter {
            filter: self.filter.clone(),
            reason: e.to_string(),
        })
    }
}

/// Flushes buffered log output when dropped. Hold it for the life of `main`.
#[derive(Debug)]
#[must_use = "dropping the guard flushes logs immediately"]
pub struct LoggingGuard {
    _private: (),
}

impl Drop for LoggingGuard {
    fn drop(&mut self) {
        let _ = std::io::stderr().flush();
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    let env_filter = config.env_filter()?;

    let installed = match config.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Text => Registry::default()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    tracing::debug!(filter = %config.filter, format = ?config.format, "logging initialized");
    Ok(LoggingGuard { _private: () })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, LoggingConfig::default());
        assert_eq!(config.filter, "debug");
        assert_eq!(config.format, LogFormat::Text);
    }

    #[test]
    fn test_rust_log_wins_over_log_level() {
        let config = LoggingConfig::from_lookup(lookup(&[
            ("RUST_LOG", "dialpilot=trace"),
            ("LOG_LEVEL", "warn"),
        ]))
        .unwrap();
        assert_eq!(config.filter, "dialpilot=trace");

        let config = LoggingConfig::from_lookup(lookup(&[("RUST_LOG", " "), ("LOG_LEVEL", "warn")])).unwrap();
        assert_eq!(config.filter, "warn");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!(matches!("xml".parse::<LogFormat>(), Err(LoggingError::Format(_))));

        let err = LoggingConfig::from_lookup(lookup(&[("LOG_FORMAT", "yaml")])).unwrap_err();
        assert!(matches!(err, LoggingError::Format(_)));
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let config = LoggingConfig {
            filter: "dialpilot=notalevel".to_string(),
            format: LogFormat::Text,
        };
        assert!(matches!(config.env_filter(), Err(LoggingError::Filter { .. })));
    }

    #[test]
    fn test_second_init_is_an_error() {
        let config = LoggingConfig::default();
        // The first call may lose to another test's subscriber; the second never wins.
        let _first = init(&config);
        assert!(matches!(init(&config), Err(LoggingError::AlreadyInitialized(_))));
    }
}
