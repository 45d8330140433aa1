// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the agentmeter telemetry pipeline.
//!
//! Each component gets its own strongly-typed error, defined with `thiserror`.
//! The CLI boundary uses `anyhow` for propagation.

use thiserror::Error;

/// Errors raised by a sink while handling, flushing or closing.
///
/// These never escape the event bus: it logs and counts them per sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Sink is closed: {0}")]
    Closed(String),

    #[error("Sink rejected event: {0}")]
    Rejected(String),
}

impl From<rusqlite::Error> for SinkError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors from running git.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Failed to spawn git: {0}")]
    Spawn(String),

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Unexpected git output: {0}")]
    UnexpectedOutput(String),
}

impl GitError {
    /// The text used for conflict detection.
    pub fn message(&self) -> String {
        match self {
            Self::CommandFailed { stderr, .. } => stderr.clone(),
            other => other.to_string(),
        }
    }

    /// Whether the failure text reports a merge conflict.
    ///
    /// This is a substring match on git's human-readable output and is an
    /// approximation: localized git builds can word it differently.
    pub fn is_conflict(&self) -> bool {
        let text = self.message();
        text.contains("CONFLICT") || text.contains("conflict")
    }
}

impl From<std::io::Error> for GitError {
    fn from(err: std::io::Error) -> Self {
        Self::Spawn(err.to_string())
    }
}

/// Errors from the cost calculator's pricing table.
#[derive(Error, Debug, PartialEq)]
pub enum CostError {
    #[error("Invalid pricing for {model}: {message}")]
    InvalidPricing { model: String, message: String },

    #[error("The fallback pricing entry cannot be removed")]
    FallbackRequired,
}

/// Errors from the read-side metrics API.
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Export failed: {0}")]
    Export(String),
}

impl From<rusqlite::Error> for MetricsError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Query(err.to_string())
    }
}

impl From<SinkError> for MetricsError {
    fn from(err: SinkError) -> Self {
        Self::Query(err.to_string())
    }
}

impl From<serde_json::Error> for MetricsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Export(err.to_string())
    }
}

impl From<csv::Error> for MetricsError {
    fn from(err: csv::Error) -> Self {
        Self::Export(err.to_string())
    }
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Errors from reading agent debug logs.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Failed to read log {path}: {message}")]
    Read { path: String, message: String },
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_error_conflict_detection() {
        let err = GitError::CommandFailed {
            command: "merge".to_string(),
            stderr: "CONFLICT (content): Merge conflict in src/lib.rs".to_string(),
        };
        assert!(err.is_conflict());

        let lower = GitError::CommandFailed {
            command: "rebase".to_string(),
            stderr: "could not apply 1a2b3c... resolve the conflict".to_string(),
        };
        assert!(lower.is_conflict());

        let other = GitError::CommandFailed {
            command: "checkout".to_string(),
            stderr: "error: pathspec 'nope' did not match".to_string(),
        };
        assert!(!other.is_conflict());
    }

    #[test]
    fn test_sink_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let sink_err: SinkError = io_err.into();
        assert!(matches!(sink_err, SinkError::Io(_)));
    }

    #[test]
    fn test_config_error_from_json() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("invalid json");
        let json_err = result.unwrap_err();
        let config_err: ConfigError = json_err.into();
        assert!(matches!(config_err, ConfigError::JsonError(_)));
    }

    #[test]
    fn test_error_display() {
        let err = MetricsError::UnsupportedFormat("xml".to_string());
        assert_eq!(err.to_string(), "Unsupported export format: xml");
    }
}
