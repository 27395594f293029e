//! Error types for the QA runner
//!
//! Every failure a run can hit is one of these variants. The HTTP layer maps
//! them onto status codes through [`Error::status_code`]; messages are meant
//! to be shown to whoever submitted the scenario.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the QA runner
#[derive(Error, Debug)]
pub enum Error {
    // === Request Errors ===
    #[error("{0}")]
    Validation(String),

    // === Configuration Errors ===
    #[error("Test engine '{name}' not found. Searched: {searched}")]
    EngineNotFound { name: String, searched: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === Workspace Errors ===
    #[error("Failed to prepare workspace '{}': {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // === Execution Errors ===
    #[error("Failed to start test engine: {0}")]
    EngineSpawn(String),

    #[error("Cucumber run failed (exit code {})", code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    EngineFailed { code: Option<i32> },

    #[error("Cucumber run timed out after {} seconds", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Browser failed to start: {0}")]
    BrowserLaunch(String),

    #[error("Run finished with status {0}")]
    RunFailed(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an engine not found error with search paths
    pub fn engine_not_found<S: AsRef<str>>(name: &str, paths: &[S]) -> Self {
        Self::EngineNotFound {
            name: name.to_string(),
            searched: paths.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", "),
        }
    }

    /// Create a workspace error for the given path
    pub fn workspace(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Workspace {
            path: path.into(),
            source,
        }
    }

    /// Stable error code used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::EngineNotFound { .. } | Error::Config(_) | Error::ConfigParse(_) => {
                "CONFIGURATION_ERROR"
            }
            Error::Workspace { .. } => "FILESYSTEM_ERROR",
            Error::EngineSpawn(_)
            | Error::EngineFailed { .. }
            | Error::Timeout(_)
            | Error::BrowserLaunch(_)
            | Error::RunFailed(_) => "EXECUTION_ERROR",
            Error::Cancelled => "CANCELLED",
            _ => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code this error maps onto
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_bad_request() {
        let err = Error::validation("Payload requires a non-empty \"features\" array.");
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.kind(), "VALIDATION_ERROR");
        assert_eq!(
            err.to_string(),
            "Payload requires a non-empty \"features\" array."
        );
    }

    #[test]
    fn test_engine_failed_message() {
        let err = Error::EngineFailed { code: Some(1) };
        assert_eq!(err.to_string(), "Cucumber run failed (exit code 1)");
        assert_eq!(err.status_code(), 500);

        let err = Error::EngineFailed { code: None };
        assert_eq!(err.to_string(), "Cucumber run failed (exit code none)");
    }

    #[test]
    fn test_timeout_message_keeps_fractional_seconds() {
        let err = Error::Timeout(Duration::from_secs(300));
        assert_eq!(err.to_string(), "Cucumber run timed out after 300 seconds");

        let err = Error::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Cucumber run timed out after 1.5 seconds");
    }

    #[test]
    fn test_engine_not_found_lists_search_paths() {
        let err = Error::engine_not_found("cucumber-js", &["/a/node_modules", "/b/node_modules"]);
        assert_eq!(err.kind(), "CONFIGURATION_ERROR");
        assert!(err.to_string().contains("/a/node_modules, /b/node_modules"));
    }
}
