// src/error.rs

//! Unified error handling for the watcher.

use std::fmt;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Transport, timeout or HTTP status failure while fetching a listing
    #[error("Fetch error for {endpoint}: {message}")]
    Fetch { endpoint: String, message: String },

    /// Raw content did not match the structure the extractor expects
    #[error("Extraction error for {source_id}: {message}")]
    Extraction { source_id: String, message: String },

    /// Durable write failed
    #[error("Persistence error at {path}: {message}")]
    Persistence { path: String, message: String },

    /// A per-source deadline elapsed
    #[error("Timed out after {secs}s: {context}")]
    Timeout { context: String, secs: u64 },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Regular expression failed to compile
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Coarse classification used in per-source reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Fetch,
    Extraction,
    Persistence,
    Timeout,
    Configuration,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Fetch => "fetch",
            ErrorKind::Extraction => "extraction",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Configuration => "configuration",
        };
        f.write_str(name)
    }
}

impl AppError {
    /// Create a fetch error for an endpoint.
    pub fn fetch(endpoint: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Create an extraction error for a source.
    pub fn extraction(source_id: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Extraction {
            source_id: source_id.into(),
            message: message.to_string(),
        }
    }

    /// Create a persistence error for a path.
    pub fn persistence(path: impl AsRef<Path>, message: impl fmt::Display) -> Self {
        Self::Persistence {
            path: path.as_ref().display().to_string(),
            message: message.to_string(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(context: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            context: context.into(),
            secs,
        }
    }

    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Classify the error for reporting.
    ///
    /// Raw I/O and JSON failures only surface from the storage layer, so they
    /// count as persistence failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Fetch { .. } | AppError::Http(_) => ErrorKind::Fetch,
            AppError::Extraction { .. } | AppError::Selector { .. } | AppError::Regex(_) => {
                ErrorKind::Extraction
            }
            AppError::Persistence { .. } | AppError::Io(_) | AppError::Json(_) => {
                ErrorKind::Persistence
            }
            AppError::Timeout { .. } => ErrorKind::Timeout,
            AppError::Toml(_)
            | AppError::TomlSerialize(_)
            | AppError::Url(_)
            | AppError::Config(_)
            | AppError::Validation(_) => ErrorKind::Configuration,
        }
    }
}
