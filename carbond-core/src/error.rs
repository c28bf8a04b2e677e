//! # Error Handling
//!
//! Error types shared by every carbond crate.
//!
//! ## Severity
//!
//! 1. **Resolution misses** are expected: a metric without a matching rule is
//!    simply not persisted.
//! 2. **I/O and corruption** errors abort one write, never the process.
//! 3. **Configuration** errors are fatal at startup and ignored on reload
//!    (the previous configuration stays active).

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for carbond operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for carbond
#[derive(Error, Debug)]
pub enum Error {
    // Storage Errors
    #[error("Whisper error: {message}")]
    Whisper { message: String },

    #[error("Corrupt whisper file {path:?}: {details}")]
    Corruption { path: PathBuf, details: String },

    #[error("Invalid timestamp {timestamp}: {reason}")]
    InvalidTimestamp { timestamp: u32, reason: String },

    // Rule Resolution Errors
    #[error("No retention rule matches metric {metric}")]
    NoRetention { metric: String },

    #[error("No aggregation rule matches metric {metric}")]
    NoAggregation { metric: String },

    #[error("Invalid pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },

    // Ingestion Errors
    #[error("Invalid metric name {name:?}: {reason}")]
    InvalidMetricName { name: String, reason: String },

    #[error("Malformed line {line:?}: {reason}")]
    Protocol { line: String, reason: String },

    // System Errors
    #[error("IO error: {message}")]
    Io { message: String, source: std::io::Error },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Configuration { .. } => false,
            Error::Internal { .. } => false,
            _ => true,
        }
    }

    /// True for errors caused by a metric having no matching rule
    pub fn is_resolution_miss(&self) -> bool {
        matches!(
            self,
            Error::NoRetention { .. } | Error::NoAggregation { .. } | Error::Pattern { .. }
        )
    }

    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Whisper { .. } => "WHISPER_ERROR",
            Error::Corruption { .. } => "WHISPER_CORRUPTION",
            Error::InvalidTimestamp { .. } => "INVALID_TIMESTAMP",
            Error::NoRetention { .. } => "NO_RETENTION",
            Error::NoAggregation { .. } => "NO_AGGREGATION",
            Error::Pattern { .. } => "PATTERN_ERROR",
            Error::InvalidMetricName { .. } => "INVALID_METRIC_NAME",
            Error::Protocol { .. } => "PROTOCOL_ERROR",
            Error::Io { .. } => "IO_ERROR",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

/// Extension trait for adding context to results
pub trait ResultExt<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| match e {
            Error::Io { message, source } => Error::Io {
                message: format!("{}: {}", f(), message),
                source,
            },
            other => other,
        })
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| Error::Io {
            message: format!("{}: {}", f(), source),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_context_keeps_source_kind() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "gone",
        ));
        let err = res.with_context(|| "opening a.wsp".to_string()).unwrap_err();
        match err {
            Error::Io { message, source } => {
                assert!(message.starts_with("opening a.wsp"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_resolution_miss_classification() {
        let miss = Error::NoRetention { metric: "a.b".into() };
        assert!(miss.is_resolution_miss());
        assert!(miss.is_recoverable());
        assert_eq!(miss.error_code(), "NO_RETENTION");

        let cfg = Error::Configuration { message: "bad".into() };
        assert!(!cfg.is_resolution_miss());
        assert!(!cfg.is_recoverable());
    }
}
