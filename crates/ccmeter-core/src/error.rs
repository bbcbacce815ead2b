//! Error types for ccmeter-core
//!
//! Provides an error hierarchy with thiserror for graceful degradation:
//! transient I/O and malformed data degrade, configuration errors are fatal.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for ccmeter operations
#[derive(Error, Debug)]
pub enum CoreError {
    // ===================
    // IO Errors
    // ===================
    #[error("Failed to read file: {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Data directory not readable: {path}")]
    DataDirUnreadable { path: PathBuf },

    // ===================
    // Parse Errors
    // ===================
    #[error("Failed to parse JSON in {path}: {message}")]
    JsonParse {
        path: PathBuf,
        message: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed JSONL line {line_number} in {path}: {message}")]
    JsonlParse {
        path: PathBuf,
        line_number: usize,
        message: String,
    },

    // ===================
    // Cache Errors
    // ===================
    #[error("Cached document for session {session_id} is unreadable: {message}")]
    CacheDecode { session_id: String, message: String },

    // ===================
    // Watch Errors
    // ===================
    #[error("File watcher error: {message}")]
    Watch {
        message: String,
        #[source]
        source: Option<notify::Error>,
    },

    // ===================
    // Config Errors (fatal at startup)
    // ===================
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Unknown timezone: {zone}")]
    InvalidTimezone { zone: String },

    #[error("Invalid duration expression: {expr}")]
    InvalidDuration { expr: String },
}

impl CoreError {
    /// Wrap a raw open/read failure, mapping NotFound to its own variant.
    pub fn from_read(path: &std::path::Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            CoreError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            CoreError::FileRead {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    /// True for errors that should abort startup rather than degrade.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidConfig { .. }
                | CoreError::InvalidTimezone { .. }
                | CoreError::InvalidDuration { .. }
                | CoreError::DataDirUnreadable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_read_not_found() {
        let err = CoreError::from_read(
            std::path::Path::new("/tmp/missing.jsonl"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, CoreError::FileNotFound { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_config_errors_are_fatal() {
        let err = CoreError::InvalidTimezone {
            zone: "Mars/Olympus".to_string(),
        };
        assert!(err.is_fatal());
    }
}
