//! Error handling for the luawatch crate.

use std::path::PathBuf;

/// A specialized `Result` type for luawatch operations.
pub type Result<T> = std::result::Result<T, LogError>;

/// The main error type for Lua log collection and reporting.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The log stream of a server could not be read
    #[error("Collection failed for {}: {reason}", path.display())]
    Collection {
        /// Log file being tailed
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// A line did not match any known error grammar
    #[error("Unrecognized log line: {0}")]
    Classification(String),

    /// Requested server or error does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Actor is not allowed to perform the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// No actor was supplied with the request
    #[error("Unauthorized: missing actor")]
    Unauthorized,

    /// Input failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A notification channel failed to deliver
    #[error("Notification error: {0}")]
    Notification(String),

    /// A capacity limit was reached
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Web server error
    #[error("Web server error: {0}")]
    WebServer(String),
}

impl LogError {
    /// Create a new collection error for a log path
    pub fn collection_error(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Collection {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new classification error
    pub fn classification_error(line: impl Into<String>) -> Self {
        Self::Classification(line.into())
    }

    /// Create a new not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a new forbidden error
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Create a new validation error
    pub fn validation_error(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new notification error
    pub fn notification_error(msg: impl Into<String>) -> Self {
        Self::Notification(msg.into())
    }

    /// Create a new unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a new web server error
    pub fn web_server_error(msg: impl Into<String>) -> Self {
        Self::WebServer(msg.into())
    }

    /// Whether this error came from reading a log stream.
    pub fn is_collection_failure(&self) -> bool {
        matches!(self, Self::Collection { .. } | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_error_display() {
        let err = LogError::collection_error("/srv/gmod/console.log", "file missing");
        assert_eq!(
            err.to_string(),
            "Collection failed for /srv/gmod/console.log: file missing"
        );
        assert!(err.is_collection_failure());
    }

    #[test]
    fn test_classification_is_not_collection_failure() {
        let err = LogError::classification_error("garbage");
        assert!(!err.is_collection_failure());
        assert!(err.to_string().contains("garbage"));
    }
}
