//! Error types for agi-core.

use thiserror::Error;

/// Result type alias using agi-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can end a turn or an administrative operation.
///
/// Per-action failures (bad arguments, denials, tool errors) are not represented
/// here; they are carried by [`crate::tools::ToolExecutionResult`] and fed back to
/// the model.
#[derive(Error, Debug)]
pub enum Error {
    /// The model transport failed
    #[error("Model transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Chained action rounds exceeded the configured limit
    #[error("Maximum tool execution depth {max_depth} exceeded")]
    MaxDepthExceeded { max_depth: u32 },

    /// Memory persistence error
    #[error("Memory storage error: {0}")]
    MemoryStorage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The session was cancelled
    #[error("Session cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with source.
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a max depth exceeded error.
    pub fn max_depth_exceeded(max_depth: u32) -> Self {
        Self::MaxDepthExceeded { max_depth }
    }

    /// Whether this error aborts a user turn: a failed model call or an
    /// action chain past its depth limit.
    ///
    /// A cancelled session is reported separately through [`Error::Cancelled`].
    pub fn is_turn_fatal(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::MaxDepthExceeded { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::MemoryStorage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            Error::max_depth_exceeded(10).to_string(),
            "Maximum tool execution depth 10 exceeded"
        );
        assert_eq!(
            Error::transport("connection reset").to_string(),
            "Model transport error: connection reset"
        );
    }

    #[test]
    fn test_turn_fatal_classification() {
        assert!(Error::transport("x").is_turn_fatal());
        assert!(Error::max_depth_exceeded(10).is_turn_fatal());
        assert!(!Error::Config("bad".into()).is_turn_fatal());
        assert!(!Error::MemoryStorage("locked".into()).is_turn_fatal());
        assert!(!Error::Cancelled.is_turn_fatal());
    }

    #[test]
    fn test_transport_source_is_kept() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = Error::transport_with_source("send failed", io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
