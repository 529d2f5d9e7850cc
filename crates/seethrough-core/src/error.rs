//! Error types for SeeThrough

use std::sync::Arc;

/// Result type alias using SeeThrough's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for SeeThrough operations
///
/// Errors are `Clone` so that a single model-load failure can be handed to
/// every caller coalesced onto the same in-flight load.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The image source could not be fetched or decoded
    #[error("image load error: {0}")]
    ImageLoad(String),

    /// Download, cache or runtime initialization failed while loading the model
    #[error("model load error: {0}")]
    ModelLoad(String),

    /// The forward pass failed on a ready session
    #[error("inference error: {0}")]
    Inference(String),

    /// Model cache storage errors
    #[error("cache error: {0}")]
    Cache(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new image load error
    pub fn image_load(msg: impl Into<String>) -> Self {
        Self::ImageLoad(msg.into())
    }

    /// Create a new model load error
    pub fn model_load(msg: impl Into<String>) -> Self {
        Self::ModelLoad(msg.into())
    }

    /// Create a new inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new cache error
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Re-tag any error as a model load failure, keeping its message.
    ///
    /// Model load errors are passed through unchanged so the message is not
    /// prefixed twice.
    pub fn into_model_load(self) -> Self {
        match self {
            Self::ModelLoad(_) => self,
            other => Self::ModelLoad(other.to_string()),
        }
    }

    /// Whether this error means the session backing a handle is gone
    pub fn is_session_disposed(&self) -> bool {
        matches!(self, Self::Inference(msg) if msg.contains("disposed"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_model_load_keeps_message() {
        let err = Error::cache("quota exceeded").into_model_load();
        assert!(matches!(err, Error::ModelLoad(_)));
        assert_eq!(err.to_string(), "model load error: cache error: quota exceeded");

        let err = Error::model_load("boom").into_model_load();
        assert_eq!(err.to_string(), "model load error: boom");
    }

    #[test]
    fn test_io_error_is_cloneable() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }

    #[test]
    fn test_session_disposed_detection() {
        assert!(Error::inference("session disposed").is_session_disposed());
        assert!(!Error::inference("shape mismatch").is_session_disposed());
    }
}
