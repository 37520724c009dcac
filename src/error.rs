//! Error types for tagging and background removal operations

use thiserror::Error;

/// Result type alias for tagger service operations
pub type Result<T> = std::result::Result<T, TaggerError>;

/// Error taxonomy shared by the bootstrap path and the request path
#[derive(Error, Debug)]
pub enum TaggerError {
    /// Malformed or undecodable input image
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Shape or runtime failure in the classification model
    #[error("Inference error: {0}")]
    Inference(String),

    /// Failure in the background removal model
    #[error("Segmentation error: {0}")]
    Segmentation(String),

    /// Remote fetch failed and no local copy exists
    #[error("Model acquisition failed: {0}")]
    Acquisition(String),

    /// Local artifact present but unreadable or corrupt
    #[error("Model load failed: {0}")]
    Load(String),

    /// Capability has not finished bootstrapping (or failed to)
    #[error("Model not loaded")]
    NotLoaded,

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TaggerError {
    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new segmentation error
    pub fn segmentation<S: Into<String>>(msg: S) -> Self {
        Self::Segmentation(msg.into())
    }

    /// Create a new acquisition error
    pub fn acquisition<S: Into<String>>(msg: S) -> Self {
        Self::Acquisition(msg.into())
    }

    /// Create a new load error
    pub fn load<S: Into<String>>(msg: S) -> Self {
        Self::Load(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        Self::Io(std::io::Error::new(
            error.kind(),
            format!(
                "Failed to {} '{}': {}",
                operation,
                path.as_ref().display(),
                error
            ),
        ))
    }

    /// Create an acquisition error from a network failure
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::Acquisition(format!("{}: {}", context.into(), error))
    }

    /// Create a load error naming the artifact that could not be read
    pub fn load_error_with_path<P: AsRef<std::path::Path>>(
        artifact: &str,
        path: P,
        error: &str,
    ) -> Self {
        Self::Load(format!(
            "Failed to load {} '{}': {}",
            artifact,
            path.as_ref().display(),
            error
        ))
    }

    /// Whether this error originates from bootstrap rather than a request
    #[must_use]
    pub fn is_bootstrap_error(&self) -> bool {
        matches!(self, Self::Acquisition(_) | Self::Load(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_creation() {
        assert!(matches!(TaggerError::decode("bad"), TaggerError::Decode(_)));
        assert!(matches!(
            TaggerError::inference("shape"),
            TaggerError::Inference(_)
        ));
        assert!(matches!(
            TaggerError::segmentation("oops"),
            TaggerError::Segmentation(_)
        ));
        assert!(matches!(
            TaggerError::acquisition("offline"),
            TaggerError::Acquisition(_)
        ));
        assert!(matches!(TaggerError::load("corrupt"), TaggerError::Load(_)));
    }

    #[test]
    fn test_not_loaded_display_is_wire_message() {
        assert_eq!(TaggerError::NotLoaded.to_string(), "Model not loaded");
    }

    #[test]
    fn test_error_display() {
        let err = TaggerError::invalid_config("port must be non-zero");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: port must be non-zero"
        );
    }

    #[test]
    fn test_contextual_errors() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = TaggerError::file_io_error("create directory", Path::new("/models"), &io_error);
        let message = err.to_string();
        assert!(message.contains("create directory"));
        assert!(message.contains("/models"));

        let err = TaggerError::network_error("Failed to download model.onnx", "connection refused");
        assert!(matches!(err, TaggerError::Acquisition(_)));
        assert!(err.to_string().contains("connection refused"));

        let err =
            TaggerError::load_error_with_path("tag table", Path::new("/m/tags.csv"), "bad header");
        assert!(err.to_string().contains("tag table"));
        assert!(err.to_string().contains("/m/tags.csv"));
    }

    #[test]
    fn test_bootstrap_classification() {
        assert!(TaggerError::acquisition("x").is_bootstrap_error());
        assert!(TaggerError::load("x").is_bootstrap_error());
        assert!(!TaggerError::decode("x").is_bootstrap_error());
        assert!(!TaggerError::NotLoaded.is_bootstrap_error());
    }
}
