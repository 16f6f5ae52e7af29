//! Error types for vigil-eye

use std::fmt;
use thiserror::Error;

/// Failure to turn request bytes into an [`Image`](crate::codec::Image).
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Image payload is empty")]
    Empty,

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Unable to decode image: {0}")]
    Image(#[from] image::ImageError),
}

/// Why a model failed to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFailureReason {
    FileNotFound,
    DependencyMissing,
    OutOfMemory,
    Other,
}

impl LoadFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadFailureReason::FileNotFound => "file_not_found",
            LoadFailureReason::DependencyMissing => "dependency_missing",
            LoadFailureReason::OutOfMemory => "out_of_memory",
            LoadFailureReason::Other => "other",
        }
    }
}

impl fmt::Display for LoadFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model load failure, kept by the handle for health reporting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Model load failed ({reason}): {message}")]
pub struct ModelLoadError {
    pub reason: LoadFailureReason,
    pub message: String,
}

impl ModelLoadError {
    pub fn new(reason: LoadFailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub fn file_not_found(message: impl Into<String>) -> Self {
        Self::new(LoadFailureReason::FileNotFound, message)
    }

    pub fn dependency_missing(message: impl Into<String>) -> Self {
        Self::new(LoadFailureReason::DependencyMissing, message)
    }

    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::new(LoadFailureReason::OutOfMemory, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(LoadFailureReason::Other, message)
    }
}

/// Errors raised by the inference capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("Model not loaded")]
    NotLoaded,

    #[error("Inference failed: {0}")]
    Runtime(String),
}

/// Request-level failures surfaced by the detection service.
#[derive(Error, Debug)]
pub enum DetectError {
    #[error("No image supplied: provide an `image` file or `image_base64` field")]
    MissingImage,

    #[error("Invalid parameter `{name}`: {message}")]
    InvalidParameter { name: &'static str, message: String },

    #[error("Unable to decode image: {0}")]
    Decode(#[from] DecodeError),

    #[error("Model not loaded: {reason}")]
    ServiceUnavailable { reason: String },
}

impl DetectError {
    /// True for errors caused by the request itself rather than the service.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, DetectError::ServiceUnavailable { .. })
    }
}
