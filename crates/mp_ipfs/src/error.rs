use mp_resilience::Retryable;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Upload failed (transient): {0}")]
    UploadTransient(String),

    #[error("Pin failed: {0}")]
    PinFailed(String),

    #[error("Content not found: {0}")]
    NotFound(String),

    #[error("Content store unreachable: {0}")]
    NetworkUnavailable(String),

    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Unexpected response: {0}")]
    Protocol(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(#[from] mp_proto::ProtoError),
}

impl ContentError {
    /// Permanent for this reference; retrying cannot help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::SizeMismatch { .. } | Self::InvalidReference(_)
        )
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, uploading: bool) -> Self {
        let unreachable = err.is_connect() || err.is_timeout();
        if uploading && !unreachable {
            Self::UploadTransient(err.to_string())
        } else {
            Self::NetworkUnavailable(err.to_string())
        }
    }
}

impl Retryable for ContentError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::UploadTransient(_) | Self::NetworkUnavailable(_))
    }
}
