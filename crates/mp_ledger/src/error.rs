use std::fmt;
use std::time::Duration;

use mp_resilience::Retryable;
use thiserror::Error;

/// Why the ledger refused a metadata extrinsic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Bad origin or signature.
    Unauthorized,
    /// Cannot pay fees.
    Fee,
    /// Fails runtime validation (bad length, unknown receiver, ...).
    Invalid,
    Other(String),
}

impl RejectReason {
    /// Map the `kind` field of a rejected tx status.
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "unauthorized" => Self::Unauthorized,
            "fee" => Self::Fee,
            "invalid" => Self::Invalid,
            other => Self::Other(other.to_string()),
        }
    }

    /// Best-effort classification of a free-form node error message.
    pub fn classify(message: &str) -> Self {
        let m = message.to_ascii_lowercase();
        if m.contains("badorigin") || m.contains("signature") || m.contains("unauthori") {
            Self::Unauthorized
        } else if m.contains("payment") || m.contains("fee") || m.contains("balance") {
            Self::Fee
        } else if m.contains("invalid") || m.contains("toolong") || m.contains("too long") {
            Self::Invalid
        } else {
            Self::Other(message.to_string())
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => f.write_str("unauthorized"),
            Self::Fee => f.write_str("fee"),
            Self::Invalid => f.write_str("invalid"),
            Self::Other(s) => write!(f, "other ({s})"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Outcome unknown; re-check for an anchored record before resubmitting.
    #[error("Submission failed (transient): {0}")]
    SubmissionTransient(String),

    #[error("Rejected by ledger ({reason}): {message}")]
    Rejected { reason: RejectReason, message: String },

    #[error("Finality not reached within {0:?}")]
    FinalityTimeout(Duration),

    #[error("Subscription dropped: {0}")]
    SubscriptionDropped(String),

    #[error("Ledger unreachable: {0}")]
    Unavailable(String),

    #[error("Unexpected ledger response: {0}")]
    Protocol(String),

    #[error("Malformed record: {0}")]
    Record(#[from] mp_proto::ProtoError),
}

impl LedgerError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::Protocol(_) | Self::Record(_))
    }
}

impl Retryable for LedgerError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SubmissionTransient(_) | Self::Unavailable(_) | Self::SubscriptionDropped(_)
        )
    }
}
