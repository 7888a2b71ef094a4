//! The error-kind taxonomy shared by every component.
//!
//! Maps a typed error to an HTTP status at the API edge, the same way
//! `proxmox_router::http_err!` does, rather than dispatching on message
//! text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CdsError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("integrity mismatch: {0}")]
    IntegrityMismatch(String),

    #[error("corruption detected: {0}")]
    CorruptionDetected(String),

    #[error("capacity exhausted: {0}")]
    CapacityExhausted(String),

    #[error("storage fault: {0}")]
    StorageFault(String),

    #[error("quorum not reached: {0}")]
    QuorumNotReached(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl CdsError {
    /// Stable machine-readable discriminant, used in the JSON error body and
    /// in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            CdsError::BadRequest(_) => "bad-request",
            CdsError::NotFound(_) => "not-found",
            CdsError::IntegrityMismatch(_) => "integrity-mismatch",
            CdsError::CorruptionDetected(_) => "corruption-detected",
            CdsError::CapacityExhausted(_) => "capacity-exhausted",
            CdsError::StorageFault(_) => "storage-fault",
            CdsError::QuorumNotReached(_) => "quorum-not-reached",
            CdsError::Conflict(_) => "conflict",
            CdsError::Transient(_) => "transient",
            CdsError::Fatal(_) => "fatal",
        }
    }

    /// HTTP status this error kind maps to at the API edge.
    pub fn http_status(&self) -> u16 {
        match self {
            CdsError::BadRequest(_) => 400,
            CdsError::NotFound(_) => 404,
            CdsError::IntegrityMismatch(_) => 400,
            CdsError::CorruptionDetected(_) => 500,
            CdsError::CapacityExhausted(_) => 507,
            CdsError::StorageFault(_) => 500,
            CdsError::QuorumNotReached(_) => 200,
            CdsError::Conflict(_) => 409,
            CdsError::Transient(_) => 503,
            CdsError::Fatal(_) => 500,
        }
    }

    /// Whether a caller's retry policy should retry this error at all
    /// (readers/writers still decide *how*, e.g. which replica).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CdsError::Transient(_) | CdsError::QuorumNotReached(_) | CdsError::CorruptionDetected(_)
        )
    }
}

/// Wire representation of a [`CdsError`] used in every JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl From<&CdsError> for ErrorBody {
    fn from(err: &CdsError) -> Self {
        ErrorBody {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_status_are_consistent() {
        let err = CdsError::CapacityExhausted("disk full".into());
        assert_eq!(err.kind(), "capacity-exhausted");
        assert_eq!(err.http_status(), 507);
        let body = ErrorBody::from(&err);
        assert_eq!(body.kind, "capacity-exhausted");
    }
}
