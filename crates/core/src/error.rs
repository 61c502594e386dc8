//! Domain error model and the error taxonomy shared across the core.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Classification every error crossing the core boundary maps onto.
///
/// Callers branch on this instead of matching each component's error enum:
/// a conflict means "re-read and resubmit", storage means "nothing is known
/// to have happened".
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Optimistic-lock violation; recoverable by re-reading and retrying.
    ConcurrencyConflict,
    /// A stream, entity or snapshot does not exist.
    NotFound,
    /// The request itself is malformed (bad rollback target, unknown kind, ...).
    InvalidInput,
    /// Opaque storage/IO failure.
    Storage,
    /// The caller's cancellation token fired before the operation started.
    Cancelled,
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ErrorKind::ConcurrencyConflict => "concurrency_conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Storage => "storage",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Domain-level error.
///
/// Keep this focused on deterministic validation failures.
/// Infrastructure concerns belong to the infra error enums.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (unknown field, wrong value type, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::InvalidInput(_) | DomainError::InvalidId(_) => ErrorKind::InvalidInput,
        }
    }
}
