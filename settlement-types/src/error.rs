//! Error types for the settlement core.

use crate::domain::Currency;

/// Domain-level errors (business rule violations).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Currency mismatch: expected {expected}, got {got}")]
    CurrencyMismatch { expected: Currency, got: Currency },

    #[error("Cannot {action} a {entity} in state {from}")]
    InvalidState {
        entity: &'static str,
        from: String,
        action: &'static str,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Repository-level errors (data access failures).
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Entity not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Stale version: expected {expected}, found {actual}")]
    StaleVersion { expected: u64, actual: u64 },

    #[error("A request with this idempotency key is still in progress")]
    IdempotencyInProgress,

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Application-level errors (for HTTP responses).
///
/// Maps cleanly to HTTP status codes. `Declined` settlements are not errors
/// and never appear here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Idempotency key was already used with a different request")]
    IdempotencyKeyReused,

    #[error("A request with this idempotency key is still in progress")]
    IdempotencyInProgress,

    #[error("Stale version: expected {expected}, found {actual}")]
    StaleVersion { expected: u64, actual: u64 },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream temporarily unavailable: {0}")]
    Transient(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wire discriminator used in error envelopes and stored idempotent failures.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "ValidationError",
            AppError::InvalidAmount(_) => "InvalidAmount",
            AppError::IdempotencyKeyReused => "IdempotencyKeyReused",
            AppError::IdempotencyInProgress => "IdempotencyInProgress",
            AppError::StaleVersion { .. } => "StaleVersion",
            AppError::InvalidState(_) => "InvalidState",
            AppError::NotFound(_) => "NotFound",
            AppError::Transient(_) => "TransientError",
            AppError::Internal(_) => "Internal",
        }
    }

    /// Message without the variant prefix.
    pub fn detail(&self) -> String {
        match self {
            AppError::Validation(msg)
            | AppError::InvalidAmount(msg)
            | AppError::InvalidState(msg)
            | AppError::NotFound(msg)
            | AppError::Transient(msg)
            | AppError::Internal(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Rebuilds an error from a stored `(kind, message)` pair.
    ///
    /// Used when replaying a failure recorded under an idempotency key.
    pub fn from_kind(kind: &str, message: String) -> Self {
        match kind {
            "ValidationError" => AppError::Validation(message),
            "InvalidAmount" => AppError::InvalidAmount(message),
            "IdempotencyKeyReused" => AppError::IdempotencyKeyReused,
            "IdempotencyInProgress" => AppError::IdempotencyInProgress,
            "InvalidState" => AppError::InvalidState(message),
            "NotFound" => AppError::NotFound(message),
            "TransientError" => AppError::Transient(message),
            _ => AppError::Internal(message),
        }
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidAmount(msg) => AppError::InvalidAmount(msg),
            DomainError::UnsupportedCurrency(code) => {
                AppError::InvalidAmount(format!("Unsupported currency: {}", code))
            }
            e @ DomainError::InvalidState { .. } => AppError::InvalidState(e.to_string()),
            e @ DomainError::CurrencyMismatch { .. } => AppError::Validation(e.to_string()),
            DomainError::ValidationError(msg) => AppError::Validation(msg),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Domain(e) => e.into(),
            RepoError::NotFound => AppError::NotFound("Resource not found".into()),
            RepoError::Conflict(e) => AppError::Validation(e),
            RepoError::StaleVersion { expected, actual } => {
                AppError::StaleVersion { expected, actual }
            }
            RepoError::IdempotencyInProgress => AppError::IdempotencyInProgress,
            RepoError::Storage(e) => AppError::Internal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_currency_maps_to_invalid_amount() {
        let err: AppError = DomainError::UnsupportedCurrency("XYZ".into()).into();
        assert_eq!(err.kind(), "InvalidAmount");
    }

    #[test]
    fn test_stale_version_survives_repo_mapping() {
        let err: AppError = RepoError::StaleVersion {
            expected: 1,
            actual: 2,
        }
        .into();
        assert_eq!(
            err,
            AppError::StaleVersion {
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn test_kind_round_trips_through_from_kind() {
        let err = AppError::InvalidState("already failed".into());
        let rebuilt = AppError::from_kind(err.kind(), "already failed".into());
        assert_eq!(rebuilt, err);
    }
}
