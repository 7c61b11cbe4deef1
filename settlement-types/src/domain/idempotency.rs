//! Outcomes recorded under an idempotency key.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// What a guarded operation produced, stored verbatim for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotentOutcome {
    Success { payload: serde_json::Value },
    Failure { kind: String, message: String },
}

impl IdempotentOutcome {
    /// Records a successful result.
    pub fn success<T: Serialize>(value: &T) -> Result<Self, AppError> {
        let payload = serde_json::to_value(value)
            .map_err(|e| AppError::Internal(format!("Failed to encode outcome: {}", e)))?;
        Ok(IdempotentOutcome::Success { payload })
    }

    /// Records a business failure so replays surface the same error.
    pub fn failure(err: &AppError) -> Self {
        IdempotentOutcome::Failure {
            kind: err.kind().to_string(),
            message: err.detail(),
        }
    }

    /// Decodes a replayed outcome back into the operation's result type.
    pub fn replay<T: serde::de::DeserializeOwned>(self) -> Result<T, AppError> {
        match self {
            IdempotentOutcome::Success { payload } => serde_json::from_value(payload)
                .map_err(|e| AppError::Internal(format!("Failed to decode stored outcome: {}", e))),
            IdempotentOutcome::Failure { kind, message } => Err(AppError::from_kind(&kind, message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_replays_same_kind() {
        let outcome = IdempotentOutcome::failure(&AppError::InvalidState("nope".into()));
        let replayed: Result<u32, AppError> = outcome.replay();
        assert_eq!(replayed.unwrap_err().kind(), "InvalidState");
    }

    #[test]
    fn test_success_replays_payload() {
        let outcome = IdempotentOutcome::success(&vec![1, 2, 3]).unwrap();
        let replayed: Vec<u32> = outcome.replay().unwrap();
        assert_eq!(replayed, vec![1, 2, 3]);
    }
}
