//! Transaction domain model and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::money::Money;
use crate::error::DomainError;

uuid_id!(
    /// Unique identifier for a Transaction.
    TransactionId
);

uuid_id!(
    /// Reference to the account a transaction or payment belongs to.
    AccountId
);

/// Lifecycle state of a ledger transaction.
///
/// ```text
/// PENDING ──commit──▶ COMMITTED ──reverse──▶ REVERSED
///    │
///    └────fail─────▶ FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    Pending,
    Committed,
    Reversed,
    Failed,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Pending => write!(f, "PENDING"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Reversed => write!(f, "REVERSED"),
            TransactionState::Failed => write!(f, "FAILED"),
        }
    }
}

/// A recorded monetary movement.
///
/// Amount and currency never change after creation; every state change
/// produces a new value with `version + 1`, which the store applies by
/// compare-and-set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Unique identifier
    pub id: TransactionId,
    /// Account the movement is booked against
    pub account_id: AccountId,
    amount: Money,
    state: TransactionState,
    /// Idempotency key the creating request carried, if any
    pub idempotency_key: Option<String>,
    /// External reference (e.g., invoice number)
    pub reference: Option<String>,
    /// Set on a reversal record: the transaction it mirrors
    pub reversal_of: Option<TransactionId>,
    /// Set on a reversed original: the reversal record
    pub reversed_by: Option<TransactionId>,
    version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Creates a new pending transaction.
    pub fn pending(
        account_id: AccountId,
        amount: Money,
        idempotency_key: Option<String>,
        reference: Option<String>,
    ) -> Result<Self, DomainError> {
        let amount = Money::non_zero(amount.amount(), amount.currency())?;
        let now = Utc::now();
        Ok(Self {
            id: TransactionId::new(),
            account_id,
            amount,
            state: TransactionState::Pending,
            idempotency_key,
            reference,
            reversal_of: None,
            reversed_by: None,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// True for mirror-signed reversal records.
    pub fn is_reversal(&self) -> bool {
        self.reversal_of.is_some()
    }

    /// `PENDING → COMMITTED`.
    pub fn commit(&self) -> Result<Self, DomainError> {
        self.transition(TransactionState::Pending, TransactionState::Committed, "commit")
    }

    /// `PENDING → FAILED`.
    pub fn fail(&self) -> Result<Self, DomainError> {
        self.transition(TransactionState::Pending, TransactionState::Failed, "fail")
    }

    /// `COMMITTED → REVERSED`.
    ///
    /// Returns the updated original and a new committed record carrying the
    /// same magnitude with the opposite sign. History is never deleted.
    pub fn reverse(&self) -> Result<(Self, Self), DomainError> {
        if self.is_reversal() {
            return Err(DomainError::InvalidState {
                entity: "reversal transaction",
                from: self.state.to_string(),
                action: "reverse",
            });
        }
        let mut original =
            self.transition(TransactionState::Committed, TransactionState::Reversed, "reverse")?;
        let amount = self.amount.negated()?;

        let now = Utc::now();
        let reversal = Self {
            id: TransactionId::new(),
            account_id: self.account_id,
            amount,
            state: TransactionState::Committed,
            idempotency_key: None,
            reference: self.reference.clone(),
            reversal_of: Some(self.id),
            reversed_by: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        original.reversed_by = Some(reversal.id);
        Ok((original, reversal))
    }

    fn transition(
        &self,
        from: TransactionState,
        to: TransactionState,
        action: &'static str,
    ) -> Result<Self, DomainError> {
        if self.state != from {
            return Err(DomainError::InvalidState {
                entity: "transaction",
                from: self.state.to_string(),
                action,
            });
        }
        let mut next = self.clone();
        next.state = to;
        next.version = self.version + 1;
        next.updated_at = Utc::now();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Currency;

    fn pending() -> Transaction {
        Transaction::pending(
            AccountId::new(),
            Money::new(1000, Currency::USD),
            Some("key-1".into()),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_zero_amount_is_invalid() {
        let result = Transaction::pending(AccountId::new(), Money::new(0, Currency::USD), None, None);
        assert!(matches!(result, Err(DomainError::InvalidAmount(_))));
    }

    #[test]
    fn test_commit_bumps_version() {
        let tx = pending();
        let committed = tx.commit().unwrap();
        assert_eq!(committed.state(), TransactionState::Committed);
        assert_eq!(committed.version(), tx.version() + 1);
        assert_eq!(committed.amount(), tx.amount());
    }

    #[test]
    fn test_commit_only_once() {
        let committed = pending().commit().unwrap();
        assert!(matches!(
            committed.commit(),
            Err(DomainError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_reverse_requires_committed() {
        assert!(matches!(
            pending().reverse(),
            Err(DomainError::InvalidState { .. })
        ));
        let failed = pending().fail().unwrap();
        assert!(matches!(
            failed.reverse(),
            Err(DomainError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_reverse_creates_mirror_record() {
        let committed = pending().commit().unwrap();
        let (original, reversal) = committed.reverse().unwrap();

        assert_eq!(original.state(), TransactionState::Reversed);
        assert_eq!(original.reversed_by, Some(reversal.id));
        assert_eq!(reversal.reversal_of, Some(committed.id));
        assert_eq!(reversal.amount().amount(), -1000);
        assert_eq!(reversal.state(), TransactionState::Committed);
    }

    #[test]
    fn test_most_negative_amount_is_rejected_not_reversed() {
        let result = Transaction::pending(
            AccountId::new(),
            Money::new(i64::MIN, Currency::USD),
            None,
            None,
        );
        assert!(matches!(result, Err(DomainError::InvalidAmount(_))));

        // A record that bypassed construction, e.g. loaded from storage.
        let mut committed = pending().commit().unwrap();
        committed.amount = Money::new(i64::MIN, Currency::USD);
        assert!(matches!(
            committed.reverse(),
            Err(DomainError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_reversal_cannot_be_reversed() {
        let (_, reversal) = pending().commit().unwrap().reverse().unwrap();
        assert!(reversal.reverse().is_err());
    }
}
