//! Payment domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::money::Money;
use super::transaction::{AccountId, TransactionId};
use crate::error::DomainError;

uuid_id!(
    /// Unique identifier for a Payment.
    PaymentId
);

uuid_id!(
    /// Identifier shared by every payment submitted in one batch.
    BatchId
);

/// Lifecycle state of a payment.
///
/// ```text
/// CREATED ──▶ SUBMITTED ──▶ SETTLED ◀──▶ REFUNDING ──▶ REFUNDED
///                  │
///                  └──────▶ DECLINED
/// ```
///
/// `REFUNDING` is a claim held while the PSP refund call is in flight; a
/// declined or failed refund returns the payment to `SETTLED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Created,
    Submitted,
    Settled,
    Declined,
    Refunding,
    Refunded,
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentState::Created => write!(f, "CREATED"),
            PaymentState::Submitted => write!(f, "SUBMITTED"),
            PaymentState::Settled => write!(f, "SETTLED"),
            PaymentState::Declined => write!(f, "DECLINED"),
            PaymentState::Refunding => write!(f, "REFUNDING"),
            PaymentState::Refunded => write!(f, "REFUNDED"),
        }
    }
}

/// A charge routed through a PSP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Payment {
    pub id: PaymentId,
    /// Linked ledger transaction (None until linkage is resolved)
    pub transaction_id: Option<TransactionId>,
    pub account_id: AccountId,
    /// Name of the PSP adapter that handles this payment
    pub psp: String,
    amount: Money,
    state: PaymentState,
    pub idempotency_key: Option<String>,
    pub batch_id: Option<BatchId>,
    /// Reference returned by the PSP on settlement
    pub external_ref: Option<String>,
    pub decline_reason: Option<String>,
    /// Reference returned by the PSP on refund
    pub refund_ref: Option<String>,
    /// Number of charge calls made to the PSP
    pub attempts: u32,
    version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a payment in `CREATED` state.
    pub fn new(
        account_id: AccountId,
        psp: impl Into<String>,
        amount: Money,
        transaction_id: Option<TransactionId>,
        idempotency_key: Option<String>,
        batch_id: Option<BatchId>,
    ) -> Result<Self, DomainError> {
        let amount = Money::positive(amount.amount(), amount.currency())?;
        let now = Utc::now();
        Ok(Self {
            id: PaymentId::new(),
            transaction_id,
            account_id,
            psp: psp.into(),
            amount,
            state: PaymentState::Created,
            idempotency_key,
            batch_id,
            external_ref: None,
            decline_reason: None,
            refund_ref: None,
            attempts: 0,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn state(&self) -> PaymentState {
        self.state
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// `CREATED → SUBMITTED`.
    pub fn submit(&self) -> Result<Self, DomainError> {
        self.transition(PaymentState::Created, PaymentState::Submitted, "submit")
    }

    /// `SUBMITTED → SETTLED`.
    pub fn settle(&self, external_ref: String, attempts: u32) -> Result<Self, DomainError> {
        let mut next = self.transition(PaymentState::Submitted, PaymentState::Settled, "settle")?;
        next.external_ref = Some(external_ref);
        next.attempts = attempts;
        Ok(next)
    }

    /// `SUBMITTED → DECLINED`.
    pub fn decline(&self, reason: String, attempts: u32) -> Result<Self, DomainError> {
        let mut next =
            self.transition(PaymentState::Submitted, PaymentState::Declined, "decline")?;
        next.decline_reason = Some(reason);
        next.attempts = attempts;
        Ok(next)
    }

    /// Records attempts without changing state (retries exhausted, outcome unknown).
    pub fn with_attempts(&self, attempts: u32) -> Self {
        let mut next = self.clone();
        next.attempts = attempts;
        next.version = self.version + 1;
        next.updated_at = Utc::now();
        next
    }

    /// `SETTLED → REFUNDING`, claiming the payment for one refund attempt.
    pub fn begin_refund(&self) -> Result<Self, DomainError> {
        self.transition(PaymentState::Settled, PaymentState::Refunding, "refund")
    }

    /// `REFUNDING → SETTLED`, giving the claim back after a refund that did not happen.
    pub fn abandon_refund(&self) -> Result<Self, DomainError> {
        self.transition(PaymentState::Refunding, PaymentState::Settled, "abandon refund")
    }

    /// `REFUNDING → REFUNDED`.
    pub fn refund(&self, refund_ref: String) -> Result<Self, DomainError> {
        let mut next =
            self.transition(PaymentState::Refunding, PaymentState::Refunded, "refund")?;
        next.refund_ref = Some(refund_ref);
        Ok(next)
    }

    fn transition(
        &self,
        from: PaymentState,
        to: PaymentState,
        action: &'static str,
    ) -> Result<Self, DomainError> {
        if self.state != from {
            return Err(DomainError::InvalidState {
                entity: "payment",
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
