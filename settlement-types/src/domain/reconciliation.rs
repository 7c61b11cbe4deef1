//! Reconciliation run results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::money::Money;
use super::payment::{PaymentId, PaymentState};
use super::transaction::{AccountId, TransactionId, TransactionState};

uuid_id!(
    /// Identifier of one reconciliation run.
    ReconciliationId
);

/// Which records a run covers. Empty fields mean "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReconciliationScope {
    pub account_id: Option<AccountId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ReconciliationScope {
    /// True if a record for `account_id` created at `at` is in scope.
    pub fn contains(&self, account_id: AccountId, at: DateTime<Utc>) -> bool {
        self.account_id.is_none_or(|a| a == account_id)
            && self.from.is_none_or(|from| at >= from)
            && self.to.is_none_or(|to| at <= to)
    }
}

/// How a transaction/payment pair was tied together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchMethod {
    /// The payment carries the transaction id
    ById,
    /// Same account, amount and currency within the time window
    ByHeuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MatchedPair {
    pub transaction_id: TransactionId,
    pub payment_id: PaymentId,
    pub amount: Money,
    pub method: MatchMethod,
}

/// Linked pair whose recorded amounts disagree. Reported, never corrected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AmountMismatch {
    pub transaction_id: TransactionId,
    pub payment_id: PaymentId,
    pub transaction_amount: Money,
    pub payment_amount: Money,
    /// `payment - transaction` in minor units; None when currencies differ
    pub delta: Option<i64>,
}

/// Linked pair whose lifecycle states disagree (e.g. refunded vs. committed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StateMismatch {
    pub transaction_id: TransactionId,
    pub payment_id: PaymentId,
    pub transaction_state: TransactionState,
    pub payment_state: PaymentState,
}

/// Unlinked payment that could belong to more than one transaction, or a
/// transaction claimed by more than one unlinked payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AmbiguousMatch {
    pub payment_id: PaymentId,
    pub candidate_transaction_ids: Vec<TransactionId>,
}

/// Immutable result of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReconciliationRecord {
    pub id: ReconciliationId,
    pub scope: ReconciliationScope,
    pub run_at: DateTime<Utc>,
    /// Heuristic matching window in seconds
    pub window_secs: i64,
    pub matched: Vec<MatchedPair>,
    pub orphan_transactions: Vec<TransactionId>,
    pub orphan_payments: Vec<PaymentId>,
    pub amount_mismatches: Vec<AmountMismatch>,
    pub state_mismatches: Vec<StateMismatch>,
    pub ambiguous: Vec<AmbiguousMatch>,
    /// No incidents of any kind
    pub clean: bool,
}

impl ReconciliationRecord {
    /// Number of findings that need manual action.
    pub fn incident_count(&self) -> usize {
        self.orphan_transactions.len()
            + self.orphan_payments.len()
            + self.amount_mismatches.len()
            + self.state_mismatches.len()
            + self.ambiguous.len()
    }
}
