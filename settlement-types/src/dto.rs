//! Data Transfer Objects (DTOs) for requests and responses.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{
    AccountId, BatchId, Currency, FundId, Payment, PaymentId, ReconciliationScope, TransactionId,
};
use crate::error::DomainError;

// ─────────────────────────────────────────────────────────────────────────────
// Response envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Discriminator carried by every response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    /// Complete response, but some parts could not be produced
    Partial,
    /// A settlement was declined by the PSP (business outcome, not an error)
    Declined,
    Error,
}

/// Success envelope: `{"status": "...", "data": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: ResponseStatus,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: ResponseStatus::Ok,
            data,
        }
    }

    pub fn with_status(status: ResponseStatus, data: T) -> Self {
        Self { status, data }
    }
}

/// Failure envelope: `{"status": "error", "kind": ..., "message": ..., "code": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub status: ResponseStatus,
    #[schema(example = "IdempotencyKeyReused")]
    pub kind: String,
    pub message: String,
    #[schema(example = 409)]
    pub code: u16,
}

/// Parses a currency code from a request, mapping unknown codes to a domain error.
pub fn parse_currency(code: &str) -> Result<Currency, DomainError> {
    code.parse()
}

// ─────────────────────────────────────────────────────────────────────────────
// Transaction DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Request to record a new pending transaction.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateTransactionRequest {
    pub account_id: AccountId,
    /// Signed amount in smallest currency unit; must not be zero
    #[schema(example = 1000)]
    pub amount: i64,
    #[schema(example = "USD")]
    pub currency: String,
    /// Optional idempotency key (the `Idempotency-Key` header also works)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Optional reference for the transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Request to reverse a committed transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ReverseTransactionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Payment DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// One payment to settle through a PSP.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentRequest {
    pub account_id: AccountId,
    /// Positive amount in smallest currency unit
    #[schema(example = 2500)]
    pub amount: i64,
    #[schema(example = "EUR")]
    pub currency: String,
    /// PSP adapter name; the default adapter is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "stripe-sim")]
    pub psp: Option<String>,
    /// Existing pending transaction to settle; a new one is created when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Ordered batch of payments.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BatchPaymentRequest {
    pub payments: Vec<PaymentRequest>,
    /// Guards the batch as a whole; items may carry their own keys too
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Request to refund a settled payment in full.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RefundRequest {
    /// Must equal the settled amount when given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Terminal outcome of one batch item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemOutcome {
    Settled {
        transaction_id: TransactionId,
        payment_id: PaymentId,
        external_ref: String,
    },
    Declined {
        payment_id: PaymentId,
        reason: String,
    },
    /// Retries exhausted or ledger update failed; reconciliation decides the rest
    Failed {
        payment_id: Option<PaymentId>,
        reason: String,
    },
    /// Rejected before reaching the PSP (validation, idempotency conflict)
    Rejected { kind: String, message: String },
    /// Still in flight when the batch deadline fired
    TimedOut { payment_id: Option<PaymentId> },
    /// Never dispatched (batch timed out or was cancelled first)
    Skipped { reason: String },
}

impl ItemOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ItemOutcome::Settled { .. } => "SETTLED",
            ItemOutcome::Declined { .. } => "DECLINED",
            ItemOutcome::Failed { .. } => "FAILED",
            ItemOutcome::Rejected { .. } => "REJECTED",
            ItemOutcome::TimedOut { .. } => "TIMED_OUT",
            ItemOutcome::Skipped { .. } => "SKIPPED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BatchItemReport {
    /// Position of the item in the submitted batch
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BatchSummary {
    pub settled: usize,
    pub declined: usize,
    pub failed: usize,
    pub rejected: usize,
    pub timed_out: usize,
    pub skipped: usize,
}

/// Per-item report for a batch, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub items: Vec<BatchItemReport>,
    pub summary: BatchSummary,
    /// Every item reached a determinate outcome (nothing timed out or skipped)
    pub complete: bool,
}

impl BatchReport {
    /// Builds the report and its summary from ordered items.
    pub fn new(batch_id: BatchId, items: Vec<BatchItemReport>) -> Self {
        let mut summary = BatchSummary::default();
        for item in &items {
            match item.outcome {
                ItemOutcome::Settled { .. } => summary.settled += 1,
                ItemOutcome::Declined { .. } => summary.declined += 1,
                ItemOutcome::Failed { .. } => summary.failed += 1,
                ItemOutcome::Rejected { .. } => summary.rejected += 1,
                ItemOutcome::TimedOut { .. } => summary.timed_out += 1,
                ItemOutcome::Skipped { .. } => summary.skipped += 1,
            }
        }
        let complete = summary.timed_out == 0 && summary.skipped == 0;
        Self {
            batch_id,
            items,
            summary,
            complete,
        }
    }
}

/// Result of a refund request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundOutcome {
    Refunded {
        payment: Payment,
        /// Mirror-signed ledger record created for the refund
        reversal_transaction_id: Option<TransactionId>,
    },
    Declined {
        payment_id: PaymentId,
        reason: String,
    },
    Failed {
        payment_id: PaymentId,
        reason: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Fund DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Request to aggregate a fund across sources.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AggregateFundsRequest {
    #[schema(value_type = String, example = "growth-eu")]
    pub fund_id: FundId,
    /// Source identifiers to query
    #[schema(example = json!(["custodian-a", "custodian-b"]))]
    pub sources: Vec<String>,
}

/// Request to run a reconciliation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ReconcileRequest {
    #[serde(flatten)]
    pub scope: ReconciliationScope,
    /// Heuristic matching window in seconds; the configured default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_report_summary() {
        let items = vec![
            BatchItemReport {
                index: 0,
                idempotency_key: None,
                outcome: ItemOutcome::Declined {
                    payment_id: PaymentId::new(),
                    reason: "insufficient funds".into(),
                },
            },
            BatchItemReport {
                index: 1,
                idempotency_key: None,
                outcome: ItemOutcome::TimedOut { payment_id: None },
            },
        ];
        let report = BatchReport::new(BatchId::new(), items);
        assert_eq!(report.summary.declined, 1);
        assert_eq!(report.summary.timed_out, 1);
        assert!(!report.complete);
    }

    #[test]
    fn test_item_outcome_wire_format() {
        let outcome = ItemOutcome::Skipped {
            reason: "batch cancelled".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "SKIPPED");
    }

    #[test]
    fn test_reconcile_request_flattens_scope() {
        let req: ReconcileRequest = serde_json::from_str(r#"{"window_secs": 60}"#).unwrap();
        assert!(req.scope.account_id.is_none());
        assert_eq!(req.window_secs, Some(60));
    }
}
