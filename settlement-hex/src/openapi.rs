//! OpenAPI specification and documentation.

#![allow(dead_code)] // Path functions are only used by utoipa for documentation generation

use settlement_types::domain::{
    AggregatedFunds, AmbiguousMatch, AmountMismatch, BatchId, Currency, FundPosition, FundView,
    MatchMethod, MatchedPair, Money, Payment, PaymentId, PaymentState, ReconciliationId,
    ReconciliationRecord, ReconciliationScope, SourceStatus, StateMismatch, Transaction,
    TransactionId, TransactionState,
};
use settlement_types::dto::{
    AggregateFundsRequest, BatchItemReport, BatchPaymentRequest, BatchReport, BatchSummary,
    CreateTransactionRequest, ErrorResponse, ItemOutcome, PaymentRequest, ReconcileRequest,
    RefundOutcome, RefundRequest, ResponseStatus, ReverseTransactionRequest,
};
use utoipa::OpenApi;

// Dummy functions to generate path documentation.
// Success bodies are wrapped in {"status": ..., "data": <body>}.

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = inline(serde_json::Value),
         example = json!({"status": "ok", "data": {"healthy": true}}))
    )
)]
async fn health() {}

/// Record a pending transaction
#[utoipa::path(
    post,
    path = "/transactions",
    tag = "transactions",
    request_body = CreateTransactionRequest,
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Deduplicates retries")
    ),
    responses(
        (status = 201, description = "Transaction recorded", body = Transaction),
        (status = 400, description = "Invalid amount or currency", body = ErrorResponse),
        (status = 409, description = "Idempotency key reused or in progress", body = ErrorResponse)
    )
)]
async fn create_transaction() {}

/// Get transaction by ID
#[utoipa::path(
    get,
    path = "/transactions/{id}",
    tag = "transactions",
    params(("id" = TransactionId, Path, description = "Transaction ID (UUID)")),
    responses(
        (status = 200, description = "Transaction", body = Transaction),
        (status = 404, description = "Transaction not found", body = ErrorResponse)
    )
)]
async fn get_transaction() {}

/// Reverse a committed transaction
#[utoipa::path(
    post,
    path = "/transactions/{id}/reverse",
    tag = "transactions",
    request_body = ReverseTransactionRequest,
    params(
        ("id" = TransactionId, Path, description = "Transaction ID (UUID)"),
        ("Idempotency-Key" = Option<String>, Header, description = "Deduplicates retries")
    ),
    responses(
        (status = 200, description = "Reversal record", body = Transaction),
        (status = 404, description = "Transaction not found", body = ErrorResponse),
        (status = 409, description = "Transaction is not committed", body = ErrorResponse)
    )
)]
async fn reverse_transaction() {}

/// Settle a single payment
#[utoipa::path(
    post,
    path = "/payments",
    tag = "payments",
    request_body = PaymentRequest,
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Deduplicates retries")
    ),
    responses(
        (status = 201, description = "Settled", body = ItemOutcome),
        (status = 200, description = "Declined by the PSP (status \"declined\")", body = ItemOutcome),
        (status = 202, description = "Failed or timed out (status \"partial\")", body = ItemOutcome),
        (status = 400, description = "Invalid payment", body = ErrorResponse),
        (status = 409, description = "Idempotency conflict or invalid transaction state", body = ErrorResponse)
    )
)]
async fn create_payment() {}

/// Get payment by ID
#[utoipa::path(
    get,
    path = "/payments/{id}",
    tag = "payments",
    params(("id" = PaymentId, Path, description = "Payment ID (UUID)")),
    responses(
        (status = 200, description = "Payment", body = Payment),
        (status = 404, description = "Payment not found", body = ErrorResponse)
    )
)]
async fn get_payment() {}

/// Refund a settled payment
#[utoipa::path(
    post,
    path = "/payments/{id}/refund",
    tag = "payments",
    request_body = RefundRequest,
    params(
        ("id" = PaymentId, Path, description = "Payment ID (UUID)"),
        ("Idempotency-Key" = Option<String>, Header, description = "Deduplicates retries")
    ),
    responses(
        (status = 200, description = "Refunded, or declined (status \"declined\")", body = RefundOutcome),
        (status = 202, description = "Refund failed after retries", body = RefundOutcome),
        (status = 409, description = "Payment is not settled", body = ErrorResponse)
    )
)]
async fn refund_payment() {}

/// Settle a batch of payments
#[utoipa::path(
    post,
    path = "/payments/batch",
    tag = "payments",
    request_body = BatchPaymentRequest,
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Deduplicates retries")
    ),
    responses(
        (status = 200, description = "Per-item report in input order", body = BatchReport),
        (status = 400, description = "Empty batch", body = ErrorResponse)
    )
)]
async fn submit_batch() {}

/// Aggregate a fund across sources
#[utoipa::path(
    post,
    path = "/funds/aggregate",
    tag = "funds",
    request_body = AggregateFundsRequest,
    responses(
        (status = 200, description = "Combined view; status \"partial\" when a source is unavailable", body = AggregatedFunds),
        (status = 400, description = "No sources given", body = ErrorResponse)
    )
)]
async fn aggregate_funds() {}

/// Last known positions of a fund
#[utoipa::path(
    get,
    path = "/funds/{id}",
    tag = "funds",
    params(("id" = String, Path, description = "Fund ID")),
    responses(
        (status = 200, description = "Per-source positions", body = FundView),
        (status = 404, description = "Fund never aggregated", body = ErrorResponse)
    )
)]
async fn get_fund() {}

/// Run a reconciliation
#[utoipa::path(
    post,
    path = "/funds/reconcile",
    tag = "reconciliation",
    request_body = ReconcileRequest,
    responses(
        (status = 200, description = "Reconciliation record", body = ReconciliationRecord),
        (status = 400, description = "Invalid scope or window", body = ErrorResponse)
    )
)]
async fn reconcile() {}

/// Past reconciliation runs, most recent first
#[utoipa::path(
    get,
    path = "/reconciliations",
    tag = "reconciliation",
    responses(
        (status = 200, description = "Reconciliation history", body = Vec<ReconciliationRecord>)
    )
)]
async fn list_reconciliations() {}

/// OpenAPI documentation for the Settlement API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Settlement Core API",
        version = "1.0.0",
        description = "Idempotent transaction ledger, batch payment settlement, fund aggregation and reconciliation.\n\n## Idempotency\n\nMutating endpoints accept an `Idempotency-Key` header (or an `idempotency_key` body field). Repeating a request with the same key replays the stored result; reusing a key with a different request is rejected with 409.",
        license(name = "MIT"),
    ),
    paths(
        health,
        create_transaction,
        get_transaction,
        reverse_transaction,
        create_payment,
        get_payment,
        refund_payment,
        submit_batch,
        aggregate_funds,
        get_fund,
        reconcile,
        list_reconciliations,
    ),
    components(
        schemas(
            Money,
            Currency,
            TransactionId,
            TransactionState,
            Transaction,
            PaymentId,
            PaymentState,
            BatchId,
            Payment,
            FundPosition,
            FundView,
            SourceStatus,
            AggregatedFunds,
            ReconciliationId,
            ReconciliationScope,
            MatchMethod,
            MatchedPair,
            AmountMismatch,
            StateMismatch,
            AmbiguousMatch,
            ReconciliationRecord,
            ResponseStatus,
            ErrorResponse,
            CreateTransactionRequest,
            ReverseTransactionRequest,
            PaymentRequest,
            BatchPaymentRequest,
            RefundRequest,
            ItemOutcome,
            BatchItemReport,
            BatchSummary,
            BatchReport,
            RefundOutcome,
            AggregateFundsRequest,
            ReconcileRequest,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "transactions", description = "Ledger operations"),
        (name = "payments", description = "PSP settlement, refunds and batches"),
        (name = "funds", description = "Fund aggregation across sources"),
        (name = "reconciliation", description = "Matching payments to transactions"),
    )
)]
pub struct ApiDoc;
