//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use utoipa::OpenApi;

use settlement_types::{
    AggregateFundsRequest, ApiResponse, AppError, BatchPaymentRequest, CreateTransactionRequest,
    ErrorResponse, FundId, IdempotencyStore, ItemOutcome, PaymentId, PaymentRequest,
    ReconcileRequest, RefundOutcome, RefundRequest, ResponseStatus, ReverseTransactionRequest,
    SettlementRepository, TransactionId,
};

use crate::SettlementService;
use crate::openapi::ApiDoc;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Application state shared across handlers.
pub struct AppState<R: SettlementRepository, I: IdempotencyStore> {
    pub service: SettlementService<R, I>,
}

/// Wrapper to implement IntoResponse for AppError (orphan rule workaround).
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

pub fn status_code(err: &AppError) -> StatusCode {
    match err {
        AppError::Validation(_) | AppError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
        AppError::IdempotencyKeyReused
        | AppError::IdempotencyInProgress
        | AppError::StaleVersion { .. }
        | AppError::InvalidState(_) => StatusCode::CONFLICT,
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_code(&self.0);
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), error = %self.0, "Request failed");
        } else {
            tracing::debug!(kind = self.0.kind(), error = %self.0, "Request rejected");
        }

        let body = ErrorResponse {
            status: ResponseStatus::Error,
            kind: self.0.kind().to_string(),
            message: self.0.detail(),
            code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

fn respond<T: Serialize>(code: StatusCode, status: ResponseStatus, data: T) -> Response {
    (code, Json(ApiResponse::with_status(status, data))).into_response()
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| AppError::Validation(e.body_text()).into())
}

/// Parses a body that may be left out entirely.
fn optional_body<T: DeserializeOwned + Default>(bytes: &Bytes) -> Result<T, ApiError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(bytes)
        .map_err(|e| AppError::Validation(format!("Invalid request body: {}", e)).into())
}

fn parse_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|_| AppError::Validation(format!("Invalid {} ID", what)).into())
}

/// Picks the idempotency key from the header or the body.
///
/// Both may be given only if they agree.
pub fn resolve_key(headers: &HeaderMap, body_key: Option<&str>) -> Result<Option<String>, AppError> {
    let header_key = match headers.get(IDEMPOTENCY_KEY_HEADER) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| AppError::Validation("Idempotency-Key header is not valid text".into()))?,
        ),
        None => None,
    };
    let key = match (header_key, body_key) {
        (Some(h), Some(b)) if h != b => {
            return Err(AppError::Validation(
                "Idempotency-Key header and body idempotency_key differ".into(),
            ));
        }
        (Some(h), _) => Some(h),
        (None, b) => b,
    };
    match key.map(str::trim) {
        Some("") => Err(AppError::Validation("Idempotency key cannot be empty".into())),
        other => Ok(other.map(str::to_string)),
    }
}

fn audit_missing_key(operation: &str, key: &Option<String>) {
    if key.is_none() {
        tracing::warn!(target: "audit", operation, "Request without idempotency key");
    }
}

/// Health check endpoint.
pub async fn health<R: SettlementRepository, I: IdempotencyStore>(
    State(state): State<Arc<AppState<R, I>>>,
) -> impl IntoResponse {
    Json(ApiResponse::ok(serde_json::json!({
        "healthy": true,
        "psps": state.service.psp_names(),
        "sources": state.service.source_ids(),
        "available_workers": state.service.available_workers(),
    })))
}

pub async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

// ─────────────────────────────────────────────────────────────────────────────
// Transactions
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip_all)]
pub async fn create_transaction<R: SettlementRepository, I: IdempotencyStore>(
    State(state): State<Arc<AppState<R, I>>>,
    headers: HeaderMap,
    payload: Result<Json<CreateTransactionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let mut req = json_body(payload)?;
    let key = resolve_key(&headers, req.idempotency_key.as_deref())?;
    audit_missing_key("transaction.create", &key);
    req.idempotency_key = key.clone();

    let tx = state
        .service
        .create_transaction(req, key.as_deref())
        .await?;
    Ok(respond(StatusCode::CREATED, ResponseStatus::Ok, tx))
}

#[tracing::instrument(skip(state), fields(transaction_id = %id))]
pub async fn get_transaction<R: SettlementRepository, I: IdempotencyStore>(
    State(state): State<Arc<AppState<R, I>>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id: TransactionId = parse_id(&id, "transaction")?;
    let tx = state.service.get_transaction(id).await?;
    Ok(respond(StatusCode::OK, ResponseStatus::Ok, tx))
}

#[tracing::instrument(skip(state, headers, body), fields(transaction_id = %id))]
pub async fn reverse_transaction<R: SettlementRepository, I: IdempotencyStore>(
    State(state): State<Arc<AppState<R, I>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let id: TransactionId = parse_id(&id, "transaction")?;
    let req: ReverseTransactionRequest = optional_body(&body)?;
    let key = resolve_key(&headers, req.idempotency_key.as_deref())?;
    audit_missing_key("transaction.reverse", &key);

    let reversal = state.service.reverse_transaction(id, key.as_deref()).await?;
    Ok(respond(StatusCode::OK, ResponseStatus::Ok, reversal))
}

// ─────────────────────────────────────────────────────────────────────────────
// Payments
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip_all)]
pub async fn create_payment<R: SettlementRepository, I: IdempotencyStore>(
    State(state): State<Arc<AppState<R, I>>>,
    headers: HeaderMap,
    payload: Result<Json<PaymentRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let mut req = json_body(payload)?;
    req.idempotency_key = resolve_key(&headers, req.idempotency_key.as_deref())?;

    let outcome = state.service.create_payment(req).await;
    match outcome {
        ItemOutcome::Settled { .. } => Ok(respond(StatusCode::CREATED, ResponseStatus::Ok, outcome)),
        ItemOutcome::Declined { .. } => {
            Ok(respond(StatusCode::OK, ResponseStatus::Declined, outcome))
        }
        ItemOutcome::Rejected { kind, message } => Err(AppError::from_kind(&kind, message).into()),
        ItemOutcome::Failed { .. } | ItemOutcome::TimedOut { .. } | ItemOutcome::Skipped { .. } => {
            Ok(respond(StatusCode::ACCEPTED, ResponseStatus::Partial, outcome))
        }
    }
}

#[tracing::instrument(skip(state), fields(payment_id = %id))]
pub async fn get_payment<R: SettlementRepository, I: IdempotencyStore>(
    State(state): State<Arc<AppState<R, I>>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id: PaymentId = parse_id(&id, "payment")?;
    let payment = state.service.get_payment(id).await?;
    Ok(respond(StatusCode::OK, ResponseStatus::Ok, payment))
}

#[tracing::instrument(skip(state, headers, body), fields(payment_id = %id))]
pub async fn refund_payment<R: SettlementRepository, I: IdempotencyStore>(
    State(state): State<Arc<AppState<R, I>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let id: PaymentId = parse_id(&id, "payment")?;
    let req: RefundRequest = optional_body(&body)?;
    let key = resolve_key(&headers, req.idempotency_key.as_deref())?;
    audit_missing_key("payment.refund", &key);

    let outcome = state
        .service
        .refund_payment(id, req, key.as_deref())
        .await?;
    let (code, status) = match outcome {
        RefundOutcome::Refunded { .. } => (StatusCode::OK, ResponseStatus::Ok),
        RefundOutcome::Declined { .. } => (StatusCode::OK, ResponseStatus::Declined),
        RefundOutcome::Failed { .. } => (StatusCode::ACCEPTED, ResponseStatus::Partial),
    };
    Ok(respond(code, status, outcome))
}

#[tracing::instrument(skip_all)]
pub async fn submit_batch<R: SettlementRepository, I: IdempotencyStore>(
    State(state): State<Arc<AppState<R, I>>>,
    headers: HeaderMap,
    payload: Result<Json<BatchPaymentRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let mut batch = json_body(payload)?;
    let key = resolve_key(&headers, batch.idempotency_key.as_deref())?;
    audit_missing_key("payment.batch", &key);
    batch.idempotency_key = key.clone();
    tracing::info!(items = batch.payments.len(), "Batch received");

    let report = state.service.submit_batch(batch, key.as_deref()).await?;
    let all_final = report.complete
        && report.items.iter().all(|item| {
            matches!(
                item.outcome,
                ItemOutcome::Settled { .. } | ItemOutcome::Declined { .. }
            )
        });
    let status = if all_final {
        ResponseStatus::Ok
    } else {
        ResponseStatus::Partial
    };
    Ok(respond(StatusCode::OK, status, report))
}

// ─────────────────────────────────────────────────────────────────────────────
// Funds & Reconciliation
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip_all)]
pub async fn aggregate_funds<R: SettlementRepository, I: IdempotencyStore>(
    State(state): State<Arc<AppState<R, I>>>,
    payload: Result<Json<AggregateFundsRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = json_body(payload)?;
    FundId::new(req.fund_id.as_str()).map_err(AppError::from)?;

    let aggregated = state.service.aggregate_funds(req).await?;
    let status = if aggregated.partial {
        ResponseStatus::Partial
    } else {
        ResponseStatus::Ok
    };
    Ok(respond(StatusCode::OK, status, aggregated))
}

#[tracing::instrument(skip(state), fields(fund_id = %id))]
pub async fn get_fund<R: SettlementRepository, I: IdempotencyStore>(
    State(state): State<Arc<AppState<R, I>>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = FundId::new(id).map_err(AppError::from)?;
    let view = state.service.get_fund(&id).await?;
    Ok(respond(StatusCode::OK, ResponseStatus::Ok, view))
}

#[tracing::instrument(skip_all)]
pub async fn reconcile<R: SettlementRepository, I: IdempotencyStore>(
    State(state): State<Arc<AppState<R, I>>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: ReconcileRequest = optional_body(&body)?;
    let record = state.service.reconcile(req).await?;
    Ok(respond(StatusCode::OK, ResponseStatus::Ok, record))
}

#[tracing::instrument(skip(state))]
pub async fn list_reconciliations<R: SettlementRepository, I: IdempotencyStore>(
    State(state): State<Arc<AppState<R, I>>>,
) -> Result<Response, ApiError> {
    let records = state.service.list_reconciliations().await?;
    Ok(respond(StatusCode::OK, ResponseStatus::Ok, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_str(key).unwrap());
        headers
    }

    #[test]
    fn test_header_and_body_keys_must_agree() {
        assert_eq!(
            resolve_key(&headers("a"), Some("a")).unwrap(),
            Some("a".to_string())
        );
        assert!(matches!(
            resolve_key(&headers("a"), Some("b")),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_key_from_either_source() {
        assert_eq!(
            resolve_key(&headers("h"), None).unwrap(),
            Some("h".to_string())
        );
        assert_eq!(
            resolve_key(&HeaderMap::new(), Some("b")).unwrap(),
            Some("b".to_string())
        );
        assert_eq!(resolve_key(&HeaderMap::new(), None).unwrap(), None);
    }

    #[test]
    fn test_blank_key_rejected() {
        assert!(resolve_key(&HeaderMap::new(), Some("  ")).is_err());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(status_code(&AppError::IdempotencyKeyReused), StatusCode::CONFLICT);
        assert_eq!(
            status_code(&AppError::StaleVersion { expected: 1, actual: 2 }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_code(&AppError::Transient("psp".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_code(&AppError::InvalidAmount("0".into())),
            StatusCode::BAD_REQUEST
        );
    }
}
