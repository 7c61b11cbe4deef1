//! # Settlement Client SDK
//!
//! A typed Rust client for the Settlement API.
//!
//! Successful responses arrive as `{"status", "data"}` envelopes. Plain lookups
//! return the `data` directly; settlement calls return the whole
//! [`ApiResponse`] because `partial` and `declined` are meaningful there.

use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use settlement_types::{
    AccountId, AggregateFundsRequest, AggregatedFunds, ApiResponse, BatchPaymentRequest,
    BatchReport, CreateTransactionRequest, ErrorResponse, FundId, FundView, ItemOutcome, Payment,
    PaymentId, PaymentRequest, ReconcileRequest, ReconciliationRecord, RefundOutcome,
    RefundRequest, ReverseTransactionRequest, Transaction, TransactionId,
};

/// Error type for client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} {kind} - {message}")]
    Api {
        status: u16,
        kind: String,
        message: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Settlement API client.
pub struct SettlementClient {
    base_url: String,
    http: Client,
}

impl SettlementClient {
    /// Creates a new client.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    /// Checks if the API is healthy.
    pub async fn health(&self) -> Result<bool, ClientError> {
        let resp = self
            .http
            .get(self.url("/health"))
            .send()
            .await?;
        Ok(resp.status().is_success())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────────

    /// Records a pending transaction.
    pub async fn create_transaction(
        &self,
        account_id: AccountId,
        amount: i64,
        currency: &str,
        idempotency_key: Option<&str>,
        reference: Option<String>,
    ) -> Result<Transaction, ClientError> {
        let req = CreateTransactionRequest {
            account_id,
            amount,
            currency: currency.to_string(),
            idempotency_key: None,
            reference,
        };
        self.data(self.post("/transactions", &req, idempotency_key))
            .await
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, ClientError> {
        self.data(self.http.get(self.url(&format!("/transactions/{}", id))))
            .await
    }

    /// Reverses a committed transaction, returning the reversal record.
    pub async fn reverse_transaction(
        &self,
        id: TransactionId,
        idempotency_key: Option<&str>,
    ) -> Result<Transaction, ClientError> {
        let path = format!("/transactions/{}/reverse", id);
        self.data(self.post(&path, &ReverseTransactionRequest::default(), idempotency_key))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Payments
    // ─────────────────────────────────────────────────────────────────────────────

    /// Settles one payment. A declined payment is a successful response.
    pub async fn create_payment(
        &self,
        req: &PaymentRequest,
        idempotency_key: Option<&str>,
    ) -> Result<ApiResponse<ItemOutcome>, ClientError> {
        self.envelope(self.post("/payments", req, idempotency_key))
            .await
    }

    pub async fn get_payment(&self, id: PaymentId) -> Result<Payment, ClientError> {
        self.data(self.http.get(self.url(&format!("/payments/{}", id))))
            .await
    }

    pub async fn refund_payment(
        &self,
        id: PaymentId,
        amount: Option<i64>,
        idempotency_key: Option<&str>,
    ) -> Result<ApiResponse<RefundOutcome>, ClientError> {
        let req = RefundRequest {
            amount,
            idempotency_key: None,
        };
        let path = format!("/payments/{}/refund", id);
        self.envelope(self.post(&path, &req, idempotency_key)).await
    }

    /// Settles a batch; the report lists every item in input order.
    pub async fn submit_batch(
        &self,
        batch: &BatchPaymentRequest,
        idempotency_key: Option<&str>,
    ) -> Result<ApiResponse<BatchReport>, ClientError> {
        self.envelope(self.post("/payments/batch", batch, idempotency_key))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Funds & Reconciliation
    // ─────────────────────────────────────────────────────────────────────────────

    pub async fn aggregate_funds(
        &self,
        fund_id: FundId,
        sources: Vec<String>,
    ) -> Result<ApiResponse<AggregatedFunds>, ClientError> {
        let req = AggregateFundsRequest { fund_id, sources };
        self.envelope(self.post("/funds/aggregate", &req, None))
            .await
    }

    pub async fn get_fund(&self, id: &FundId) -> Result<FundView, ClientError> {
        self.data(self.http.get(self.url(&format!("/funds/{}", id))))
            .await
    }

    pub async fn reconcile(
        &self,
        req: &ReconcileRequest,
    ) -> Result<ReconciliationRecord, ClientError> {
        self.data(self.post("/funds/reconcile", req, None)).await
    }

    pub async fn list_reconciliations(&self) -> Result<Vec<ReconciliationRecord>, ClientError> {
        self.data(self.http.get(self.url("/reconciliations"))).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn post<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        idempotency_key: Option<&str>,
    ) -> RequestBuilder {
        let mut req = self.http.post(self.url(path)).json(body);
        if let Some(key) = idempotency_key {
            req = req.header("Idempotency-Key", key);
        }
        req
    }

    async fn data<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ClientError> {
        self.envelope(req).await.map(|envelope| envelope.data)
    }

    async fn envelope<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
    ) -> Result<ApiResponse<T>, ClientError> {
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if status.is_success() {
            Ok(serde_json::from_str(&body)?)
        } else {
            Err(api_error(status.as_u16(), &body))
        }
    }
}

fn api_error(status: u16, body: &str) -> ClientError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) => ClientError::Api {
            status,
            kind: err.kind,
            message: err.message,
        },
        Err(_) => ClientError::Api {
            status,
            kind: "Unknown".into(),
            message: body.to_string(),
        },
    }
}
