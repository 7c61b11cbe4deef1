//! Payment service provider port.

use serde::{Deserialize, Serialize};

use crate::domain::{Money, PaymentId};

/// What a PSP call produced.
///
/// Only `TransientError` is retry-eligible; `Declined` is a terminal
/// business outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementResult {
    Settled { external_ref: String },
    Declined { reason: String },
    TransientError { reason: String },
}

/// Charge/refund capability of an external processor.
///
/// Implementations must be safe to call concurrently.
#[async_trait::async_trait]
pub trait PspAdapter: Send + Sync {
    /// Registry name of this adapter.
    fn name(&self) -> &str;

    async fn charge(&self, amount: Money, reference: &str) -> SettlementResult;

    async fn refund(&self, payment_id: PaymentId, amount: Money) -> SettlementResult;
}
