//! Fund source port.

use crate::domain::{FundId, FundPosition};

/// Error type for fund source queries.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("Source temporarily unavailable: {0}")]
    Transient(String),

    #[error("Source error: {0}")]
    Permanent(String),
}

/// A system that knows a fund's balance (custodian, bank, internal book).
#[async_trait::async_trait]
pub trait FundSource: Send + Sync {
    fn id(&self) -> &str;

    async fn fetch_position(&self, fund_id: &FundId) -> Result<FundPosition, SourceError>;
}
