//! Fund source adapters.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use settlement_types::{FundId, FundPosition, FundSource, Money, SourceError};

/// A source answering from a fixed table of balances.
///
/// Stands in for a custodian or bank feed in development and tests.
#[derive(Debug, Clone)]
pub struct StaticFundSource {
    id: String,
    balances: HashMap<FundId, Money>,
    latency: Duration,
}

impl StaticFundSource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            balances: HashMap::new(),
            latency: Duration::ZERO,
        }
    }

    pub fn with_balance(mut self, fund_id: FundId, balance: Money) -> Self {
        self.balances.insert(fund_id, balance);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl FundSource for StaticFundSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch_position(&self, fund_id: &FundId) -> Result<FundPosition, SourceError> {
        tokio::time::sleep(self.latency).await;
        let balance = self
            .balances
            .get(fund_id)
            .copied()
            .ok_or_else(|| SourceError::Permanent(format!("{} does not hold {}", self.id, fund_id)))?;
        Ok(FundPosition {
            fund_id: fund_id.clone(),
            source_id: self.id.clone(),
            balance,
            as_of: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settlement_types::Currency;

    #[tokio::test]
    async fn test_static_source_reports_known_funds_only() {
        let fund = FundId::new("growth-eu").unwrap();
        let source =
            StaticFundSource::new("custodian-a").with_balance(fund.clone(), Money::new(900, Currency::EUR));

        let position = source.fetch_position(&fund).await.unwrap();
        assert_eq!(position.source_id, "custodian-a");
        assert_eq!(position.balance.amount(), 900);

        let other = FundId::new("income-us").unwrap();
        assert!(matches!(
            source.fetch_position(&other).await,
            Err(SourceError::Permanent(_))
        ));
    }
}
