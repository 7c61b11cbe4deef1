//! Fund positions and aggregated views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::money::{Currency, Money};
use crate::error::DomainError;

/// Identifier of a fund (e.g. `"growth-eu"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct FundId(String);

impl FundId {
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "Fund id cannot be empty".into(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A balance reported by one source, stamped with its own as-of time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FundPosition {
    pub fund_id: FundId,
    pub source_id: String,
    pub balance: Money,
    /// When the source observed this balance
    pub as_of: DateTime<Utc>,
}

/// Last known positions of a fund, one per source.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FundView {
    pub fund_id: FundId,
    pub positions: Vec<FundPosition>,
}

/// Per-source outcome of an aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceStatus {
    Available {
        source_id: String,
        position: FundPosition,
    },
    Unavailable {
        source_id: String,
        reason: String,
    },
}

impl SourceStatus {
    pub fn source_id(&self) -> &str {
        match self {
            SourceStatus::Available { source_id, .. } | SourceStatus::Unavailable { source_id, .. } => {
                source_id
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, SourceStatus::Available { .. })
    }
}

/// Snapshot combining several sources.
///
/// `combined_balance` holds one total per currency, built only from
/// available sources. Unavailable sources are listed, never zeroed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AggregatedFunds {
    pub fund_id: FundId,
    pub combined_balance: Vec<Money>,
    pub sources: Vec<SourceStatus>,
    pub partial: bool,
    pub aggregated_at: DateTime<Utc>,
}

impl AggregatedFunds {
    /// Builds the aggregate from per-source statuses (in request order).
    pub fn from_statuses(fund_id: FundId, sources: Vec<SourceStatus>) -> Result<Self, DomainError> {
        let mut totals: Vec<Money> = Vec::new();
        for status in &sources {
            if let SourceStatus::Available { position, .. } = status {
                let balance = position.balance;
                match totals.iter_mut().find(|m| m.currency() == balance.currency()) {
                    Some(total) => *total = total.checked_add(balance)?,
                    None => totals.push(balance),
                }
            }
        }
        totals.sort_by_key(|m| m.currency());

        let partial = sources.iter().any(|s| !s.is_available());
        Ok(Self {
            fund_id,
            combined_balance: totals,
            sources,
            partial,
            aggregated_at: Utc::now(),
        })
    }

    /// Combined total for one currency, if any available source reported it.
    pub fn total_in(&self, currency: Currency) -> Option<Money> {
        self.combined_balance
            .iter()
            .copied()
            .find(|m| m.currency() == currency)
    }
}
