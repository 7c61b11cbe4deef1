//! Fund Aggregator
//!
//! Queries fund sources concurrently on the shared worker pool and combines
//! their positions. A source that fails or times out is reported as
//! unavailable; it never contributes a zero.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use settlement_types::{
    AggregatedFunds, AppError, FundId, FundPosition, FundSource, FundView, SettlementRepository,
    SourceError, SourceStatus,
};
use tracing::{debug, info, instrument, warn};

use crate::config::RetryPolicy;
use crate::pool::WorkerPool;

pub struct FundAggregator<R: SettlementRepository> {
    repo: Arc<R>,
    sources: HashMap<String, Arc<dyn FundSource>>,
    pool: WorkerPool,
    source_timeout: Duration,
    retry: RetryPolicy,
}

impl<R: SettlementRepository> FundAggregator<R> {
    pub fn new(
        repo: Arc<R>,
        sources: Vec<Arc<dyn FundSource>>,
        pool: WorkerPool,
        source_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        let sources = sources
            .into_iter()
            .map(|s| (s.id().to_string(), s))
            .collect();
        Self {
            repo,
            sources,
            pool,
            source_timeout,
            retry,
        }
    }

    /// Known source identifiers, sorted.
    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sources.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Builds a combined view of `fund_id` from the requested sources.
    ///
    /// Each source gets its own timeout, covering the wait for a worker and
    /// the query itself. Duplicate source ids are queried once.
    #[instrument(skip_all, fields(fund_id = %fund_id, sources = source_ids.len()))]
    pub async fn aggregate(
        &self,
        fund_id: FundId,
        source_ids: Vec<String>,
    ) -> Result<AggregatedFunds, AppError> {
        if source_ids.is_empty() {
            return Err(AppError::Validation(
                "At least one source is required".into(),
            ));
        }
        let mut unique: Vec<String> = Vec::with_capacity(source_ids.len());
        for id in source_ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }

        let handles: Vec<_> = unique
            .iter()
            .map(|source_id| {
                let source = self.sources.get(source_id).cloned();
                let query = SourceQuery {
                    source_id: source_id.clone(),
                    fund_id: fund_id.clone(),
                    pool: self.pool.clone(),
                    timeout: self.source_timeout,
                    retry: self.retry,
                };
                tokio::spawn(query.run(source))
            })
            .collect();

        let mut statuses = Vec::with_capacity(handles.len());
        for (handle, source_id) in handles.into_iter().zip(unique) {
            let status = handle.await.unwrap_or_else(|e| SourceStatus::Unavailable {
                source_id,
                reason: format!("source query aborted: {}", e),
            });
            statuses.push(status);
        }

        for status in &statuses {
            if let SourceStatus::Available { position, .. } = status {
                if let Err(e) = self.repo.upsert_position(position.clone()).await {
                    warn!(source_id = %position.source_id, error = %e, "Failed to store fund position");
                }
            }
        }

        let aggregated = AggregatedFunds::from_statuses(fund_id, statuses)?;
        if aggregated.partial {
            let unavailable: Vec<&str> = aggregated
                .sources
                .iter()
                .filter(|s| !s.is_available())
                .map(|s| s.source_id())
                .collect();
            warn!(?unavailable, "Partial fund aggregation");
        } else {
            info!(sources = aggregated.sources.len(), "Fund aggregated");
        }
        Ok(aggregated)
    }

    /// Last known per-source positions of a fund.
    pub async fn get_fund(&self, id: &FundId) -> Result<FundView, AppError> {
        self.repo
            .get_fund(id)
            .await
            .map_err(Into::into)
            .and_then(|opt| opt.ok_or_else(|| AppError::NotFound(format!("Fund {}", id))))
    }
}

/// One source lookup, owned so it can run on its own task.
struct SourceQuery {
    source_id: String,
    fund_id: FundId,
    pool: WorkerPool,
    timeout: Duration,
    retry: RetryPolicy,
}

impl SourceQuery {
    async fn run(self, source: Option<Arc<dyn FundSource>>) -> SourceStatus {
        let Some(source) = source else {
            return self.unavailable("unknown source".into());
        };

        let fetched = tokio::time::timeout(self.timeout, async {
            let _permit = self.pool.acquire().await?;
            self.fetch_with_retry(source.as_ref())
                .await
                .map_err(|e| AppError::Transient(e.to_string()))
        })
        .await;

        match fetched {
            Ok(Ok(position)) if position.fund_id != self.fund_id => {
                self.unavailable(format!("returned a position for {}", position.fund_id))
            }
            Ok(Ok(position)) => SourceStatus::Available {
                source_id: self.source_id,
                position,
            },
            Ok(Err(e)) => self.unavailable(e.detail()),
            Err(_) => {
                let reason = format!("timed out after {:?}", self.timeout);
                self.unavailable(reason)
            }
        }
    }

    async fn fetch_with_retry(&self, source: &dyn FundSource) -> Result<FundPosition, SourceError> {
        let mut attempt = 1;
        loop {
            match source.fetch_position(&self.fund_id).await {
                Err(SourceError::Transient(reason)) if attempt < self.retry.max_attempts => {
                    debug!(source_id = %self.source_id, attempt, %reason, "Transient source error, retrying");
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn unavailable(self, reason: String) -> SourceStatus {
        warn!(source_id = %self.source_id, %reason, "Fund source unavailable");
        SourceStatus::Unavailable {
            source_id: self.source_id,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::StaticFundSource;
    use settlement_repo::InMemoryRepo;
    use settlement_types::{Currency, Money};

    fn fund() -> FundId {
        FundId::new("growth-eu").unwrap()
    }

    fn aggregator(repo: Arc<InMemoryRepo>) -> FundAggregator<InMemoryRepo> {
        let sources: Vec<Arc<dyn FundSource>> = vec![
            Arc::new(StaticFundSource::new("a").with_balance(fund(), Money::new(1000, Currency::EUR))),
            Arc::new(StaticFundSource::new("b").with_balance(fund(), Money::new(500, Currency::EUR))),
            Arc::new(
                StaticFundSource::new("slow")
                    .with_balance(fund(), Money::new(9999, Currency::EUR))
                    .with_latency(Duration::from_secs(60)),
            ),
        ];
        FundAggregator::new(
            repo,
            sources,
            WorkerPool::new(4),
            Duration::from_millis(200),
            RetryPolicy::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_source_makes_result_partial() {
        let repo = Arc::new(InMemoryRepo::new());
        let agg = aggregator(repo.clone());

        let result = agg
            .aggregate(fund(), vec!["a".into(), "slow".into(), "b".into()])
            .await
            .unwrap();

        assert!(result.partial);
        assert_eq!(result.sources.len(), 3);
        assert_eq!(result.sources[1].source_id(), "slow");
        assert!(!result.sources[1].is_available());
        assert_eq!(result.total_in(Currency::EUR).unwrap().amount(), 1500);

        let view = agg.get_fund(&fund()).await.unwrap();
        assert_eq!(view.positions.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_source_is_unavailable() {
        let agg = aggregator(Arc::new(InMemoryRepo::new()));

        let result = agg
            .aggregate(fund(), vec!["a".into(), "nowhere".into()])
            .await
            .unwrap();

        assert!(result.partial);
        assert!(matches!(
            &result.sources[1],
            SourceStatus::Unavailable { reason, .. } if reason == "unknown source"
        ));
    }

    #[tokio::test]
    async fn test_duplicate_sources_counted_once() {
        let agg = aggregator(Arc::new(InMemoryRepo::new()));

        let result = agg
            .aggregate(fund(), vec!["a".into(), "a".into()])
            .await
            .unwrap();

        assert!(!result.partial);
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.total_in(Currency::EUR).unwrap().amount(), 1000);
    }

    #[tokio::test]
    async fn test_empty_source_list_rejected() {
        let agg = aggregator(Arc::new(InMemoryRepo::new()));
        let result = agg.aggregate(fund(), vec![]).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
