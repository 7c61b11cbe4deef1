use settlement_types::IdempotencyStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};

/// Background task that drops expired idempotency entries.
pub struct IdempotencySweeper<S: IdempotencyStore> {
    store: Arc<S>,
    interval: Duration,
}

impl<S: IdempotencyStore> IdempotencySweeper<S> {
    pub fn new(store: Arc<S>, interval: Duration) -> Self {
        Self { store, interval }
    }

    #[instrument(skip(self))]
    pub async fn run(self) {
        info!("Starting idempotency sweeper every {:?}", self.interval);
        loop {
            sleep(self.interval).await;
            self.sweep_once().await;
        }
    }

    /// Runs one purge pass, returning how many entries were removed.
    pub async fn sweep_once(&self) -> usize {
        match self.store.purge_expired().await {
            Ok(0) => 0,
            Ok(removed) => {
                debug!("Purged {} expired idempotency entries", removed);
                removed
            }
            Err(e) => {
                error!("Failed to purge idempotency entries: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryIdempotencyStore;
    use settlement_types::{IdempotentOutcome, Reservation};

    #[tokio::test(start_paused = true)]
    async fn test_sweep_once_removes_expired() {
        let store = Arc::new(InMemoryIdempotencyStore::new(
            Duration::from_secs(1),
            Duration::from_secs(30),
        ));
        let token = match store.reserve("k", "fp").await.unwrap() {
            Reservation::Proceed(token) => token,
            other => panic!("expected Proceed, got {:?}", other),
        };
        store
            .complete("k", token, IdempotentOutcome::success(&1u8).unwrap())
            .await
            .unwrap();

        let sweeper = IdempotencySweeper::new(store.clone(), Duration::from_secs(10));
        assert_eq!(sweeper.sweep_once().await, 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(sweeper.sweep_once().await, 1);
        assert!(store.is_empty());
    }
}
