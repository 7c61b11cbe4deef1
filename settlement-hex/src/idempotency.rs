//! Runs operations behind an idempotency key.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use settlement_repo::fingerprint;
use settlement_types::{
    AppError, IdempotencyStore, IdempotentOutcome, Reservation, ReservationToken,
};
use tracing::{debug, warn};

/// What `reserve` meant for the caller, with the fingerprint already applied.
pub enum Admission<I: IdempotencyStore> {
    /// Caller owns the key and must `finish` the lease
    Proceed(Lease<I>),
    Replay(IdempotentOutcome),
}

/// Ownership of a reserved key.
///
/// Only the lease's token can complete or release the key. A lease dropped
/// without `finish` (its request future was cancelled) releases the key so a
/// later retry is not wedged behind it.
pub struct Lease<I: IdempotencyStore> {
    store: Arc<I>,
    key: String,
    token: ReservationToken,
    finished: bool,
}

impl<I: IdempotencyStore> Lease<I> {
    /// Stores the result of the admitted operation.
    ///
    /// Successes and deterministic business failures are kept for replay;
    /// transient and internal failures release the key so a retry can run.
    pub async fn finish<T: Serialize>(mut self, result: &Result<T, AppError>) {
        self.finished = true;
        let key = self.key.as_str();
        let stored = match result {
            Ok(value) => match IdempotentOutcome::success(value) {
                Ok(outcome) => self.store.complete(key, self.token, outcome).await,
                Err(e) => {
                    warn!(key, error = %e, "Outcome not storable, releasing key");
                    self.store.release(key, self.token).await
                }
            },
            Err(err) if is_replayable(err) => {
                self.store
                    .complete(key, self.token, IdempotentOutcome::failure(err))
                    .await
            }
            Err(_) => self.store.release(key, self.token).await,
        };
        if let Err(e) = stored {
            warn!(key, error = %e, "Failed to record idempotency outcome");
        }
    }
}

impl<I: IdempotencyStore> Drop for Lease<I> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let token = self.token;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(key, "Lease dropped unfinished, releasing key");
                handle.spawn(async move {
                    if let Err(e) = store.release(&key, token).await {
                        warn!(key, error = %e, "Failed to release abandoned key");
                    }
                });
            }
            Err(_) => warn!(key, "Lease dropped outside a runtime, key stays reserved"),
        }
    }
}

/// Thin wrapper over an `IdempotencyStore` that fingerprints requests and
/// decides which results are stored for replay.
pub struct IdempotencyGuard<I: IdempotencyStore> {
    store: Arc<I>,
}

impl<I: IdempotencyStore> Clone for IdempotencyGuard<I> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<I: IdempotencyStore> IdempotencyGuard<I> {
    pub fn new(store: Arc<I>) -> Self {
        Self { store }
    }

    /// Reserves `key` for `request` under `operation`.
    ///
    /// A reused key with a different request fails with `IdempotencyKeyReused`.
    /// A key whose owner is still running fails with `IdempotencyInProgress`
    /// once the store stops waiting for it.
    pub async fn admit<T: Serialize>(
        &self,
        key: &str,
        operation: &str,
        request: &T,
    ) -> Result<Admission<I>, AppError> {
        let fp = fingerprint(operation, request)
            .map_err(|e| AppError::Internal(format!("Failed to fingerprint request: {}", e)))?;
        match self.store.reserve(key, &fp).await? {
            Reservation::Proceed(token) => Ok(Admission::Proceed(Lease {
                store: self.store.clone(),
                key: key.to_string(),
                token,
                finished: false,
            })),
            Reservation::Replay(outcome) => {
                debug!(key, operation, "Replaying stored outcome");
                Ok(Admission::Replay(outcome))
            }
            Reservation::Conflict => Err(AppError::IdempotencyKeyReused),
        }
    }

    /// Runs `op` at most once per key. Without a key it simply runs.
    pub async fn run<Req, T, F, Fut>(
        &self,
        key: Option<&str>,
        operation: &str,
        request: &Req,
        op: F,
    ) -> Result<T, AppError>
    where
        Req: Serialize,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let Some(key) = key else {
            return op().await;
        };
        match self.admit(key, operation, request).await? {
            Admission::Replay(outcome) => outcome.replay(),
            Admission::Proceed(lease) => {
                let result = op().await;
                lease.finish(&result).await;
                result
            }
        }
    }
}

/// Failures that would repeat identically on retry.
fn is_replayable(err: &AppError) -> bool {
    matches!(
        err,
        AppError::Validation(_)
            | AppError::InvalidAmount(_)
            | AppError::InvalidState(_)
            | AppError::NotFound(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use settlement_repo::InMemoryIdempotencyStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn guard() -> IdempotencyGuard<InMemoryIdempotencyStore> {
        IdempotencyGuard::new(Arc::new(InMemoryIdempotencyStore::default()))
    }

    #[tokio::test]
    async fn test_runs_once_per_key() {
        let guard = guard();
        let calls = AtomicU32::new(0);
        let request = serde_json::json!({"amount": 10});

        for _ in 0..3 {
            let value: u32 = guard
                .run(Some("k"), "op", &request, || async {
                    Ok::<_, AppError>(calls.fetch_add(1, Ordering::SeqCst) + 100)
                })
                .await
                .unwrap();
            assert_eq!(value, 100);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_business_failure_is_replayed() {
        let guard = guard();
        let request = serde_json::json!({"amount": 0});

        let first: Result<u32, _> = guard
            .run(Some("k"), "op", &request, || async {
                Err::<u32, _>(AppError::InvalidAmount("zero".into()))
            })
            .await;
        let second: Result<u32, _> = guard
            .run(Some("k"), "op", &request, || async { Ok::<_, AppError>(1) })
            .await;

        assert_eq!(first.unwrap_err(), second.unwrap_err());
    }

    #[tokio::test]
    async fn test_internal_failure_releases_key() {
        let guard = guard();
        let request = serde_json::json!({"amount": 5});

        let first: Result<u32, _> = guard
            .run(Some("k"), "op", &request, || async {
                Err::<u32, _>(AppError::Internal("store down".into()))
            })
            .await;
        assert!(first.is_err());

        let second: u32 = guard
            .run(Some("k"), "op", &request, || async { Ok::<_, AppError>(7) })
            .await
            .unwrap();
        assert_eq!(second, 7);
    }

    #[tokio::test]
    async fn test_key_reuse_with_other_request() {
        let guard = guard();

        let first = serde_json::json!({"amount": 1});
        let second = serde_json::json!({"amount": 2});

        let _: u32 = guard
            .run(Some("k"), "op", &first, || async { Ok::<_, AppError>(1) })
            .await
            .unwrap();
        let reused: Result<u32, _> = guard
            .run(Some("k"), "op", &second, || async { Ok::<_, AppError>(2) })
            .await;

        assert_eq!(reused.unwrap_err(), AppError::IdempotencyKeyReused);
    }

    #[tokio::test]
    async fn test_waiter_gets_owner_outcome_not_a_second_run() {
        let guard = guard();
        let calls = Arc::new(AtomicU32::new(0));
        let request = serde_json::json!({"amount": 3});

        let run = |guard: IdempotencyGuard<InMemoryIdempotencyStore>| {
            let calls = calls.clone();
            let request = request.clone();
            async move {
                guard
                    .run(Some("k"), "op", &request, || async {
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok::<_, AppError>(calls.fetch_add(1, Ordering::SeqCst) + 40)
                    })
                    .await
            }
        };
        let (first, second) = tokio::join!(run(guard.clone()), run(guard.clone()));

        assert_eq!(first.unwrap(), 40);
        assert_eq!(second.unwrap(), 40);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_lease_releases_key() {
        let guard = guard();
        let request = serde_json::json!({"amount": 4});

        let abandoned = guard.run(Some("k"), "op", &request, || async {
            std::future::pending::<Result<u32, AppError>>().await
        });
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(10), abandoned).await;
        assert!(timed_out.is_err());

        let value: u32 = guard
            .run(Some("k"), "op", &request, || async { Ok::<_, AppError>(8) })
            .await
            .unwrap();
        assert_eq!(value, 8);
    }
}
