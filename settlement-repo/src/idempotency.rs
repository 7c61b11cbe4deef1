//! In-memory idempotency store with retention and owned in-flight slots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use settlement_types::{
    IdempotencyStore, IdempotentOutcome, RepoError, Reservation, ReservationToken,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default time a completed outcome is kept for replay.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Default time a caller waits on an in-flight reservation before giving up.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

enum Slot {
    InFlight {
        fingerprint: String,
        owner: ReservationToken,
        /// Dropped when the slot is completed or released, waking waiters.
        _done: watch::Sender<()>,
        waiters: watch::Receiver<()>,
    },
    Completed {
        fingerprint: String,
        outcome: IdempotentOutcome,
        expires_at: Instant,
    },
}

impl Slot {
    fn in_flight(fingerprint: &str, owner: ReservationToken) -> Self {
        let (done, waiters) = watch::channel(());
        Slot::InFlight {
            fingerprint: fingerprint.to_string(),
            owner,
            _done: done,
            waiters,
        }
    }
}

enum Decision {
    Take(ReservationToken),
    Replay(IdempotentOutcome),
    Conflict,
    Wait(watch::Receiver<()>),
}

/// Idempotency store backed by a `DashMap`.
///
/// `reserve` decides under the entry lock, so two callers with the same key
/// can never both get `Proceed`. A caller that finds the key in flight with
/// the same fingerprint waits (up to the lease) for the owner to finish.
/// The slot itself never times out: only its owner's token can complete or
/// release it.
pub struct InMemoryIdempotencyStore {
    entries: DashMap<String, Slot>,
    next_token: AtomicU64,
    retention: Duration,
    lease: Duration,
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION, DEFAULT_LEASE)
    }
}

impl InMemoryIdempotencyStore {
    pub fn new(retention: Duration, lease: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            next_token: AtomicU64::new(1),
            retention,
            lease,
        }
    }

    /// Number of stored keys, in flight or completed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn issue(&self) -> ReservationToken {
        ReservationToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn decide(&self, key: &str, fingerprint: &str) -> Decision {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                let token = self.issue();
                vacant.insert(Slot::in_flight(fingerprint, token));
                Decision::Take(token)
            }
            Entry::Occupied(mut occupied) => {
                let decision = match occupied.get() {
                    Slot::Completed { expires_at, .. } if *expires_at <= now => {
                        Decision::Take(self.issue())
                    }
                    Slot::Completed {
                        fingerprint: stored,
                        outcome,
                        ..
                    } => {
                        if stored == fingerprint {
                            Decision::Replay(outcome.clone())
                        } else {
                            Decision::Conflict
                        }
                    }
                    Slot::InFlight {
                        fingerprint: stored,
                        ..
                    } if stored != fingerprint => Decision::Conflict,
                    Slot::InFlight { waiters, .. } => Decision::Wait(waiters.clone()),
                };
                if let Decision::Take(token) = decision {
                    occupied.insert(Slot::in_flight(fingerprint, token));
                }
                decision
            }
        }
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn reserve(&self, key: &str, fingerprint: &str) -> Result<Reservation, RepoError> {
        let deadline = Instant::now() + self.lease;
        loop {
            match self.decide(key, fingerprint) {
                Decision::Take(token) => return Ok(Reservation::Proceed(token)),
                Decision::Replay(outcome) => return Ok(Reservation::Replay(outcome)),
                Decision::Conflict => return Ok(Reservation::Conflict),
                Decision::Wait(mut rx) => {
                    debug!(key, "Waiting for in-flight request with the same key");
                    // Err means the owner completed or released the slot.
                    if tokio::time::timeout_at(deadline, rx.changed()).await.is_err() {
                        warn!(key, "Gave up waiting for in-flight request with the same key");
                        return Err(RepoError::IdempotencyInProgress);
                    }
                }
            }
        }
    }

    async fn complete(
        &self,
        key: &str,
        token: ReservationToken,
        outcome: IdempotentOutcome,
    ) -> Result<(), RepoError> {
        let mut slot = self
            .entries
            .get_mut(key)
            .ok_or_else(|| RepoError::Conflict(format!("No reservation for key {}", key)))?;
        let fingerprint = match &*slot {
            Slot::InFlight {
                fingerprint, owner, ..
            } if *owner == token => fingerprint.clone(),
            Slot::InFlight { .. } => {
                return Err(RepoError::Conflict(format!(
                    "Key {} is reserved by another owner",
                    key
                )));
            }
            Slot::Completed { .. } => {
                return Err(RepoError::Conflict(format!("Key {} already completed", key)));
            }
        };
        *slot = Slot::Completed {
            fingerprint,
            outcome,
            expires_at: Instant::now() + self.retention,
        };
        Ok(())
    }

    async fn release(&self, key: &str, token: ReservationToken) -> Result<(), RepoError> {
        let removed = self.entries.remove_if(key, |_, slot| {
            matches!(slot, Slot::InFlight { owner, .. } if *owner == token)
        });
        if removed.is_none() {
            debug!(key, "Release ignored, reservation not held by this owner");
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, RepoError> {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, slot| match slot {
            Slot::Completed { expires_at, .. } if *expires_at <= now => {
                removed += 1;
                false
            }
            _ => true,
        });
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn outcome(n: u32) -> IdempotentOutcome {
        IdempotentOutcome::success(&n).unwrap()
    }

    async fn take(store: &InMemoryIdempotencyStore, key: &str, fp: &str) -> ReservationToken {
        match store.reserve(key, fp).await.unwrap() {
            Reservation::Proceed(token) => token,
            other => panic!("expected Proceed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_first_reserve_proceeds_then_replays() {
        let store = InMemoryIdempotencyStore::default();

        let token = take(&store, "k", "fp").await;
        store.complete("k", token, outcome(7)).await.unwrap();

        assert_eq!(
            store.reserve("k", "fp").await.unwrap(),
            Reservation::Replay(outcome(7))
        );
    }

    #[tokio::test]
    async fn test_different_fingerprint_conflicts() {
        let store = InMemoryIdempotencyStore::default();

        let token = take(&store, "k", "fp-1").await;
        assert_eq!(store.reserve("k", "fp-2").await.unwrap(), Reservation::Conflict);

        store.complete("k", token, outcome(1)).await.unwrap();
        assert_eq!(store.reserve("k", "fp-2").await.unwrap(), Reservation::Conflict);
    }

    #[tokio::test]
    async fn test_concurrent_same_key_waits_for_owner() {
        let store = Arc::new(InMemoryIdempotencyStore::default());
        let token = take(&store, "k", "fp").await;

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.reserve("k", "fp").await })
        };
        tokio::task::yield_now().await;
        store.complete("k", token, outcome(3)).await.unwrap();

        assert_eq!(
            waiter.await.unwrap().unwrap(),
            Reservation::Replay(outcome(3))
        );
    }

    #[tokio::test]
    async fn test_release_lets_waiter_proceed() {
        let store = Arc::new(InMemoryIdempotencyStore::default());
        let token = take(&store, "k", "fp").await;

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.reserve("k", "fp").await })
        };
        tokio::task::yield_now().await;
        store.release("k", token).await.unwrap();

        assert!(matches!(
            waiter.await.unwrap().unwrap(),
            Reservation::Proceed(next) if next != token
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_key_is_never_taken_over() {
        let store = InMemoryIdempotencyStore::new(DEFAULT_RETENTION, Duration::from_secs(5));
        let token = take(&store, "k", "fp").await;

        let result = store.reserve("k", "fp").await;
        assert!(matches!(result, Err(RepoError::IdempotencyInProgress)));

        tokio::time::advance(Duration::from_secs(600)).await;
        let result = store.reserve("k", "fp").await;
        assert!(matches!(result, Err(RepoError::IdempotencyInProgress)));

        // The original owner can still record its outcome.
        store.complete("k", token, outcome(9)).await.unwrap();
        assert_eq!(
            store.reserve("k", "fp").await.unwrap(),
            Reservation::Replay(outcome(9))
        );
    }

    #[tokio::test]
    async fn test_only_the_owner_completes_or_releases() {
        let store = InMemoryIdempotencyStore::default();
        let token = take(&store, "k", "fp").await;
        let stranger = ReservationToken(token.0 + 1000);

        assert!(matches!(
            store.complete("k", stranger, outcome(1)).await,
            Err(RepoError::Conflict(_))
        ));
        store.release("k", stranger).await.unwrap();
        assert_eq!(store.len(), 1);

        store.complete("k", token, outcome(2)).await.unwrap();
        assert_eq!(
            store.reserve("k", "fp").await.unwrap(),
            Reservation::Replay(outcome(2))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_outcome_is_absent_and_purged() {
        let store = InMemoryIdempotencyStore::new(Duration::from_secs(60), DEFAULT_LEASE);
        let token = take(&store, "old", "fp").await;
        store.complete("old", token, outcome(1)).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        take(&store, "fresh", "fp").await;

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(matches!(
            store.reserve("old", "other").await.unwrap(),
            Reservation::Proceed(_)
        ));
    }
}
