//! Idempotency store port.

use crate::domain::IdempotentOutcome;
use crate::error::RepoError;

/// Proof of ownership of an in-flight reservation.
///
/// Only the holder of the token handed out with `Proceed` may complete or
/// release the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReservationToken(pub u64);

/// Result of trying to reserve an idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    /// No entry existed; the caller owns the key and must `complete` or `release` it.
    Proceed(ReservationToken),
    /// Same key, same request: the stored outcome, returned verbatim.
    Replay(IdempotentOutcome),
    /// Same key, different request.
    Conflict,
}

/// Maps idempotency keys to the outcome of the operation they guarded.
///
/// `reserve` is a single atomic check-and-reserve. A concurrent caller with
/// the same key and fingerprint waits for the owner to complete and then
/// observes `Replay`. An in-flight key stays reserved for as long as its
/// owner holds it; a waiter that runs out of patience gets
/// `IdempotencyInProgress`, never a second `Proceed`.
#[async_trait::async_trait]
pub trait IdempotencyStore: Send + Sync + 'static {
    async fn reserve(&self, key: &str, fingerprint: &str) -> Result<Reservation, RepoError>;

    /// Stores the outcome for a key reserved with `Proceed`.
    async fn complete(
        &self,
        key: &str,
        token: ReservationToken,
        outcome: IdempotentOutcome,
    ) -> Result<(), RepoError>;

    /// Drops an in-flight reservation so a retry can proceed.
    async fn release(&self, key: &str, token: ReservationToken) -> Result<(), RepoError>;

    /// Removes expired entries, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, RepoError>;
}
