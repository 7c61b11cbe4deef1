//! # Settlement Repository
//!
//! Concrete storage adapters for the settlement core.
//! This crate provides the in-memory implementations of the
//! `SettlementRepository` and `IdempotencyStore` ports, plus the request
//! fingerprinting used to detect idempotency-key reuse.

pub mod fingerprint;
pub mod idempotency;
pub mod memory;
pub mod sweeper;

#[cfg(test)]
mod memory_tests;

pub use fingerprint::fingerprint;
pub use idempotency::InMemoryIdempotencyStore;
pub use memory::InMemoryRepo;
pub use sweeper::IdempotencySweeper;

/// Build an empty repository.
///
/// # Examples
///
/// ```
/// let repo = settlement_repo::build_repo();
/// # let _ = repo;
/// ```
pub fn build_repo() -> InMemoryRepo {
    InMemoryRepo::new()
}
