//! Port traits (interfaces for adapters).
//!
//! These are the contracts that adapters must implement.
//! The application layer depends on these traits, not concrete implementations.

mod fund_source;
mod idempotency;
mod psp;
mod repository;

pub use fund_source::{FundSource, SourceError};
pub use idempotency::{IdempotencyStore, Reservation, ReservationToken};
pub use psp::{PspAdapter, SettlementResult};
pub use repository::SettlementRepository;
