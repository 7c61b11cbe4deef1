//! # Settlement Types
//!
//! Domain types and port traits for the settlement core.
//! This crate has ZERO external IO dependencies - only data structures,
//! state machines, and trait definitions.
//!
//! ## Architecture
//!
//! This crate represents the **innermost core** of the hexagonal architecture:
//! - `domain/` - Pure domain types (Money, Transaction, Payment, Fund, Reconciliation)
//! - `ports/` - Trait definitions that adapters must implement
//! - `dto/` - Data Transfer Objects for API boundaries
//! - `error/` - Domain, repository and application error types

pub mod domain;
pub mod dto;
pub mod error;
pub mod ports;

// Re-export commonly used types
pub use domain::{
    AccountId, AggregatedFunds, AmbiguousMatch, AmountMismatch, BatchId, Currency, FundId,
    FundPosition, FundView, IdempotentOutcome, MatchMethod, MatchedPair, Money, Payment,
    PaymentId, PaymentState, ReconciliationId, ReconciliationRecord, ReconciliationScope,
    SourceStatus, StateMismatch, Transaction, TransactionId, TransactionState,
};
pub use dto::*;
pub use error::{AppError, DomainError, RepoError};
pub use ports::{
    FundSource, IdempotencyStore, PspAdapter, Reservation, ReservationToken, SettlementRepository,
    SettlementResult, SourceError,
};
