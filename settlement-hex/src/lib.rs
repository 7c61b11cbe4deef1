//! # Settlement Hex
//!
//! Application services, outbound adapters and the HTTP adapter for the
//! settlement core.
//!
//! ## Architecture
//!
//! - `ledger` - transaction state machine over version compare-and-set
//! - `coordinator` - bounded-concurrency batch settlement against PSPs
//! - `aggregator` - fund positions across sources, tolerant of partial failure
//! - `reconcile` - ties payments to transactions and reports the rest
//! - `service` - facade wiring the above onto one worker pool
//! - `outbound/` - simulated PSPs, PSP rate limiting, static fund sources
//! - `inbound/` - HTTP adapter (Axum server)
//!
//! Everything is generic over `R: SettlementRepository` and
//! `I: IdempotencyStore`, so store adapters are injected at compile time.

pub mod aggregator;
pub mod config;
pub mod coordinator;
pub mod idempotency;
pub mod inbound;
pub mod ledger;
pub mod openapi;
pub mod outbound;
pub mod pool;
pub mod reconcile;
pub mod retry;
pub mod service;


pub use config::{RetryPolicy, SettlementConfig};
pub use service::SettlementService;
