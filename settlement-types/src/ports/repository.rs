//! Repository port trait.
//!
//! This is the primary port in our hexagonal architecture: the abstract
//! store behind the ledger, payments, fund positions and reconciliation runs.

use crate::domain::{
    FundId, FundPosition, FundView, Payment, PaymentId, ReconciliationRecord, ReconciliationScope,
    Transaction, TransactionId,
};
use crate::error::RepoError;

/// The main repository port for the settlement core.
///
/// Every mutation MUST be atomic. Updates are compare-and-set on the
/// record's version: the write succeeds only if the stored version still
/// equals `expected_version`, otherwise it fails with `RepoError::StaleVersion`.
/// Implementations must not hold locks across calls to other components.
#[async_trait::async_trait]
pub trait SettlementRepository: Send + Sync + 'static {
    // ─────────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────────

    /// Inserts a new transaction. Fails with `Conflict` if the id exists.
    async fn insert_transaction(&self, tx: Transaction) -> Result<(), RepoError>;

    /// Gets a transaction by ID.
    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, RepoError>;

    /// Replaces a transaction if its stored version equals `expected_version`.
    async fn update_transaction(
        &self,
        expected_version: u64,
        next: Transaction,
    ) -> Result<Transaction, RepoError>;

    /// Atomically stores a reversed original (CAS on `expected_version`)
    /// together with its new mirror-signed reversal record.
    async fn record_reversal(
        &self,
        expected_version: u64,
        original: Transaction,
        reversal: Transaction,
    ) -> Result<(), RepoError>;

    /// Lists transactions created within the scope, oldest first.
    async fn list_transactions(
        &self,
        scope: &ReconciliationScope,
    ) -> Result<Vec<Transaction>, RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Payments
    // ─────────────────────────────────────────────────────────────────────────────

    async fn insert_payment(&self, payment: Payment) -> Result<(), RepoError>;

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>, RepoError>;

    /// Replaces a payment if its stored version equals `expected_version`.
    async fn update_payment(&self, expected_version: u64, next: Payment)
    -> Result<Payment, RepoError>;

    /// Lists payments created within the scope, oldest first.
    async fn list_payments(&self, scope: &ReconciliationScope) -> Result<Vec<Payment>, RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Funds
    // ─────────────────────────────────────────────────────────────────────────────

    /// Stores the latest position of a fund at one source.
    async fn upsert_position(&self, position: FundPosition) -> Result<(), RepoError>;

    /// Gets the last known positions of a fund.
    async fn get_fund(&self, id: &FundId) -> Result<Option<FundView>, RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Reconciliation history (append-only)
    // ─────────────────────────────────────────────────────────────────────────────

    async fn append_reconciliation(&self, record: ReconciliationRecord) -> Result<(), RepoError>;

    /// Lists past runs, most recent first.
    async fn list_reconciliations(&self) -> Result<Vec<ReconciliationRecord>, RepoError>;
}
