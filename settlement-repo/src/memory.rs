//! In-memory implementation of the `SettlementRepository` port.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use settlement_types::{
    FundId, FundPosition, FundView, Payment, PaymentId, ReconciliationRecord, ReconciliationScope,
    RepoError, SettlementRepository, Transaction, TransactionId,
};
use tokio::sync::RwLock;

/// Ledger, payment and reconciliation tables guarded by one lock so that
/// multi-record writes (a reversal touches two transactions) are atomic.
#[derive(Default)]
struct Tables {
    transactions: HashMap<TransactionId, Transaction>,
    payments: HashMap<PaymentId, Payment>,
    reconciliations: Vec<ReconciliationRecord>,
}

/// A thread-safe in-memory settlement store.
///
/// The lock is only held for the duration of a single map operation, never
/// across a call into another component. Cloning shares the same data.
#[derive(Default, Clone)]
pub struct InMemoryRepo {
    tables: Arc<RwLock<Tables>>,
    /// fund -> source -> last position
    positions: Arc<DashMap<FundId, BTreeMap<String, FundPosition>>>,
}

impl InMemoryRepo {
    /// Creates a new, empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_version(expected: u64, actual: u64) -> Result<(), RepoError> {
    if expected != actual {
        return Err(RepoError::StaleVersion { expected, actual });
    }
    Ok(())
}

#[async_trait]
impl SettlementRepository for InMemoryRepo {
    // ─────────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────────

    async fn insert_transaction(&self, tx: Transaction) -> Result<(), RepoError> {
        let mut tables = self.tables.write().await;
        if tables.transactions.contains_key(&tx.id) {
            return Err(RepoError::Conflict(format!("Transaction {} already exists", tx.id)));
        }
        tables.transactions.insert(tx.id, tx);
        Ok(())
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, RepoError> {
        let tables = self.tables.read().await;
        Ok(tables.transactions.get(&id).cloned())
    }

    async fn update_transaction(
        &self,
        expected_version: u64,
        next: Transaction,
    ) -> Result<Transaction, RepoError> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .transactions
            .get(&next.id)
            .ok_or(RepoError::NotFound)?;
        check_version(expected_version, stored.version())?;

        tables.transactions.insert(next.id, next.clone());
        Ok(next)
    }

    async fn record_reversal(
        &self,
        expected_version: u64,
        original: Transaction,
        reversal: Transaction,
    ) -> Result<(), RepoError> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .transactions
            .get(&original.id)
            .ok_or(RepoError::NotFound)?;
        check_version(expected_version, stored.version())?;
        if tables.transactions.contains_key(&reversal.id) {
            return Err(RepoError::Conflict(format!(
                "Transaction {} already exists",
                reversal.id
            )));
        }

        tables.transactions.insert(original.id, original);
        tables.transactions.insert(reversal.id, reversal);
        Ok(())
    }

    async fn list_transactions(
        &self,
        scope: &ReconciliationScope,
    ) -> Result<Vec<Transaction>, RepoError> {
        let tables = self.tables.read().await;
        let mut txs: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|tx| scope.contains(tx.account_id, tx.created_at))
            .cloned()
            .collect();
        txs.sort_by_key(|tx| tx.created_at);
        Ok(txs)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Payments
    // ─────────────────────────────────────────────────────────────────────────────

    async fn insert_payment(&self, payment: Payment) -> Result<(), RepoError> {
        let mut tables = self.tables.write().await;
        if tables.payments.contains_key(&payment.id) {
            return Err(RepoError::Conflict(format!(
                "Payment {} already exists",
                payment.id
            )));
        }
        tables.payments.insert(payment.id, payment);
        Ok(())
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>, RepoError> {
        let tables = self.tables.read().await;
        Ok(tables.payments.get(&id).cloned())
    }

    async fn update_payment(
        &self,
        expected_version: u64,
        next: Payment,
    ) -> Result<Payment, RepoError> {
        let mut tables = self.tables.write().await;
        let stored = tables.payments.get(&next.id).ok_or(RepoError::NotFound)?;
        check_version(expected_version, stored.version())?;

        tables.payments.insert(next.id, next.clone());
        Ok(next)
    }

    async fn list_payments(&self, scope: &ReconciliationScope) -> Result<Vec<Payment>, RepoError> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| scope.contains(p.account_id, p.created_at))
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Funds
    // ─────────────────────────────────────────────────────────────────────────────

    async fn upsert_position(&self, position: FundPosition) -> Result<(), RepoError> {
        self.positions
            .entry(position.fund_id.clone())
            .or_default()
            .insert(position.source_id.clone(), position);
        Ok(())
    }

    async fn get_fund(&self, id: &FundId) -> Result<Option<FundView>, RepoError> {
        Ok(self.positions.get(id).map(|sources| FundView {
            fund_id: id.clone(),
            positions: sources.values().cloned().collect(),
        }))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Reconciliation history
    // ─────────────────────────────────────────────────────────────────────────────

    async fn append_reconciliation(&self, record: ReconciliationRecord) -> Result<(), RepoError> {
        let mut tables = self.tables.write().await;
        tables.reconciliations.push(record);
        Ok(())
    }

    async fn list_reconciliations(&self) -> Result<Vec<ReconciliationRecord>, RepoError> {
        let tables = self.tables.read().await;
        Ok(tables.reconciliations.iter().rev().cloned().collect())
    }
}
