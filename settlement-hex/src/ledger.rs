//! Transaction Ledger
//!
//! The authoritative state machine for monetary transactions. Every state
//! change is a compare-and-set on the transaction's version.

use std::sync::Arc;

use settlement_types::{
    AccountId, AppError, CreateTransactionRequest, DomainError, IdempotencyStore, Money,
    ReconciliationScope, RepoError, SettlementRepository, Transaction, TransactionId,
    TransactionState, parse_currency,
};
use tracing::{info, instrument, warn};

use crate::idempotency::IdempotencyGuard;

pub struct Ledger<R: SettlementRepository, I: IdempotencyStore> {
    repo: Arc<R>,
    guard: IdempotencyGuard<I>,
}

impl<R: SettlementRepository, I: IdempotencyStore> Clone for Ledger<R, I> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<R: SettlementRepository, I: IdempotencyStore> Ledger<R, I> {
    pub fn new(repo: Arc<R>, guard: IdempotencyGuard<I>) -> Self {
        Self { repo, guard }
    }

    /// Records a new `PENDING` transaction, at most once per idempotency key.
    #[instrument(skip(self, req), fields(account_id = %req.account_id, amount = req.amount))]
    pub async fn create(
        &self,
        req: CreateTransactionRequest,
        idempotency_key: Option<&str>,
    ) -> Result<Transaction, AppError> {
        self.guard
            .run(idempotency_key, "transaction.create", &req, || async {
                let currency = parse_currency(&req.currency)?;
                let tx = self
                    .open(
                        req.account_id,
                        Money::new(req.amount, currency),
                        idempotency_key.map(str::to_string),
                        req.reference.clone(),
                    )
                    .await?;
                info!(transaction_id = %tx.id, "Transaction created");
                Ok::<_, AppError>(tx)
            })
            .await
    }

    /// Inserts a pending transaction without idempotency bookkeeping.
    ///
    /// Used by callers that already guard the enclosing operation.
    pub(crate) async fn open(
        &self,
        account_id: AccountId,
        amount: Money,
        idempotency_key: Option<String>,
        reference: Option<String>,
    ) -> Result<Transaction, AppError> {
        let tx = Transaction::pending(account_id, amount, idempotency_key, reference)?;
        self.repo.insert_transaction(tx.clone()).await?;
        Ok(tx)
    }

    pub async fn get(&self, id: TransactionId) -> Result<Transaction, AppError> {
        self.repo
            .get_transaction(id)
            .await
            .map_err(Into::into)
            .and_then(|opt| opt.ok_or_else(|| AppError::NotFound(format!("Transaction {}", id))))
    }

    /// `PENDING → COMMITTED`, only if the stored version is `expected_version`.
    #[instrument(skip(self))]
    pub async fn commit(
        &self,
        id: TransactionId,
        expected_version: u64,
    ) -> Result<Transaction, AppError> {
        self.apply(id, expected_version, Transaction::commit).await
    }

    /// `PENDING → FAILED`, only if the stored version is `expected_version`.
    #[instrument(skip(self))]
    pub async fn fail(
        &self,
        id: TransactionId,
        expected_version: u64,
    ) -> Result<Transaction, AppError> {
        self.apply(id, expected_version, Transaction::fail).await
    }

    /// Commits against the current version, retrying once on a lost race.
    pub async fn commit_latest(&self, id: TransactionId) -> Result<Transaction, AppError> {
        self.apply_latest(id, Transaction::commit).await
    }

    /// Fails against the current version, retrying once on a lost race.
    pub async fn fail_latest(&self, id: TransactionId) -> Result<Transaction, AppError> {
        self.apply_latest(id, Transaction::fail).await
    }

    /// `COMMITTED → REVERSED` plus a mirror-signed reversal record.
    ///
    /// Reversing an already reversed transaction returns the existing reversal.
    #[instrument(skip(self))]
    pub async fn reverse(
        &self,
        id: TransactionId,
        idempotency_key: Option<&str>,
    ) -> Result<Transaction, AppError> {
        let request = serde_json::json!({ "transaction_id": id });
        self.guard
            .run(idempotency_key, "transaction.reverse", &request, || async {
                self.reverse_once(id).await
            })
            .await
    }

    async fn reverse_once(&self, id: TransactionId) -> Result<Transaction, AppError> {
        let tx = self.get(id).await?;
        if let Some(prior) = self.prior_reversal(&tx).await? {
            return Ok(prior);
        }

        let (original, reversal) = tx.reverse()?;
        match self
            .repo
            .record_reversal(tx.version(), original, reversal.clone())
            .await
        {
            Ok(()) => {
                info!(reversal_id = %reversal.id, "Transaction reversed");
                Ok(reversal)
            }
            Err(RepoError::StaleVersion { expected, actual }) => {
                // Another caller may have reversed it first.
                let fresh = self.get(id).await?;
                match self.prior_reversal(&fresh).await? {
                    Some(prior) => Ok(prior),
                    None => Err(AppError::StaleVersion { expected, actual }),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn prior_reversal(&self, tx: &Transaction) -> Result<Option<Transaction>, AppError> {
        if tx.state() != TransactionState::Reversed {
            return Ok(None);
        }
        let reversal_id = tx.reversed_by.ok_or_else(|| {
            AppError::Internal(format!("Transaction {} is reversed without a record", tx.id))
        })?;
        self.get(reversal_id).await.map(Some)
    }

    pub async fn list(&self, scope: &ReconciliationScope) -> Result<Vec<Transaction>, AppError> {
        self.repo.list_transactions(scope).await.map_err(Into::into)
    }

    async fn apply(
        &self,
        id: TransactionId,
        expected_version: u64,
        transition: fn(&Transaction) -> Result<Transaction, DomainError>,
    ) -> Result<Transaction, AppError> {
        let tx = self.get(id).await?;
        if tx.version() != expected_version {
            return Err(AppError::StaleVersion {
                expected: expected_version,
                actual: tx.version(),
            });
        }
        let next = transition(&tx)?;
        self.repo
            .update_transaction(expected_version, next)
            .await
            .map_err(Into::into)
    }

    async fn apply_latest(
        &self,
        id: TransactionId,
        transition: fn(&Transaction) -> Result<Transaction, DomainError>,
    ) -> Result<Transaction, AppError> {
        let tx = self.get(id).await?;
        match self.apply(id, tx.version(), transition).await {
            Err(AppError::StaleVersion { .. }) => {
                let fresh = self.get(id).await?;
                if fresh.state() != TransactionState::Pending {
                    warn!(transaction_id = %id, state = %fresh.state(), "Lost race on transaction");
                    return Err(AppError::StaleVersion {
                        expected: tx.version(),
                        actual: fresh.version(),
                    });
                }
                self.apply(id, fresh.version(), transition).await
            }
            other => other,
        }
    }
}
