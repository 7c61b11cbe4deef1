//! Settlement Application Service
//!
//! Facade over the ledger, coordinator, aggregator and matcher. All of them
//! share one repository, one idempotency store and one worker pool.

use std::future::Future;
use std::sync::Arc;

use settlement_types::{
    AggregateFundsRequest, AggregatedFunds, AppError, BatchPaymentRequest, BatchReport,
    CreateTransactionRequest, FundId, FundSource, FundView, IdempotencyStore, ItemOutcome,
    Payment, PaymentId, PaymentRequest, ReconcileRequest, ReconciliationRecord, RefundOutcome,
    RefundRequest, SettlementRepository, Transaction, TransactionId,
};

use crate::aggregator::FundAggregator;
use crate::config::SettlementConfig;
use crate::coordinator::BatchCoordinator;
use crate::idempotency::IdempotencyGuard;
use crate::ledger::Ledger;
use crate::outbound::PspRegistry;
use crate::pool::WorkerPool;
use crate::reconcile::ReconciliationMatcher;

/// Application service for settlement operations.
///
/// Generic over the store ports so the in-memory adapters, or any other
/// implementation, can be injected at compile time.
pub struct SettlementService<R: SettlementRepository, I: IdempotencyStore> {
    ledger: Ledger<R, I>,
    coordinator: BatchCoordinator<R, I>,
    aggregator: FundAggregator<R>,
    matcher: ReconciliationMatcher<R>,
    psps: Arc<PspRegistry>,
    pool: WorkerPool,
}

impl<R: SettlementRepository, I: IdempotencyStore> SettlementService<R, I> {
    pub fn new(
        repo: Arc<R>,
        idempotency: Arc<I>,
        psps: PspRegistry,
        sources: Vec<Arc<dyn FundSource>>,
        config: SettlementConfig,
    ) -> Self {
        let pool = WorkerPool::new(config.worker_pool_size);
        let guard = IdempotencyGuard::new(idempotency);
        let psps = Arc::new(psps);
        let ledger = Ledger::new(repo.clone(), guard.clone());

        let coordinator = BatchCoordinator::new(
            ledger.clone(),
            repo.clone(),
            guard,
            psps.clone(),
            pool.clone(),
            config.retry,
            config.batch_timeout,
        );
        let aggregator = FundAggregator::new(
            repo.clone(),
            sources,
            pool.clone(),
            config.source_timeout,
            config.retry,
        );
        let matcher = ReconciliationMatcher::new(repo, config.reconcile_window_secs);

        Self {
            ledger,
            coordinator,
            aggregator,
            matcher,
            psps,
            pool,
        }
    }

    pub fn ledger(&self) -> &Ledger<R, I> {
        &self.ledger
    }

    pub fn psp_names(&self) -> Vec<String> {
        self.psps.names()
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.aggregator.source_ids()
    }

    /// Free permits in the shared worker pool.
    pub fn available_workers(&self) -> usize {
        self.pool.available()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────────

    pub async fn create_transaction(
        &self,
        req: CreateTransactionRequest,
        idempotency_key: Option<&str>,
    ) -> Result<Transaction, AppError> {
        self.ledger.create(req, idempotency_key).await
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, AppError> {
        self.ledger.get(id).await
    }

    pub async fn reverse_transaction(
        &self,
        id: TransactionId,
        idempotency_key: Option<&str>,
    ) -> Result<Transaction, AppError> {
        self.ledger.reverse(id, idempotency_key).await
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Payments
    // ─────────────────────────────────────────────────────────────────────────────

    /// Settles one payment. The key, if any, travels in the request.
    pub async fn create_payment(&self, req: PaymentRequest) -> ItemOutcome {
        self.coordinator.pay(req).await
    }

    pub async fn get_payment(&self, id: PaymentId) -> Result<Payment, AppError> {
        self.coordinator.get_payment(id).await
    }

    pub async fn refund_payment(
        &self,
        id: PaymentId,
        req: RefundRequest,
        idempotency_key: Option<&str>,
    ) -> Result<RefundOutcome, AppError> {
        self.coordinator
            .refund(id, req.amount, idempotency_key)
            .await
    }

    pub async fn submit_batch(
        &self,
        batch: BatchPaymentRequest,
        idempotency_key: Option<&str>,
    ) -> Result<BatchReport, AppError> {
        if batch.payments.is_empty() {
            return Err(AppError::Validation("Batch has no payments".into()));
        }
        self.coordinator.submit(batch, idempotency_key).await
    }

    /// Like `submit_batch`, stopping dispatch once `cancel` resolves.
    pub async fn submit_batch_until<C>(
        &self,
        batch: BatchPaymentRequest,
        idempotency_key: Option<&str>,
        cancel: C,
    ) -> Result<BatchReport, AppError>
    where
        C: Future<Output = ()>,
    {
        if batch.payments.is_empty() {
            return Err(AppError::Validation("Batch has no payments".into()));
        }
        self.coordinator
            .submit_until(batch, idempotency_key, cancel)
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Funds & Reconciliation
    // ─────────────────────────────────────────────────────────────────────────────

    pub async fn aggregate_funds(
        &self,
        req: AggregateFundsRequest,
    ) -> Result<AggregatedFunds, AppError> {
        self.aggregator.aggregate(req.fund_id, req.sources).await
    }

    pub async fn get_fund(&self, id: &FundId) -> Result<FundView, AppError> {
        self.aggregator.get_fund(id).await
    }

    pub async fn reconcile(&self, req: ReconcileRequest) -> Result<ReconciliationRecord, AppError> {
        self.matcher.reconcile(req.scope, req.window_secs).await
    }

    pub async fn list_reconciliations(&self) -> Result<Vec<ReconciliationRecord>, AppError> {
        self.matcher.history().await
    }
}
