//! Batch Settlement Coordinator
//!
//! Fans payment requests out to PSP adapters on the shared worker pool and
//! fans the outcomes back in by input index. Items still running when the
//! batch deadline fires are reported as timed out and left to finish on their
//! own; items never dispatched are reported as skipped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use settlement_types::{
    AppError, BatchId, BatchItemReport, BatchPaymentRequest, BatchReport, IdempotencyStore,
    ItemOutcome, Money, Payment, PaymentId, PaymentRequest, PaymentState, PspAdapter,
    RefundOutcome, RepoError, SettlementRepository, SettlementResult, Transaction, TransactionId,
    TransactionState, parse_currency,
};
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use crate::config::RetryPolicy;
use crate::idempotency::{Admission, IdempotencyGuard};
use crate::ledger::Ledger;
use crate::outbound::PspRegistry;
use crate::pool::WorkerPool;
use crate::retry::call_with_retry;

/// Message from an item task back to the dispatcher.
enum Progress {
    /// The payment record exists; a timeout from here on can name it
    Submitted(PaymentId),
    Done(ItemOutcome),
}

type ProgressTx = mpsc::UnboundedSender<(usize, Progress)>;

enum Stop {
    Deadline,
    Cancelled,
    PoolClosed,
}

impl Stop {
    fn skip_reason(&self) -> &'static str {
        match self {
            Stop::Deadline => "batch deadline exceeded before dispatch",
            Stop::Cancelled => "batch cancelled before dispatch",
            Stop::PoolClosed => "worker pool unavailable",
        }
    }
}

pub struct BatchCoordinator<R: SettlementRepository, I: IdempotencyStore> {
    worker: ItemWorker<R, I>,
    guard: IdempotencyGuard<I>,
    pool: WorkerPool,
    batch_timeout: Option<Duration>,
}

impl<R: SettlementRepository, I: IdempotencyStore> BatchCoordinator<R, I> {
    pub fn new(
        ledger: Ledger<R, I>,
        repo: Arc<R>,
        guard: IdempotencyGuard<I>,
        psps: Arc<PspRegistry>,
        pool: WorkerPool,
        retry: RetryPolicy,
        batch_timeout: Option<Duration>,
    ) -> Self {
        Self {
            worker: ItemWorker {
                ledger,
                repo,
                guard: guard.clone(),
                psps,
                retry,
            },
            guard,
            pool,
            batch_timeout,
        }
    }

    /// Settles every item of a batch and reports on each, in input order.
    pub async fn submit(
        &self,
        batch: BatchPaymentRequest,
        idempotency_key: Option<&str>,
    ) -> Result<BatchReport, AppError> {
        self.submit_until(batch, idempotency_key, std::future::pending::<()>())
            .await
    }

    /// Like `submit`, but stops dispatching once `cancel` resolves.
    ///
    /// Items already running are waited for (within the batch deadline);
    /// the rest are reported as skipped.
    pub async fn submit_until<C>(
        &self,
        batch: BatchPaymentRequest,
        idempotency_key: Option<&str>,
        cancel: C,
    ) -> Result<BatchReport, AppError>
    where
        C: Future<Output = ()>,
    {
        self.guard
            .run(idempotency_key, "payment.batch", &batch, || async {
                let batch_id = BatchId::new();
                let items = self
                    .dispatch(batch.payments.clone(), Some(batch_id), cancel)
                    .await;
                let report = BatchReport::new(batch_id, items);
                info!(
                    batch_id = %batch_id,
                    settled = report.summary.settled,
                    declined = report.summary.declined,
                    failed = report.summary.failed,
                    complete = report.complete,
                    "Batch finished"
                );
                Ok::<_, AppError>(report)
            })
            .await
    }

    /// Settles a single payment (a one-item batch without a batch id).
    pub async fn pay(&self, req: PaymentRequest) -> ItemOutcome {
        let mut items = self.dispatch(vec![req], None, std::future::pending::<()>()).await;
        match items.pop() {
            Some(item) => item.outcome,
            None => ItemOutcome::Skipped {
                reason: "nothing dispatched".into(),
            },
        }
    }

    /// Refunds a settled payment in full and reverses its ledger transaction.
    pub async fn refund(
        &self,
        payment_id: PaymentId,
        amount: Option<i64>,
        idempotency_key: Option<&str>,
    ) -> Result<RefundOutcome, AppError> {
        let request = json!({ "payment_id": payment_id, "amount": amount });
        self.guard
            .run(idempotency_key, "payment.refund", &request, || {
                self.worker.refund(payment_id, amount)
            })
            .await
    }

    pub async fn get_payment(&self, id: PaymentId) -> Result<Payment, AppError> {
        self.worker.payment(id).await
    }

    async fn dispatch<C>(
        &self,
        requests: Vec<PaymentRequest>,
        batch_id: Option<BatchId>,
        cancel: C,
    ) -> Vec<BatchItemReport>
    where
        C: Future<Output = ()>,
    {
        let total = requests.len();
        let keys: Vec<Option<String>> = requests
            .iter()
            .map(|r| r.idempotency_key.clone())
            .collect();
        let mut outcomes: Vec<Option<ItemOutcome>> = vec![None; total];
        let mut payment_ids: Vec<Option<PaymentId>> = vec![None; total];
        let mut dispatched = vec![false; total];

        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Progress)>();
        let mut queue = requests.into_iter().enumerate();
        let mut next = queue.next();
        let mut running = 0usize;
        let mut stop: Option<Stop> = None;
        let mut cancelled = false;

        let timeout = self.batch_timeout;
        let deadline = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);
        tokio::pin!(cancel);

        while next.is_some() || running > 0 {
            tokio::select! {
                biased;

                _ = &mut deadline => {
                    warn!(?batch_id, running, "Batch deadline exceeded");
                    stop = Some(Stop::Deadline);
                    break;
                }
                _ = &mut cancel, if !cancelled => {
                    info!(?batch_id, "Batch cancelled, no further dispatch");
                    cancelled = true;
                    stop = Some(Stop::Cancelled);
                    next = None;
                }
                Some((index, progress)) = rx.recv() => match progress {
                    Progress::Submitted(id) => payment_ids[index] = Some(id),
                    Progress::Done(outcome) => {
                        outcomes[index] = Some(outcome);
                        running -= 1;
                    }
                },
                permit = self.pool.acquire(), if next.is_some() => {
                    let permit = match permit {
                        Ok(permit) => permit,
                        Err(e) => {
                            error!(error = %e, "Cannot dispatch batch item");
                            stop = Some(Stop::PoolClosed);
                            next = None;
                            continue;
                        }
                    };
                    if let Some((index, req)) = next.take() {
                        dispatched[index] = true;
                        running += 1;
                        let worker = self.worker.clone();
                        let progress = tx.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            let outcome = worker.process(index, req, batch_id, &progress).await;
                            let _ = progress.send((index, Progress::Done(outcome)));
                        });
                        next = queue.next();
                    }
                }
            }
        }

        // Results that raced the deadline still count.
        while let Ok((index, progress)) = rx.try_recv() {
            match progress {
                Progress::Submitted(id) => payment_ids[index] = Some(id),
                Progress::Done(outcome) => outcomes[index] = Some(outcome),
            }
        }

        let skip_reason = stop.as_ref().map_or("not dispatched", Stop::skip_reason);
        keys.into_iter()
            .enumerate()
            .map(|(index, idempotency_key)| {
                let outcome = match outcomes[index].take() {
                    Some(outcome) => outcome,
                    None if dispatched[index] => ItemOutcome::TimedOut {
                        payment_id: payment_ids[index],
                    },
                    None => ItemOutcome::Skipped {
                        reason: skip_reason.to_string(),
                    },
                };
                BatchItemReport {
                    index,
                    idempotency_key,
                    outcome,
                }
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-item work
// ─────────────────────────────────────────────────────────────────────────────

/// Everything one item task needs, cheap to clone into a spawned task.
struct ItemWorker<R: SettlementRepository, I: IdempotencyStore> {
    ledger: Ledger<R, I>,
    repo: Arc<R>,
    guard: IdempotencyGuard<I>,
    psps: Arc<PspRegistry>,
    retry: RetryPolicy,
}

impl<R: SettlementRepository, I: IdempotencyStore> Clone for ItemWorker<R, I> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            repo: self.repo.clone(),
            guard: self.guard.clone(),
            psps: self.psps.clone(),
            retry: self.retry,
        }
    }
}

fn rejected(err: &AppError) -> ItemOutcome {
    ItemOutcome::Rejected {
        kind: err.kind().to_string(),
        message: err.detail(),
    }
}

fn failed(err: AppError) -> ItemOutcome {
    ItemOutcome::Failed {
        payment_id: None,
        reason: err.to_string(),
    }
}

impl<R: SettlementRepository, I: IdempotencyStore> ItemWorker<R, I> {
    #[instrument(
        skip_all,
        fields(index = index, account_id = %req.account_id, amount = req.amount, batch_id = ?batch_id)
    )]
    async fn process(
        self,
        index: usize,
        req: PaymentRequest,
        batch_id: Option<BatchId>,
        progress: &ProgressTx,
    ) -> ItemOutcome {
        let (psp, amount) = match self.validate(&req) {
            Ok(checked) => checked,
            Err(e) => return rejected(&e),
        };

        let Some(key) = req.idempotency_key.clone() else {
            tracing::warn!(target: "audit", index, "Payment submitted without idempotency key");
            return self
                .execute(index, &req, psp, amount, batch_id, progress)
                .await
                .unwrap_or_else(failed);
        };

        let lease = match self.guard.admit(&key, "payment", &req).await {
            Err(e) => return rejected(&e),
            Ok(Admission::Replay(outcome)) => {
                return outcome.replay::<ItemOutcome>().unwrap_or_else(failed);
            }
            Ok(Admission::Proceed(lease)) => lease,
        };
        let result = self
            .execute(index, &req, psp, amount, batch_id, progress)
            .await;
        lease.finish(&result).await;
        result.unwrap_or_else(failed)
    }

    /// Checks that need no I/O: amount, currency and PSP.
    fn validate(&self, req: &PaymentRequest) -> Result<(Arc<dyn PspAdapter>, Money), AppError> {
        let currency = parse_currency(&req.currency)?;
        let amount = Money::positive(req.amount, currency)?;
        let psp = self.psps.resolve(req.psp.as_deref())?;
        Ok((psp, amount))
    }

    /// A linked transaction must be pending and agree on account and amount.
    async fn linked_transaction(
        &self,
        id: TransactionId,
        req: &PaymentRequest,
        amount: Money,
    ) -> Result<Transaction, AppError> {
        let tx = self.ledger.get(id).await?;
        if tx.account_id != req.account_id {
            return Err(AppError::Validation(format!(
                "Transaction {} belongs to another account",
                id
            )));
        }
        if tx.amount() != amount {
            return Err(AppError::Validation(format!(
                "Payment amount {} does not match transaction amount {}",
                amount,
                tx.amount()
            )));
        }
        if tx.state() != TransactionState::Pending {
            return Err(AppError::InvalidState(format!(
                "Transaction {} is {}, expected PENDING",
                id,
                tx.state()
            )));
        }
        Ok(tx)
    }

    async fn execute(
        &self,
        index: usize,
        req: &PaymentRequest,
        psp: Arc<dyn PspAdapter>,
        amount: Money,
        batch_id: Option<BatchId>,
        progress: &ProgressTx,
    ) -> Result<ItemOutcome, AppError> {
        let tx = match req.transaction_id {
            Some(id) => match self.linked_transaction(id, req, amount).await {
                Ok(tx) => tx,
                Err(e) => return Ok(rejected(&e)),
            },
            None => {
                self.ledger
                    .open(
                        req.account_id,
                        amount,
                        req.idempotency_key.clone(),
                        req.reference.clone(),
                    )
                    .await?
            }
        };

        let payment = Payment::new(
            req.account_id,
            psp.name(),
            amount,
            Some(tx.id),
            req.idempotency_key.clone(),
            batch_id,
        )?;
        self.repo.insert_payment(payment.clone()).await?;
        let _ = progress.send((index, Progress::Submitted(payment.id)));
        let submitted = self
            .repo
            .update_payment(payment.version(), payment.submit()?)
            .await?;

        let reference = req
            .reference
            .clone()
            .unwrap_or_else(|| payment.id.to_string());
        let (result, attempts) =
            call_with_retry(&self.retry, || psp.charge(amount, &reference)).await;

        match result {
            SettlementResult::Settled { external_ref } => {
                let settled = submitted.settle(external_ref.clone(), attempts)?;
                self.repo
                    .update_payment(submitted.version(), settled)
                    .await?;
                match self.ledger.commit_latest(tx.id).await {
                    Ok(_) => {
                        info!(payment_id = %payment.id, attempts, "Payment settled");
                        Ok(ItemOutcome::Settled {
                            transaction_id: tx.id,
                            payment_id: payment.id,
                            external_ref,
                        })
                    }
                    Err(e) => {
                        error!(payment_id = %payment.id, error = %e, "Settled at PSP but ledger commit failed");
                        Ok(ItemOutcome::Failed {
                            payment_id: Some(payment.id),
                            reason: format!("Settled at PSP but ledger commit failed: {}", e),
                        })
                    }
                }
            }
            SettlementResult::Declined { reason } => {
                let declined = submitted.decline(reason.clone(), attempts)?;
                self.repo
                    .update_payment(submitted.version(), declined)
                    .await?;
                if let Err(e) = self.ledger.fail_latest(tx.id).await {
                    warn!(transaction_id = %tx.id, error = %e, "Could not fail declined transaction");
                }
                info!(payment_id = %payment.id, %reason, "Payment declined");
                Ok(ItemOutcome::Declined {
                    payment_id: payment.id,
                    reason,
                })
            }
            SettlementResult::TransientError { reason } => {
                // Outcome unknown: the payment stays SUBMITTED for reconciliation.
                self.repo
                    .update_payment(submitted.version(), submitted.with_attempts(attempts))
                    .await?;
                warn!(payment_id = %payment.id, attempts, %reason, "PSP retries exhausted");
                Ok(ItemOutcome::Failed {
                    payment_id: Some(payment.id),
                    reason: format!(
                        "{} unavailable after {} attempts: {}",
                        psp.name(),
                        attempts,
                        reason
                    ),
                })
            }
        }
    }

    async fn payment(&self, id: PaymentId) -> Result<Payment, AppError> {
        self.repo
            .get_payment(id)
            .await
            .map_err(Into::into)
            .and_then(|opt| opt.ok_or_else(|| AppError::NotFound(format!("Payment {}", id))))
    }

    #[instrument(skip(self))]
    async fn refund(
        &self,
        payment_id: PaymentId,
        amount: Option<i64>,
    ) -> Result<RefundOutcome, AppError> {
        let payment = self.payment(payment_id).await?;
        if payment.state() != PaymentState::Settled {
            return Err(AppError::InvalidState(format!(
                "Cannot refund a payment in state {}",
                payment.state()
            )));
        }
        if let Some(requested) = amount {
            if requested != payment.amount().amount() {
                return Err(AppError::Validation(format!(
                    "Refund amount must equal the settled amount {}",
                    payment.amount()
                )));
            }
        }

        let psp = self.psps.resolve(Some(&payment.psp))?;
        let claimed = self.claim_refund(&payment).await?;
        let (result, attempts) = call_with_retry(&self.retry, || {
            psp.refund(claimed.id, claimed.amount())
        })
        .await;

        match result {
            SettlementResult::Settled { external_ref } => {
                let refunded = self
                    .repo
                    .update_payment(claimed.version(), claimed.refund(external_ref)?)
                    .await?;
                let reversal_transaction_id = match claimed.transaction_id {
                    Some(tx_id) => match self.ledger.reverse(tx_id, None).await {
                        Ok(reversal) => Some(reversal.id),
                        Err(e) => {
                            warn!(transaction_id = %tx_id, error = %e, "Refunded payment left its transaction unreversed");
                            warn!(
                                target: "audit",
                                %payment_id,
                                transaction_id = %tx_id,
                                error = %e,
                                "PSP refund succeeded but ledger reversal failed"
                            );
                            None
                        }
                    },
                    None => None,
                };
                info!(%payment_id, attempts, "Payment refunded");
                Ok(RefundOutcome::Refunded {
                    payment: refunded,
                    reversal_transaction_id,
                })
            }
            SettlementResult::Declined { reason } => {
                info!(%payment_id, %reason, "Refund declined");
                self.release_refund(&claimed).await;
                Ok(RefundOutcome::Declined { payment_id, reason })
            }
            SettlementResult::TransientError { reason } => {
                self.release_refund(&claimed).await;
                Ok(RefundOutcome::Failed {
                    payment_id,
                    reason: format!(
                        "{} unavailable after {} attempts: {}",
                        psp.name(),
                        attempts,
                        reason
                    ),
                })
            }
        }
    }

    /// Moves a settled payment to `REFUNDING`. Of concurrent refunds only one
    /// wins the version check; the rest see `InvalidState` before any PSP call.
    async fn claim_refund(&self, payment: &Payment) -> Result<Payment, AppError> {
        let claim = payment.begin_refund()?;
        match self.repo.update_payment(payment.version(), claim).await {
            Ok(claimed) => Ok(claimed),
            Err(RepoError::StaleVersion { .. }) => Err(AppError::InvalidState(format!(
                "Payment {} is already being refunded",
                payment.id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns a claimed payment to `SETTLED` after a refund that did not go through.
    async fn release_refund(&self, claimed: &Payment) {
        let released = match claimed.abandon_refund() {
            Ok(next) => self
                .repo
                .update_payment(claimed.version(), next)
                .await
                .map_err(AppError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = released {
            error!(payment_id = %claimed.id, error = %e, "Payment left in REFUNDING");
        }
    }
}
