//! Reconciliation Matcher
//!
//! Ties settled payments to committed transactions, first by explicit
//! linkage and then by a time-window heuristic, and reports everything that
//! does not tie out. Findings are reported, never corrected.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use settlement_types::{
    AmbiguousMatch, AmountMismatch, AppError, MatchMethod, MatchedPair, Payment, PaymentId,
    PaymentState, ReconciliationId, ReconciliationRecord, ReconciliationScope,
    SettlementRepository, StateMismatch, Transaction, TransactionId, TransactionState,
};
use tracing::{info, instrument, warn};

pub struct ReconciliationMatcher<R: SettlementRepository> {
    repo: Arc<R>,
    default_window_secs: i64,
}

impl<R: SettlementRepository> ReconciliationMatcher<R> {
    pub fn new(repo: Arc<R>, default_window_secs: i64) -> Self {
        Self {
            repo,
            default_window_secs,
        }
    }

    /// Runs one reconciliation over `scope` and appends the record to history.
    #[instrument(skip(self))]
    pub async fn reconcile(
        &self,
        scope: ReconciliationScope,
        window_secs: Option<i64>,
    ) -> Result<ReconciliationRecord, AppError> {
        let window_secs = window_secs.unwrap_or(self.default_window_secs);
        if window_secs < 0 {
            return Err(AppError::Validation(
                "Matching window cannot be negative".into(),
            ));
        }
        if let (Some(from), Some(to)) = (scope.from, scope.to) {
            if from > to {
                return Err(AppError::Validation(
                    "Scope start must not be after its end".into(),
                ));
            }
        }

        let transactions = self.repo.list_transactions(&scope).await?;
        let payments = self.repo.list_payments(&scope).await?;
        let findings = match_records(&transactions, &payments, Duration::seconds(window_secs));

        let record = findings.into_record(scope, window_secs);
        self.repo.append_reconciliation(record.clone()).await?;

        if record.clean {
            info!(run_id = %record.id, matched = record.matched.len(), "Reconciliation clean");
        } else {
            warn!(
                target: "audit",
                run_id = %record.id,
                orphan_transactions = record.orphan_transactions.len(),
                orphan_payments = record.orphan_payments.len(),
                amount_mismatches = record.amount_mismatches.len(),
                state_mismatches = record.state_mismatches.len(),
                ambiguous = record.ambiguous.len(),
                "Reconciliation found incidents"
            );
        }
        Ok(record)
    }

    /// Past runs, most recent first.
    pub async fn history(&self) -> Result<Vec<ReconciliationRecord>, AppError> {
        self.repo.list_reconciliations().await.map_err(Into::into)
    }
}

/// Everything one matching pass found.
#[derive(Debug, Default)]
pub struct Findings {
    pub matched: Vec<MatchedPair>,
    pub orphan_transactions: Vec<TransactionId>,
    pub orphan_payments: Vec<PaymentId>,
    pub amount_mismatches: Vec<AmountMismatch>,
    pub state_mismatches: Vec<StateMismatch>,
    pub ambiguous: Vec<AmbiguousMatch>,
}

impl Findings {
    fn into_record(self, scope: ReconciliationScope, window_secs: i64) -> ReconciliationRecord {
        let clean = self.orphan_transactions.is_empty()
            && self.orphan_payments.is_empty()
            && self.amount_mismatches.is_empty()
            && self.state_mismatches.is_empty()
            && self.ambiguous.is_empty();
        ReconciliationRecord {
            id: ReconciliationId::new(),
            scope,
            run_at: Utc::now(),
            window_secs,
            matched: self.matched,
            orphan_transactions: self.orphan_transactions,
            orphan_payments: self.orphan_payments,
            amount_mismatches: self.amount_mismatches,
            state_mismatches: self.state_mismatches,
            ambiguous: self.ambiguous,
            clean,
        }
    }
}

fn is_candidate_transaction(tx: &Transaction) -> bool {
    !tx.is_reversal()
        && matches!(
            tx.state(),
            TransactionState::Committed | TransactionState::Reversed
        )
}

fn is_candidate_payment(payment: &Payment) -> bool {
    matches!(
        payment.state(),
        PaymentState::Settled | PaymentState::Refunding | PaymentState::Refunded
    )
}

/// Settled payments belong with committed transactions, refunded ones with reversed.
/// A refund in flight has not reversed anything yet.
fn states_agree(tx: &Transaction, payment: &Payment) -> bool {
    matches!(
        (tx.state(), payment.state()),
        (
            TransactionState::Committed,
            PaymentState::Settled | PaymentState::Refunding
        ) | (TransactionState::Reversed, PaymentState::Refunded)
    )
}

/// Matches transactions against payments. Pure; touches no store.
pub fn match_records(
    transactions: &[Transaction],
    payments: &[Payment],
    window: Duration,
) -> Findings {
    let mut findings = Findings::default();

    let txs: Vec<&Transaction> = transactions
        .iter()
        .filter(|tx| is_candidate_transaction(tx))
        .collect();
    let by_id: HashMap<TransactionId, &Transaction> = txs.iter().map(|tx| (tx.id, *tx)).collect();
    let mut claimed: HashSet<TransactionId> = HashSet::new();
    let mut unlinked: Vec<&Payment> = Vec::new();

    // Pass 1: explicit linkage.
    for payment in payments.iter().filter(|p| is_candidate_payment(p)) {
        let Some(tx_id) = payment.transaction_id else {
            unlinked.push(payment);
            continue;
        };
        let tx = match by_id.get(&tx_id) {
            Some(tx) if claimed.insert(tx_id) => *tx,
            _ => {
                findings.orphan_payments.push(payment.id);
                continue;
            }
        };

        if tx.amount() != payment.amount() {
            let delta = (tx.amount().currency() == payment.amount().currency())
                .then(|| payment.amount().amount() - tx.amount().amount());
            findings.amount_mismatches.push(AmountMismatch {
                transaction_id: tx.id,
                payment_id: payment.id,
                transaction_amount: tx.amount(),
                payment_amount: payment.amount(),
                delta,
            });
        } else if !states_agree(tx, payment) {
            findings.state_mismatches.push(StateMismatch {
                transaction_id: tx.id,
                payment_id: payment.id,
                transaction_state: tx.state(),
                payment_state: payment.state(),
            });
        } else {
            findings.matched.push(MatchedPair {
                transaction_id: tx.id,
                payment_id: payment.id,
                amount: tx.amount(),
                method: MatchMethod::ById,
            });
        }
    }

    // Pass 2: heuristic on what is left.
    let remaining: Vec<&Transaction> = txs
        .iter()
        .copied()
        .filter(|tx| !claimed.contains(&tx.id))
        .collect();
    let candidates: Vec<Vec<TransactionId>> = unlinked
        .iter()
        .map(|payment| {
            remaining
                .iter()
                .filter(|tx| {
                    tx.account_id == payment.account_id
                        && tx.amount() == payment.amount()
                        && (tx.created_at - payment.created_at).abs() <= window
                })
                .map(|tx| tx.id)
                .collect()
        })
        .collect();

    let mut claimants: HashMap<TransactionId, usize> = HashMap::new();
    for ids in &candidates {
        for id in ids {
            *claimants.entry(*id).or_default() += 1;
        }
    }

    let mut contested: HashSet<TransactionId> = HashSet::new();
    for (payment, ids) in unlinked.iter().zip(candidates) {
        match ids.as_slice() {
            [] => findings.orphan_payments.push(payment.id),
            [only] if claimants.get(only) == Some(&1) => {
                claimed.insert(*only);
                findings.matched.push(MatchedPair {
                    transaction_id: *only,
                    payment_id: payment.id,
                    amount: payment.amount(),
                    method: MatchMethod::ByHeuristic,
                });
            }
            _ => {
                contested.extend(ids.iter().copied());
                findings.ambiguous.push(AmbiguousMatch {
                    payment_id: payment.id,
                    candidate_transaction_ids: ids,
                });
            }
        }
    }

    findings.orphan_transactions = remaining
        .iter()
        .filter(|tx| !claimed.contains(&tx.id) && !contested.contains(&tx.id))
        .map(|tx| tx.id)
        .collect();

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use settlement_types::{AccountId, Currency, Money};

    fn committed(account: AccountId, amount: i64) -> Transaction {
        Transaction::pending(account, Money::new(amount, Currency::USD), None, None)
            .unwrap()
            .commit()
            .unwrap()
    }

    fn settled(account: AccountId, amount: i64, tx: Option<TransactionId>) -> Payment {
        Payment::new(
            account,
            "stripe-sim",
            Money::new(amount, Currency::USD),
            tx,
            None,
            None,
        )
        .unwrap()
        .submit()
        .unwrap()
        .settle("ch_1".into(), 1)
        .unwrap()
    }

    fn window() -> Duration {
        Duration::seconds(300)
    }

    #[test]
    fn test_committed_without_payment_is_one_orphan() {
        let account = AccountId::new();
        let tx = committed(account, 1000);

        let findings = match_records(&[tx.clone()], &[], window());

        assert_eq!(findings.orphan_transactions, vec![tx.id]);
        assert!(findings.matched.is_empty());
    }

    #[test]
    fn test_linked_pair_matches_by_id() {
        let account = AccountId::new();
        let tx = committed(account, 1000);
        let payment = settled(account, 1000, Some(tx.id));

        let findings = match_records(&[tx.clone()], &[payment.clone()], window());

        assert_eq!(findings.matched.len(), 1);
        assert_eq!(findings.matched[0].method, MatchMethod::ById);
        assert!(findings.orphan_transactions.is_empty());
        assert!(findings.orphan_payments.is_empty());
    }

    #[test]
    fn test_amount_mismatch_reported_with_delta() {
        let account = AccountId::new();
        let tx = committed(account, 1000);
        let payment = settled(account, 1200, Some(tx.id));

        let findings = match_records(&[tx], &[payment], window());

        assert!(findings.matched.is_empty());
        assert_eq!(findings.amount_mismatches.len(), 1);
        assert_eq!(findings.amount_mismatches[0].delta, Some(200));
        assert!(findings.orphan_transactions.is_empty());
    }

    #[test]
    fn test_refunded_payment_against_committed_is_state_mismatch() {
        let account = AccountId::new();
        let tx = committed(account, 500);
        let payment = settled(account, 500, Some(tx.id))
            .begin_refund()
            .and_then(|p| p.refund("re_1".into()))
            .unwrap();

        let findings = match_records(&[tx], &[payment], window());

        assert_eq!(findings.state_mismatches.len(), 1);
        assert_eq!(
            findings.state_mismatches[0].payment_state,
            PaymentState::Refunded
        );
    }

    #[test]
    fn test_unlinked_payment_matches_by_heuristic() {
        let account = AccountId::new();
        let tx = committed(account, 750);
        let payment = settled(account, 750, None);

        let findings = match_records(&[tx.clone()], &[payment], window());

        assert_eq!(findings.matched.len(), 1);
        assert_eq!(findings.matched[0].method, MatchMethod::ByHeuristic);
        assert_eq!(findings.matched[0].transaction_id, tx.id);
    }

    #[test]
    fn test_two_payments_for_one_transaction_are_ambiguous() {
        let account = AccountId::new();
        let tx = committed(account, 750);
        let a = settled(account, 750, None);
        let b = settled(account, 750, None);

        let findings = match_records(&[tx.clone()], &[a, b], window());

        assert!(findings.matched.is_empty());
        assert_eq!(findings.ambiguous.len(), 2);
        assert!(findings.orphan_transactions.is_empty());
        assert!(findings.orphan_payments.is_empty());
        assert_eq!(findings.ambiguous[0].candidate_transaction_ids, vec![tx.id]);
    }

    #[test]
    fn test_outside_window_is_orphaned() {
        let account = AccountId::new();
        let mut tx = committed(account, 750);
        tx.created_at -= Duration::hours(2);
        let payment = settled(account, 750, None);

        let findings = match_records(&[tx.clone()], &[payment.clone()], window());

        assert_eq!(findings.orphan_transactions, vec![tx.id]);
        assert_eq!(findings.orphan_payments, vec![payment.id]);
    }

    #[test]
    fn test_pending_and_reversal_records_are_ignored() {
        let account = AccountId::new();
        let pending =
            Transaction::pending(account, Money::new(10, Currency::USD), None, None).unwrap();
        let (reversed, reversal) = committed(account, 20).reverse().unwrap();

        let findings = match_records(&[pending, reversed.clone(), reversal], &[], window());

        assert_eq!(findings.orphan_transactions, vec![reversed.id]);
    }

    #[tokio::test]
    async fn test_reconcile_appends_history() {
        use settlement_repo::InMemoryRepo;

        let repo = Arc::new(InMemoryRepo::new());
        let account = AccountId::new();
        repo.insert_transaction(committed(account, 1000)).await.unwrap();
        let matcher = ReconciliationMatcher::new(repo, 300);

        let record = matcher
            .reconcile(ReconciliationScope::default(), None)
            .await
            .unwrap();

        assert!(!record.clean);
        assert_eq!(record.orphan_transactions.len(), 1);
        assert_eq!(record.window_secs, 300);
        assert_eq!(matcher.history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_negative_window_rejected() {
        use settlement_repo::InMemoryRepo;

        let matcher = ReconciliationMatcher::new(Arc::new(InMemoryRepo::new()), 300);
        let result = matcher
            .reconcile(ReconciliationScope::default(), Some(-1))
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
