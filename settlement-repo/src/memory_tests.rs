//! In-memory repository tests.

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use settlement_types::{
        AccountId, Currency, FundId, FundPosition, Money, Payment, ReconciliationId,
        ReconciliationRecord, ReconciliationScope, RepoError, SettlementRepository, Transaction,
        TransactionState,
    };

    use crate::InMemoryRepo;

    fn pending(account: AccountId, amount: i64) -> Transaction {
        Transaction::pending(account, Money::new(amount, Currency::USD), None, None).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get_transaction() {
        let repo = InMemoryRepo::new();
        let tx = pending(AccountId::new(), 1000);

        repo.insert_transaction(tx.clone()).await.unwrap();
        let fetched = repo.get_transaction(tx.id).await.unwrap().unwrap();

        assert_eq!(fetched, tx);
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let repo = InMemoryRepo::new();
        let tx = pending(AccountId::new(), 1000);

        repo.insert_transaction(tx.clone()).await.unwrap();
        let result = repo.insert_transaction(tx).await;

        assert!(matches!(result, Err(RepoError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_update_with_stale_version_fails() {
        let repo = InMemoryRepo::new();
        let tx = pending(AccountId::new(), 1000);
        repo.insert_transaction(tx.clone()).await.unwrap();

        let committed = tx.commit().unwrap();
        repo.update_transaction(tx.version(), committed.clone())
            .await
            .unwrap();

        // A second writer still holding version 1 loses.
        let failed = tx.fail().unwrap();
        let result = repo.update_transaction(tx.version(), failed).await;
        assert!(matches!(
            result,
            Err(RepoError::StaleVersion {
                expected: 1,
                actual: 2
            })
        ));

        let stored = repo.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(stored.state(), TransactionState::Committed);
    }

    #[tokio::test]
    async fn test_update_missing_transaction() {
        let repo = InMemoryRepo::new();
        let tx = pending(AccountId::new(), 1000);

        let result = repo.update_transaction(1, tx.commit().unwrap()).await;
        assert!(matches!(result, Err(RepoError::NotFound)));
    }

    #[tokio::test]
    async fn test_record_reversal_stores_both_records() {
        let repo = InMemoryRepo::new();
        let tx = pending(AccountId::new(), 1000);
        repo.insert_transaction(tx.clone()).await.unwrap();
        let committed = repo
            .update_transaction(tx.version(), tx.commit().unwrap())
            .await
            .unwrap();

        let (original, reversal) = committed.reverse().unwrap();
        repo.record_reversal(committed.version(), original, reversal.clone())
            .await
            .unwrap();

        let stored = repo.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(stored.state(), TransactionState::Reversed);
        assert_eq!(stored.reversed_by, Some(reversal.id));
        let mirror = repo.get_transaction(reversal.id).await.unwrap().unwrap();
        assert_eq!(mirror.amount().amount(), -1000);
    }

    #[tokio::test]
    async fn test_list_transactions_filters_by_scope() {
        let repo = InMemoryRepo::new();
        let account = AccountId::new();
        repo.insert_transaction(pending(account, 100)).await.unwrap();
        repo.insert_transaction(pending(account, 200)).await.unwrap();
        repo.insert_transaction(pending(AccountId::new(), 300))
            .await
            .unwrap();

        let scope = ReconciliationScope {
            account_id: Some(account),
            ..Default::default()
        };
        let txs = repo.list_transactions(&scope).await.unwrap();
        assert_eq!(txs.len(), 2);

        let future_only = ReconciliationScope {
            from: Some(Utc::now() + Duration::hours(1)),
            ..Default::default()
        };
        assert!(repo.list_transactions(&future_only).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_payment_round_trip() {
        let repo = InMemoryRepo::new();
        let payment = Payment::new(
            AccountId::new(),
            "stripe-sim",
            Money::new(500, Currency::EUR),
            None,
            None,
            None,
        )
        .unwrap();
        repo.insert_payment(payment.clone()).await.unwrap();

        let submitted = payment.submit().unwrap();
        repo.update_payment(payment.version(), submitted)
            .await
            .unwrap();

        let stored = repo.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.version(), 2);
        assert_eq!(
            repo.list_payments(&ReconciliationScope::default())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_upsert_position_keeps_latest_per_source() {
        let repo = InMemoryRepo::new();
        let fund_id = FundId::new("growth-eu").unwrap();
        let position = |source: &str, amount: i64| FundPosition {
            fund_id: fund_id.clone(),
            source_id: source.into(),
            balance: Money::new(amount, Currency::EUR),
            as_of: Utc::now(),
        };

        repo.upsert_position(position("custodian-a", 100)).await.unwrap();
        repo.upsert_position(position("custodian-a", 150)).await.unwrap();
        repo.upsert_position(position("custodian-b", 50)).await.unwrap();

        let view = repo.get_fund(&fund_id).await.unwrap().unwrap();
        assert_eq!(view.positions.len(), 2);
        assert_eq!(view.positions[0].balance.amount(), 150);

        let missing = FundId::new("unknown").unwrap();
        assert!(repo.get_fund(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reconciliations_listed_most_recent_first() {
        let repo = InMemoryRepo::new();
        let record = |window_secs| ReconciliationRecord {
            id: ReconciliationId::new(),
            scope: ReconciliationScope::default(),
            run_at: Utc::now(),
            window_secs,
            matched: vec![],
            orphan_transactions: vec![],
            orphan_payments: vec![],
            amount_mismatches: vec![],
            state_mismatches: vec![],
            ambiguous: vec![],
            clean: true,
        };

        repo.append_reconciliation(record(60)).await.unwrap();
        repo.append_reconciliation(record(120)).await.unwrap();

        let runs = repo.list_reconciliations().await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].window_secs, 120);
    }
}
