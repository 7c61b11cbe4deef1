//! Client example demonstrating settlement flows against an in-process server.
//!
//! Run with: cargo run -p settlement-app --example client_example

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use settlement_client::SettlementClient;
use settlement_hex::outbound::{PspRegistry, SimulatedPsp, StaticFundSource};
use settlement_hex::{SettlementConfig, SettlementService, inbound::HttpServer};
use settlement_repo::{InMemoryIdempotencyStore, build_repo};
use settlement_types::{
    AccountId, BatchPaymentRequest, Currency, FundId, FundSource, ItemOutcome, Money,
    PaymentRequest, ReconcileRequest,
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt().with_env_filter("info").init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr: SocketAddr = listener.local_addr()?;
    println!("🚀 Starting server on {addr}...");

    let growth = FundId::new("growth-eu")?;
    let sources: Vec<Arc<dyn FundSource>> = vec![
        Arc::new(
            StaticFundSource::new("custodian-a")
                .with_balance(growth.clone(), Money::new(1_000_000, Currency::EUR)),
        ),
        Arc::new(
            StaticFundSource::new("custodian-b")
                .with_balance(growth.clone(), Money::new(250_000, Currency::EUR))
                .with_latency(Duration::from_secs(10)),
        ),
    ];
    let psps = PspRegistry::new("stripe-sim")
        .register(Arc::new(SimulatedPsp::new("stripe-sim").with_decline_above(100_000)));
    let config = SettlementConfig {
        source_timeout: Duration::from_millis(300),
        ..SettlementConfig::default()
    };

    let service = SettlementService::new(
        Arc::new(build_repo()),
        Arc::new(InMemoryIdempotencyStore::default()),
        psps,
        sources,
        config,
    );
    let router = HttpServer::new(service).router();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router.into_make_service()).await {
            eprintln!("server stopped: {e}");
        }
    });

    let client = SettlementClient::new(format!("http://{addr}"));
    println!("✅ Server health: {}", client.health().await?);

    // ─────────────────────────────────────────────────────────────────────────
    // Demo: idempotent ledger entry
    // ─────────────────────────────────────────────────────────────────────────

    let account = AccountId::new();
    let first = client
        .create_transaction(account, 4_200, "USD", Some("invoice-17"), None)
        .await?;
    let again = client
        .create_transaction(account, 4_200, "USD", Some("invoice-17"), None)
        .await?;
    println!("✅ Same key, same transaction: {} == {}", first.id, again.id);

    let reused = client
        .create_transaction(account, 9_900, "USD", Some("invoice-17"), None)
        .await;
    println!("✅ Key reuse rejected: {}", reused.unwrap_err());

    // ─────────────────────────────────────────────────────────────────────────
    // Demo: settle the pending transaction, then a batch
    // ─────────────────────────────────────────────────────────────────────────

    let payment = PaymentRequest {
        account_id: account,
        amount: 4_200,
        currency: "USD".into(),
        psp: None,
        transaction_id: Some(first.id),
        reference: Some("invoice-17".into()),
        idempotency_key: None,
    };
    let settled = client.create_payment(&payment, Some("pay-invoice-17")).await?;
    println!("✅ Payment: {:?} {}", settled.status, settled.data.label());

    let batch = BatchPaymentRequest {
        payments: [1_500, 250_000, 0, 3_000]
            .into_iter()
            .map(|amount| PaymentRequest {
                amount,
                transaction_id: None,
                reference: None,
                ..payment.clone()
            })
            .collect(),
        idempotency_key: None,
    };
    let report = client.submit_batch(&batch, Some("batch-2024-06-01")).await?;
    println!("\n📋 Batch {} ({:?}):", report.data.batch_id, report.status);
    for item in &report.data.items {
        println!("   #{} {}", item.index, item.outcome.label());
    }

    if let ItemOutcome::Settled { payment_id, .. } = &report.data.items[0].outcome {
        let refund = client
            .refund_payment(*payment_id, None, Some("refund-1"))
            .await?;
        println!("✅ Refund of {payment_id}: {:?}", refund.status);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Demo: funds and reconciliation
    // ─────────────────────────────────────────────────────────────────────────

    let funds = client
        .aggregate_funds(growth, vec!["custodian-a".into(), "custodian-b".into()])
        .await?;
    println!(
        "\n✅ Fund {} ({:?}): {:?}",
        funds.data.fund_id, funds.status, funds.data.combined_balance
    );

    let record = client.reconcile(&ReconcileRequest::default()).await?;
    println!(
        "✅ Reconciliation {}: {} matched, {} incidents",
        record.id,
        record.matched.len(),
        record.incident_count()
    );

    println!("\n🎉 Example completed successfully!");
    Ok(())
}
