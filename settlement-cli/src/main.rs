//! Settlement CLI
//!
//! Command-line interface for the Settlement API.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use settlement_client::SettlementClient;
use settlement_types::{
    AccountId, BatchPaymentRequest, FundId, PaymentId, PaymentRequest, ReconcileRequest,
    ReconciliationScope, TransactionId,
};

#[derive(Parser)]
#[command(name = "settlement")]
#[command(author, version, about = "Settlement API CLI client", long_about = None)]
struct Cli {
    /// Base URL of the Settlement API
    #[arg(
        long,
        env = "SETTLEMENT_API_URL",
        default_value = "http://localhost:3000"
    )]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transaction ledger operations
    Transaction {
        #[command(subcommand)]
        action: TransactionCommands,
    },
    /// Payment settlement operations
    Payment {
        #[command(subcommand)]
        action: PaymentCommands,
    },
    /// Fund aggregation and reconciliation
    Fund {
        #[command(subcommand)]
        action: FundCommands,
    },
    /// List past reconciliation runs
    Reconciliations,
    /// Check API health
    Health,
}

#[derive(Subcommand)]
enum TransactionCommands {
    /// Record a pending transaction
    Create {
        #[arg(long)]
        account: String,
        /// Amount in minor units; negative for debits
        #[arg(long, allow_hyphen_values = true)]
        amount: i64,
        #[arg(long, default_value = "USD")]
        currency: String,
        #[arg(long)]
        idempotency_key: Option<String>,
        #[arg(long)]
        reference: Option<String>,
    },
    /// Get transaction details
    Get {
        /// Transaction ID (UUID)
        id: String,
    },
    /// Reverse a committed transaction
    Reverse {
        /// Transaction ID (UUID)
        id: String,
        #[arg(long)]
        idempotency_key: Option<String>,
    },
}

#[derive(Subcommand)]
enum PaymentCommands {
    /// Settle a single payment
    Create {
        #[arg(long)]
        account: String,
        #[arg(long)]
        amount: i64,
        #[arg(long, default_value = "USD")]
        currency: String,
        /// PSP adapter name (server default when omitted)
        #[arg(long)]
        psp: Option<String>,
        /// Pending transaction to settle
        #[arg(long)]
        transaction: Option<String>,
        #[arg(long)]
        idempotency_key: Option<String>,
        #[arg(long)]
        reference: Option<String>,
    },
    /// Get payment details
    Get {
        /// Payment ID (UUID)
        id: String,
    },
    /// Refund a settled payment in full
    Refund {
        /// Payment ID (UUID)
        id: String,
        #[arg(long)]
        amount: Option<i64>,
        #[arg(long)]
        idempotency_key: Option<String>,
    },
    /// Settle a batch read from a JSON file ({"payments": [...]})
    Batch {
        file: PathBuf,
        #[arg(long)]
        idempotency_key: Option<String>,
    },
}

#[derive(Subcommand)]
enum FundCommands {
    /// Combine a fund's positions across sources
    Aggregate {
        fund: String,
        /// Source identifiers (comma-separated)
        #[arg(long, value_delimiter = ',', required = true)]
        sources: Vec<String>,
    },
    /// Show the last known positions of a fund
    Get { fund: String },
    /// Reconcile payments against transactions
    Reconcile {
        #[arg(long)]
        account: Option<String>,
        /// Start of the scope (RFC 3339)
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// End of the scope (RFC 3339)
        #[arg(long)]
        to: Option<DateTime<Utc>>,
        /// Heuristic matching window in seconds
        #[arg(long)]
        window_secs: Option<i64>,
    },
}

fn parse_id<T: std::str::FromStr>(s: &str, what: &str) -> Result<T> {
    s.parse()
        .map_err(|_| anyhow::anyhow!("Invalid {} ID: {}", what, s))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let client = SettlementClient::new(&cli.api_url);

    match cli.command {
        Commands::Health => {
            let healthy = client.health().await?;
            if healthy {
                println!("✓ API is healthy");
            } else {
                println!("✗ API is not healthy");
                std::process::exit(1);
            }
        }

        Commands::Transaction { action } => match action {
            TransactionCommands::Create {
                account,
                amount,
                currency,
                idempotency_key,
                reference,
            } => {
                let account_id: AccountId = parse_id(&account, "account")?;
                let tx = client
                    .create_transaction(
                        account_id,
                        amount,
                        &currency,
                        idempotency_key.as_deref(),
                        reference,
                    )
                    .await?;
                print_json(&tx)?;
            }
            TransactionCommands::Get { id } => {
                let id: TransactionId = parse_id(&id, "transaction")?;
                print_json(&client.get_transaction(id).await?)?;
            }
            TransactionCommands::Reverse {
                id,
                idempotency_key,
            } => {
                let id: TransactionId = parse_id(&id, "transaction")?;
                let reversal = client
                    .reverse_transaction(id, idempotency_key.as_deref())
                    .await?;
                print_json(&reversal)?;
            }
        },

        Commands::Payment { action } => match action {
            PaymentCommands::Create {
                account,
                amount,
                currency,
                psp,
                transaction,
                idempotency_key,
                reference,
            } => {
                let req = PaymentRequest {
                    account_id: parse_id(&account, "account")?,
                    amount,
                    currency,
                    psp,
                    transaction_id: transaction
                        .as_deref()
                        .map(|t| parse_id(t, "transaction"))
                        .transpose()?,
                    reference,
                    idempotency_key: None,
                };
                let response = client
                    .create_payment(&req, idempotency_key.as_deref())
                    .await?;
                print_json(&response)?;
            }
            PaymentCommands::Get { id } => {
                let id: PaymentId = parse_id(&id, "payment")?;
                print_json(&client.get_payment(id).await?)?;
            }
            PaymentCommands::Refund {
                id,
                amount,
                idempotency_key,
            } => {
                let id: PaymentId = parse_id(&id, "payment")?;
                let response = client
                    .refund_payment(id, amount, idempotency_key.as_deref())
                    .await?;
                print_json(&response)?;
            }
            PaymentCommands::Batch {
                file,
                idempotency_key,
            } => {
                let raw = std::fs::read_to_string(&file)
                    .with_context(|| format!("cannot read {}", file.display()))?;
                let batch: BatchPaymentRequest = serde_json::from_str(&raw)
                    .with_context(|| format!("{} is not a valid batch", file.display()))?;
                let response = client
                    .submit_batch(&batch, idempotency_key.as_deref())
                    .await?;
                print_json(&response)?;
            }
        },

        Commands::Fund { action } => match action {
            FundCommands::Aggregate { fund, sources } => {
                let response = client.aggregate_funds(FundId::new(fund)?, sources).await?;
                print_json(&response)?;
            }
            FundCommands::Get { fund } => {
                print_json(&client.get_fund(&FundId::new(fund)?).await?)?;
            }
            FundCommands::Reconcile {
                account,
                from,
                to,
                window_secs,
            } => {
                let req = ReconcileRequest {
                    scope: ReconciliationScope {
                        account_id: account
                            .as_deref()
                            .map(|a| parse_id(a, "account"))
                            .transpose()?,
                        from,
                        to,
                    },
                    window_secs,
                };
                print_json(&client.reconcile(&req).await?)?;
            }
        },

        Commands::Reconciliations => {
            print_json(&client.list_reconciliations().await?)?;
        }
    }

    Ok(())
}
