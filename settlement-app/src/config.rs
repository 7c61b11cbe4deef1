//! Configuration loading from environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use settlement_hex::{RetryPolicy, SettlementConfig};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub settlement: SettlementConfig,
    pub psp_rate_limit_per_sec: u32,
    pub idempotency_retention: Duration,
    pub idempotency_lease: Duration,
    pub idempotency_sweep_interval: Duration,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads configuration through `lookup`, which returns a variable's raw value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let port = parse(&lookup, "PORT", 3000)?;
        let worker_pool_size: usize = parse(&lookup, "WORKER_POOL_SIZE", 8)?;
        if worker_pool_size == 0 {
            anyhow::bail!("WORKER_POOL_SIZE must be at least 1");
        }

        let max_attempts: u32 = parse(&lookup, "PSP_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            anyhow::bail!("PSP_MAX_ATTEMPTS must be at least 1");
        }
        let retry = RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(parse(&lookup, "PSP_BACKOFF_BASE_MS", 100)?),
            max_delay: Duration::from_millis(parse(&lookup, "PSP_BACKOFF_MAX_MS", 2000)?),
        };

        let batch_timeout_ms: u64 = parse(&lookup, "BATCH_TIMEOUT_MS", 30_000)?;
        let reconcile_window_secs: i64 = parse(&lookup, "RECONCILE_WINDOW_SECS", 300)?;
        if reconcile_window_secs < 0 {
            anyhow::bail!("RECONCILE_WINDOW_SECS cannot be negative");
        }

        let settlement = SettlementConfig {
            worker_pool_size,
            retry,
            batch_timeout: (batch_timeout_ms > 0).then(|| Duration::from_millis(batch_timeout_ms)),
            source_timeout: Duration::from_millis(parse(&lookup, "FUND_SOURCE_TIMEOUT_MS", 2000)?),
            reconcile_window_secs,
        };

        Ok(Self {
            port,
            settlement,
            psp_rate_limit_per_sec: parse(&lookup, "PSP_RATE_LIMIT_PER_SEC", 50)?,
            idempotency_retention: Duration::from_secs(parse(
                &lookup,
                "IDEMPOTENCY_RETENTION_SECS",
                86_400,
            )?),
            idempotency_lease: Duration::from_secs(parse(&lookup, "IDEMPOTENCY_LEASE_SECS", 30)?),
            idempotency_sweep_interval: Duration::from_secs(parse(
                &lookup,
                "IDEMPOTENCY_SWEEP_SECS",
                60,
            )?),
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|v| !v.trim().is_empty()),
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", name, raw)),
        None => Ok(default),
    }
}
