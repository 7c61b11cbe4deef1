//! PSP adapters.
//!
//! `SimulatedPsp` stands in for a real processor; `RateLimitedPsp` wraps
//! any adapter with a token bucket so calls stay under the processor's limit.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use rand::Rng;
use settlement_types::{AppError, Money, PaymentId, PspAdapter, SettlementResult};
use tracing::debug;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Simulated processor
// ─────────────────────────────────────────────────────────────────────────────

/// In-process PSP with configurable latency, declines and transient failures.
#[derive(Debug, Clone)]
pub struct SimulatedPsp {
    name: String,
    latency: Duration,
    /// Charges above this amount (minor units) are declined
    decline_above: Option<i64>,
    /// Probability of a transient failure per call, 0.0 to 1.0
    transient_rate: f64,
}

impl SimulatedPsp {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency: Duration::from_millis(20),
            decline_above: None,
            transient_rate: 0.0,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_decline_above(mut self, limit: i64) -> Self {
        self.decline_above = Some(limit);
        self
    }

    pub fn with_transient_rate(mut self, rate: f64) -> Self {
        self.transient_rate = rate.clamp(0.0, 1.0);
        self
    }

    async fn simulate(&self) -> Option<SettlementResult> {
        tokio::time::sleep(self.latency).await;
        let flaky = rand::rng().random_bool(self.transient_rate);
        flaky.then(|| SettlementResult::TransientError {
            reason: format!("{} temporarily unavailable", self.name),
        })
    }
}

#[async_trait]
impl PspAdapter for SimulatedPsp {
    fn name(&self) -> &str {
        &self.name
    }

    async fn charge(&self, amount: Money, reference: &str) -> SettlementResult {
        if let Some(transient) = self.simulate().await {
            return transient;
        }
        if self.decline_above.is_some_and(|limit| amount.amount() > limit) {
            return SettlementResult::Declined {
                reason: format!("{} exceeds the authorised limit", amount),
            };
        }
        debug!(psp = %self.name, %amount, reference, "Charge settled");
        SettlementResult::Settled {
            external_ref: format!("ch_{}", Uuid::new_v4().simple()),
        }
    }

    async fn refund(&self, payment_id: PaymentId, amount: Money) -> SettlementResult {
        if let Some(transient) = self.simulate().await {
            return transient;
        }
        debug!(psp = %self.name, %payment_id, %amount, "Refund settled");
        SettlementResult::Settled {
            external_ref: format!("re_{}", Uuid::new_v4().simple()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rate limiting decorator
// ─────────────────────────────────────────────────────────────────────────────

/// Throttles calls to the wrapped adapter with a token bucket.
///
/// Callers wait for a token instead of being rejected.
pub struct RateLimitedPsp<P: PspAdapter> {
    inner: P,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl<P: PspAdapter> RateLimitedPsp<P> {
    /// Allows `per_second` calls per second, with bursts of the same size.
    pub fn new(inner: P, per_second: u32) -> Self {
        let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            inner,
            limiter: RateLimiter::direct(Quota::per_second(rate)),
        }
    }
}

#[async_trait]
impl<P: PspAdapter> PspAdapter for RateLimitedPsp<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn charge(&self, amount: Money, reference: &str) -> SettlementResult {
        self.limiter.until_ready().await;
        self.inner.charge(amount, reference).await
    }

    async fn refund(&self, payment_id: PaymentId, amount: Money) -> SettlementResult {
        self.limiter.until_ready().await;
        self.inner.refund(payment_id, amount).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Adapters by name, with a default for requests that do not pick one.
#[derive(Clone)]
pub struct PspRegistry {
    adapters: HashMap<String, Arc<dyn PspAdapter>>,
    default: String,
}

impl PspRegistry {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            adapters: HashMap::new(),
            default: default.into(),
        }
    }

    pub fn register(mut self, adapter: Arc<dyn PspAdapter>) -> Self {
        self.adapters.insert(adapter.name().to_string(), adapter);
        self
    }

    /// Looks up `name`, or the default adapter when `name` is None.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn PspAdapter>, AppError> {
        let name = name.unwrap_or(&self.default);
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::Validation(format!("Unknown PSP: {}", name)))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settlement_types::Currency;

    fn instant(name: &str) -> SimulatedPsp {
        SimulatedPsp::new(name).with_latency(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_simulated_psp_settles_and_declines() {
        let psp = instant("sim").with_decline_above(1000);

        let ok = psp.charge(Money::new(500, Currency::USD), "ref-1").await;
        assert!(matches!(ok, SettlementResult::Settled { ref external_ref } if external_ref.starts_with("ch_")));

        let declined = psp.charge(Money::new(5000, Currency::USD), "ref-2").await;
        assert!(matches!(declined, SettlementResult::Declined { .. }));
    }

    #[tokio::test]
    async fn test_always_flaky_psp_is_transient() {
        let psp = instant("flaky").with_transient_rate(1.0);
        let result = psp.refund(PaymentId::new(), Money::new(1, Currency::EUR)).await;
        assert!(matches!(result, SettlementResult::TransientError { .. }));
    }

    #[tokio::test]
    async fn test_rate_limited_psp_delegates() {
        let psp = RateLimitedPsp::new(instant("limited"), 100);
        assert_eq!(psp.name(), "limited");

        let result = psp.charge(Money::new(10, Currency::GBP), "ref").await;
        assert!(matches!(result, SettlementResult::Settled { .. }));
    }

    #[test]
    fn test_registry_resolves_default_and_rejects_unknown() {
        let registry = PspRegistry::new("a")
            .register(Arc::new(instant("a")))
            .register(Arc::new(instant("b")));

        assert_eq!(registry.resolve(None).unwrap().name(), "a");
        assert_eq!(registry.resolve(Some("b")).unwrap().name(), "b");
        assert_eq!(
            registry.resolve(Some("zzz")).err().map(|e| e.kind()),
            Some("ValidationError")
        );
        assert_eq!(registry.names(), vec!["a", "b"]);
    }
}
