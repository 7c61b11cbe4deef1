//! # Settlement Application
//!
//! Binary that wires together all the components:
//! - Load configuration from environment
//! - Initialize tracing, and OpenTelemetry export when configured
//! - Build the in-memory stores, PSP adapters and fund sources
//! - Start the idempotency sweeper
//! - Start the HTTP server

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    metrics::SdkMeterProvider, propagation::TraceContextPropagator, trace as sdktrace,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use settlement_hex::outbound::{PspRegistry, RateLimitedPsp, SimulatedPsp, StaticFundSource};
use settlement_hex::{SettlementService, inbound::HttpServer};
use settlement_repo::{IdempotencySweeper, InMemoryIdempotencyStore, build_repo};
use settlement_types::{Currency, FundId, FundSource, Money};

/// Providers to flush on shutdown.
struct Telemetry {
    tracer_provider: sdktrace::SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

fn init_telemetry(endpoint: &str) -> anyhow::Result<(sdktrace::Tracer, Telemetry)> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    // gRPC exporters with batch/periodic processing (non-blocking)
    let span_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("failed to create OTLP span exporter")?;
    let tracer_provider = sdktrace::SdkTracerProvider::builder()
        .with_batch_exporter(span_exporter)
        .build();
    global::set_tracer_provider(tracer_provider.clone());

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("failed to create OTLP metric exporter")?;
    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(metric_exporter)
        .build();
    global::set_meter_provider(meter_provider.clone());

    use opentelemetry::trace::TracerProvider as _;
    let tracer = tracer_provider.tracer("settlement-service");
    Ok((
        tracer,
        Telemetry {
            tracer_provider,
            meter_provider,
        },
    ))
}

fn demo_psps(rate_per_sec: u32) -> PspRegistry {
    PspRegistry::new("stripe-sim")
        .register(Arc::new(RateLimitedPsp::new(
            SimulatedPsp::new("stripe-sim").with_decline_above(1_000_000),
            rate_per_sec,
        )))
        .register(Arc::new(RateLimitedPsp::new(
            SimulatedPsp::new("adyen-sim")
                .with_latency(Duration::from_millis(35))
                .with_transient_rate(0.05),
            rate_per_sec,
        )))
}

fn demo_sources() -> anyhow::Result<Vec<Arc<dyn FundSource>>> {
    let growth = FundId::new("growth-eu")?;
    let income = FundId::new("income-us")?;
    Ok(vec![
        Arc::new(
            StaticFundSource::new("custodian-a")
                .with_balance(growth.clone(), Money::new(12_500_000, Currency::EUR))
                .with_balance(income.clone(), Money::new(4_000_000, Currency::USD)),
        ),
        Arc::new(
            StaticFundSource::new("custodian-b")
                .with_balance(growth.clone(), Money::new(3_250_000, Currency::EUR))
                .with_latency(Duration::from_millis(40)),
        ),
        Arc::new(
            StaticFundSource::new("bank-ledger")
                .with_balance(growth, Money::new(780_000, Currency::EUR))
                .with_balance(income, Money::new(1_150_000, Currency::USD))
                .with_latency(Duration::from_millis(120)),
        ),
    ])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = config::Config::from_env()?;

    let (otel_layer, telemetry) = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let (tracer, telemetry) = init_telemetry(endpoint)?;
            (
                Some(tracing_opentelemetry::layer().with_tracer(tracer)),
                Some(telemetry),
            )
        }
        None => (None, None),
    };

    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,settlement_app=debug,settlement_hex=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .init();

    tracing::info!("Starting settlement server on port {}", config.port);
    tracing::debug!(?config, "Loaded configuration");

    let repo = Arc::new(build_repo());
    let idempotency = Arc::new(InMemoryIdempotencyStore::new(
        config.idempotency_retention,
        config.idempotency_lease,
    ));

    let sweeper = IdempotencySweeper::new(idempotency.clone(), config.idempotency_sweep_interval);
    tokio::spawn(sweeper.run());

    let service = SettlementService::new(
        repo,
        idempotency,
        demo_psps(config.psp_rate_limit_per_sec),
        demo_sources()?,
        config.settlement.clone(),
    );

    // Create and run the HTTP server
    let server = HttpServer::new(service);
    let addr = format!("0.0.0.0:{}", config.port);

    server.run(&addr).await?;

    // Ensure telemetry is flushed before exit
    if let Some(telemetry) = telemetry {
        let _ = telemetry.tracer_provider.shutdown();
        let _ = telemetry.meter_provider.shutdown();
    }
    Ok(())
}
