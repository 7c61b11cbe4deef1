//! HTTP Server configuration and startup.

use std::any::Any;
use std::sync::Arc;

use axum::{
    Router,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use settlement_types::{AppError, IdempotencyStore, SettlementRepository};

use super::handlers::{self, ApiError, AppState};
use crate::SettlementService;

/// HTTP Server for the Settlement API.
pub struct HttpServer<R: SettlementRepository, I: IdempotencyStore> {
    state: Arc<AppState<R, I>>,
}

impl<R: SettlementRepository, I: IdempotencyStore> HttpServer<R, I> {
    pub fn new(service: SettlementService<R, I>) -> Self {
        Self {
            state: Arc::new(AppState { service }),
        }
    }

    /// Builds the Axum router with all routes.
    pub fn router(&self) -> Router {
        // Uses the globally installed MeterProvider
        let metrics = axum_otel_metrics::HttpMetricsLayerBuilder::new().build();

        Router::new()
            .route("/health", get(handlers::health::<R, I>))
            .route("/openapi.json", get(handlers::openapi_json))
            .route("/transactions", post(handlers::create_transaction::<R, I>))
            .route("/transactions/{id}", get(handlers::get_transaction::<R, I>))
            .route(
                "/transactions/{id}/reverse",
                post(handlers::reverse_transaction::<R, I>),
            )
            .route("/payments", post(handlers::create_payment::<R, I>))
            .route("/payments/batch", post(handlers::submit_batch::<R, I>))
            .route("/payments/{id}", get(handlers::get_payment::<R, I>))
            .route(
                "/payments/{id}/refund",
                post(handlers::refund_payment::<R, I>),
            )
            .route("/funds/aggregate", post(handlers::aggregate_funds::<R, I>))
            .route("/funds/reconcile", post(handlers::reconcile::<R, I>))
            .route("/funds/{id}", get(handlers::get_fund::<R, I>))
            .route(
                "/reconciliations",
                get(handlers::list_reconciliations::<R, I>),
            )
            .layer(metrics)
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Runs the server on the given address with graceful shutdown.
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Server listening on {}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = detail, "Handler panicked");
    ApiError(AppError::Internal("Unexpected server error".into())).into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown...");
}
