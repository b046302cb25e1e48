//! HTTP boundary for the ticket reservation engine.
//!
//! Exposes booking creation, an SSE stream of stock changes, and the
//! usual health and metrics endpoints, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use booking::{BookingEngine, IdempotencyCache, PaymentGateway, StockChangeBus};
use metrics_exporter_prometheus::PrometheusHandle;
use storage::ReservationStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use error::ApiError;
use routes::bookings::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, G, C>(state: Arc<AppState<S, G, C>>, metrics_handle: PrometheusHandle) -> Router
where
    S: ReservationStore + 'static,
    G: PaymentGateway + 'static,
    C: IdempotencyCache + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/bookings", post(routes::bookings::create::<S, G, C>))
        .route(
            "/bookings/stream",
            get(routes::stream::stock_events::<S, G, C>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Assembles the shared state around a booking engine.
pub fn create_state<S, G, C>(
    store: S,
    gateway: G,
    cache: C,
    bus: StockChangeBus,
    payment_timeout: std::time::Duration,
) -> Arc<AppState<S, G, C>>
where
    S: ReservationStore,
    G: PaymentGateway,
    C: IdempotencyCache,
{
    let engine =
        BookingEngine::new(store, gateway, cache, bus).with_payment_timeout(payment_timeout);
    Arc::new(AppState { engine })
}
