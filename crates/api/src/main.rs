//! API server entry point.

use booking::{InMemoryIdempotencyCache, RedisIdempotencyCache, SimulatedPaymentGateway};
use booking::{IdempotencyCache, StockChangeBus};
use sqlx::postgres::PgPoolOptions;
use storage::PostgresReservationStore;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use api::Config;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Binds and serves the app over the given cache implementation.
async fn serve<C: IdempotencyCache + 'static>(
    config: &Config,
    store: PostgresReservationStore,
    cache: C,
) {
    let state = api::create_state(
        store,
        SimulatedPaymentGateway::new(),
        cache,
        StockChangeBus::new(),
        config.payment_timeout,
    );

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = config
        .database_url
        .clone()
        .expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("failed to connect to Postgres");

    let store = PostgresReservationStore::new(pool);
    store.run_migrations().await.expect("migrations failed");

    match &config.redis_url {
        Some(url) => {
            let cache = RedisIdempotencyCache::connect(url)
                .await
                .expect("failed to connect to Redis");
            tracing::info!("using Redis idempotency cache");
            serve(&config, store, cache).await;
        }
        None => {
            tracing::warn!("REDIS_URL not set, using in-memory idempotency cache");
            serve(&config, store, InMemoryIdempotencyCache::new()).await;
        }
    }
}
