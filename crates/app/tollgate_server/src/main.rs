//! Tollgate authentication server binary.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tollgate_api::config::ApiConfig;
use tollgate_core::AuthCoreService;
use tollgate_core::audit::{AuditEventBus, TracingAuditHandler};
use tollgate_core::keys::SigningKeyStore;
use tollgate_core::rate_limit::MemoryRateLimitBackend;
use tollgate_core::service::SpanContextPropagator;
use tollgate_core::store::{AuthStores, PgAuthStore};
use tracing::info;

/// CLI arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "tollgate_server", about = "Tollgate authentication server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3100")]
    bind_addr: String,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/tollgate"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 10)]
    max_connections: u32,

    /// Take the client IP from `X-Forwarded-For`. Only enable behind a proxy
    /// that overwrites the header.
    #[arg(long, env = "TRUST_FORWARDED_FOR", default_value_t = false)]
    trust_forwarded_for: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tollgate_api=debug,tollgate_core=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config = ApiConfig {
        bind_addr: args.bind_addr,
        pg_connection_url: args.database_url,
        trust_forwarded_for: args.trust_forwarded_for,
        ..ApiConfig::from_env()
    };

    info!(
        bind_addr = %config.bind_addr,
        max_connections = args.max_connections,
        "starting tollgate_server"
    );

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.pg_connection_url)
        .await?;

    let store = Arc::new(PgAuthStore::new(pool));
    info!("running database migrations");
    store.migrate().await?;

    let audit = Arc::new(AuditEventBus::new());
    audit.subscribe(Arc::new(TracingAuditHandler));

    let keys = Arc::new(SigningKeyStore::from_seed_or_generate(
        config.auth.signing_key_seed.as_deref(),
    )?);
    let rate_limits = Arc::new(MemoryRateLimitBackend::new());
    let service = AuthCoreService::new(
        config.auth.clone(),
        AuthStores::shared(store),
        keys,
        rate_limits.clone(),
        audit,
    )
    .with_propagator(Arc::new(SpanContextPropagator));
    let service = Arc::new(service);

    service.authorization_codes().spawn_cleanup_task();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            rate_limits.purge_expired(Utc::now());
        }
    });

    let state = tollgate_api::AppState {
        service,
        config: config.clone(),
    };
    let app = tollgate_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
