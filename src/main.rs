use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{AppState, router};
use api_shared::auth::ttl_from_env_value;
use api_shared::{RoleCredentials, SessionConfig, SessionKeys};
use prism_core::config::{limit_from_env_value, slow_query_threshold_from_env_value};
use prism_core::constants::{
    DEFAULT_AUDIT_HISTORY_LIMIT, DEFAULT_SEARCH_LIMIT, DEFAULT_UNLOCK_HISTORY_LIMIT,
};
use prism_core::store::postgres::PgStore;
use prism_core::{CoreConfig, Registry};

/// Main entry point for PRISM
///
/// Resolves configuration once, selects the record store and serves the REST API.
///
/// # Environment Variables
/// - `PRISM_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `DATABASE_URL`: Postgres connection string; without it an in-memory store is used
/// - `PRISM_SESSION_SECRET`: HMAC secret for session tokens (required)
/// - `PRISM_SESSION_TTL_HOURS`: Session lifetime in hours (default: 12)
/// - `PRISM_SLOW_QUERY_MS`: Slow store operation threshold (default: 500)
/// - `PRISM_SEARCH_LIMIT`: Maximum search results (default: 20)
/// - `PWD_<ROLE>`: Shared password per role
///
/// # Returns
/// * `Ok(())` - If the server starts and shuts down cleanly
/// * `Err(anyhow::Error)` - If configuration, the database or the server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("prism_run=info".parse()?)
                .add_directive("prism_core=info".parse()?)
                .add_directive("api_rest=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("PRISM_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let cfg = Arc::new(core_config_from_env()?);

    let secret = std::env::var("PRISM_SESSION_SECRET")
        .map_err(|_| anyhow::anyhow!("PRISM_SESSION_SECRET must be set"))?;
    let ttl = ttl_from_env_value(std::env::var("PRISM_SESSION_TTL_HOURS").ok())?;
    let keys = SessionKeys::new(SessionConfig::new(secret, ttl)?);

    let credentials = RoleCredentials::from_env();
    if credentials.configured_roles().is_empty() {
        tracing::warn!("No PWD_<ROLE> passwords configured; every login will fail");
    }

    let registry = match std::env::var("DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => {
            let store = Arc::new(PgStore::connect(&url, cfg.clone()).await?);
            store.migrate().await?;
            tracing::info!("++ Connected to Postgres");
            Registry::new(cfg, store.clone(), store)
        }
        _ => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store, data is lost on exit");
            Registry::in_memory(cfg)
        }
    };

    let app = router(AppState::new(registry, keys, credentials));

    tracing::info!("++ Starting PRISM REST on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn core_config_from_env() -> anyhow::Result<CoreConfig> {
    let slow_query = slow_query_threshold_from_env_value(std::env::var("PRISM_SLOW_QUERY_MS").ok())?;
    let search_limit = limit_from_env_value(
        std::env::var("PRISM_SEARCH_LIMIT").ok(),
        DEFAULT_SEARCH_LIMIT,
    )?;
    let audit_limit = limit_from_env_value(
        std::env::var("PRISM_AUDIT_HISTORY_LIMIT").ok(),
        DEFAULT_AUDIT_HISTORY_LIMIT,
    )?;
    let unlock_limit = limit_from_env_value(
        std::env::var("PRISM_UNLOCK_HISTORY_LIMIT").ok(),
        DEFAULT_UNLOCK_HISTORY_LIMIT,
    )?;

    Ok(CoreConfig::new(
        slow_query,
        search_limit,
        audit_limit,
        unlock_limit,
    )?)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("-- Shutting down PRISM REST");
}
