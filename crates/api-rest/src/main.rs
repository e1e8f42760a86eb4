//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API over a process-local store.
//!
//! ## Intended use
//! This binary is useful for development and debugging: nothing survives a restart. The
//! workspace's main `prism-run` binary selects the Postgres store when `DATABASE_URL` is set.

use api_shared::auth::ttl_from_env_value;
use api_shared::{RoleCredentials, SessionConfig, SessionKeys};
use api_rest::{router, AppState};
use prism_core::{CoreConfig, Registry};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the PRISM REST API server
///
/// # Environment Variables
/// - `PRISM_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - `PRISM_SESSION_SECRET`: HMAC secret for session tokens (required)
/// - `PRISM_SESSION_TTL_HOURS`: Session lifetime (default: 12)
/// - `PWD_<ROLE>`: Shared password per role
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the session configuration is missing or invalid,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("PRISM_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let secret = std::env::var("PRISM_SESSION_SECRET")
        .map_err(|_| anyhow::anyhow!("PRISM_SESSION_SECRET must be set"))?;
    let ttl = ttl_from_env_value(std::env::var("PRISM_SESSION_TTL_HOURS").ok())?;
    let keys = SessionKeys::new(SessionConfig::new(secret, ttl)?);

    let credentials = RoleCredentials::from_env();
    if credentials.configured_roles().is_empty() {
        tracing::warn!("No PWD_<ROLE> passwords configured; every login will fail");
    }

    tracing::warn!("-- Using the in-memory store; data is lost on exit");
    let registry = Registry::in_memory(Arc::new(CoreConfig::default()));
    let app = router(AppState::new(registry, keys, credentials));

    tracing::info!("-- Starting PRISM REST API on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
