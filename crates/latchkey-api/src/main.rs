//! Latchkey API Server
//!
//! HTTP session authority for the browser client.
//!
//! Author: hephaex@gmail.com

use anyhow::Context;
use latchkey_api::{create_router, state::AppState};
use latchkey_core::{
    postgres, AppConfig, CredentialStore, InMemoryCredentialStore, InMemoryRefreshLedger,
    LoggingConfig, PgCredentialStore, PgRefreshLedger, RefreshTokenLedger,
};
use std::sync::Arc;

fn load_config() -> anyhow::Result<AppConfig> {
    match std::env::var("LATCHKEY_CONFIG") {
        Ok(path) => Ok(AppConfig::from_file(&path)?.with_env_override()?),
        Err(_) => Ok(AppConfig::from_env()?),
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "latchkey_api={level},latchkey_core={level},tower_http={level},audit=info",
            level = logging.level
        )
        .into()
    });

    if logging.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn open_stores(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn CredentialStore>, Arc<dyn RefreshTokenLedger>)> {
    match &config.database.postgres_url {
        Some(url) => {
            let pool = postgres::connect(url, config.database.pool_size)
                .await
                .context("connecting to PostgreSQL")?;
            postgres::migrate(&pool)
                .await
                .context("applying database schema")?;
            tracing::info!("Using PostgreSQL credential store");
            Ok((
                Arc::new(PgCredentialStore::from_pool(pool.clone())),
                Arc::new(PgRefreshLedger::from_pool(pool)),
            ))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores (data is lost on restart)");
            Ok((
                Arc::new(InMemoryCredentialStore::new()),
                Arc::new(InMemoryRefreshLedger::new()),
            ))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(&config.logging);
    config.validate()?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(
        environment = ?config.server.environment,
        cross_site_cookies = config.cross_site_cookies(),
        "Configuration loaded"
    );

    // Create application state
    let (store, ledger) = open_stores(&config).await?;
    let state = Arc::new(AppState::with_configured_provider(config, store, ledger)?);

    // Create router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Latchkey API Server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);
    tracing::info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
