//! Account Connector server

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use account_connector::{
    routes, AccountStore, AppState, Config, ConnectionEngine, HttpProviderClient, InMemoryStore,
    SqliteStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(?config, "Loaded configuration");

    let provider = Arc::new(HttpProviderClient::new(&config.provider)?);
    if let Err(e) = provider.check_connection().await {
        tracing::warn!(error = %e, "Provider API is not reachable");
    }

    match config.database_path.as_deref() {
        Some(path) => {
            tracing::info!(path, "Using SQLite store");
            serve(&config, Arc::new(SqliteStore::open(path)?), provider).await
        }
        None => {
            tracing::warn!("No DATABASE_PATH set, accounts are kept in memory");
            serve(&config, Arc::new(InMemoryStore::new()), provider).await
        }
    }
}

async fn serve<S: AccountStore>(
    config: &Config,
    store: Arc<S>,
    provider: Arc<HttpProviderClient>,
) -> Result<()> {
    let engine = ConnectionEngine::new(store, provider)
        .with_checkpoint_ttl(config.checkpoint_ttl())
        .with_long_poll_timeout(config.provider.long_poll_timeout());

    // Create router
    let app = routes::create_router(Arc::new(AppState::new(engine)));

    // Start server
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Account connector listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
