use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use calth_api::app::{build_app, AppState};
use calth_auth::CredentialStore;
use calth_infra::{AppConfig, InMemoryCredentialStore, PgCredentialStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    calth_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    let store: Arc<dyn CredentialStore> = match &config.database_url {
        Some(url) => {
            let store = PgCredentialStore::connect(url, config.auth.store_timeout())
                .await
                .context("failed to connect to postgres")?;
            store
                .ensure_schema()
                .await
                .context("failed to create schema")?;
            tracing::info!("using postgres credential store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using empty in-memory credential store");
            Arc::new(InMemoryCredentialStore::new())
        }
    };

    let app = build_app(AppState::new(&config.auth, store));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
