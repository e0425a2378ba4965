mod config;
mod error;
mod routes;

use std::sync::Arc;

use contextdoc_pipeline::{Pipeline, SqliteStore, SubmissionStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ServiceConfig;

pub struct AppState {
    pipeline: Arc<Pipeline>,
    submissions: Arc<dyn SubmissionStore>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServiceConfig::load()?;
    let store = Arc::new(SqliteStore::open(&config.store.path)?);
    let client = config.build_client()?;
    info!(
        provider = %client.provider(),
        model = client.model(),
        store = %config.store.path,
        "starting contextdoc service"
    );
    let pipeline = Pipeline::new(
        config.pipeline.clone(),
        Arc::new(client),
        store.clone(),
        store.clone(),
    );
    let state = Arc::new(AppState {
        pipeline: Arc::new(pipeline),
        submissions: store,
    });
    let app = routes::router(state);

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
