//! ClearPath support assistant HTTP server.

mod routes;

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use clearpath_core::config::{load_config, resolve_api_key};
use clearpath_core::embedding::HttpEmbeddingProvider;
use clearpath_core::index::CorpusIndex;
use clearpath_core::memory::ConversationStore;
use clearpath_core::pipeline::QueryPipeline;
use clearpath_core::provider::OpenAiCompatProvider;

use routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let config_path: Option<PathBuf> = std::env::args().nth(1).map(PathBuf::from);
    let config = Arc::new(load_config(config_path.as_deref()).context("loading configuration")?);

    let index = Arc::new(
        CorpusIndex::load(&config.embedding.index_path, config.embedding.dimension)
            .context("loading corpus index")?,
    );

    let api_key =
        resolve_api_key(&config.llm.api_key_env).context("resolving generation API key")?;
    let llm = Arc::new(OpenAiCompatProvider::new(&config.llm, api_key)?);
    // The embedding service may run unauthenticated (e.g. a local model
    // server), so a missing key is not fatal.
    let embedding_key = std::env::var(&config.embedding.api_key_env).ok();
    let embedder = Arc::new(HttpEmbeddingProvider::new(&config.embedding, embedding_key)?);

    let store = Arc::new(ConversationStore::new(config.memory.clone()));
    let pipeline = Arc::new(QueryPipeline::new(
        Arc::clone(&config),
        index,
        store,
        embedder,
        llm,
    ));

    let app = routes::router(AppState { pipeline });
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "ClearPath server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
