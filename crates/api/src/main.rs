use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use api::http::{AppState, router};
use api::{AppConfig, Pipeline, StoreConfig};
use extract::{CachedModel, LanguageModel, OllamaClient};
use index::{GraphStore, MemoryGraphStore, Neo4jGraphStore};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn connect_store(config: &StoreConfig) -> Result<Arc<dyn GraphStore>> {
    match config {
        StoreConfig::Memory => {
            info!("Using in-memory graph store");
            Ok(Arc::new(MemoryGraphStore::new()))
        }
        StoreConfig::Neo4j { uri, user, password } => {
            info!(%uri, "Connecting to Neo4j");
            let store = Neo4jGraphStore::connect(uri, user, password)
                .await
                .context("Failed to connect to Neo4j")?;
            store.init_schema().await.context("Failed to initialize Neo4j schema")?;
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(config.server.json_logs);
    info!(mode = ?config.mode, "Configuration loaded");

    let ollama = OllamaClient::new(&config.model.base_url, &config.model.model, config.request_timeout());
    if let Err(e) = ollama.ping().await {
        tracing::warn!(error = %e, "Language model not reachable yet");
    }
    let model_name = ollama.model_name().to_string();
    let model: Arc<dyn LanguageModel> = if config.cache.enabled {
        Arc::new(CachedModel::new(Arc::new(ollama), config.cache.max_entries))
    } else {
        Arc::new(ollama)
    };

    let store = connect_store(&config.store).await?;
    let pipeline = Pipeline::new(model, store, config.pipeline_settings()).context("Invalid pipeline settings")?;

    let shutdown = CancellationToken::new();
    let state = AppState {
        pipeline: Arc::new(pipeline),
        model_name,
        shutdown: shutdown.clone(),
    };

    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!("Server listening on http://{}", config.server.bind_addr);

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested; cancelling in-flight builds");
            signal.cancel();
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Server error")?;

    Ok(())
}
