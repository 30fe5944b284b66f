use std::sync::Arc;

use taskpilot::providers::base::Embedder;
use taskpilot::providers::openai::OpenAiProvider;
use taskpilot::store::{ChromaStore, DocumentStore, MemoryStore};
use taskpilot::tasks::TaskContext;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

mod configuration;
mod error;
mod routes;
mod state;

use configuration::{Settings, StoreSettings};

fn create_store(
    settings: StoreSettings,
    embedder: Arc<dyn Embedder>,
) -> anyhow::Result<Arc<dyn DocumentStore>> {
    match settings.url {
        Some(url) => Ok(Arc::new(ChromaStore::new(
            url,
            settings.collection,
            embedder,
        )?)),
        None => {
            info!("no store url configured, using an in-process document store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for logging
    tracing_subscriber::fmt::init();

    // Load configuration
    let settings = Settings::new()?;
    let addr = settings.server.socket_addr()?;
    let max_sessions = settings.server.max_sessions;

    let provider = Arc::new(OpenAiProvider::new(settings.provider.into_config())?);
    let top_k = settings.store.top_k;
    let store = create_store(settings.store, provider.clone())?;

    let context = TaskContext::new(provider)
        .with_store(store)
        .with_top_k(top_k)
        .with_workdir(settings.workdir);
    let state = state::AppState::new(context).with_max_sessions(max_sessions);

    // Create router with CORS support
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
