use anyhow::Result;
use tracing_subscriber::EnvFilter;

use facematch_core::{EmbeddingGate, Settings, SimilaritySearch};
use facematch_store::SqliteCatalog;

mod server;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        db = %settings.db_path.display(),
        "facematchd starting"
    );

    let catalog = SqliteCatalog::open(&settings.db_path).await?;

    let search = if settings.ai_endpoint.trim().is_empty() {
        tracing::warn!("FACEMATCH_AI_ENDPOINT is not set; /api/search will fail");
        None
    } else {
        let gate = EmbeddingGate::connect(
            &settings.ai_endpoint,
            settings.request_timeout(),
            settings.quality.clone(),
        )?;
        Some(SimilaritySearch::new(gate, catalog.clone()).with_candidate_limit(settings.search_candidates))
    };

    server::serve(
        &settings.listen_addr,
        server::AppState::new(catalog, search),
        Some(settings.static_dir.clone()),
    )
    .await
}
