// Main entry point for the harvester HTTP service

use std::sync::Arc;

use anyhow::{Context, Result};
use org_harvester::api::{self, AppState};
use org_harvester::config::HarvesterConfig;
use org_harvester::enrich::EnrichmentWorker;
use org_harvester::executor::EnrichmentExecutor;
use org_harvester::fetch::{HttpFetcher, TorIdentityRotator};
use org_harvester::harvest::pipeline::JobOrchestrator;
use org_harvester::harvest::sources::default_collectors;
use org_harvester::store::{EntityStore, MemoryEntityStore};
use org_harvester::traits::PageFetcher;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,org_harvester=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = HarvesterConfig::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    let store = open_store(&config).await?;

    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(config.user_agent.clone()));
    // No headless browser is bundled; map search goes through the plain fetcher.
    let collectors = default_collectors(fetcher.clone(), fetcher.clone(), &config);

    let mut orchestrator = JobOrchestrator::new(store.clone(), collectors);
    if config.enrich {
        let worker = Arc::new(EnrichmentWorker::new(fetcher).with_probe_timeout(config.request_timeout));
        let executor = EnrichmentExecutor::new(worker, store, config.enrich_concurrency);
        orchestrator = orchestrator.with_enrichment(Arc::new(executor));
    }
    if let Some(addr) = &config.tor_control_addr {
        tracing::info!("Identity rotation via Tor control port {}", addr);
        let rotator = TorIdentityRotator::new(addr.clone(), config.tor_control_password.clone())
            .with_timeout(config.request_timeout);
        orchestrator = orchestrator.with_identity_rotator(Arc::new(rotator));
    }

    let app = api::router(AppState::new(Arc::new(orchestrator)));

    let addr = config.listen_addr();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_store(config: &HarvesterConfig) -> Result<Arc<dyn EntityStore>> {
    match config.database_url.as_deref() {
        Some(url) if url.starts_with("sqlite:") => {
            tracing::info!("Connecting to database...");
            let store = org_harvester::store::SqliteEntityStore::new(url)
                .await
                .context("Failed to open SQLite store")?;
            tracing::info!("Database connected");
            Ok(Arc::new(store))
        }
        _ => Ok(Arc::new(MemoryEntityStore::new())),
    }
}

#[cfg(not(feature = "sqlite"))]
async fn open_store(config: &HarvesterConfig) -> Result<Arc<dyn EntityStore>> {
    if config.database_url.is_some() {
        tracing::warn!("DATABASE_URL is set but the sqlite feature is disabled; using in-memory store");
    }
    Ok(Arc::new(MemoryEntityStore::new()))
}
