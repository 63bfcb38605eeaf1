//! Wiring of the ledger, capabilities and request manager.

use crate::http::HttpFetcher;
use anyhow::Context;
use drover_config::{AppConfig, LedgerBackend, LedgerConfig};
use drover_jobs::{
    DailyWindowCapability, DailyWindowSettings, JsonFileStore, JsonlSink, Ledger, LedgerStore,
    RequestManager, Router,
};
use drover_resilience::RetryPolicy;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Name the daily-window capability is registered under.
pub const XTWITTER: &str = "xtwitter";

/// Opens the configured ledger backend.
pub async fn open_store(config: &LedgerConfig) -> anyhow::Result<Arc<dyn LedgerStore>> {
    let store: Arc<dyn LedgerStore> = match config.backend {
        LedgerBackend::Json => Arc::new(JsonFileStore::new(&config.path)),
        LedgerBackend::Sqlite => Arc::new(
            drover_jobs::SqliteStore::connect(&config.sqlite_url)
                .await
                .with_context(|| format!("Failed to open ledger at {}", config.sqlite_url))?,
        ),
    };
    info!(store = %store.describe(), "Ledger store ready");
    Ok(store)
}

/// Builds the router with every known capability registered lazily.
pub fn build_router(config: &AppConfig, ledger: Arc<Ledger>) -> Arc<Router> {
    let router = Arc::new(Router::new(ledger));

    let xtwitter = config.capabilities.xtwitter.clone();
    router.register(XTWITTER, move || {
        let fetcher = HttpFetcher::new(&xtwitter)?;
        let sink = JsonlSink::new(&xtwitter.data_dir);
        Ok(Arc::new(DailyWindowCapability::new(
            XTWITTER,
            Arc::new(fetcher),
            Arc::new(sink),
            DailyWindowSettings::from_config(&xtwitter),
        )))
    });

    router
}

/// Opens the ledger and assembles a [`RequestManager`].
pub async fn build_manager(
    config: &AppConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<RequestManager> {
    let store = open_store(&config.ledger).await?;
    let ledger = Arc::new(Ledger::open(store).await.context("Failed to load ledger")?);
    let router = build_router(config, ledger.clone());
    let retry = RetryPolicy::from_config(config);

    Ok(RequestManager::new(ledger, router, retry, config.orchestrator.clone(), shutdown).await)
}
