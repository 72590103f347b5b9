pub mod algorithms;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::config::Config;
pub use models::*;

use anyhow::Result;
use crate::config::StoreBackend;
use services::cache::{build_cache, RecommendationCache};
use services::store::{InMemoryStore, PgStore, RatingStore};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn RatingStore>,
    pub cache: Arc<dyn RecommendationCache>,
    pub recommendation_service: Arc<services::recommendation::RecommendationService>,
    pub reconciliation_service: Arc<services::reconciliation::ReconciliationService>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn RatingStore> = match config.store.backend {
            StoreBackend::Postgres => Arc::new(PgStore::connect(&config.postgres).await?),
            StoreBackend::Memory => Arc::new(InMemoryStore::new()),
        };
        Self::with_store(config, store).await
    }

    /// Wires the services around an already constructed store.
    pub async fn with_store(config: Config, store: Arc<dyn RatingStore>) -> Result<Self> {
        let config = Arc::new(config);
        let cache = build_cache(&config.cache, &config.redis).await?;

        let recommendation_service = Arc::new(services::recommendation::RecommendationService::new(
            store.clone(),
            cache.clone(),
            config.clone(),
        ));

        let reconciliation_service = Arc::new(services::reconciliation::ReconciliationService::new(
            store.clone(),
            cache.clone(),
            config.clone(),
        ));

        info!(
            "Application state ready (store: {:?}, strategy: {})",
            config.store.backend, config.recommendation.strategy
        );

        Ok(Self {
            config,
            store,
            cache,
            recommendation_service,
            reconciliation_service,
        })
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
