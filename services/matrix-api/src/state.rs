use matrix_engine::metrics::EngineMetrics;
use matrix_engine::query::QueryService;
use matrix_engine::universe::CoinUniverseRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub query: Arc<QueryService>,
    pub registry: Arc<CoinUniverseRegistry>,
    pub metrics: Arc<EngineMetrics>,
}
