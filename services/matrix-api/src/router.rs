use crate::handlers;
use crate::state::AppState;
use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/matrices/latest", get(handlers::latest_matrices))
        .route("/metrics/on-demand", get(handlers::on_demand_metrics))
        .route("/universe", get(handlers::universe));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/v1", api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
