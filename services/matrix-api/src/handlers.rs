use crate::error::AppError;
use crate::models::{
    HealthResponse, LatestMatricesResponse, OnDemandResponse, UniverseResponse,
};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use types::symbol::Symbol;

/// Most symbols accepted per request on the list-taking endpoints.
const MAX_REQUEST_SYMBOLS: usize = 100;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: matrix_engine::SERVICE_VERSION,
        metrics: state.metrics.export(),
    })
}

pub async fn universe(State(state): State<AppState>) -> Json<UniverseResponse> {
    let snapshot = state.registry.snapshot();
    Json(UniverseResponse {
        anchor: snapshot.anchor().clone(),
        coins: snapshot.coins().to_vec(),
    })
}

#[derive(Debug, Deserialize)]
pub struct LatestParams {
    /// Optional comma-separated coin ordering for the grids.
    pub coins: Option<String>,
}

pub async fn latest_matrices(
    State(state): State<AppState>,
    Query(params): Query<LatestParams>,
) -> Result<Json<LatestMatricesResponse>, AppError> {
    let coins = params.coins.as_deref().map(parse_symbol_list).transpose()?;
    let result = state.query.latest_matrices(coins).await;
    Ok(Json(result.into()))
}

#[derive(Debug, Deserialize)]
pub struct OnDemandParams {
    /// Comma-separated symbols to compute metrics for.
    pub symbols: String,
}

pub async fn on_demand_metrics(
    State(state): State<AppState>,
    Query(params): Query<OnDemandParams>,
) -> Result<Json<OnDemandResponse>, AppError> {
    let symbols = parse_symbol_list(&params.symbols)?;
    let metrics = state.query.on_demand_metrics(&symbols).await;
    Ok(Json(OnDemandResponse { symbols: metrics }))
}

fn parse_symbol_list(raw: &str) -> Result<Vec<Symbol>, AppError> {
    let mut out = Vec::new();
    for code in raw.split(',').filter(|s| !s.trim().is_empty()) {
        let symbol = Symbol::try_new(code)
            .map_err(|e| AppError::BadRequest(format!("invalid symbol {:?}: {}", code, e)))?;
        if !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    if out.is_empty() {
        return Err(AppError::BadRequest("no symbols supplied".to_string()));
    }
    if out.len() > MAX_REQUEST_SYMBOLS {
        return Err(AppError::BadRequest(format!(
            "too many symbols: {} (max {MAX_REQUEST_SYMBOLS})",
            out.len()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbol_list_normalizes_and_dedups() {
        let symbols = parse_symbol_list(" btc, ETH ,btc,").unwrap();
        assert_eq!(symbols, vec![Symbol::new("BTC"), Symbol::new("ETH")]);
    }

    #[test]
    fn test_parse_symbol_list_rejects_empty() {
        assert!(parse_symbol_list("  ,, ").is_err());
    }

    #[test]
    fn test_parse_symbol_list_rejects_bad_symbol() {
        assert!(parse_symbol_list("BTC,ET/H").is_err());
    }

    #[test]
    fn test_parse_symbol_list_caps_length() {
        let long = (0..=MAX_REQUEST_SYMBOLS)
            .map(|i| format!("C{i}"))
            .collect::<Vec<_>>()
            .join(",");
        assert!(parse_symbol_list(&long).is_err());
    }
}
