//! Response DTOs
//!
//! The engine's grids carry NaN sentinels; JSON has no NaN, so cells
//! cross the boundary as `Option<f64>` (missing = `null`). Mapping
//! happens here and nowhere else.

use matrix_engine::query::{LatestMatrices, MatrixView, SymbolMetrics};
use serde::Serialize;
use std::collections::BTreeMap;
use types::matrix::{AnnotationGrid, CellFlags, Grid};
use types::symbol::Symbol;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub metrics: BTreeMap<String, u64>,
}

#[derive(Debug, Serialize)]
pub struct UniverseResponse {
    pub anchor: Symbol,
    pub coins: Vec<Symbol>,
}

#[derive(Debug, Serialize)]
pub struct MatrixViewDto {
    pub cur_ts: i64,
    pub prev_ts: Option<i64>,
    pub grid: Vec<Vec<Option<f64>>>,
    pub prev_grid: Vec<Vec<Option<f64>>>,
    pub annotations: Vec<Vec<CellFlags>>,
}

#[derive(Debug, Serialize)]
pub struct LatestMatricesResponse {
    pub coins: Vec<Symbol>,
    pub masked: bool,
    /// Keyed by matrix type label ("benchmark", "pct_ref", ...).
    pub matrices: BTreeMap<&'static str, MatrixViewDto>,
}

#[derive(Debug, Serialize)]
pub struct OnDemandResponse {
    pub symbols: BTreeMap<Symbol, SymbolMetrics>,
}

fn grid_rows(grid: &Grid) -> Vec<Vec<Option<f64>>> {
    grid.rows()
        .map(|row| {
            row.iter()
                .map(|v| if v.is_finite() { Some(*v) } else { None })
                .collect()
        })
        .collect()
}

fn annotation_rows(annotations: &AnnotationGrid) -> Vec<Vec<CellFlags>> {
    let n = annotations.n();
    (0..n)
        .map(|row| (0..n).map(|col| annotations.get(row, col)).collect())
        .collect()
}

impl From<&MatrixView> for MatrixViewDto {
    fn from(view: &MatrixView) -> Self {
        Self {
            cur_ts: view.cur_ts,
            prev_ts: view.prev_ts,
            grid: grid_rows(&view.grid),
            prev_grid: grid_rows(&view.prev_grid),
            annotations: annotation_rows(&view.annotations),
        }
    }
}

impl From<LatestMatrices> for LatestMatricesResponse {
    fn from(result: LatestMatrices) -> Self {
        Self {
            coins: result.coins,
            masked: result.masked,
            matrices: result
                .views
                .iter()
                .map(|(matrix_type, view)| (matrix_type.label(), MatrixViewDto::from(view)))
                .collect(),
        }
    }
}
