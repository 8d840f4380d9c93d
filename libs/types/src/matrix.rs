//! Matrix taxonomy, frames, grids, and cell annotations
//!
//! A *frame* is the committed value set of one matrix type at one
//! timestamp, keyed by ordered pair. A *grid* is the NxN projection of a
//! frame over a caller-supplied coin ordering, with missing cells filled
//! by the matrix type's sentinel.
//!
//! Sentinel policy is part of the contract: `benchmark` is a ratio where
//! an unknown value must never look like a real number (NaN), while the
//! percentage matrices treat a missing baseline as "no observed change
//! yet" (0.0) so they stay arithmetic-safe downstream.

use crate::symbol::{PairKey, Symbol};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The committed cell values of one (matrix type, timestamp).
pub type MatrixFrame = BTreeMap<PairKey, f64>;

// ── Matrix Taxonomy ─────────────────────────────────────────────────

/// The five persisted matrix types.
///
/// `delta` is intentionally absent: it is a read-time overlay against a
/// caller-supplied reference grid and is never derived or stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixType {
    /// Cross rate `price[base] / price[quote]`.
    Benchmark,
    /// Change of benchmark vs the UTC-day opening anchor.
    PctRef,
    /// Frame-over-frame change of benchmark.
    IdPct,
    /// Change of id_pct between consecutive frames.
    PctDrv,
    /// Composite `(1 + id_pct) * pct_ref`.
    Ref,
}

impl MatrixType {
    /// All persisted matrix types, in derivation order.
    pub const ALL: [MatrixType; 5] = [
        MatrixType::Benchmark,
        MatrixType::PctRef,
        MatrixType::IdPct,
        MatrixType::PctDrv,
        MatrixType::Ref,
    ];

    /// Stable string label (journal entry tag, API key, log field).
    pub fn label(&self) -> &'static str {
        match self {
            MatrixType::Benchmark => "benchmark",
            MatrixType::PctRef => "pct_ref",
            MatrixType::IdPct => "id_pct",
            MatrixType::PctDrv => "pct_drv",
            MatrixType::Ref => "ref",
        }
    }

    /// Parse a stable label back into a matrix type.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.label() == label)
    }

    /// The fill value for cells that have no committed value.
    ///
    /// NaN for the ratio matrix, 0.0 (bootstrap) for the percentage
    /// matrices, which must never surface NaN.
    pub fn sentinel(&self) -> f64 {
        match self {
            MatrixType::Benchmark => f64::NAN,
            _ => 0.0,
        }
    }

    /// Whether this type holds raw ratios rather than percentages.
    pub fn is_ratio(&self) -> bool {
        matches!(self, MatrixType::Benchmark)
    }
}

impl fmt::Display for MatrixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ── Grid ────────────────────────────────────────────────────────────

/// NxN row-major projection of a frame over an explicit coin ordering.
///
/// The diagonal is always the sentinel ("not applicable"). Values may be
/// NaN for the ratio matrix, so `Grid` deliberately does not implement
/// `Serialize`; the API layer maps cells to `Option<f64>` at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    coins: Vec<Symbol>,
    values: Vec<f64>,
}

impl Grid {
    /// Create a grid with every cell set to `fill`.
    pub fn filled(coins: Vec<Symbol>, fill: f64) -> Self {
        let n = coins.len();
        Self {
            coins,
            values: vec![fill; n * n],
        }
    }

    /// Project a frame over `coins`, filling absent cells (and the
    /// diagonal) with `sentinel`.
    pub fn from_frame(coins: Vec<Symbol>, frame: &MatrixFrame, sentinel: f64) -> Self {
        let mut grid = Self::filled(coins, sentinel);
        let n = grid.n();
        for row in 0..n {
            for col in 0..n {
                if row == col {
                    continue;
                }
                let pair = PairKey {
                    base: grid.coins[row].clone(),
                    quote: grid.coins[col].clone(),
                };
                if let Some(v) = frame.get(&pair) {
                    grid.values[row * n + col] = *v;
                }
            }
        }
        grid
    }

    /// Number of coins (the grid is n x n).
    pub fn n(&self) -> usize {
        self.coins.len()
    }

    /// The coin ordering this grid is keyed on.
    pub fn coins(&self) -> &[Symbol] {
        &self.coins
    }

    /// Cell value at (row, col).
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.n() + col]
    }

    /// Set cell value at (row, col).
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        let n = self.n();
        self.values[row * n + col] = value;
    }

    /// The pair addressed by (row, col), or None on the diagonal.
    pub fn pair_at(&self, row: usize, col: usize) -> Option<PairKey> {
        if row == col {
            return None;
        }
        Some(PairKey {
            base: self.coins[row].clone(),
            quote: self.coins[col].clone(),
        })
    }

    /// Iterate rows as slices.
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.values.chunks(self.n().max(1))
    }
}

// ── Cell Annotations ────────────────────────────────────────────────

/// How long a cell value has been unchanged across consecutive frames.
///
/// Ordered by severity, so escalation can be asserted with `>=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrozenStage {
    #[default]
    None,
    Recent,
    Mid,
    Long,
}

/// Sign transition between the previous and current frame, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlipKind {
    #[default]
    None,
    PlusToMinus,
    MinusToPlus,
}

/// Read-time flags for one grid cell. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellFlags {
    pub frozen: FrozenStage,
    pub flip: FlipKind,
    /// False when the availability mask suppresses this pair.
    pub available: bool,
}

impl Default for CellFlags {
    fn default() -> Self {
        Self {
            frozen: FrozenStage::None,
            flip: FlipKind::None,
            available: true,
        }
    }
}

/// NxN annotation layer parallel to a `Grid`, same coin ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationGrid {
    coins: Vec<Symbol>,
    cells: Vec<CellFlags>,
}

impl AnnotationGrid {
    /// Create an all-default annotation layer over `coins`.
    pub fn new(coins: Vec<Symbol>) -> Self {
        let n = coins.len();
        Self {
            coins,
            cells: vec![CellFlags::default(); n * n],
        }
    }

    pub fn n(&self) -> usize {
        self.coins.len()
    }

    pub fn coins(&self) -> &[Symbol] {
        &self.coins
    }

    pub fn get(&self, row: usize, col: usize) -> CellFlags {
        self.cells[row * self.n() + col]
    }

    pub fn get_mut(&mut self, row: usize, col: usize) -> &mut CellFlags {
        let n = self.n();
        &mut self.cells[row * n + col]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s)
    }

    #[test]
    fn test_matrix_type_labels_round_trip() {
        for t in MatrixType::ALL {
            assert_eq!(MatrixType::from_label(t.label()), Some(t));
        }
        assert_eq!(MatrixType::from_label("delta"), None);
    }

    #[test]
    fn test_sentinel_policy() {
        assert!(MatrixType::Benchmark.sentinel().is_nan());
        for t in [
            MatrixType::PctRef,
            MatrixType::IdPct,
            MatrixType::PctDrv,
            MatrixType::Ref,
        ] {
            assert_eq!(t.sentinel(), 0.0);
        }
    }

    #[test]
    fn test_matrix_type_serde_labels() {
        let json = serde_json::to_string(&MatrixType::PctDrv).unwrap();
        assert_eq!(json, "\"pct_drv\"");
        let back: MatrixType = serde_json::from_str("\"benchmark\"").unwrap();
        assert_eq!(back, MatrixType::Benchmark);
    }

    #[test]
    fn test_grid_projection_fills_missing_with_sentinel() {
        let coins = vec![sym("BTC"), sym("ETH"), sym("SOL")];
        let mut frame = MatrixFrame::new();
        frame.insert(PairKey::new(sym("BTC"), sym("ETH")), 20.0);

        let grid = Grid::from_frame(coins, &frame, f64::NAN);
        assert_eq!(grid.get(0, 1), 20.0);
        assert!(grid.get(1, 0).is_nan());
        assert!(grid.get(0, 2).is_nan());
    }

    #[test]
    fn test_grid_diagonal_is_sentinel() {
        let coins = vec![sym("BTC"), sym("ETH")];
        let mut frame = MatrixFrame::new();
        // A degenerate diagonal entry must never leak into the projection.
        frame.insert(PairKey::new(sym("BTC"), sym("ETH")), 1.5);

        let grid = Grid::from_frame(coins, &frame, 0.0);
        assert_eq!(grid.get(0, 0), 0.0);
        assert_eq!(grid.get(1, 1), 0.0);
        assert_eq!(grid.get(0, 1), 1.5);
    }

    #[test]
    fn test_grid_pair_at() {
        let coins = vec![sym("BTC"), sym("ETH")];
        let grid = Grid::filled(coins, 0.0);
        assert_eq!(grid.pair_at(0, 0), None);
        let pair = grid.pair_at(0, 1).unwrap();
        assert_eq!(pair.to_string(), "BTC/ETH");
    }

    #[test]
    fn test_grid_rows_iteration() {
        let coins = vec![sym("BTC"), sym("ETH")];
        let mut grid = Grid::filled(coins, 0.0);
        grid.set(0, 1, 2.0);
        grid.set(1, 0, 0.5);

        let rows: Vec<&[f64]> = grid.rows().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], &[0.0, 2.0]);
        assert_eq!(rows[1], &[0.5, 0.0]);
    }

    #[test]
    fn test_cell_flags_default_is_clean() {
        let flags = CellFlags::default();
        assert_eq!(flags.frozen, FrozenStage::None);
        assert_eq!(flags.flip, FlipKind::None);
        assert!(flags.available);
    }

    #[test]
    fn test_annotation_grid_addressing() {
        let coins = vec![sym("BTC"), sym("ETH")];
        let mut ann = AnnotationGrid::new(coins);
        ann.get_mut(0, 1).frozen = FrozenStage::Long;
        assert_eq!(ann.get(0, 1).frozen, FrozenStage::Long);
        assert_eq!(ann.get(1, 0).frozen, FrozenStage::None);
    }
}
