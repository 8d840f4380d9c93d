//! Read-time grid annotation
//!
//! Computes per-cell frozen-stage and sign-flip flags from two
//! consecutive grids, and applies the externally supplied availability
//! mask. Nothing here is persisted; annotations are recomputed on every
//! read.
//!
//! Frozen stages need more history than two grids carry, so the
//! annotator keeps a per-cell run-length tracker. It advances at most
//! once per distinct frame timestamp: re-reading the same frame pair
//! reuses the recorded runs instead of double-counting. `warm_start`
//! replays recent stored frames so stages survive a restart.

use crate::store::SnapshotStore;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use types::matrix::{AnnotationGrid, CellFlags, FlipKind, FrozenStage, Grid, MatrixType};
use types::symbol::{PairKey, Symbol};

/// Consecutive-repeat counts at which a cell escalates.
#[derive(Debug, Clone, Copy)]
pub struct FreezeThresholds {
    pub recent: u32,
    pub mid: u32,
    pub long: u32,
}

impl Default for FreezeThresholds {
    fn default() -> Self {
        Self {
            recent: 1,
            mid: 5,
            long: 15,
        }
    }
}

impl FreezeThresholds {
    /// Map a repeat run length to its stage.
    pub fn stage(&self, run: u32) -> FrozenStage {
        if run >= self.long {
            FrozenStage::Long
        } else if run >= self.mid {
            FrozenStage::Mid
        } else if run >= self.recent {
            FrozenStage::Recent
        } else {
            FrozenStage::None
        }
    }
}

/// Dual absolute/relative tolerance for sign-flip detection.
#[derive(Debug, Clone, Copy)]
pub struct FlipTolerance {
    pub abs_eps: f64,
    pub rel_eps: f64,
}

impl Default for FlipTolerance {
    fn default() -> Self {
        Self {
            abs_eps: 1e-3,
            rel_eps: 0.05,
        }
    }
}

/// Classify the transition from `prev` to `cur`.
///
/// A flip needs both magnitudes clear of `max(abs_eps, rel_eps * max)`
/// and strictly opposite signs; anything else is noise. A naive sign
/// comparison would flag jitter around zero.
pub fn classify_flip(cur: f64, prev: f64, tolerance: &FlipTolerance) -> FlipKind {
    if !cur.is_finite() || !prev.is_finite() {
        return FlipKind::None;
    }
    let tol = tolerance
        .abs_eps
        .max(tolerance.rel_eps * cur.abs().max(prev.abs()));
    if cur.abs() <= tol || prev.abs() <= tol {
        return FlipKind::None;
    }
    if prev > 0.0 && cur < 0.0 {
        FlipKind::PlusToMinus
    } else if prev < 0.0 && cur > 0.0 {
        FlipKind::MinusToPlus
    } else {
        FlipKind::None
    }
}

/// Suppress cells whose pair is absent from the availability mask, in
/// either orientation, by overwriting them with `sentinel`. A `None`
/// mask passes everything through.
pub fn apply_mask(grid: &mut Grid, mask: Option<&BTreeSet<String>>, sentinel: f64) {
    let Some(mask) = mask else {
        return;
    };
    let n = grid.n();
    for row in 0..n {
        for col in 0..n {
            if let Some(pair) = grid.pair_at(row, col) {
                if !pair.listed_in(mask) {
                    grid.set(row, col, sentinel);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CellRun {
    /// Consecutive frames the value has repeated (0 = changed this frame).
    run: u32,
    last_bits: u64,
    last_ts_ms: i64,
}

/// Stateful frozen/flip/mask annotator.
pub struct DiffAnnotator {
    thresholds: FreezeThresholds,
    tolerance: FlipTolerance,
    runs: Mutex<BTreeMap<(MatrixType, PairKey), CellRun>>,
}

impl DiffAnnotator {
    pub fn new(thresholds: FreezeThresholds, tolerance: FlipTolerance) -> Self {
        Self {
            thresholds,
            tolerance,
            runs: Mutex::new(BTreeMap::new()),
        }
    }

    /// Annotate `cur` against `prev` for the frame at `cur_ts_ms`.
    ///
    /// Both grids must share a coin ordering. Cells suppressed by the
    /// mask report `available = false` with empty flags; the grids
    /// themselves are not touched here (see [`apply_mask`]).
    pub fn annotate(
        &self,
        matrix_type: MatrixType,
        cur_ts_ms: i64,
        cur: &Grid,
        prev: &Grid,
        mask: Option<&BTreeSet<String>>,
    ) -> AnnotationGrid {
        self.advance(matrix_type, cur_ts_ms, cur);

        let runs = self.runs.lock();
        let mut out = AnnotationGrid::new(cur.coins().to_vec());
        let n = cur.n();
        for row in 0..n {
            for col in 0..n {
                let Some(pair) = cur.pair_at(row, col) else {
                    continue;
                };
                if let Some(mask) = mask {
                    if !pair.listed_in(mask) {
                        *out.get_mut(row, col) = CellFlags {
                            frozen: FrozenStage::None,
                            flip: FlipKind::None,
                            available: false,
                        };
                        continue;
                    }
                }

                let run = runs
                    .get(&(matrix_type, pair))
                    .map(|state| state.run)
                    .unwrap_or(0);
                *out.get_mut(row, col) = CellFlags {
                    frozen: self.thresholds.stage(run),
                    flip: classify_flip(cur.get(row, col), prev.get(row, col), &self.tolerance),
                    available: true,
                };
            }
        }
        out
    }

    /// Advance the run tracker with one frame, at most once per
    /// distinct `(matrix_type, ts_ms)`.
    fn advance(&self, matrix_type: MatrixType, ts_ms: i64, grid: &Grid) {
        let mut runs = self.runs.lock();
        let n = grid.n();
        for row in 0..n {
            for col in 0..n {
                let Some(pair) = grid.pair_at(row, col) else {
                    continue;
                };
                let bits = grid.get(row, col).to_bits();
                match runs.get_mut(&(matrix_type, pair.clone())) {
                    Some(state) => {
                        if ts_ms <= state.last_ts_ms {
                            continue; // re-read of an already-counted frame
                        }
                        state.run = if bits == state.last_bits {
                            state.run + 1
                        } else {
                            0
                        };
                        state.last_bits = bits;
                        state.last_ts_ms = ts_ms;
                    }
                    None => {
                        runs.insert(
                            (matrix_type, pair),
                            CellRun {
                                run: 0,
                                last_bits: bits,
                                last_ts_ms: ts_ms,
                            },
                        );
                    }
                }
            }
        }
    }

    /// Rebuild run lengths from stored history after a restart.
    ///
    /// Replays the most recent frames oldest-first; one frame beyond
    /// the long threshold is enough to reproduce every stage.
    pub fn warm_start(&self, store: &SnapshotStore, coins: &[Symbol]) {
        let depth = self.thresholds.long as usize + 1;
        for matrix_type in MatrixType::ALL {
            for ts_ms in store.recent_timestamps(matrix_type, depth) {
                let grid = store.grid_at(matrix_type, ts_ms, coins);
                self.advance(matrix_type, ts_ms, &grid);
            }
        }
    }
}

impl Default for DiffAnnotator {
    fn default() -> Self {
        Self::new(FreezeThresholds::default(), FlipTolerance::default())
    }
}
