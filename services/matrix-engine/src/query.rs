//! Read-side assembly
//!
//! Builds the "latest matrices" view (current grid, previous grid,
//! annotations) per matrix type over a caller-supplied coin ordering,
//! fetching the availability mask through a TTL cache. Mask failure
//! means no mask, never a failed read.
//!
//! Also hosts the on-demand per-symbol path: a rolling raw-price
//! sampler whose metrics come from the same builder primitives as the
//! persisted matrices, so the two paths cannot drift. On-demand reads
//! bypass the snapshot store entirely.

use crate::annotate::{apply_mask, DiffAnnotator};
use crate::builder::{composite_ref, frame_change, pct_change};
use crate::clock::{Clock, TtlCache};
use crate::config::EngineConfig;
use crate::metrics::EngineMetrics;
use crate::store::SnapshotStore;
use crate::ticker::{self, MarketDataApi};
use crate::universe::CoinUniverseRegistry;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::warn;
use types::matrix::{AnnotationGrid, Grid, MatrixType};
use types::symbol::Symbol;
use types::time::{same_utc_day, DAY_MS};

/// A symbol's sample series is dropped wholesale once it sits idle this
/// long; the next request reseeds it from scratch.
const SERIES_IDLE_MS: i64 = DAY_MS;

/// One matrix type's read-time view.
#[derive(Debug)]
pub struct MatrixView {
    pub cur_ts: i64,
    pub prev_ts: Option<i64>,
    pub grid: Grid,
    pub prev_grid: Grid,
    pub annotations: AnnotationGrid,
}

/// The assembled latest/previous grids for every committed matrix type.
#[derive(Debug)]
pub struct LatestMatrices {
    /// The coin ordering every grid is keyed on.
    pub coins: Vec<Symbol>,
    /// Whether an availability mask was applied.
    pub masked: bool,
    /// Views per matrix type; types never committed are absent.
    pub views: BTreeMap<MatrixType, MatrixView>,
}

/// On-demand metrics for one symbol, straight from its price series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SymbolMetrics {
    pub price: f64,
    pub id_pct: f64,
    pub pct_ref: f64,
    pub pct_drv: f64,
    #[serde(rename = "ref")]
    pub ref_value: f64,
}

/// Cell-wise `value - reference` overlay against a caller-supplied
/// reference grid. Cells where either side is missing stay missing.
/// This is the only `delta` the engine knows; nothing is persisted.
pub fn delta_overlay(grid: &Grid, reference: &Grid) -> Grid {
    let mut out = Grid::filled(grid.coins().to_vec(), f64::NAN);
    let n = grid.n().min(reference.n());
    for row in 0..n {
        for col in 0..n {
            if row == col {
                continue;
            }
            let a = grid.get(row, col);
            let b = reference.get(row, col);
            if a.is_finite() && b.is_finite() {
                out.set(row, col, a - b);
            }
        }
    }
    out
}

type PriceSeries = VecDeque<(i64, f64)>;

/// Serves annotated matrix reads and the on-demand per-symbol path.
pub struct QueryService {
    store: Arc<SnapshotStore>,
    registry: Arc<CoinUniverseRegistry>,
    api: Arc<dyn MarketDataApi>,
    annotator: DiffAnnotator,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
    mask_cache: TtlCache<BTreeSet<String>>,
    /// Gate that spaces on-demand upstream fetches apart.
    preview_gate: TtlCache<()>,
    samples: Mutex<BTreeMap<Symbol, PriceSeries>>,
    series_cap: usize,
    fetch_concurrency: usize,
}

impl QueryService {
    pub fn new(
        config: &EngineConfig,
        store: Arc<SnapshotStore>,
        registry: Arc<CoinUniverseRegistry>,
        api: Arc<dyn MarketDataApi>,
        clock: Arc<dyn Clock>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            store,
            registry,
            api,
            annotator: DiffAnnotator::default(),
            clock,
            metrics,
            mask_cache: TtlCache::new(config.availability_ttl_ms),
            preview_gate: TtlCache::new(config.preview_ttl_ms),
            samples: Mutex::new(BTreeMap::new()),
            series_cap: config.preview_series_cap,
            fetch_concurrency: config.fetch_concurrency,
        }
    }

    /// Replay stored history into the freeze tracker after a restart.
    pub fn warm_start(&self) {
        let coins = self.registry.snapshot().coins().to_vec();
        self.annotator.warm_start(&self.store, &coins);
    }

    /// Assemble the latest and previous grid per matrix type, annotated.
    ///
    /// `coins` overrides the grid ordering; `None` uses the current
    /// universe order.
    pub async fn latest_matrices(&self, coins: Option<Vec<Symbol>>) -> LatestMatrices {
        let coins = coins.unwrap_or_else(|| self.registry.snapshot().coins().to_vec());
        let mask = self.availability_mask().await;

        let mut views = BTreeMap::new();
        for matrix_type in MatrixType::ALL {
            let Some(cur_ts) = self.store.latest(matrix_type) else {
                continue;
            };
            let prev_ts = self.store.before(matrix_type, cur_ts);
            let mut grid = self.store.grid_at(matrix_type, cur_ts, &coins);
            let mut prev_grid = match prev_ts {
                Some(ts) => self.store.grid_at(matrix_type, ts, &coins),
                None => Grid::filled(coins.clone(), matrix_type.sentinel()),
            };

            let annotations =
                self.annotator
                    .annotate(matrix_type, cur_ts, &grid, &prev_grid, mask.as_ref());
            apply_mask(&mut grid, mask.as_ref(), matrix_type.sentinel());
            apply_mask(&mut prev_grid, mask.as_ref(), matrix_type.sentinel());

            views.insert(
                matrix_type,
                MatrixView {
                    cur_ts,
                    prev_ts,
                    grid,
                    prev_grid,
                    annotations,
                },
            );
        }

        LatestMatrices {
            coins,
            masked: mask.is_some(),
            views,
        }
    }

    /// The tradable-symbol set, served from cache within its TTL.
    ///
    /// A failed fetch degrades to "no mask": every cell passes through.
    pub async fn availability_mask(&self) -> Option<BTreeSet<String>> {
        if let Some(mask) = self.mask_cache.get(self.clock.as_ref()) {
            return Some(mask);
        }
        match self.api.tradable_symbols().await {
            Ok(mask) => {
                self.mask_cache.put(self.clock.as_ref(), mask.clone());
                Some(mask)
            }
            Err(e) => {
                self.metrics.record_mask_fallback();
                warn!(error = %e, "availability fetch failed, serving unmasked");
                None
            }
        }
    }

    /// Per-symbol metrics for an ad hoc coin list, computed from the
    /// rolling raw price series and the shared derivation primitives.
    ///
    /// Symbols with no samples at all are absent; symbols with fewer
    /// than two samples report the 0.0 bootstrap.
    pub async fn on_demand_metrics(&self, symbols: &[Symbol]) -> BTreeMap<Symbol, SymbolMetrics> {
        self.sample(symbols).await;

        let samples = self.samples.lock();
        let mut out = BTreeMap::new();
        for symbol in symbols {
            if let Some(metrics) = samples.get(symbol).and_then(|s| series_metrics(s)) {
                out.insert(symbol.clone(), metrics);
            }
        }
        out
    }

    /// Fetch fresh prices for `symbols` unless the preview gate says the
    /// series was extended recently enough.
    async fn sample(&self, symbols: &[Symbol]) {
        if self.preview_gate.get(self.clock.as_ref()).is_some() {
            return;
        }

        let anchor = self.registry.snapshot().anchor().clone();
        let wanted: BTreeSet<String> = symbols
            .iter()
            .filter(|s| **s != anchor)
            .map(|s| format!("{}{}", s, anchor))
            .collect();
        let snapshot =
            ticker::fetch_snapshot(self.api.as_ref(), &wanted, self.fetch_concurrency, &self.metrics)
                .await;

        let now_ms = self.clock.now_ms();
        let mut samples = self.samples.lock();
        samples.retain(|_, series| {
            series
                .back()
                .is_some_and(|(ts, _)| now_ms - ts < SERIES_IDLE_MS)
        });
        for symbol in symbols {
            let price = if *symbol == anchor {
                Some(1.0)
            } else {
                snapshot.get(&format!("{}{}", symbol, anchor)).copied()
            };
            if let Some(price) = price {
                let series = samples.entry(symbol.clone()).or_default();
                series.push_back((now_ms, price));
                while series.len() > self.series_cap {
                    series.pop_front();
                }
            }
        }
        drop(samples);

        self.preview_gate.put(self.clock.as_ref(), ());
    }
}

/// Derive the metric set from one symbol's price series.
///
/// Mirrors the matrix recurrences one-dimensionally: `id_pct` is the
/// last sample over its predecessor, `pct_ref` is the last sample over
/// the earliest sample of the current UTC day, `pct_drv` needs two
/// consecutive `id_pct` values, `ref` composes them.
fn series_metrics(series: &PriceSeries) -> Option<SymbolMetrics> {
    let (last_ts, last) = *series.back()?;
    let n = series.len();

    let id_pct = if n >= 2 {
        pct_change(last, series[n - 2].1)
    } else {
        0.0
    };
    let pct_drv = if n >= 3 {
        frame_change(id_pct, pct_change(series[n - 2].1, series[n - 3].1))
    } else {
        0.0
    };
    let pct_ref = series
        .iter()
        .find(|(ts, _)| same_utc_day(*ts, last_ts))
        .map(|(_, opening)| {
            if n >= 2 {
                pct_change(last, *opening)
            } else {
                0.0
            }
        })
        .unwrap_or(0.0);

    Some(SymbolMetrics {
        price: last,
        id_pct,
        pct_ref,
        pct_drv,
        ref_value: composite_ref(id_pct, pct_ref),
    })
}
