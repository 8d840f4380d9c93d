//! Periodic tick driver
//!
//! Fires once per interval and runs fetch → resolve → build → commit.
//! Ticks are single-flight: an atomic in-flight guard skips (never
//! queues) a tick whose predecessor has not finished, so at most one
//! writer exists per matrix type. Fetch and resolution run under an
//! overall deadline; a tick that exceeds it is abandoned with nothing
//! committed, and the next scheduled tick proceeds independently.
//!
//! Every tick carries a UUIDv7 id in its log fields.

use crate::anchors::AnchorTracker;
use crate::builder::{self, PrevFrames};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::metrics::EngineMetrics;
use crate::resolver;
use crate::store::{SnapshotStore, StoreError};
use crate::ticker::{self, MarketDataApi};
use crate::universe::CoinUniverseRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use types::matrix::MatrixType;
use types::symbol::Symbol;
use uuid::Uuid;

/// Drives the per-tick pipeline on a fixed period.
pub struct TickScheduler {
    api: Arc<dyn MarketDataApi>,
    registry: Arc<CoinUniverseRegistry>,
    store: Arc<SnapshotStore>,
    anchors: Arc<AnchorTracker>,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
    bridge_priority: Vec<Symbol>,
    tick_interval: Duration,
    tick_deadline: Duration,
    fetch_concurrency: usize,
    in_flight: AtomicBool,
}

impl TickScheduler {
    pub fn new(
        config: &EngineConfig,
        api: Arc<dyn MarketDataApi>,
        registry: Arc<CoinUniverseRegistry>,
        store: Arc<SnapshotStore>,
        anchors: Arc<AnchorTracker>,
        clock: Arc<dyn Clock>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let bridge_priority = config
            .bridge_priority
            .iter()
            .filter_map(|code| match Symbol::try_new(code) {
                Ok(symbol) => Some(symbol),
                Err(e) => {
                    warn!(code = %code, error = %e, "invalid bridge symbol dropped");
                    None
                }
            })
            .collect();
        Self {
            api,
            registry,
            store,
            anchors,
            clock,
            metrics,
            bridge_priority,
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            tick_deadline: Duration::from_millis(config.tick_deadline_ms),
            fetch_concurrency: config.fetch_concurrency,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run the periodic loop until `shutdown` flips.
    ///
    /// The journal is synced before returning.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_ms = self.tick_interval.as_millis() as u64,
            deadline_ms = self.tick_deadline.as_millis() as u64,
            "tick scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.in_flight.swap(true, Ordering::AcqRel) {
                        self.metrics.record_tick_skipped();
                        warn!("previous tick still in flight, tick skipped");
                        continue;
                    }
                    let scheduler = Arc::clone(&self);
                    tokio::spawn(async move {
                        scheduler.tick_once().await;
                        scheduler.in_flight.store(false, Ordering::Release);
                    });
                }
                _ = shutdown.changed() => {
                    info!("tick scheduler shutting down");
                    if let Err(e) = self.store.sync() {
                        warn!(error = %e, "journal sync on shutdown failed");
                    }
                    return;
                }
            }
        }
    }

    /// Execute one tick end to end. Public so tests (and an on-demand
    /// trigger) can drive ticks without the interval loop.
    pub async fn tick_once(&self) {
        let tick_id = Uuid::now_v7();
        let universe = self.registry.snapshot();
        let symbols = resolver::candidate_symbols(&universe, &self.bridge_priority);

        let fetched = tokio::time::timeout(self.tick_deadline, async {
            let snapshot = ticker::fetch_snapshot(
                self.api.as_ref(),
                &symbols,
                self.fetch_concurrency,
                &self.metrics,
            )
            .await;
            resolver::resolve(&snapshot, &universe, &self.bridge_priority)
        })
        .await;

        let table = match fetched {
            Ok(table) => table,
            Err(_) => {
                self.metrics.record_tick_abandoned();
                warn!(
                    tick_id = %tick_id,
                    deadline_ms = self.tick_deadline.as_millis() as u64,
                    "tick deadline exceeded, abandoned"
                );
                return;
            }
        };

        // The anchor contributes nothing on its own; a tick that resolved
        // only the anchor writes nothing and the previous frames stay latest.
        let resolved = table.len().saturating_sub(1);
        if resolved == 0 {
            self.metrics.record_tick_empty();
            info!(tick_id = %tick_id, "zero resolvable coins, tick is a no-op");
            return;
        }

        let ts_ms = self.clock.now_ms();
        let coins = universe.coins().to_vec();

        // Anchors are read before this tick commits, so a frame never
        // becomes its own opening.
        let anchors = self.anchors.anchors_for(&coins, ts_ms);
        let prev_benchmark = self
            .store
            .latest(MatrixType::Benchmark)
            .and_then(|ts| self.store.frame(MatrixType::Benchmark, ts));
        let prev_id_pct = self
            .store
            .latest(MatrixType::IdPct)
            .and_then(|ts| self.store.frame(MatrixType::IdPct, ts));

        let frames = builder::build(
            &coins,
            &table,
            PrevFrames {
                benchmark: prev_benchmark.as_deref(),
                id_pct: prev_id_pct.as_deref(),
            },
            &anchors,
        );

        let store = Arc::clone(&self.store);
        let committed = tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            for (matrix_type, frame) in frames {
                store.commit(matrix_type, ts_ms, frame)?;
            }
            Ok(())
        })
        .await;

        match committed {
            Ok(Ok(())) => {
                self.metrics.record_tick_completed(resolved as u64);
                debug!(
                    tick_id = %tick_id,
                    ts_ms,
                    resolved,
                    coins = coins.len(),
                    "tick committed"
                );
            }
            Ok(Err(e)) => {
                warn!(tick_id = %tick_id, error = %e, "commit failed, tick discarded");
            }
            Err(e) => {
                warn!(tick_id = %tick_id, error = %e, "commit task failed, tick discarded");
            }
        }
    }
}
