//! End-to-end engine flow: tick pipeline → journal-backed store →
//! annotated reads, driven by an in-memory upstream fake and a manual
//! clock. No network, no wall-clock sleeps.

use async_trait::async_trait;
use matrix_engine::anchors::AnchorTracker;
use matrix_engine::builder::pct_change;
use matrix_engine::clock::{Clock, ManualClock};
use matrix_engine::config::EngineConfig;
use matrix_engine::journal::JournalConfig;
use matrix_engine::metrics::EngineMetrics;
use matrix_engine::query::QueryService;
use matrix_engine::scheduler::TickScheduler;
use matrix_engine::store::SnapshotStore;
use matrix_engine::ticker::{MarketDataApi, TickerEntry, TickerError};
use matrix_engine::universe::{CoinUniverse, CoinUniverseRegistry};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tempfile::TempDir;
use types::matrix::{FrozenStage, MatrixType};
use types::symbol::{PairKey, Symbol};
use types::time::DAY_MS;

struct FakeExchange {
    prices: RwLock<BTreeMap<String, f64>>,
    tradable: RwLock<BTreeSet<String>>,
}

impl FakeExchange {
    fn new(pairs: &[(&str, f64)]) -> Self {
        Self {
            prices: RwLock::new(pairs.iter().map(|(s, p)| (s.to_string(), *p)).collect()),
            tradable: RwLock::new(pairs.iter().map(|(s, _)| s.to_string()).collect()),
        }
    }

    fn set(&self, symbol: &str, price: f64) {
        self.prices.write().insert(symbol.to_string(), price);
    }

    fn remove(&self, symbol: &str) {
        self.prices.write().remove(symbol);
    }
}

#[async_trait]
impl MarketDataApi for FakeExchange {
    async fn ticker(&self, symbol: &str) -> Result<Option<TickerEntry>, TickerError> {
        Ok(self.prices.read().get(symbol).map(|p| TickerEntry {
            symbol: symbol.to_string(),
            last: Some(*p),
            bid: None,
            ask: None,
        }))
    }

    async fn tradable_symbols(&self) -> Result<BTreeSet<String>, TickerError> {
        Ok(self.tradable.read().clone())
    }
}

fn sym(s: &str) -> Symbol {
    Symbol::new(s)
}

fn pair(base: &str, quote: &str) -> PairKey {
    PairKey::new(sym(base), sym(quote))
}

struct Harness {
    _tmp: TempDir,
    exchange: Arc<FakeExchange>,
    store: Arc<SnapshotStore>,
    scheduler: TickScheduler,
    query: QueryService,
    clock: Arc<ManualClock>,
    metrics: Arc<EngineMetrics>,
}

fn harness(exchange: FakeExchange, coins: &[&str], bridges: &[&str]) -> Harness {
    let tmp = TempDir::new().unwrap();
    let config = EngineConfig {
        coins: coins.iter().map(|c| c.to_string()).collect(),
        bridge_priority: bridges.iter().map(|c| c.to_string()).collect(),
        journal_dir: tmp.path().to_path_buf(),
        ..EngineConfig::default()
    };
    let exchange = Arc::new(exchange);
    let metrics = Arc::new(EngineMetrics::new());
    let store = Arc::new(
        SnapshotStore::open(
            JournalConfig::new(tmp.path()),
            config.retention_frames,
            Arc::clone(&metrics),
        )
        .unwrap(),
    );
    let registry = Arc::new(CoinUniverseRegistry::new(CoinUniverse::new(
        sym("USDT"),
        coins.iter().map(|c| sym(c)).collect(),
    )));
    let clock = Arc::new(ManualClock::new(100 * DAY_MS));
    let anchors = Arc::new(AnchorTracker::new(Arc::clone(&store)));
    let scheduler = TickScheduler::new(
        &config,
        Arc::clone(&exchange) as Arc<dyn MarketDataApi>,
        Arc::clone(&registry),
        Arc::clone(&store),
        anchors,
        clock.clone() as Arc<dyn Clock>,
        Arc::clone(&metrics),
    );
    let query = QueryService::new(
        &config,
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&exchange) as Arc<dyn MarketDataApi>,
        clock.clone() as Arc<dyn Clock>,
        Arc::clone(&metrics),
    );
    Harness {
        _tmp: tmp,
        exchange,
        store,
        scheduler,
        query,
        clock,
        metrics,
    }
}

#[tokio::test]
async fn first_tick_obeys_bootstrap_law() {
    let hx = harness(
        FakeExchange::new(&[("BTCUSDT", 65_000.0), ("ETHUSDT", 3_200.0)]),
        &["BTC", "ETH"],
        &["BTC"],
    );
    hx.scheduler.tick_once().await;

    let ts = hx.store.latest(MatrixType::Benchmark).unwrap();
    let benchmark = hx.store.frame(MatrixType::Benchmark, ts).unwrap();
    assert_eq!(benchmark.get(&pair("BTC", "ETH")), Some(&20.3125));

    for matrix_type in [
        MatrixType::PctRef,
        MatrixType::IdPct,
        MatrixType::PctDrv,
        MatrixType::Ref,
    ] {
        let frame = hx.store.frame(matrix_type, ts).unwrap();
        assert!(
            frame.values().all(|v| *v == 0.0),
            "{matrix_type} must bootstrap to 0.0 on the first tick"
        );
    }
}

#[tokio::test]
async fn recurrence_consistency_across_stored_frames() {
    let hx = harness(
        FakeExchange::new(&[("BTCUSDT", 64_000.0), ("ETHUSDT", 3_200.0)]),
        &["BTC", "ETH"],
        &["BTC"],
    );

    hx.scheduler.tick_once().await;
    hx.clock.advance(15_000);
    hx.exchange.set("BTCUSDT", 65_600.0);
    hx.scheduler.tick_once().await;
    hx.clock.advance(15_000);
    hx.exchange.set("BTCUSDT", 64_900.0);
    hx.scheduler.tick_once().await;

    // Recomputing id_pct from two independently stored benchmark frames
    // reproduces the committed id_pct, tick over tick.
    let t2 = hx.store.latest(MatrixType::Benchmark).unwrap();
    let t1 = hx.store.before(MatrixType::Benchmark, t2).unwrap();
    let t0 = hx.store.before(MatrixType::Benchmark, t1).unwrap();

    let key = pair("BTC", "ETH");
    for (prev_ts, cur_ts) in [(t0, t1), (t1, t2)] {
        let prev = *hx
            .store
            .frame(MatrixType::Benchmark, prev_ts)
            .unwrap()
            .get(&key)
            .unwrap();
        let cur = *hx
            .store
            .frame(MatrixType::Benchmark, cur_ts)
            .unwrap()
            .get(&key)
            .unwrap();
        let stored = *hx
            .store
            .frame(MatrixType::IdPct, cur_ts)
            .unwrap()
            .get(&key)
            .unwrap();
        assert!((pct_change(cur, prev) - stored).abs() < 1e-12);
    }

    // pct_drv is exactly the difference of the two stored id_pct values.
    let id1 = *hx.store.frame(MatrixType::IdPct, t1).unwrap().get(&key).unwrap();
    let id2 = *hx.store.frame(MatrixType::IdPct, t2).unwrap().get(&key).unwrap();
    let drv = *hx.store.frame(MatrixType::PctDrv, t2).unwrap().get(&key).unwrap();
    assert!((drv - (id2 - id1)).abs() < 1e-12);
}

#[tokio::test]
async fn bridge_outage_only_drops_dependent_pairs() {
    // SOL is only quoted against BTC; ETH has a direct quote.
    let hx = harness(
        FakeExchange::new(&[
            ("BTCUSDT", 65_000.0),
            ("ETHUSDT", 3_200.0),
            ("SOLBTC", 0.0025),
        ]),
        &["BTC", "ETH", "SOL"],
        &["BTC"],
    );
    hx.scheduler.tick_once().await;

    // Take the BTC quote down entirely.
    hx.exchange.remove("BTCUSDT");
    hx.clock.advance(15_000);
    hx.scheduler.tick_once().await;

    let ts = hx.store.latest(MatrixType::Benchmark).unwrap();
    let benchmark = hx.store.frame(MatrixType::Benchmark, ts).unwrap();
    // ETH/USDT is untouched by the outage; SOL and BTC cells are gone.
    assert_eq!(benchmark.get(&pair("ETH", "USDT")), Some(&3_200.0));
    assert!(benchmark.get(&pair("BTC", "USDT")).is_none());
    assert!(benchmark.get(&pair("SOL", "USDT")).is_none());
    assert!(benchmark.get(&pair("SOL", "ETH")).is_none());
}

#[tokio::test]
async fn annotated_read_reports_flips_and_mask() {
    let hx = harness(
        FakeExchange::new(&[("BTCUSDT", 64_000.0), ("ETHUSDT", 3_200.0)]),
        &["BTC", "ETH"],
        &["BTC"],
    );

    hx.scheduler.tick_once().await;
    hx.clock.advance(15_000);
    hx.exchange.set("BTCUSDT", 66_000.0);
    hx.scheduler.tick_once().await;
    hx.clock.advance(15_000);
    hx.exchange.set("BTCUSDT", 63_000.0);
    hx.scheduler.tick_once().await;

    let result = hx.query.latest_matrices(None).await;
    assert!(result.masked);

    // id_pct went from clearly positive to clearly negative for BTC/USDT.
    let view = &result.views[&MatrixType::IdPct];
    let coins = &result.coins;
    let row = coins.iter().position(|c| c == &sym("BTC")).unwrap();
    let col = coins.iter().position(|c| c == &sym("USDT")).unwrap();
    assert_eq!(
        view.annotations.get(row, col).flip,
        types::matrix::FlipKind::PlusToMinus
    );

    // BTC/ETH is not in the tradable set (only *USDT pairs are), so the
    // benchmark cell renders missing despite being stored.
    let bench = &result.views[&MatrixType::Benchmark];
    let eth = coins.iter().position(|c| c == &sym("ETH")).unwrap();
    assert!(bench.grid.get(row, eth).is_nan());
    assert!(!bench.annotations.get(row, eth).available);
    let stored = hx
        .store
        .frame(MatrixType::Benchmark, bench.cur_ts)
        .unwrap();
    assert!(stored.get(&pair("BTC", "ETH")).is_some());
}

#[tokio::test]
async fn restart_recovers_frames_and_frozen_stages() {
    let tmp;
    let clock_now;
    {
        let hx = harness(
            FakeExchange::new(&[("BTCUSDT", 65_000.0), ("ETHUSDT", 3_200.0)]),
            &["BTC", "ETH"],
            &["BTC"],
        );
        // Six identical ticks: BTC/ETH freezes into the Mid stage.
        for _ in 0..6 {
            hx.scheduler.tick_once().await;
            hx.clock.advance(15_000);
        }
        hx.store.sync().unwrap();
        clock_now = hx.clock.now_ms();
        tmp = hx._tmp;
    }

    // Reopen from the same journal directory, as a restart would.
    let config = EngineConfig {
        journal_dir: tmp.path().to_path_buf(),
        ..EngineConfig::default()
    };
    let metrics = Arc::new(EngineMetrics::new());
    let store = Arc::new(
        SnapshotStore::open(
            JournalConfig::new(tmp.path()),
            config.retention_frames,
            Arc::clone(&metrics),
        )
        .unwrap(),
    );
    assert!(store.latest(MatrixType::Benchmark).is_some());

    let registry = Arc::new(CoinUniverseRegistry::new(CoinUniverse::new(
        sym("USDT"),
        vec![sym("BTC"), sym("ETH")],
    )));
    let exchange = Arc::new(FakeExchange::new(&[("BTCUSDT", 65_000.0)]));
    let clock = Arc::new(ManualClock::new(clock_now));
    let query = QueryService::new(
        &config,
        Arc::clone(&store),
        registry,
        exchange as Arc<dyn MarketDataApi>,
        clock as Arc<dyn Clock>,
        metrics,
    );
    query.warm_start();

    let result = query.latest_matrices(None).await;
    let view = &result.views[&MatrixType::Benchmark];
    let coins = &result.coins;
    let row = coins.iter().position(|c| c == &sym("BTC")).unwrap();
    let col = coins.iter().position(|c| c == &sym("USDT")).unwrap();
    // Five repeats of the same value survive the restart as Mid.
    assert_eq!(view.annotations.get(row, col).frozen, FrozenStage::Mid);
}

#[tokio::test]
async fn empty_universe_tick_is_a_no_op() {
    let hx = harness(FakeExchange::new(&[]), &["BTC", "ETH"], &["BTC"]);
    hx.scheduler.tick_once().await;

    assert_eq!(hx.store.latest(MatrixType::Benchmark), None);
    let exported = hx.metrics.export();
    assert_eq!(exported["ticks_empty"], 1);
    assert_eq!(exported["frames_committed"], 0);

    // A read before any commit serves an empty view, not an error.
    let result = hx.query.latest_matrices(None).await;
    assert!(result.views.is_empty());
}

#[tokio::test]
async fn pct_ref_tracks_the_day_anchor_not_the_previous_tick() {
    let hx = harness(
        FakeExchange::new(&[("BTCUSDT", 64_000.0), ("ETHUSDT", 3_200.0)]),
        &["BTC", "ETH"],
        &["BTC"],
    );

    // Anchor tick, then two moves within the same day.
    hx.scheduler.tick_once().await;
    hx.clock.advance(15_000);
    hx.exchange.set("BTCUSDT", 65_600.0);
    hx.scheduler.tick_once().await;
    hx.clock.advance(15_000);
    hx.exchange.set("BTCUSDT", 67_200.0);
    hx.scheduler.tick_once().await;

    let ts = hx.store.latest(MatrixType::PctRef).unwrap();
    let key = pair("BTC", "USDT");
    let pct_ref = *hx.store.frame(MatrixType::PctRef, ts).unwrap().get(&key).unwrap();
    // 67_200 vs the day's opening 64_000: +5%, not the +2.44% tick move.
    assert!((pct_ref - 0.05).abs() < 1e-12);
}
