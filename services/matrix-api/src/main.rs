mod error;
mod handlers;
mod models;
mod router;
mod state;

use matrix_engine::anchors::AnchorTracker;
use matrix_engine::clock::{Clock, SystemClock};
use matrix_engine::config::EngineConfig;
use matrix_engine::journal::JournalConfig;
use matrix_engine::metrics::EngineMetrics;
use matrix_engine::query::QueryService;
use matrix_engine::scheduler::TickScheduler;
use matrix_engine::store::SnapshotStore;
use matrix_engine::ticker::{MarketDataApi, TickerClient};
use matrix_engine::universe::CoinUniverseRegistry;
use router::create_router;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();

    tracing::info!("Starting matrix engine service");

    let config = EngineConfig::from_env();
    let metrics = Arc::new(EngineMetrics::new());

    // Recover the snapshot store from the journal before anything reads.
    let journal_config = JournalConfig {
        dir: config.journal_dir.clone(),
        max_file_size: config.journal_max_file_size,
    };
    let store = Arc::new(SnapshotStore::open(
        journal_config,
        config.retention_frames,
        Arc::clone(&metrics),
    )?);

    let registry = Arc::new(CoinUniverseRegistry::from_config(
        &config.quote_anchor,
        &config.coins,
    )?);
    let api: Arc<dyn MarketDataApi> = Arc::new(TickerClient::new(&config)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let anchors = Arc::new(AnchorTracker::new(Arc::clone(&store)));

    let query = Arc::new(QueryService::new(
        &config,
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&api),
        Arc::clone(&clock),
        Arc::clone(&metrics),
    ));
    query.warm_start();

    let scheduler = Arc::new(TickScheduler::new(
        &config,
        api,
        Arc::clone(&registry),
        Arc::clone(&store),
        anchors,
        clock,
        Arc::clone(&metrics),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    let app = create_router(AppState {
        query,
        registry,
        metrics,
    });

    let port: u16 = std::env::var("MATRIX_HTTP_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Stop the tick loop, then make the journal durable.
    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;
    store.sync()?;

    Ok(())
}
