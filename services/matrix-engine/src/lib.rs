//! Cross-Asset Matrix Engine
//!
//! Turns a live ticker feed into a consistent set of NxN cross-rate
//! matrices and serves annotated reads over them:
//! - Per-asset USD price resolution (direct and bridged multi-hop)
//! - Benchmark cross rates plus four derived percentage matrices
//! - Append-only, idempotent, time-keyed snapshot persistence
//! - Read-time frozen-stage / sign-flip / availability annotations
//! - On-demand per-symbol metrics for ad hoc coin lists
//!
//! # Architecture
//!
//! ```text
//!  TickScheduler (periodic, single-flight, deadlined)
//!        │
//!    ┌───▼────────┐
//!    │TickerClient│  ← bounded fan-out, retry, typed ingestion
//!    └───┬────────┘
//!        │ raw pair prices
//!    ┌───▼─────────┐
//!    │PriceResolver│  ← direct, then first-match bridge triangulation
//!    └───┬─────────┘
//!        │ price table
//!    ┌───▼─────────┐     ┌─────────────┐
//!    │MatrixBuilder│ ◄── │AnchorTracker│ (UTC-day openings)
//!    └───┬─────────┘     └─────────────┘
//!        │ frames (benchmark, pct_ref, id_pct, pct_drv, ref)
//!    ┌───▼─────────┐
//!    │SnapshotStore│  ← checksummed journal + in-memory time index
//!    └───┬─────────┘
//!        │
//!    ┌───▼────────┐     ┌─────────────┐
//!    │QueryService│ ◄── │DiffAnnotator│ (frozen / flip / mask)
//!    └────────────┘     └─────────────┘
//! ```

pub mod anchors;
pub mod annotate;
pub mod builder;
pub mod clock;
pub mod config;
pub mod journal;
pub mod metrics;
pub mod query;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod ticker;
pub mod universe;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
