//! Engine configuration
//!
//! All tunables live here with conservative defaults; each can be
//! overridden through a `MATRIX_*` environment variable. Out-of-range
//! overrides are clamped rather than rejected so a bad value degrades
//! to a safe one instead of refusing to start.

use std::path::PathBuf;
use tracing::warn;
use types::time::DAY_MS;

const DEFAULT_UPSTREAM_URL: &str = "https://api.binance.com";
const DEFAULT_QUOTE_ANCHOR: &str = "USDT";
const DEFAULT_COINS: &str = "BTC,ETH,BNB,SOL,XRP,ADA,DOGE,DOT,LINK,LTC";
const DEFAULT_BRIDGES: &str = "BTC,ETH,BNB";

const DEFAULT_TICK_INTERVAL_MS: u64 = 15_000;
const DEFAULT_TICK_DEADLINE_MS: u64 = 10_000;
const DEFAULT_FETCH_CONCURRENCY: u64 = 8;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2_500;
const DEFAULT_MAX_RETRIES: u64 = 3;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 100;
const DEFAULT_JOURNAL_MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;
// One full UTC day at the default 15s tick, so day-scoped reads (opening
// anchors) never outrun the in-memory index under default settings.
const DEFAULT_RETENTION_FRAMES: u64 = 5_760;
const DEFAULT_AVAILABILITY_TTL_MS: u64 = 30_000;
const DEFAULT_PREVIEW_TTL_MS: u64 = 5_000;
const DEFAULT_PREVIEW_SERIES_CAP: u64 = 64;

/// Configuration for the matrix engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the upstream exchange REST API.
    pub upstream_base_url: String,
    /// Quote anchor every price is denominated in.
    pub quote_anchor: String,
    /// Initial coin universe (the anchor is added if absent).
    pub coins: Vec<String>,
    /// Bridge assets tried in order when no direct quote exists.
    pub bridge_priority: Vec<String>,
    /// Tick period in milliseconds.
    pub tick_interval_ms: u64,
    /// Deadline for one tick's fetch + compute phase.
    pub tick_deadline_ms: u64,
    /// Maximum concurrent upstream requests during fan-out.
    pub fetch_concurrency: usize,
    /// Per-request timeout for upstream calls.
    pub request_timeout_ms: u64,
    /// Retry attempts for transient upstream failures.
    pub max_retries: u32,
    /// First retry backoff; doubles per attempt.
    pub initial_backoff_ms: u64,
    /// Directory holding the snapshot journal files.
    pub journal_dir: PathBuf,
    /// Journal file size before rotation.
    pub journal_max_file_size: u64,
    /// In-memory frames kept per matrix type (oldest evicted first).
    pub retention_frames: usize,
    /// How long a fetched availability mask stays fresh.
    pub availability_ttl_ms: i64,
    /// How long an on-demand ticker sample stays fresh.
    pub preview_ttl_ms: i64,
    /// Samples kept per symbol in the on-demand price series.
    pub preview_series_cap: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            upstream_base_url: DEFAULT_UPSTREAM_URL.to_string(),
            quote_anchor: DEFAULT_QUOTE_ANCHOR.to_string(),
            coins: split_list(DEFAULT_COINS),
            bridge_priority: split_list(DEFAULT_BRIDGES),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            tick_deadline_ms: DEFAULT_TICK_DEADLINE_MS,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY as usize,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES as u32,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            journal_dir: PathBuf::from("./data/matrix-journal"),
            journal_max_file_size: DEFAULT_JOURNAL_MAX_FILE_SIZE,
            retention_frames: DEFAULT_RETENTION_FRAMES as usize,
            availability_ttl_ms: DEFAULT_AVAILABILITY_TTL_MS as i64,
            preview_ttl_ms: DEFAULT_PREVIEW_TTL_MS as i64,
            preview_series_cap: DEFAULT_PREVIEW_SERIES_CAP as usize,
        }
    }
}

impl EngineConfig {
    /// Build a config from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let tick_interval_ms = env_u64(
            "MATRIX_TICK_INTERVAL_MS",
            DEFAULT_TICK_INTERVAL_MS,
            1_000,
            3_600_000,
        );
        let retention_frames = day_retention_floor(
            env_u64("MATRIX_RETENTION_FRAMES", DEFAULT_RETENTION_FRAMES, 2, 1_000_000) as usize,
            tick_interval_ms,
        );
        Self {
            upstream_base_url: env_string("MATRIX_UPSTREAM_URL", &defaults.upstream_base_url),
            quote_anchor: env_string("MATRIX_QUOTE_ANCHOR", &defaults.quote_anchor),
            coins: env_list("MATRIX_COINS", &defaults.coins),
            bridge_priority: env_list("MATRIX_BRIDGES", &defaults.bridge_priority),
            tick_interval_ms,
            tick_deadline_ms: env_u64(
                "MATRIX_TICK_DEADLINE_MS",
                DEFAULT_TICK_DEADLINE_MS,
                500,
                600_000,
            ),
            fetch_concurrency: env_u64("MATRIX_FETCH_CONCURRENCY", DEFAULT_FETCH_CONCURRENCY, 1, 64)
                as usize,
            request_timeout_ms: env_u64(
                "MATRIX_REQUEST_TIMEOUT_MS",
                DEFAULT_REQUEST_TIMEOUT_MS,
                100,
                60_000,
            ),
            max_retries: env_u64("MATRIX_MAX_RETRIES", DEFAULT_MAX_RETRIES, 0, 10) as u32,
            initial_backoff_ms: env_u64(
                "MATRIX_INITIAL_BACKOFF_MS",
                DEFAULT_INITIAL_BACKOFF_MS,
                10,
                10_000,
            ),
            journal_dir: PathBuf::from(env_string(
                "MATRIX_JOURNAL_DIR",
                "./data/matrix-journal",
            )),
            journal_max_file_size: env_u64(
                "MATRIX_JOURNAL_MAX_FILE_SIZE",
                DEFAULT_JOURNAL_MAX_FILE_SIZE,
                1024 * 1024,
                1024 * 1024 * 1024,
            ),
            retention_frames,
            availability_ttl_ms: env_u64(
                "MATRIX_AVAILABILITY_TTL_MS",
                DEFAULT_AVAILABILITY_TTL_MS,
                1_000,
                3_600_000,
            ) as i64,
            preview_ttl_ms: env_u64(
                "MATRIX_PREVIEW_TTL_MS",
                DEFAULT_PREVIEW_TTL_MS,
                100,
                600_000,
            ) as i64,
            preview_series_cap: env_u64(
                "MATRIX_PREVIEW_SERIES_CAP",
                DEFAULT_PREVIEW_SERIES_CAP,
                4,
                4_096,
            ) as usize,
        }
    }
}

/// Raise `retention_frames` so the in-memory index always spans at
/// least one UTC day of ticks. Day-scoped reads rely on this floor.
fn day_retention_floor(retention_frames: usize, tick_interval_ms: u64) -> usize {
    let floor = (DAY_MS as u64).div_ceil(tick_interval_ms.max(1)) as usize;
    if retention_frames < floor {
        warn!(
            retention_frames,
            floor, "retention below one day of ticks, raising"
        );
        floor
    } else {
        retention_frames
    }
}

// ── Env Helpers ─────────────────────────────────────────────────────

fn env_string(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default.to_string(),
    }
}

fn env_list(name: &str, default: &[String]) -> Vec<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => split_list(&v),
        _ => default.to_vec(),
    }
}

fn env_u64(name: &str, default: u64, min: u64, max: u64) -> u64 {
    clamp_parse(name, std::env::var(name).ok(), default, min, max)
}

fn clamp_parse(name: &str, raw: Option<String>, default: u64, min: u64, max: u64) -> u64 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(v) => {
            let clamped = v.clamp(min, max);
            if clamped != v {
                warn!(var = name, value = v, clamped, "config value out of range, clamped");
            }
            clamped
        }
        Err(_) => {
            warn!(var = name, value = %raw, "unparseable config value, using default");
            default
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}
