//! Upstream exchange ticker client
//!
//! The only place raw upstream JSON is touched. Every payload passes
//! through one typed ingestion adapter; malformed entries are skipped
//! with a warning and surface downstream as "unresolved", never as an
//! error. Individual calls get a per-request timeout and transient 5xx
//! retries with exponential backoff; the per-tick fan-out is bounded by
//! a fixed concurrency limit.

use crate::config::EngineConfig;
use crate::metrics::EngineMetrics;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// HTTP status codes treated as transient and retried.
const RETRYABLE_STATUS_CODES: &[u16] = &[502, 503, 504];

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum TickerError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream status {status} from {endpoint}")]
    Status { status: u16, endpoint: String },

    #[error("decode error from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    #[error("retries exhausted for {0}")]
    RetriesExhausted(String),
}

// ── Upstream API Boundary ───────────────────────────────────────────

/// Read access to the upstream exchange.
///
/// The engine only ever needs two calls: a per-symbol ticker lookup and
/// the tradable-symbol listing. Tests substitute an in-memory fake.
#[async_trait]
pub trait MarketDataApi: Send + Sync {
    /// Fetch one ticker. `Ok(None)` means the symbol is not listed (or
    /// the entry was malformed); both read as "unresolved".
    async fn ticker(&self, symbol: &str) -> Result<Option<TickerEntry>, TickerError>;

    /// Symbols the upstream currently reports as actively trading.
    async fn tradable_symbols(&self) -> Result<BTreeSet<String>, TickerError>;
}

/// One validated ticker observation.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerEntry {
    pub symbol: String,
    pub last: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

impl TickerEntry {
    /// The usable price: last trade when present, else the bid/ask
    /// midpoint when both sides are quoted.
    pub fn effective_price(&self) -> Option<f64> {
        if let Some(last) = self.last {
            return Some(last);
        }
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    fn from_raw(raw: RawTicker) -> Option<Self> {
        if raw.symbol.is_empty() {
            return None;
        }
        let entry = Self {
            symbol: raw.symbol,
            last: raw.last_price.as_deref().and_then(parse_price),
            bid: raw.bid_price.as_deref().and_then(parse_price),
            ask: raw.ask_price.as_deref().and_then(parse_price),
        };
        if entry.effective_price().is_none() {
            return None;
        }
        Some(entry)
    }
}

/// Parse an upstream decimal string, rejecting non-finite and
/// non-positive values.
fn parse_price(raw: &str) -> Option<f64> {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Some(v),
        _ => None,
    }
}

// ── Raw Wire Shapes ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawTicker {
    symbol: String,
    #[serde(default, rename = "lastPrice")]
    last_price: Option<String>,
    #[serde(default, rename = "bidPrice")]
    bid_price: Option<String>,
    #[serde(default, rename = "askPrice")]
    ask_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawExchangeInfo {
    symbols: Vec<RawSymbolStatus>,
}

#[derive(Debug, Deserialize)]
struct RawSymbolStatus {
    symbol: String,
    status: String,
}

// ── Reqwest Client ──────────────────────────────────────────────────

/// Production ticker client over the upstream REST API.
pub struct TickerClient {
    http: reqwest::Client,
    base_url: String,
    max_retries: u32,
    initial_backoff_ms: u64,
}

impl TickerClient {
    pub fn new(config: &EngineConfig) -> Result<Self, TickerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base_url: config.upstream_base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            initial_backoff_ms: config.initial_backoff_ms,
        })
    }

    /// GET + decode with transient-status retries.
    ///
    /// Backoff doubles per attempt (100ms, 200ms, 400ms with defaults).
    /// `Ok(None)` maps 400/404 to "not listed" instead of an error.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, TickerError> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 0..=self.max_retries {
            let response = match self.http.get(&url).query(query).send().await {
                Ok(r) => r,
                Err(e) => {
                    if attempt < self.max_retries {
                        let backoff =
                            Duration::from_millis(self.initial_backoff_ms * 2u64.pow(attempt));
                        warn!(
                            endpoint = path,
                            attempt = attempt + 1,
                            max_attempts = self.max_retries + 1,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "upstream transport error, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(e.into());
                }
            };

            let status = response.status().as_u16();

            // Unknown symbols come back as client errors; treat as unlisted.
            if status == 400 || status == 404 {
                return Ok(None);
            }

            if RETRYABLE_STATUS_CODES.contains(&status) && attempt < self.max_retries {
                let backoff = Duration::from_millis(self.initial_backoff_ms * 2u64.pow(attempt));
                warn!(
                    endpoint = path,
                    status,
                    attempt = attempt + 1,
                    max_attempts = self.max_retries + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    "transient upstream status, retrying"
                );
                tokio::time::sleep(backoff).await;
                continue;
            }

            if !response.status().is_success() {
                return Err(TickerError::Status {
                    status,
                    endpoint: path.to_string(),
                });
            }

            let body = response.bytes().await?;
            return serde_json::from_slice::<T>(&body)
                .map(Some)
                .map_err(|e| TickerError::Decode {
                    endpoint: path.to_string(),
                    message: e.to_string(),
                });
        }

        Err(TickerError::RetriesExhausted(path.to_string()))
    }
}

#[async_trait]
impl MarketDataApi for TickerClient {
    async fn ticker(&self, symbol: &str) -> Result<Option<TickerEntry>, TickerError> {
        let raw: Option<RawTicker> = self
            .get_json("/api/v3/ticker/24hr", &[("symbol", symbol)])
            .await?;
        match raw {
            None => Ok(None),
            Some(raw) => match TickerEntry::from_raw(raw) {
                Some(entry) => Ok(Some(entry)),
                None => {
                    warn!(symbol, "malformed ticker entry skipped");
                    Ok(None)
                }
            },
        }
    }

    async fn tradable_symbols(&self) -> Result<BTreeSet<String>, TickerError> {
        let raw: Option<RawExchangeInfo> = self.get_json("/api/v3/exchangeInfo", &[]).await?;
        let info = raw.ok_or_else(|| TickerError::Decode {
            endpoint: "/api/v3/exchangeInfo".to_string(),
            message: "endpoint reported not found".to_string(),
        })?;
        Ok(info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| s.symbol)
            .collect())
    }
}

// ── Fan-out ─────────────────────────────────────────────────────────

/// Raw pair prices for one tick, keyed by concatenated upstream symbol.
pub type TickerSnapshot = BTreeMap<String, f64>;

/// Fetch every candidate symbol with bounded concurrency.
///
/// Failures and unlisted symbols simply leave their key out of the
/// snapshot; the resolver treats absence as "unresolved".
pub async fn fetch_snapshot(
    api: &dyn MarketDataApi,
    symbols: &BTreeSet<String>,
    concurrency: usize,
    metrics: &EngineMetrics,
) -> TickerSnapshot {
    let results: Vec<(String, Result<Option<TickerEntry>, TickerError>)> =
        stream::iter(symbols.iter().cloned())
            .map(|symbol| async move {
                let outcome = api.ticker(&symbol).await;
                (symbol, outcome)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

    let mut snapshot = TickerSnapshot::new();
    for (symbol, outcome) in results {
        metrics.record_fetch_attempt();
        match outcome {
            Ok(Some(entry)) => {
                if let Some(price) = entry.effective_price() {
                    snapshot.insert(symbol, price);
                }
            }
            Ok(None) => {}
            Err(e) => {
                metrics.record_fetch_failure();
                warn!(symbol = %symbol, error = %e, "ticker fetch failed");
            }
        }
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(symbol: &str, last: Option<&str>, bid: Option<&str>, ask: Option<&str>) -> RawTicker {
        RawTicker {
            symbol: symbol.to_string(),
            last_price: last.map(String::from),
            bid_price: bid.map(String::from),
            ask_price: ask.map(String::from),
        }
    }

    #[test]
    fn test_parse_price_rejects_junk() {
        assert_eq!(parse_price("65000.5"), Some(65000.5));
        assert_eq!(parse_price(" 3200 "), Some(3200.0));
        assert_eq!(parse_price("0"), None);
        assert_eq!(parse_price("-1.5"), None);
        assert_eq!(parse_price("NaN"), None);
        assert_eq!(parse_price("inf"), None);
        assert_eq!(parse_price("abc"), None);
    }

    #[test]
    fn test_effective_price_prefers_last() {
        let entry = TickerEntry::from_raw(raw(
            "BTCUSDT",
            Some("65000"),
            Some("64990"),
            Some("65010"),
        ))
        .unwrap();
        assert_eq!(entry.effective_price(), Some(65000.0));
    }

    #[test]
    fn test_effective_price_falls_back_to_midpoint() {
        let entry =
            TickerEntry::from_raw(raw("BTCUSDT", None, Some("64990"), Some("65010"))).unwrap();
        assert_eq!(entry.effective_price(), Some(65000.0));
    }

    #[test]
    fn test_malformed_entry_is_rejected() {
        assert!(TickerEntry::from_raw(raw("BTCUSDT", None, Some("64990"), None)).is_none());
        assert!(TickerEntry::from_raw(raw("", Some("65000"), None, None)).is_none());
        assert!(TickerEntry::from_raw(raw("BTCUSDT", Some("bogus"), None, None)).is_none());
    }

    #[test]
    fn test_raw_ticker_deserializes_upstream_shape() {
        let json = r#"{"symbol":"ETHUSDT","lastPrice":"3200.00","bidPrice":"3199.5","askPrice":"3200.5","volume":"12345"}"#;
        let raw: RawTicker = serde_json::from_str(json).unwrap();
        let entry = TickerEntry::from_raw(raw).unwrap();
        assert_eq!(entry.symbol, "ETHUSDT");
        assert_eq!(entry.last, Some(3200.0));
    }

    #[test]
    fn test_exchange_info_filters_status() {
        let json = r#"{"symbols":[
            {"symbol":"BTCUSDT","status":"TRADING"},
            {"symbol":"LUNAUSDT","status":"BREAK"}
        ]}"#;
        let info: RawExchangeInfo = serde_json::from_str(json).unwrap();
        let tradable: BTreeSet<String> = info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| s.symbol)
            .collect();
        assert!(tradable.contains("BTCUSDT"));
        assert!(!tradable.contains("LUNAUSDT"));
    }

    // ── Fan-out Tests ───────────────────────────────────────────────

    struct ScriptedApi {
        prices: BTreeMap<String, f64>,
        failing: BTreeSet<String>,
    }

    #[async_trait]
    impl MarketDataApi for ScriptedApi {
        async fn ticker(&self, symbol: &str) -> Result<Option<TickerEntry>, TickerError> {
            if self.failing.contains(symbol) {
                return Err(TickerError::Status {
                    status: 500,
                    endpoint: "/test".to_string(),
                });
            }
            Ok(self.prices.get(symbol).map(|p| TickerEntry {
                symbol: symbol.to_string(),
                last: Some(*p),
                bid: None,
                ask: None,
            }))
        }

        async fn tradable_symbols(&self) -> Result<BTreeSet<String>, TickerError> {
            Ok(self.prices.keys().cloned().collect())
        }
    }

    #[tokio::test]
    async fn test_fetch_snapshot_collects_resolved_and_skips_failures() {
        let api = ScriptedApi {
            prices: BTreeMap::from([
                ("BTCUSDT".to_string(), 65000.0),
                ("ETHUSDT".to_string(), 3200.0),
            ]),
            failing: BTreeSet::from(["SOLUSDT".to_string()]),
        };
        let metrics = EngineMetrics::new();
        let symbols = BTreeSet::from([
            "BTCUSDT".to_string(),
            "ETHUSDT".to_string(),
            "SOLUSDT".to_string(),
            "ADAUSDT".to_string(),
        ]);

        let snapshot = fetch_snapshot(&api, &symbols, 2, &metrics).await;

        assert_eq!(snapshot.get("BTCUSDT"), Some(&65000.0));
        assert_eq!(snapshot.get("ETHUSDT"), Some(&3200.0));
        assert!(!snapshot.contains_key("SOLUSDT"));
        assert!(!snapshot.contains_key("ADAUSDT"));

        let exported = metrics.export();
        assert_eq!(exported["fetch_attempts"], 4);
        assert_eq!(exported["fetch_failures"], 1);
    }
}
