//! Price data loading: pre-built history blob plus a cached recent window.

pub mod finnhub;
pub mod retry;
pub mod stocks_api;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::path::Path;

use crate::chart::{merge_series, PricePoint};
use crate::logging::{log, log_fetch_degraded, obj, v_str, Domain, Level};
use crate::storage::StateStore;
use serde_json::json;

pub type PriceHistory = HashMap<String, Vec<PricePoint>>;

/// Anything that can answer "daily closes for a symbol between two days".
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn daily_closes(&self, symbol: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<PricePoint>>;
}

/// Reads `stock-history.json`. A missing file is an empty history.
pub fn load_history(path: &Path) -> Result<PriceHistory> {
    if !path.exists() {
        log(
            Level::Warn,
            Domain::Feed,
            "history_missing",
            obj(&[("path", v_str(&path.display().to_string()))]),
        );
        return Ok(PriceHistory::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read price history {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse price history {}", path.display()))
}

/// Like `load_history`, but a malformed file degrades to an empty history.
pub fn load_history_or_empty(path: &Path) -> PriceHistory {
    load_history(path).unwrap_or_else(|err| {
        log_fetch_degraded("*", &format!("price history: {:#}", err));
        PriceHistory::new()
    })
}

/// Merges history with a recent window that comes from the cache when fresh and
/// from the source otherwise. Source failures fall back to history alone.
pub struct PriceLoader<S: CandleSource> {
    source: S,
    history: PriceHistory,
    ttl_secs: u64,
    window_days: i64,
}

impl<S: CandleSource> PriceLoader<S> {
    pub fn new(source: S, history: PriceHistory, ttl_secs: u64, window_days: i64) -> Self {
        Self { source, history, ttl_secs, window_days }
    }

    pub fn history(&self, symbol: &str) -> &[PricePoint] {
        self.history.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Full series for each symbol. Cache misses are fetched concurrently.
    pub async fn load(
        &self,
        cache: &mut StateStore,
        symbols: &[String],
        today: NaiveDate,
        now_ts: i64,
    ) -> HashMap<String, Vec<PricePoint>> {
        let mut recent: HashMap<String, Vec<PricePoint>> = HashMap::new();
        let mut misses: Vec<&String> = Vec::new();
        for symbol in symbols {
            match cache.cached_prices(symbol, now_ts, self.ttl_secs) {
                Ok(Some(points)) => {
                    recent.insert(symbol.clone(), points);
                }
                Ok(None) => misses.push(symbol),
                Err(err) => {
                    log_fetch_degraded(symbol, &format!("cache read: {}", err));
                    misses.push(symbol);
                }
            }
        }

        let from = today - Duration::days(self.window_days);
        let fetched = join_all(
            misses
                .iter()
                .map(|symbol| self.source.daily_closes(symbol, from, today)),
        )
        .await;

        for (symbol, result) in misses.into_iter().zip(fetched) {
            match result {
                Ok(points) if !points.is_empty() => {
                    if let Err(err) = cache.put_prices(symbol, now_ts, &points) {
                        log_fetch_degraded(symbol, &format!("cache write: {}", err));
                    }
                    recent.insert(symbol.clone(), points);
                }
                Ok(_) => log_fetch_degraded(symbol, "empty recent window"),
                Err(err) => log_fetch_degraded(symbol, &err.to_string()),
            }
        }

        symbols
            .iter()
            .map(|symbol| {
                let merged = merge_series(
                    self.history(symbol),
                    recent.get(symbol).map(Vec::as_slice).unwrap_or(&[]),
                );
                log(
                    Level::Debug,
                    Domain::Feed,
                    "series_loaded",
                    obj(&[("symbol", v_str(symbol)), ("points", json!(merged.len()))]),
                );
                (symbol.clone(), merged)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeSource {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl CandleSource for FakeSource {
        async fn daily_closes(&self, _symbol: &str, _from: NaiveDate, to: NaiveDate) -> Result<Vec<PricePoint>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("upstream down"));
            }
            Ok(vec![PricePoint { time: to, value: 9.0 }])
        }
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn history() -> PriceHistory {
        let mut h = PriceHistory::new();
        h.insert("NVDA".into(), vec![PricePoint { time: d("2024-01-02"), value: 1.0 }]);
        h
    }

    fn cache() -> StateStore {
        let mut s = StateStore::in_memory().unwrap();
        s.init().unwrap();
        s
    }

    #[tokio::test]
    async fn test_fetch_then_cache_hit() {
        let loader = PriceLoader::new(FakeSource { calls: AtomicU32::new(0), fail: false }, history(), 86_400, 30);
        let mut cache = cache();
        let syms = vec!["NVDA".to_string()];

        let first = loader.load(&mut cache, &syms, d("2024-03-01"), 1_000).await;
        assert_eq!(first["NVDA"].len(), 2);
        let second = loader.load(&mut cache, &syms, d("2024-03-01"), 2_000).await;
        assert_eq!(second["NVDA"], first["NVDA"]);
        assert_eq!(loader.source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_degrades_to_history() {
        let loader = PriceLoader::new(FakeSource { calls: AtomicU32::new(0), fail: true }, history(), 86_400, 30);
        let mut cache = cache();
        let syms = vec!["NVDA".to_string(), "AMD".to_string()];
        let out = loader.load(&mut cache, &syms, d("2024-03-01"), 1_000).await;
        assert_eq!(out["NVDA"].len(), 1);
        assert!(out["AMD"].is_empty());
    }

    #[test]
    fn test_malformed_history_degrades_to_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stock-history.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_history(&path).is_err());
        assert!(load_history_or_empty(&path).is_empty());
    }

    #[test]
    fn test_missing_history_file_is_empty() {
        let h = load_history(Path::new("/nonexistent/stock-history.json")).unwrap();
        assert!(h.is_empty());
    }
}
