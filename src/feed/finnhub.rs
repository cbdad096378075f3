//! Daily candle client for the Finnhub API.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::retry::{is_retryable_http_error, retry_async, RetryConfig, RetryableStatus};
use super::CandleSource;
use crate::chart::PricePoint;

#[derive(Deserialize, Debug)]
struct FinnhubCandles {
    s: String,
    #[serde(default)]
    t: Vec<i64>,
    #[serde(default)]
    c: Vec<f64>,
}

/// `s == "ok"` candles become one point per timestamp, dated by UTC day.
/// Anything else (`no_data`, errors) is an empty series.
fn candles_to_points(candles: FinnhubCandles) -> Vec<PricePoint> {
    if candles.s != "ok" {
        return Vec::new();
    }
    candles
        .t
        .iter()
        .zip(candles.c.iter())
        .filter_map(|(ts, close)| {
            DateTime::from_timestamp(*ts, 0).map(|dt| PricePoint { time: dt.date_naive(), value: *close })
        })
        .collect()
}

pub(crate) fn day_start_ts(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0)
}

pub struct FinnhubClient {
    client: Client,
    base: String,
    api_key: String,
    retry: RetryConfig,
}

impl FinnhubClient {
    pub fn new(base: &str, api_key: &str, timeout_secs: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base: base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            retry: RetryConfig::default(),
        }
    }

    async fn fetch_once(&self, symbol: &str, from: i64, to: i64) -> Result<Vec<PricePoint>> {
        let url = format!("{}/stock/candle", self.base);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.to_string()),
                ("resolution", "D".to_string()),
                ("from", from.to_string()),
                ("to", to.to_string()),
                ("token", self.api_key.clone()),
            ])
            .send()
            .await?;
        let status = resp.status().as_u16();
        if is_retryable_http_error(status) {
            return Err(RetryableStatus(status).into());
        }
        if !resp.status().is_success() {
            return Err(anyhow!("finnhub {} for {}", status, symbol));
        }
        let candles: FinnhubCandles = resp.json().await.context("decode finnhub candles")?;
        Ok(candles_to_points(candles))
    }
}

#[async_trait]
impl CandleSource for FinnhubClient {
    async fn daily_closes(&self, symbol: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<PricePoint>> {
        let (from_ts, to_ts) = (day_start_ts(from), day_start_ts(to));
        retry_async(&self.retry, "finnhub_candles", || self.fetch_once(symbol, from_ts, to_ts)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_candles_become_points() {
        let candles: FinnhubCandles = serde_json::from_str(
            r#"{"s":"ok","t":[1704153600,1704240000],"c":[481.68,475.69],"o":[1,2]}"#,
        )
        .unwrap();
        let points = candles_to_points(candles);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].time, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(points[1].value, 475.69);
    }

    #[test]
    fn test_no_data_is_empty() {
        let candles: FinnhubCandles = serde_json::from_str(r#"{"s":"no_data"}"#).unwrap();
        assert!(candles_to_points(candles).is_empty());
    }

    #[test]
    fn test_day_start_ts() {
        assert_eq!(day_start_ts(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()), 1_704_153_600);
    }
}
