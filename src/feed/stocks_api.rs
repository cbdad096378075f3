//! Client for the `/api/stocks` proxy endpoint.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;

use super::retry::{is_retryable_http_error, retry_async, RetryConfig, RetryableStatus};
use super::CandleSource;
use crate::chart::PricePoint;

pub struct StocksApiClient {
    client: Client,
    base: String,
    retry: RetryConfig,
}

impl StocksApiClient {
    pub fn new(base: &str, timeout_secs: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base: base.trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
        }
    }

    async fn fetch_once(&self, symbols: &str, from: &str, to: &str) -> Result<HashMap<String, Vec<PricePoint>>> {
        let resp = self
            .client
            .get(format!("{}/api/stocks", self.base))
            .query(&[("symbols", symbols), ("from", from), ("to", to)])
            .send()
            .await?;
        let status = resp.status().as_u16();
        if is_retryable_http_error(status) {
            return Err(RetryableStatus(status).into());
        }
        if !resp.status().is_success() {
            return Err(anyhow!("stocks api returned {}", status));
        }
        resp.json().await.context("decode stocks api response")
    }

    /// Ticker → points for every requested symbol the proxy answered for.
    pub async fn fetch(
        &self,
        symbols: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<HashMap<String, Vec<PricePoint>>> {
        let joined = symbols.join(",");
        let (from, to) = (from.format("%Y-%m-%d").to_string(), to.format("%Y-%m-%d").to_string());
        retry_async(&self.retry, "stocks_api", || self.fetch_once(&joined, &from, &to)).await
    }
}

#[async_trait]
impl CandleSource for StocksApiClient {
    async fn daily_closes(&self, symbol: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<PricePoint>> {
        let mut result = self.fetch(&[symbol.to_string()], from, to).await?;
        Ok(result.remove(symbol).unwrap_or_default())
    }
}
