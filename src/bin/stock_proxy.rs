//! Stock price proxy
//!
//! Endpoints:
//!   GET /api/stocks?symbols=NVDA,MSFT&from=2024-01-01&to=2024-06-30
//!   GET /api/health

use aitimeline::config::Config;
use aitimeline::feed::finnhub::FinnhubClient;
use aitimeline::feed::CandleSource;
use aitimeline::proxy::StocksProxy;
use anyhow::Result;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let source: Option<Arc<dyn CandleSource>> = cfg.finnhub_api_key.as_ref().map(|key| {
        Arc::new(FinnhubClient::new(&cfg.finnhub_base, key, cfg.http_timeout_secs)) as Arc<dyn CandleSource>
    });
    StocksProxy::new(source, cfg.max_symbols).serve(&cfg.proxy_bind).await
}
