//! Pre-fetch daily closes from 2022-01-01 up to the recent window into
//! stock-history.json. Skips the run when the file is still fresh.

use aitimeline::config::Config;
use aitimeline::data::{build_stock_history, history_is_fresh};
use aitimeline::feed::finnhub::FinnhubClient;
use aitimeline::feed::CandleSource;
use aitimeline::logging::{json_log, obj, v_str};
use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::path::Path;
use std::time::{Duration, SystemTime};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let out = Path::new(&cfg.stock_history_path);

    if history_is_fresh(out, cfg.history_max_age_secs, SystemTime::now()) {
        json_log("build_stock_data", obj(&[("status", v_str("fresh")), ("path", v_str(&cfg.stock_history_path))]));
        return Ok(());
    }

    let client = cfg
        .finnhub_api_key
        .as_ref()
        .map(|key| FinnhubClient::new(&cfg.finnhub_base, key, cfg.http_timeout_secs));
    let written = build_stock_history(
        client.as_ref().map(|c| c as &dyn CandleSource),
        &cfg.stocks,
        out,
        Utc::now().date_naive(),
        cfg.recent_window_days,
        Duration::from_millis(cfg.fetch_spacing_ms),
    )
    .await?;
    json_log(
        "build_stock_data",
        obj(&[
            ("path", v_str(&cfg.stock_history_path)),
            ("symbols", json!(written)),
        ]),
    );
    Ok(())
}
