use aitimeline::config::Config;
use aitimeline::event::EventStore;
use aitimeline::feed::finnhub::FinnhubClient;
use aitimeline::feed::stocks_api::StocksApiClient;
use aitimeline::feed::{load_history_or_empty, CandleSource, PriceHistory, PriceLoader};
use aitimeline::logging::{json_log, obj, v_str, Domain, ProfileScope};
use aitimeline::storage::StateStore;
use aitimeline::timeline::Timeline;
use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;

async fn load_prices<S: CandleSource>(
    source: S,
    cfg: &Config,
    history: PriceHistory,
    cache: &mut StateStore,
    stocks: &[String],
) -> HashMap<String, Vec<aitimeline::chart::PricePoint>> {
    let loader = PriceLoader::new(source, history, cfg.cache_ttl_secs, cfg.recent_window_days);
    let now = Utc::now();
    loader.load(cache, stocks, now.date_naive(), now.timestamp()).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let _p = ProfileScope::new(Domain::System, "build_page");

    let store = EventStore::load(Path::new(&cfg.events_json))?;
    let mut state = StateStore::new(&cfg.sqlite_path)?;
    state.init()?;
    let prefs = state.load_prefs()?;

    let mut timeline = Timeline::new(store, prefs, &cfg.stocks);
    let history = load_history_or_empty(Path::new(&cfg.stock_history_path));
    let active: Vec<String> = timeline.chart().active().to_vec();
    let series = match &cfg.finnhub_api_key {
        Some(key) => {
            let source = FinnhubClient::new(&cfg.finnhub_base, key, cfg.http_timeout_secs);
            load_prices(source, &cfg, history, &mut state, &active).await
        }
        None => {
            let source = StocksApiClient::new(&cfg.proxy_base, cfg.http_timeout_secs);
            load_prices(source, &cfg, history, &mut state, &active).await
        }
    };
    timeline.load_all_series(series);
    state.save_prefs(&timeline.prefs())?;

    let out_dir = Path::new(&cfg.out_dir);
    std::fs::create_dir_all(out_dir).with_context(|| format!("create {}", out_dir.display()))?;
    std::fs::write(out_dir.join("index.html"), timeline.render_html())?;
    std::fs::write(
        out_dir.join("timeline.json"),
        serde_json::to_string_pretty(&timeline.view())?,
    )?;

    json_log(
        "build",
        obj(&[
            ("out_dir", v_str(&cfg.out_dir)),
            ("events", json!(timeline.store().len())),
            ("series", json!(timeline.chart().loaded().count())),
        ]),
    );
    Ok(())
}
