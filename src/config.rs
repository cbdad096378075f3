use crate::chart::DEFAULT_STOCKS;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub events_yaml: String,
    pub events_json: String,
    pub stock_history_path: String,
    pub sqlite_path: String,
    pub out_dir: String,
    pub finnhub_api_key: Option<String>,
    pub finnhub_base: String,
    pub proxy_bind: String,
    pub proxy_base: String,
    pub stocks: Vec<String>,
    /// TTL of cached recent price windows
    pub cache_ttl_secs: u64,
    /// Skip the history pre-fetch when the file is younger than this
    pub history_max_age_secs: u64,
    pub recent_window_days: i64,
    pub max_symbols: usize,
    /// Spacing between upstream calls in the history build (rate limit)
    pub fetch_spacing_ms: u64,
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            events_yaml: env_or("EVENTS_YAML", "data/events.yaml"),
            events_json: env_or("EVENTS_PATH", "data/events.json"),
            stock_history_path: env_or("STOCK_HISTORY_PATH", "data/stock-history.json"),
            sqlite_path: env_or("SQLITE_PATH", "./timeline.sqlite"),
            out_dir: env_or("OUT_DIR", "public"),
            finnhub_api_key: std::env::var("FINNHUB_API_KEY").ok().filter(|k| !k.is_empty()),
            finnhub_base: env_or("FINNHUB_BASE", "https://finnhub.io/api/v1"),
            proxy_bind: env_or("PROXY_BIND", "127.0.0.1:3000"),
            proxy_base: env_or("PROXY_BASE", "http://127.0.0.1:3000"),
            stocks: std::env::var("STOCKS")
                .ok()
                .map(|v| parse_symbols(&v, usize::MAX))
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_STOCKS.iter().map(|s| s.to_string()).collect()),
            cache_ttl_secs: env_parse("CACHE_TTL_SECS", 86_400),
            history_max_age_secs: env_parse("HISTORY_MAX_AGE_SECS", 7 * 86_400),
            recent_window_days: env_parse("RECENT_WINDOW_DAYS", 30),
            max_symbols: env_parse("MAX_SYMBOLS", 10),
            fetch_spacing_ms: env_parse("FETCH_SPACING_MS", 1_100),
            http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", 10),
        }
    }
}

/// Split a comma list of tickers: trimmed, upper-cased, empties dropped, capped at `max`.
pub fn parse_symbols(raw: &str, max: usize) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .take(max)
        .collect()
}
