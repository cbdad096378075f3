//! `/api/stocks` proxy endpoint.
//!
//! GET /api/stocks?symbols=NVDA,GOOGL&from=2025-01-01&to=2025-02-05
//! answers `{ "NVDA": [{ "time": "2025-01-02", "value": 138.31 }, ...], ... }`.
//! Upstream failures degrade to an empty list for that symbol.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures_util::future::join_all;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use url::Url;

use crate::chart::PricePoint;
use crate::config::parse_symbols;
use crate::feed::CandleSource;
use crate::logging::{log, obj, v_str, Domain, Level};

const DEFAULT_FROM: &str = "2024-01-01";
const CACHE_CONTROL: &str = "s-maxage=86400, stale-while-revalidate";
const MAX_REQUEST_HEAD: u64 = 8 * 1024;
const HEAD_READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl HttpResponse {
    fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", "application/json".to_string())],
            body: body.to_string(),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, json!({ "error": message }))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            _ => "Internal Server Error",
        }
    }

    pub fn to_http(&self) -> String {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason());
        for (k, v) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", k, v));
        }
        out.push_str(&format!("Content-Length: {}\r\nConnection: close\r\n\r\n", self.body.len()));
        out.push_str(&self.body);
        out
    }
}

/// Shared state of the endpoint. `source` is `None` when no upstream key is configured.
#[derive(Clone)]
pub struct StocksProxy {
    source: Option<Arc<dyn CandleSource>>,
    max_symbols: usize,
}

impl StocksProxy {
    pub fn new(source: Option<Arc<dyn CandleSource>>, max_symbols: usize) -> Self {
        Self { source, max_symbols }
    }

    /// Routes one request line target, e.g. `/api/stocks?symbols=NVDA`.
    pub async fn handle(&self, method: &str, target: &str, today: NaiveDate) -> HttpResponse {
        let url = match Url::parse("http://localhost").and_then(|base| base.join(target)) {
            Ok(u) => u,
            Err(_) => return HttpResponse::error(400, "Malformed request target"),
        };
        match (method, url.path()) {
            ("GET", "/api/health") => HttpResponse::json(200, json!({ "status": "ok" })),
            ("GET", "/api/stocks") => self.stocks(&url, today).await,
            (_, "/api/stocks") | (_, "/api/health") => HttpResponse::error(405, "Method not allowed"),
            _ => HttpResponse::error(404, "Not found"),
        }
    }

    async fn stocks(&self, url: &Url, today: NaiveDate) -> HttpResponse {
        let query: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        let symbols = query
            .get("symbols")
            .map(|raw| parse_symbols(raw, self.max_symbols))
            .unwrap_or_default();
        if symbols.is_empty() {
            return HttpResponse::error(400, "Missing \"symbols\" query parameter");
        }
        let Some(source) = &self.source else {
            return HttpResponse::error(500, "FINNHUB_API_KEY not configured");
        };
        let from = match parse_day(query.get("from"), DEFAULT_FROM) {
            Some(d) => d,
            None => return HttpResponse::error(400, "Invalid \"from\" date"),
        };
        let to = match query.get("to") {
            Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
                Ok(d) => d,
                Err(_) => return HttpResponse::error(400, "Invalid \"to\" date"),
            },
            None => today,
        };

        let fetched = join_all(symbols.iter().map(|s| source.daily_closes(s, from, to))).await;
        let mut result: BTreeMap<String, Vec<PricePoint>> = BTreeMap::new();
        for (symbol, outcome) in symbols.iter().zip(fetched) {
            let points = outcome.unwrap_or_else(|err| {
                log(
                    Level::Warn,
                    Domain::Proxy,
                    "upstream_error",
                    obj(&[("symbol", v_str(symbol)), ("reason", v_str(&err.to_string()))]),
                );
                Vec::new()
            });
            result.insert(symbol.clone(), points);
        }

        let mut resp = HttpResponse::json(200, json!(result));
        resp.headers.push(("Cache-Control", CACHE_CONTROL.to_string()));
        resp
    }

    pub async fn serve(self, bind: &str) -> Result<()> {
        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("bind {}", bind))?;
        log(
            Level::Info,
            Domain::Proxy,
            "listening",
            obj(&[("bind", v_str(bind))]),
        );
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    log(Level::Warn, Domain::Proxy, "accept_failed", obj(&[("reason", v_str(&err.to_string()))]));
                    continue;
                }
            };
            let proxy = self.clone();
            tokio::spawn(async move {
                if let Err(err) = proxy.handle_connection(stream).await {
                    log(
                        Level::Debug,
                        Domain::Proxy,
                        "connection_error",
                        obj(&[("peer", v_str(&peer.to_string())), ("reason", v_str(&err.to_string()))]),
                    );
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let (read, write) = stream.into_split();
        self.respond(read, write).await
    }

    /// Reads one request head under a size cap and a deadline, then writes the answer.
    async fn respond<R, W>(&self, read: R, mut write: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let resp = match timeout(HEAD_READ_TIMEOUT, read_request_head(read)).await {
            Ok(Ok(RequestHead::Line(request_line))) => {
                let mut parts = request_line.split_whitespace();
                let method = parts.next().unwrap_or("");
                let target = parts.next().unwrap_or("/");
                let today = chrono::Utc::now().date_naive();
                let resp = self.handle(method, target, today).await;
                log(
                    Level::Info,
                    Domain::Proxy,
                    "request",
                    obj(&[
                        ("method", v_str(method)),
                        ("target", v_str(target)),
                        ("status", json!(resp.status)),
                    ]),
                );
                resp
            }
            Ok(Ok(RequestHead::Empty)) => return Ok(()),
            Ok(Ok(RequestHead::TooLarge)) => {
                log(Level::Warn, Domain::Proxy, "request_too_large", obj(&[("limit", json!(MAX_REQUEST_HEAD))]));
                HttpResponse::error(400, "Request header too large")
            }
            Ok(Err(err)) => return Err(err),
            Err(_) => HttpResponse::error(408, "Request timeout"),
        };
        write.write_all(resp.to_http().as_bytes()).await?;
        write.shutdown().await?;
        Ok(())
    }
}

enum RequestHead {
    Line(String),
    /// Connection closed before anything arrived
    Empty,
    TooLarge,
}

/// Request line plus drained headers, never buffering more than `MAX_REQUEST_HEAD` bytes.
async fn read_request_head<R: AsyncRead + Unpin>(read: R) -> Result<RequestHead> {
    let mut reader = BufReader::new(read.take(MAX_REQUEST_HEAD));
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Ok(RequestHead::Empty);
    }
    if !request_line.ends_with('\n') && reader.get_ref().limit() == 0 {
        return Ok(RequestHead::TooLarge);
    }
    // Drain headers; the endpoint only looks at the request line.
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if !line.ends_with('\n') && reader.get_ref().limit() == 0 {
            return Ok(RequestHead::TooLarge);
        }
        if n == 0 || line.trim().is_empty() {
            break;
        }
    }
    Ok(RequestHead::Line(request_line))
}

fn parse_day(raw: Option<&String>, default: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.map(String::as_str).unwrap_or(default), "%Y-%m-%d").ok()
}
