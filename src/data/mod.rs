//! One-shot data builds: events YAML → JSON, validation, and the price history warmer.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::chart::PricePoint;
use crate::event::{parse_event_date, EventStore};
use crate::feed::CandleSource;
use crate::logging::{log, log_fetch_degraded, obj, v_str, Domain, Level};
use serde_json::json;

pub const REQUIRED_FIELDS: [&str; 3] = ["title", "date", "description"];
pub const LIST_FIELDS: [&str; 5] = ["tags", "organizations", "models", "impact_areas", "key_figures"];
/// First day fetched by the history warmer
pub const HISTORY_START: &str = "2022-01-01";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsManifest {
    pub source: String,
    pub output: String,
    pub hash_sha256: String,
    pub count: usize,
    pub date_min: Option<NaiveDate>,
    pub date_max: Option<NaiveDate>,
    pub generated_at_epoch: u64,
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn default_manifest_path(output: &Path) -> PathBuf {
    let mut p = output.to_path_buf();
    let stem = output.file_stem().and_then(|s| s.to_str()).unwrap_or("events");
    p.set_file_name(format!("{}.manifest.json", stem));
    p
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    Ok(())
}

/// Parses the YAML event list, sorts ascending by date and writes pretty JSON plus a
/// manifest next to it.
pub fn build_events(yaml_path: &Path, json_path: &Path, now_epoch: u64) -> Result<EventsManifest> {
    let store = EventStore::load(yaml_path)?;
    ensure_parent(json_path)?;
    std::fs::write(json_path, serde_json::to_string_pretty(store.events())?)
        .with_context(|| format!("write {}", json_path.display()))?;

    let manifest = EventsManifest {
        source: yaml_path.display().to_string(),
        output: json_path.display().to_string(),
        hash_sha256: file_sha256(json_path)?,
        count: store.len(),
        date_min: store.events().first().map(|e| e.date),
        date_max: store.events().last().map(|e| e.date),
        generated_at_epoch: now_epoch,
    };
    std::fs::write(default_manifest_path(json_path), serde_json::to_string_pretty(&manifest)?)?;
    log(
        Level::Info,
        Domain::Data,
        "events_built",
        obj(&[
            ("output", v_str(&manifest.output)),
            ("count", json!(manifest.count)),
            ("sha256", v_str(&manifest.hash_sha256)),
        ]),
    );
    Ok(manifest)
}

// =============================================================================
// Validation
// =============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub event_count: usize,
    pub errors: Vec<String>,
    /// Consistency findings that do not fail validation
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

fn field<'a>(event: &'a Value, key: &str) -> Option<&'a Value> {
    event.as_mapping().and_then(|m| m.get(key))
}

fn event_title(event: &Value) -> String {
    field(event, "title")
        .and_then(Value::as_str)
        .unwrap_or("Unknown")
        .to_string()
}

/// Structural checks fail validation; consistency checks only warn. A YAML syntax
/// error is returned as `Err`.
pub fn validate_events_str(raw: &str) -> Result<ValidationReport> {
    let root: Value = serde_yaml::from_str(raw).context("yaml syntax")?;
    let mut report = ValidationReport::default();
    let Some(events) = root.as_sequence() else {
        report.errors.push("Root element must be a list of events".to_string());
        return Ok(report);
    };
    report.event_count = events.len();

    for (i, event) in events.iter().enumerate() {
        let prefix = format!("Event {} ('{}')", i + 1, event_title(event));
        for key in REQUIRED_FIELDS {
            if field(event, key).is_none() {
                report.errors.push(format!("{}: Missing required field '{}'", prefix, key));
            }
        }
        for key in LIST_FIELDS {
            if let Some(v) = field(event, key) {
                if !v.is_sequence() && !v.is_null() {
                    report.errors.push(format!("{}: '{}' must be a list", prefix, key));
                }
            }
        }
        if let Some(date) = field(event, "date") {
            let ok = date.as_str().and_then(parse_event_date).is_some();
            if !ok {
                report.errors.push(format!("{}: Invalid date format '{}'", prefix, yaml_scalar(date)));
            }
        }
        for key in ["organizations", "models"] {
            if field(event, key).and_then(Value::as_sequence).map(Vec::is_empty).unwrap_or(false) {
                report.warnings.push(format!(
                    "{}: '{}' is empty - consider removing if not applicable",
                    prefix, key
                ));
            }
        }
    }

    let mut title_counts: BTreeMap<String, usize> = BTreeMap::new();
    for event in events {
        if let Some(t) = field(event, "title").and_then(Value::as_str) {
            *title_counts.entry(t.to_string()).or_default() += 1;
        }
    }
    let duplicates: Vec<String> = title_counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(t, _)| t)
        .collect();
    if !duplicates.is_empty() {
        report.warnings.push(format!("Duplicate titles found: {}", duplicates.join(", ")));
    }
    Ok(report)
}

fn yaml_scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

pub fn validate_events(path: &Path) -> Result<ValidationReport> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    validate_events_str(&raw)
}

// =============================================================================
// Price history warmer
// =============================================================================

pub fn history_is_fresh(path: &Path, max_age_secs: u64, now: SystemTime) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|mtime| now.duration_since(mtime).ok())
        .map(|age| age.as_secs() < max_age_secs)
        .unwrap_or(false)
}

pub fn write_history(path: &Path, history: &HashMap<String, Vec<PricePoint>>) -> Result<()> {
    ensure_parent(path)?;
    let sorted: BTreeMap<&String, &Vec<PricePoint>> = history.iter().collect();
    std::fs::write(path, serde_json::to_string_pretty(&sorted)?)
        .with_context(|| format!("write {}", path.display()))
}

/// Fetches `HISTORY_START ..= today - window_days` per symbol, one call at a time with
/// `spacing` between calls. A failed symbol gets an empty series.
pub async fn fetch_history(
    source: &dyn CandleSource,
    symbols: &[String],
    today: NaiveDate,
    window_days: i64,
    spacing: std::time::Duration,
) -> HashMap<String, Vec<PricePoint>> {
    let from = NaiveDate::parse_from_str(HISTORY_START, "%Y-%m-%d").unwrap_or(today);
    let to = today - Duration::days(window_days);
    let mut out = HashMap::new();
    for (i, symbol) in symbols.iter().enumerate() {
        if i > 0 && !spacing.is_zero() {
            tokio::time::sleep(spacing).await;
        }
        let points = match source.daily_closes(symbol, from, to).await {
            Ok(points) => points,
            Err(err) => {
                log_fetch_degraded(symbol, &err.to_string());
                Vec::new()
            }
        };
        log(
            Level::Info,
            Domain::Data,
            "history_fetched",
            obj(&[("symbol", v_str(symbol)), ("points", json!(points.len()))]),
        );
        out.insert(symbol.clone(), points);
    }
    out
}

/// Full warmer run. Without a source, or when the fetched history cannot be written,
/// an empty `{}` history is left behind instead. Returns the number of symbols written.
pub async fn build_stock_history(
    source: Option<&dyn CandleSource>,
    symbols: &[String],
    out: &Path,
    today: NaiveDate,
    window_days: i64,
    spacing: std::time::Duration,
) -> Result<usize> {
    let Some(source) = source else {
        log(Level::Warn, Domain::Data, "history_no_source", obj(&[("path", v_str(&out.display().to_string()))]));
        write_history(out, &HashMap::new())?;
        return Ok(0);
    };
    let history = fetch_history(source, symbols, today, window_days, spacing).await;
    if let Err(err) = write_history(out, &history) {
        log(
            Level::Warn,
            Domain::Data,
            "history_write_failed",
            obj(&[("path", v_str(&out.display().to_string())), ("reason", v_str(&format!("{:#}", err)))]),
        );
        write_history(out, &HashMap::new())?;
        return Ok(0);
    }
    Ok(history.len())
}
