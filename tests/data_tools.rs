use aitimeline::chart::PricePoint;
use aitimeline::data::{
    build_events, build_stock_history, default_manifest_path, history_is_fresh, validate_events, write_history,
};
use aitimeline::feed::CandleSource;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use aitimeline::event::EventStore;
use aitimeline::feed::load_history;
use aitimeline::storage::{StateStore, UiPrefs};
use aitimeline::grouping::GroupingMode;
use std::collections::HashMap;
use std::fs;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const YAML: &str = r#"
- title: Second
  date: 2024-03-01
  description: later
  tags: [Policy]
- title: First
  date: 2023-11-30
  description: earlier
  tags: [Model]
  organizations: [OpenAI]
  layoffs:
    company: META
    headcount: 1200
"#;

#[test]
fn build_events_sorts_and_writes_manifest() {
    let dir = TempDir::new().unwrap();
    let yaml = dir.path().join("events.yaml");
    let json = dir.path().join("out").join("events.json");
    fs::write(&yaml, YAML).unwrap();

    let manifest = build_events(&yaml, &json, 1_700_000_000).unwrap();
    assert_eq!(manifest.count, 2);
    assert_eq!(manifest.hash_sha256.len(), 64);
    assert!(default_manifest_path(&json).exists());

    let store = EventStore::load(&json).unwrap();
    assert_eq!(store.events()[0].title, "First");
    assert_eq!(store.events()[0].layoff_headcount(), Some(1200));
}

#[test]
fn validate_accepts_good_file() {
    let dir = TempDir::new().unwrap();
    let yaml = dir.path().join("events.yaml");
    fs::write(&yaml, YAML).unwrap();
    let report = validate_events(&yaml).unwrap();
    assert!(report.is_ok());
    assert_eq!(report.event_count, 2);
    assert!(report.warnings.is_empty());
}

#[test]
fn history_freshness_and_missing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stock-history.json");
    assert!(!history_is_fresh(&path, 3600, SystemTime::now()));
    assert!(load_history(&path).unwrap().is_empty());

    write_history(&path, &HashMap::new()).unwrap();
    assert!(history_is_fresh(&path, 3600, SystemTime::now()));
    assert!(!history_is_fresh(&path, 3600, SystemTime::now() + Duration::from_secs(7200)));
    assert!(load_history(&path).unwrap().is_empty());
}

#[test]
fn prefs_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("timeline.sqlite");
    let db = db.to_str().unwrap();
    {
        let mut s = StateStore::new(db).unwrap();
        s.init().unwrap();
        s.save_prefs(&UiPrefs { grouping: GroupingMode::Week, chart_open: false, chart_normalized: false })
            .unwrap();
    }
    let mut s = StateStore::new(db).unwrap();
    s.init().unwrap();
    let prefs = s.load_prefs().unwrap();
    assert_eq!(prefs.grouping, GroupingMode::Week);
    assert!(!prefs.chart_open);
}

struct DownSource;

#[async_trait]
impl CandleSource for DownSource {
    async fn daily_closes(&self, _symbol: &str, _from: NaiveDate, _to: NaiveDate) -> Result<Vec<PricePoint>> {
        Err(anyhow!("upstream down"))
    }
}

#[tokio::test]
async fn stock_history_without_key_writes_empty_object() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data").join("stock-history.json");
    let today = NaiveDate::from_ymd_opt(2025, 2, 5).unwrap();
    let written = build_stock_history(None, &["NVDA".to_string()], &path, today, 30, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(written, 0);
    assert_eq!(fs::read_to_string(&path).unwrap().trim(), "{}");
}

#[tokio::test]
async fn stock_history_upstream_failure_still_writes_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stock-history.json");
    let today = NaiveDate::from_ymd_opt(2025, 2, 5).unwrap();
    let symbols = vec!["NVDA".to_string(), "AMD".to_string()];
    build_stock_history(Some(&DownSource as &dyn CandleSource), &symbols, &path, today, 30, Duration::ZERO)
        .await
        .unwrap();
    let history = load_history(&path).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history["AMD"].is_empty());
}
