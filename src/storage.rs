use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::chart::PricePoint;
use crate::grouping::GroupingMode;

const KEY_GROUPING: &str = "grouping_mode";
const KEY_CHART_OPEN: &str = "chart_open";
const KEY_CHART_NORMALIZED: &str = "chart_normalized";

/// UI preferences read at startup and written on toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UiPrefs {
    pub grouping: GroupingMode,
    pub chart_open: bool,
    pub chart_normalized: bool,
}

impl Default for UiPrefs {
    fn default() -> Self {
        Self {
            grouping: GroupingMode::Month,
            chart_open: true,
            chart_normalized: true,
        }
    }
}

/// Preferences plus the time-stamped recent-price cache.
pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("open sqlite {}", path))?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS prefs (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS price_cache (
                symbol TEXT PRIMARY KEY,
                fetched_at INTEGER NOT NULL,
                data TEXT NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn get_pref(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM prefs WHERE key = ?1", params![key], |r| r.get(0))
            .optional()?)
    }

    pub fn set_pref(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO prefs (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Missing or unreadable values fall back to the defaults.
    pub fn load_prefs(&self) -> Result<UiPrefs> {
        let defaults = UiPrefs::default();
        let flag = |key: &str, default: bool| -> Result<bool> {
            Ok(self.get_pref(key)?.map(|v| v != "false").unwrap_or(default))
        };
        Ok(UiPrefs {
            grouping: self
                .get_pref(KEY_GROUPING)?
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.grouping),
            chart_open: flag(KEY_CHART_OPEN, defaults.chart_open)?,
            chart_normalized: flag(KEY_CHART_NORMALIZED, defaults.chart_normalized)?,
        })
    }

    pub fn save_prefs(&mut self, prefs: &UiPrefs) -> Result<()> {
        self.set_pref(KEY_GROUPING, prefs.grouping.as_str())?;
        self.set_pref(KEY_CHART_OPEN, if prefs.chart_open { "true" } else { "false" })?;
        self.set_pref(KEY_CHART_NORMALIZED, if prefs.chart_normalized { "true" } else { "false" })?;
        Ok(())
    }

    /// Cached window if younger than `ttl_secs` at `now`.
    pub fn cached_prices(&self, symbol: &str, now: i64, ttl_secs: u64) -> Result<Option<Vec<PricePoint>>> {
        let row: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT fetched_at, data FROM price_cache WHERE symbol = ?1",
                params![symbol],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        match row {
            Some((fetched_at, data)) if now.saturating_sub(fetched_at) <= ttl_secs as i64 => {
                // A corrupt record reads as a miss
                Ok(serde_json::from_str(&data).ok())
            }
            _ => Ok(None),
        }
    }

    /// Last write wins by `fetched_at`; an older fetch never replaces a newer record.
    /// Returns whether the record was written.
    pub fn put_prices(&mut self, symbol: &str, fetched_at: i64, points: &[PricePoint]) -> Result<bool> {
        let data = serde_json::to_string(points)?;
        let changed = self.conn.execute(
            "INSERT INTO price_cache (symbol, fetched_at, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(symbol) DO UPDATE SET fetched_at = excluded.fetched_at, data = excluded.data
             WHERE excluded.fetched_at >= price_cache.fetched_at",
            params![symbol, fetched_at, data],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn store() -> StateStore {
        let mut s = StateStore::in_memory().unwrap();
        s.init().unwrap();
        s
    }

    fn points(v: f64) -> Vec<PricePoint> {
        vec![PricePoint { time: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), value: v }]
    }

    #[test]
    fn test_prefs_default_when_absent() {
        assert_eq!(store().load_prefs().unwrap(), UiPrefs::default());
    }

    #[test]
    fn test_prefs_roundtrip() {
        let mut s = store();
        let prefs = UiPrefs { grouping: GroupingMode::Week, chart_open: false, chart_normalized: true };
        s.save_prefs(&prefs).unwrap();
        assert_eq!(s.load_prefs().unwrap(), prefs);
    }

    #[test]
    fn test_unknown_grouping_falls_back() {
        let mut s = store();
        s.set_pref(KEY_GROUPING, "decade").unwrap();
        assert_eq!(s.load_prefs().unwrap().grouping, GroupingMode::Month);
    }

    #[test]
    fn test_price_cache_ttl() {
        let mut s = store();
        s.put_prices("NVDA", 1_000, &points(1.0)).unwrap();
        assert!(s.cached_prices("NVDA", 1_000 + 86_400, 86_400).unwrap().is_some());
        assert!(s.cached_prices("NVDA", 1_000 + 86_401, 86_400).unwrap().is_none());
        assert!(s.cached_prices("MSFT", 1_000, 86_400).unwrap().is_none());
    }

    #[test]
    fn test_stale_write_ignored() {
        let mut s = store();
        assert!(s.put_prices("NVDA", 2_000, &points(2.0)).unwrap());
        assert!(!s.put_prices("NVDA", 1_000, &points(1.0)).unwrap());
        let cached = s.cached_prices("NVDA", 2_000, 86_400).unwrap().unwrap();
        assert_eq!(cached[0].value, 2.0);
    }
}
