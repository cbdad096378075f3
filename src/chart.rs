//! Price series and the event markers overlaid on them.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tokio::sync::watch;

use crate::event::{EventId, EventStore};
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::render::format_thousands;
use serde_json::json;

pub const DEFAULT_STOCKS: [&str; 5] = ["NVDA", "GOOGL", "MSFT", "META", "AMD"];

const STOCK_COLORS: [(&str, &str); 5] = [
    ("NVDA", "#76B900"),
    ("GOOGL", "#4285F4"),
    ("MSFT", "#00A4EF"),
    ("META", "#0668E1"),
    ("AMD", "#ED1C24"),
];

const EVENT_MARKER_COLOR: &str = "#C84B31";
const LAYOFF_MARKER_COLOR: &str = "#B7410E";
/// Clicks further than this from any event do not select one.
const NEAREST_EVENT_MAX_DAYS: i64 = 7;

pub fn stock_color(symbol: &str) -> &'static str {
    STOCK_COLORS
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, c)| *c)
        .unwrap_or("#888888")
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub time: NaiveDate,
    pub value: f64,
}

/// Union keyed by date; `recent` wins on collisions. Result is ascending.
pub fn merge_series(historical: &[PricePoint], recent: &[PricePoint]) -> Vec<PricePoint> {
    let mut by_day: BTreeMap<NaiveDate, PricePoint> = BTreeMap::new();
    for p in historical.iter().chain(recent.iter()) {
        by_day.insert(p.time, *p);
    }
    by_day.into_values().collect()
}

/// Percent change from the first point. A zero base leaves the series unchanged.
pub fn normalize(points: &[PricePoint]) -> Vec<PricePoint> {
    let base = match points.first() {
        Some(p) if p.value != 0.0 => p.value,
        _ => return points.to_vec(),
    };
    points
        .iter()
        .map(|p| PricePoint { time: p.time, value: (p.value / base - 1.0) * 100.0 })
        .collect()
}

// =============================================================================
// Markers
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MarkerPosition {
    AboveBar,
    BelowBar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MarkerShape {
    Circle,
    ArrowDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub time: NaiveDate,
    pub position: MarkerPosition,
    pub color: String,
    pub shape: MarkerShape,
    pub text: String,
}

fn truncate_title(title: &str) -> String {
    if title.chars().count() > 30 {
        let head: String = title.chars().take(27).collect();
        format!("{}...", head)
    } else {
        title.to_string()
    }
}

/// Sorts by date (stable) and keeps the first marker per `(date, position, shape)`.
pub fn dedupe_markers(mut markers: Vec<Marker>) -> Vec<Marker> {
    markers.sort_by_key(|m| m.time);
    let mut seen = HashSet::new();
    markers.retain(|m| seen.insert((m.time, m.position, m.shape)));
    markers
}

/// A plotted line plus its markers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub symbol: String,
    pub color: &'static str,
    pub points: Vec<PricePoint>,
    pub markers: Vec<Marker>,
}

impl Series {
    pub fn new(symbol: &str, points: Vec<PricePoint>) -> Self {
        Self {
            symbol: symbol.to_string(),
            color: stock_color(symbol),
            points,
            markers: Vec::new(),
        }
    }

    /// Rejects markers whose timestamps go backwards.
    pub fn set_markers(&mut self, markers: Vec<Marker>) -> Result<()> {
        if let Some(w) = markers.windows(2).find(|w| w[1].time < w[0].time) {
            bail!("markers out of order: {} after {}", w[1].time, w[0].time);
        }
        self.markers = markers;
        Ok(())
    }
}

// =============================================================================
// Overlay
// =============================================================================

pub struct ChartOverlay {
    active: Vec<String>,
    series: BTreeMap<String, Series>,
    normalized: bool,
    expanded: bool,
    filters_changed: Option<watch::Receiver<u64>>,
}

impl ChartOverlay {
    pub fn new(stocks: &[String], expanded: bool, normalized: bool) -> Self {
        Self {
            active: stocks.to_vec(),
            series: BTreeMap::new(),
            normalized,
            expanded,
            filters_changed: None,
        }
    }

    /// Markers are recomputed whenever this signal fires.
    pub fn attach(&mut self, rx: watch::Receiver<u64>) {
        self.filters_changed = Some(rx);
    }

    pub fn active(&self) -> &[String] {
        &self.active
    }

    pub fn is_active(&self, symbol: &str) -> bool {
        self.active.iter().any(|s| s == symbol)
    }

    pub fn series(&self, symbol: &str) -> Option<&Series> {
        self.series.get(symbol)
    }

    pub fn loaded(&self) -> impl Iterator<Item = &Series> {
        self.series.values()
    }

    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    pub fn set_normalized(&mut self, normalized: bool) {
        self.normalized = normalized;
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn set_expanded(&mut self, expanded: bool) {
        self.expanded = expanded;
    }

    /// Installs data for an active symbol. Inactive symbols are ignored.
    pub fn set_series(&mut self, symbol: &str, points: Vec<PricePoint>) -> bool {
        if !self.is_active(symbol) || points.is_empty() {
            return false;
        }
        log(
            Level::Debug,
            Domain::Chart,
            "series_set",
            obj(&[("symbol", v_str(symbol)), ("points", json!(points.len()))]),
        );
        self.series.insert(symbol.to_string(), Series::new(symbol, points));
        true
    }

    /// Flips a stock on or off. Returns true when it is now active and needs data.
    pub fn toggle_stock(&mut self, symbol: &str) -> bool {
        if let Some(pos) = self.active.iter().position(|s| s == symbol) {
            self.active.remove(pos);
            self.series.remove(symbol);
            false
        } else {
            self.active.push(symbol.to_string());
            true
        }
    }

    /// Points as plotted, honouring the normalization flag.
    pub fn plotted(&self, symbol: &str) -> Option<Vec<PricePoint>> {
        self.series.get(symbol).map(|s| {
            if self.normalized {
                normalize(&s.points)
            } else {
                s.points.clone()
            }
        })
    }

    /// Markers per series symbol for the given visible set. Series that are not loaded
    /// get nothing.
    pub fn compute_markers(
        &self,
        store: &EventStore,
        visible: &BTreeSet<EventId>,
    ) -> BTreeMap<String, Vec<Marker>> {
        let mut out: BTreeMap<String, Vec<Marker>> = BTreeMap::new();
        let anchor = self.active.first().filter(|s| self.series.contains_key(*s));

        for e in visible.iter().filter_map(|id| store.get(*id)) {
            if let Some(symbol) = anchor {
                out.entry(symbol.clone()).or_default().push(Marker {
                    time: e.date,
                    position: MarkerPosition::AboveBar,
                    color: EVENT_MARKER_COLOR.to_string(),
                    shape: MarkerShape::Circle,
                    text: truncate_title(&e.title),
                });
            }
            let Some(layoffs) = &e.layoffs else { continue };
            if !self.series.contains_key(&layoffs.company) {
                continue;
            }
            let text = e
                .layoff_headcount()
                .map(|n| format!("-{}", format_thousands(n)))
                .unwrap_or_else(|| "Layoffs".to_string());
            out.entry(layoffs.company.clone()).or_default().push(Marker {
                time: e.date,
                position: MarkerPosition::BelowBar,
                color: LAYOFF_MARKER_COLOR.to_string(),
                shape: MarkerShape::ArrowDown,
                text,
            });
        }

        out.into_iter()
            .map(|(symbol, markers)| (symbol, dedupe_markers(markers)))
            .collect()
    }

    pub fn refresh_markers(&mut self, store: &EventStore, visible: &BTreeSet<EventId>) {
        let mut computed = self.compute_markers(store, visible);
        for (symbol, series) in self.series.iter_mut() {
            let markers = computed.remove(symbol).unwrap_or_default();
            if let Err(err) = series.set_markers(markers) {
                log(
                    Level::Warn,
                    Domain::Chart,
                    "markers_rejected",
                    obj(&[("symbol", v_str(symbol)), ("reason", v_str(&err.to_string()))]),
                );
            }
        }
    }

    /// Recomputes markers if the filters-changed signal fired since the last poll.
    pub fn poll(&mut self, store: &EventStore, visible: &BTreeSet<EventId>) -> bool {
        let fired = match self.filters_changed.as_mut() {
            Some(rx) if rx.has_changed().unwrap_or(false) => {
                rx.borrow_and_update();
                true
            }
            _ => false,
        };
        if fired {
            self.refresh_markers(store, visible);
        }
        fired
    }

    /// Closest visible event date to a clicked chart date, within a week.
    pub fn nearest_event(
        &self,
        store: &EventStore,
        visible: &BTreeSet<EventId>,
        clicked: NaiveDate,
    ) -> Option<NaiveDate> {
        visible
            .iter()
            .filter_map(|id| store.get(*id))
            .map(|e| (e.date, (e.date - clicked).num_days().abs()))
            .filter(|(_, diff)| *diff < NEAREST_EVENT_MAX_DAYS)
            .min_by_key(|(_, diff)| *diff)
            .map(|(date, _)| date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, Layoffs};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn pt(s: &str, v: f64) -> PricePoint {
        PricePoint { time: d(s), value: v }
    }

    fn stocks() -> Vec<String> {
        DEFAULT_STOCKS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_merge_recent_wins() {
        let merged = merge_series(
            &[pt("2024-01-02", 1.0), pt("2024-01-01", 0.5)],
            &[pt("2024-01-02", 2.0), pt("2024-01-03", 3.0)],
        );
        assert_eq!(merged, vec![pt("2024-01-01", 0.5), pt("2024-01-02", 2.0), pt("2024-01-03", 3.0)]);
    }

    #[test]
    fn test_normalize_from_first_point() {
        let n = normalize(&[pt("2024-01-01", 50.0), pt("2024-01-02", 75.0)]);
        assert_eq!(n[0].value, 0.0);
        assert_eq!(n[1].value, 50.0);
        assert!(normalize(&[]).is_empty());
    }

    #[test]
    fn test_markers_dedupe_and_layoffs() {
        let mut a = Event::new(d("2024-01-05"), "A very long event title that goes past thirty");
        a.tags = vec!["Model".into()];
        let b = Event::new(d("2024-01-05"), "Same day");
        let mut c = Event::new(d("2024-01-10"), "Cuts");
        c.layoffs = Some(Layoffs { company: "META".into(), headcount: Some(1200) });
        let store = EventStore::new(vec![a, b, c]);
        let visible: BTreeSet<EventId> = store.ids().collect();

        let mut chart = ChartOverlay::new(&stocks(), true, true);
        chart.set_series("NVDA", vec![pt("2024-01-01", 1.0)]);
        chart.set_series("META", vec![pt("2024-01-01", 1.0)]);
        let markers = chart.compute_markers(&store, &visible);

        let nvda = &markers["NVDA"];
        assert_eq!(nvda.len(), 2);
        assert_eq!(nvda[0].text, "A very long event title tha...");
        let meta = &markers["META"];
        assert_eq!(meta.len(), 1);
        assert_eq!(meta[0].text, "-1,200");
        assert_eq!(meta[0].shape, MarkerShape::ArrowDown);
    }

    #[test]
    fn test_zero_headcount_marker_has_no_count() {
        let mut c = Event::new(d("2024-01-10"), "Cuts");
        c.layoffs = Some(Layoffs { company: "META".into(), headcount: Some(0) });
        let store = EventStore::new(vec![c]);
        let visible: BTreeSet<EventId> = store.ids().collect();
        let mut chart = ChartOverlay::new(&stocks(), true, true);
        chart.set_series("META", vec![pt("2024-01-01", 1.0)]);
        assert_eq!(chart.compute_markers(&store, &visible)["META"][0].text, "Layoffs");
    }

    #[test]
    fn test_missing_series_is_noop() {
        let mut c = Event::new(d("2024-01-10"), "Cuts");
        c.layoffs = Some(Layoffs { company: "INTC".into(), headcount: Some(5) });
        let store = EventStore::new(vec![c]);
        let visible: BTreeSet<EventId> = store.ids().collect();
        let mut chart = ChartOverlay::new(&stocks(), true, true);
        assert!(chart.compute_markers(&store, &visible).is_empty());
        chart.refresh_markers(&store, &visible);
        assert_eq!(chart.loaded().count(), 0);
    }

    #[test]
    fn test_out_of_order_markers_rejected() {
        let mut s = Series::new("NVDA", vec![]);
        let m = |t: &str| Marker {
            time: d(t),
            position: MarkerPosition::AboveBar,
            color: EVENT_MARKER_COLOR.into(),
            shape: MarkerShape::Circle,
            text: String::new(),
        };
        assert!(s.set_markers(vec![m("2024-01-02"), m("2024-01-01")]).is_err());
        assert!(s.markers.is_empty());
        assert!(s.set_markers(vec![m("2024-01-01"), m("2024-01-02")]).is_ok());
    }

    #[test]
    fn test_toggle_stock_drops_series() {
        let mut chart = ChartOverlay::new(&stocks(), true, false);
        chart.set_series("AMD", vec![pt("2024-01-01", 1.0)]);
        assert!(!chart.toggle_stock("AMD"));
        assert!(chart.series("AMD").is_none());
        assert!(!chart.set_series("AMD", vec![pt("2024-01-01", 1.0)]));
        assert!(chart.toggle_stock("AMD"));
        assert!(chart.is_active("AMD"));
    }

    #[test]
    fn test_nearest_event_within_a_week() {
        let store = EventStore::new(vec![
            Event::new(d("2024-01-05"), "a"),
            Event::new(d("2024-03-01"), "b"),
        ]);
        let visible: BTreeSet<EventId> = store.ids().collect();
        let chart = ChartOverlay::new(&stocks(), true, true);
        assert_eq!(chart.nearest_event(&store, &visible, d("2024-01-08")), Some(d("2024-01-05")));
        assert_eq!(chart.nearest_event(&store, &visible, d("2024-02-01")), None);
    }
}
