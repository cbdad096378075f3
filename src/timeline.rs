//! The interactive session: every user action goes through here and leaves the
//! filter, grouping and chart state consistent before returning.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

use crate::chart::{ChartOverlay, PricePoint, Series};
use crate::event::{Category, EventId, EventStore};
use crate::filter::{ChangeOutcome, FilterControl, FilterEngine, FilterSelection};
use crate::grouping::{BucketView, GroupingController, GroupingMode};
use crate::html::{render_page, PageInput};
use crate::logging::{log, obj, v_str, Domain, Level, ProfileScope};
use crate::nav::{navigate, Key};
use crate::render::{Card, RenderedTimeline, Renderer};
use crate::storage::UiPrefs;
use serde_json::json;

#[derive(Debug, Clone, Serialize)]
pub struct ChartView {
    pub active: Vec<String>,
    pub normalized: bool,
    pub expanded: bool,
    pub series: Vec<Series>,
}

/// Serializable snapshot of the whole session.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineView {
    pub generation: u64,
    pub grouping: GroupingMode,
    pub selection: FilterSelection,
    pub visible_count: usize,
    pub total_count: usize,
    pub controls: Vec<FilterControl>,
    pub buckets: Vec<BucketView>,
    pub cards: Vec<Card>,
    pub chart: ChartView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus: Option<EventId>,
}

pub struct Timeline {
    store: EventStore,
    rendered: RenderedTimeline,
    engine: FilterEngine,
    grouping: GroupingController,
    chart: ChartOverlay,
    prefs: UiPrefs,
    focus: Option<EventId>,
}

impl Timeline {
    pub fn new(store: EventStore, prefs: UiPrefs, stocks: &[String]) -> Self {
        let _p = ProfileScope::new(Domain::System, "timeline_init");
        let rendered = Renderer::render(&store);
        let engine = FilterEngine::new(&store, rendered.universe.clone());
        let grouping = GroupingController::new(&store, rendered.month_buckets.clone(), prefs.grouping);
        let mut chart = ChartOverlay::new(stocks, prefs.chart_open, prefs.chart_normalized);
        chart.attach(engine.subscribe());
        log(
            Level::Info,
            Domain::System,
            "timeline_ready",
            obj(&[
                ("events", json!(store.len())),
                ("months", json!(rendered.month_buckets.len())),
                ("grouping", v_str(prefs.grouping.as_str())),
            ]),
        );
        Self { store, rendered, engine, grouping, chart, prefs, focus: None }
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn cards(&self) -> &[Card] {
        &self.rendered.cards
    }

    pub fn engine(&self) -> &FilterEngine {
        &self.engine
    }

    pub fn chart(&self) -> &ChartOverlay {
        &self.chart
    }

    pub fn grouping(&self) -> GroupingMode {
        self.grouping.mode()
    }

    /// Current preferences, ready to be persisted.
    pub fn prefs(&self) -> UiPrefs {
        self.prefs
    }

    pub fn focus(&self) -> Option<EventId> {
        self.focus
    }

    pub fn select(&mut self, category: Category, value: Option<&str>) -> ChangeOutcome {
        let outcome = self.engine.select(&self.store, category, value);
        self.after_filter_change();
        outcome
    }

    pub fn apply_selection(&mut self, selection: &FilterSelection) -> ChangeOutcome {
        let outcome = self.engine.apply_selection(&self.store, selection);
        self.after_filter_change();
        outcome
    }

    pub fn clear_filters(&mut self) {
        self.engine.clear_all(&self.store);
        self.after_filter_change();
    }

    fn after_filter_change(&mut self) {
        self.chart.poll(&self.store, self.engine.visible());
        if self.focus.is_some_and(|id| !self.engine.is_visible(id)) {
            self.focus = None;
        }
    }

    /// Returns whether the displayed mode changed.
    pub fn set_grouping(&mut self, mode: GroupingMode) -> bool {
        let changed = self.grouping.set_mode(&self.store, mode);
        self.prefs.grouping = mode;
        self.engine.apply(&self.store);
        changed
    }

    /// Returns true when the stock became active and still needs its series loaded.
    pub fn toggle_stock(&mut self, symbol: &str) -> bool {
        let needs_data = self.chart.toggle_stock(symbol);
        self.chart.refresh_markers(&self.store, self.engine.visible());
        needs_data
    }

    pub fn load_series(&mut self, symbol: &str, points: Vec<PricePoint>) -> bool {
        let installed = self.chart.set_series(symbol, points);
        if installed {
            self.chart.refresh_markers(&self.store, self.engine.visible());
        }
        installed
    }

    pub fn load_all_series(&mut self, mut series: HashMap<String, Vec<PricePoint>>) {
        let active: Vec<String> = self.chart.active().to_vec();
        for symbol in active {
            if let Some(points) = series.remove(&symbol) {
                self.chart.set_series(&symbol, points);
            }
        }
        self.chart.refresh_markers(&self.store, self.engine.visible());
    }

    pub fn set_normalized(&mut self, normalized: bool) {
        self.chart.set_normalized(normalized);
        self.prefs.chart_normalized = normalized;
    }

    pub fn set_expanded(&mut self, expanded: bool) {
        self.chart.set_expanded(expanded);
        self.prefs.chart_open = expanded;
    }

    pub fn layout(&self) -> Vec<BucketView> {
        self.grouping.layout(&self.store, self.engine.visible())
    }

    /// Moves focus and returns the newly focused card, if the key led anywhere.
    pub fn navigate(&mut self, key: Key) -> Option<EventId> {
        let next = navigate(&self.layout(), self.focus, key)?;
        self.focus = Some(next);
        Some(next)
    }

    pub fn nearest_event(&self, clicked: NaiveDate) -> Option<NaiveDate> {
        self.chart.nearest_event(&self.store, self.engine.visible(), clicked)
    }

    pub fn view(&self) -> TimelineView {
        let series = self
            .chart
            .loaded()
            .map(|s| Series {
                points: self.chart.plotted(&s.symbol).unwrap_or_default(),
                ..s.clone()
            })
            .collect();
        TimelineView {
            generation: self.engine.generation(),
            grouping: self.grouping.mode(),
            selection: self.engine.selection().clone(),
            visible_count: self.engine.visible().len(),
            total_count: self.store.len(),
            controls: self.engine.controls(),
            buckets: self.layout(),
            cards: self.rendered.cards.clone(),
            chart: ChartView {
                active: self.chart.active().to_vec(),
                normalized: self.chart.is_normalized(),
                expanded: self.chart.is_expanded(),
                series,
            },
            focus: self.focus,
        }
    }

    pub fn render_html(&self) -> String {
        let controls = self.engine.controls();
        let layout = self.layout();
        render_page(&PageInput {
            store: &self.store,
            cards: &self.rendered.cards,
            controls: &controls,
            layout: &layout,
            mode: self.grouping.mode(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, Layoffs};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn session() -> Timeline {
        let mut a = Event::new(d("2024-01-05"), "GPT launch");
        a.organizations = vec!["OpenAI".into()];
        a.tags = vec!["Model".into()];
        let mut b = Event::new(d("2024-01-05"), "Meta cuts");
        b.organizations = vec!["Meta".into()];
        b.tags = vec!["Economic".into()];
        b.layoffs = Some(Layoffs { company: "META".into(), headcount: Some(1200) });
        let c = Event::new(d("2024-02-20"), "Policy");
        let stocks: Vec<String> = vec!["NVDA".into(), "META".into()];
        Timeline::new(EventStore::new(vec![a, b, c]), UiPrefs::default(), &stocks)
    }

    #[test]
    fn test_markers_follow_filters() {
        let mut t = session();
        t.load_series("NVDA", vec![PricePoint { time: d("2024-01-02"), value: 1.0 }]);
        t.load_series("META", vec![PricePoint { time: d("2024-01-02"), value: 2.0 }]);
        assert_eq!(t.chart().series("META").unwrap().markers.len(), 1);
        t.select(Category::Organizations, Some("OpenAI"));
        assert!(t.chart().series("META").unwrap().markers.is_empty());
        assert_eq!(t.chart().series("NVDA").unwrap().markers.len(), 1);
    }

    #[test]
    fn test_grouping_persists_into_prefs() {
        let mut t = session();
        assert!(t.set_grouping(GroupingMode::Week));
        assert_eq!(t.prefs().grouping, GroupingMode::Week);
        assert_eq!(t.view().grouping, GroupingMode::Week);
    }

    #[test]
    fn test_mode_switch_reruns_layout_passes() {
        let tagged = |date: &str, tag: &str| {
            let mut e = Event::new(d(date), tag);
            e.tags = vec![tag.into()];
            e
        };
        let store = EventStore::new(vec![
            tagged("2024-01-29", "Model"),
            tagged("2024-01-29", "Model"),
            tagged("2024-01-31", "Policy"),
            tagged("2024-02-01", "Model"),
            tagged("2024-02-14", "Policy"),
        ]);
        let mut t = Timeline::new(store, UiPrefs::default(), &[]);
        t.select(Category::Tags, Some("Model"));
        let monthly = t.layout();

        assert!(t.set_grouping(GroupingMode::Week));
        let weekly = t.layout();
        let keys: Vec<String> = weekly.iter().map(|b| b.key.to_string()).collect();
        assert_eq!(keys, vec!["2024-01-29", "2024-02-12"]);

        let first = &weekly[0];
        assert!(!first.empty);
        assert_eq!(first.visible_ids().collect::<Vec<_>>(), vec![EventId(0), EventId(1), EventId(3)]);
        assert!(!first.cards[2].visible);
        assert_eq!(first.cards[0].stack.map(|s| s.rank), Some(0));
        assert_eq!(first.cards[1].stack.map(|s| (s.z_index, s.offset_px)), Some((11, 4)));
        assert!(first.cards[3].stack.is_none());
        assert!(weekly[1].empty);
        assert!(t.render_html().contains("weekly-group empty-group"));

        assert!(t.set_grouping(GroupingMode::Month));
        assert_eq!(t.layout(), monthly);
    }

    #[test]
    fn test_focus_dropped_when_filtered_out() {
        let mut t = session();
        assert_eq!(t.navigate(Key::Right), Some(EventId(0)));
        t.select(Category::Organizations, Some("Meta"));
        assert_eq!(t.focus(), None);
    }

    #[test]
    fn test_html_marks_stacked_and_filtered() {
        let mut t = session();
        let html = t.render_html();
        assert!(html.contains("stacked-event"));
        t.select(Category::Tags, Some("Model"));
        let html = t.render_html();
        assert!(html.contains("filtered-out"));
        assert!(html.contains("empty-group"));
        assert!(html.contains("class=\"scaffolded\""));
    }
}
