//! Cards, month buckets and filter option universes derived from the event store.

use chrono::{Datelike, NaiveDate};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

use crate::event::{Category, Event, EventId, EventStore};

pub const NEUTRAL_ACCENT: &str = "#D4D0C8";

const TAG_COLORS: [(&str, &str); 11] = [
    ("Model", "#C84B31"),
    ("Policy", "#2B5BA7"),
    ("Social", "#B8860B"),
    ("Corporate", "#505050"),
    ("Research", "#2E7D5B"),
    ("Product", "#7B3EA3"),
    ("Economic", "#C87B31"),
    ("Safety", "#B7410E"),
    ("Partnership", "#5B7BA7"),
    ("Technical", "#6B6B6B"),
    ("Legal", "#6B4F3A"),
];

pub fn accent_for(tag: Option<&str>) -> &'static str {
    tag.and_then(|t| TAG_COLORS.iter().find(|(name, _)| *name == t))
        .map(|(_, color)| *color)
        .unwrap_or(NEUTRAL_ACCENT)
}

/// `1200` → `1,200`
pub fn format_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `Jan 5, 2024`
pub fn format_short_date(date: NaiveDate) -> String {
    date.format("%b %-d, %Y").to_string()
}

pub fn iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

// =============================================================================
// Option sets
// =============================================================================

/// Sorted, de-duplicated label values per category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSets {
    sets: [BTreeSet<String>; 5],
}

impl OptionSets {
    pub fn collect<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut out = Self::default();
        for e in events {
            out.add_event(e);
        }
        out
    }

    pub fn add_event(&mut self, event: &Event) {
        for c in Category::ALL {
            for label in event.labels(c) {
                self.sets[c.index()].insert(label.clone());
            }
        }
    }

    pub fn get(&self, category: Category) -> &BTreeSet<String> {
        &self.sets[category.index()]
    }

    pub fn contains(&self, category: Category, value: &str) -> bool {
        self.sets[category.index()].contains(value)
    }

    pub fn len(&self, category: Category) -> usize {
        self.sets[category.index()].len()
    }
}

// =============================================================================
// Buckets
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BucketKey {
    Month { year: i32, month: u32 },
    /// Monday the week starts on
    Week(NaiveDate),
}

impl BucketKey {
    pub fn month_of(date: NaiveDate) -> Self {
        BucketKey::Month { year: date.year(), month: date.month() }
    }

    pub fn label(&self) -> String {
        match self {
            BucketKey::Month { year, month } => NaiveDate::from_ymd_opt(*year, *month, 1)
                .map(|d| d.format("%B %Y").to_string())
                .unwrap_or_else(|| self.to_string()),
            BucketKey::Week(start) => format_short_date(*start),
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Month { year, month } => write!(f, "{:04}-{:02}", year, month),
            BucketKey::Week(start) => write!(f, "{}", start.format("%Y-%m-%d")),
        }
    }
}

impl Serialize for BucketKey {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

/// A group of events sharing a month or an ISO week, in event order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateBucket {
    pub key: BucketKey,
    pub label: String,
    pub events: Vec<EventId>,
}

/// Groups ids by `key_fn`, buckets ascending by key, events keep store order.
pub fn bucket_by<F>(store: &EventStore, key_fn: F) -> Vec<DateBucket>
where
    F: Fn(&Event) -> BucketKey,
{
    let mut buckets: std::collections::BTreeMap<BucketKey, Vec<EventId>> = Default::default();
    for (id, e) in store.iter() {
        buckets.entry(key_fn(e)).or_default().push(id);
    }
    buckets
        .into_iter()
        .map(|(key, events)| DateBucket { key, label: key.label(), events })
        .collect()
}

pub fn month_buckets(store: &EventStore) -> Vec<DateBucket> {
    bucket_by(store, |e| BucketKey::month_of(e.date))
}

// =============================================================================
// Cards
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardSummary {
    pub date: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layoff_badge: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataLine {
    pub label: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardDetail {
    pub date: String,
    pub title: String,
    pub description: String,
    pub metadata: Vec<MetadataLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Card {
    pub id: EventId,
    pub date: String,
    pub accent: &'static str,
    pub summary: CardSummary,
    pub detail: CardDetail,
}

/// Detail lines appear in this order, each only when non-empty.
const DETAIL_ORDER: [Category; 4] = [
    Category::Organizations,
    Category::Models,
    Category::ImpactAreas,
    Category::KeyFigures,
];

pub fn build_card(id: EventId, event: &Event) -> Card {
    let date = format_short_date(event.date);
    let layoff_badge = event
        .layoff_headcount()
        .map(|n| format!("-{} jobs", format_thousands(n)));
    let metadata = DETAIL_ORDER
        .iter()
        .filter(|c| !event.labels(**c).is_empty())
        .map(|c| MetadataLine { label: c.label(), value: event.labels(*c).join(", ") })
        .collect();

    Card {
        id,
        date: iso_date(event.date),
        accent: accent_for(event.primary_tag()),
        summary: CardSummary { date: date.clone(), title: event.title.clone(), layoff_badge },
        detail: CardDetail {
            date,
            title: event.title.clone(),
            description: event.description.clone(),
            metadata,
            link: event.link.clone().filter(|l| !l.is_empty()),
            tags: event.tags.clone(),
        },
    }
}

/// Output of the initial render: one card per event, month buckets, option universe.
#[derive(Debug, Clone)]
pub struct RenderedTimeline {
    pub cards: Vec<Card>,
    pub month_buckets: Vec<DateBucket>,
    pub universe: OptionSets,
}

pub struct Renderer;

impl Renderer {
    pub fn render(store: &EventStore) -> RenderedTimeline {
        RenderedTimeline {
            cards: store.iter().map(|(id, e)| build_card(id, e)).collect(),
            month_buckets: month_buckets(store),
            universe: OptionSets::collect(store.events()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Layoffs;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_format_thousands() {
        assert_eq!(format_thousands(0), "0");
        assert_eq!(format_thousands(999), "999");
        assert_eq!(format_thousands(1200), "1,200");
        assert_eq!(format_thousands(12_000_000), "12,000,000");
    }

    #[test]
    fn test_month_buckets_sorted_with_labels() {
        let store = EventStore::new(vec![
            Event::new(d("2024-02-10"), "c"),
            Event::new(d("2023-12-31"), "a"),
            Event::new(d("2024-02-01"), "b"),
        ]);
        let buckets = month_buckets(&store);
        let labels: Vec<&str> = buckets.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["December 2023", "February 2024"]);
        assert_eq!(buckets[1].events, vec![EventId(1), EventId(2)]);
        assert_eq!(buckets[1].key.to_string(), "2024-02");
    }

    #[test]
    fn test_layoff_badge_and_detail_lines() {
        let mut e = Event::new(d("2024-01-10"), "Cuts");
        e.organizations = vec!["Meta".into()];
        e.tags = vec!["Economic".into()];
        e.layoffs = Some(Layoffs { company: "META".into(), headcount: Some(1200) });
        let card = build_card(EventId(0), &e);
        assert_eq!(card.summary.layoff_badge.as_deref(), Some("-1,200 jobs"));
        assert_eq!(card.summary.date, "Jan 10, 2024");
        assert_eq!(card.detail.metadata.len(), 1);
        assert_eq!(card.detail.metadata[0].label, "Organizations");
        assert_eq!(card.accent, "#C87B31");
        assert!(card.detail.link.is_none());
    }

    #[test]
    fn test_layoff_without_headcount_has_no_badge() {
        let mut e = Event::new(d("2024-01-10"), "Cuts");
        e.layoffs = Some(Layoffs { company: "META".into(), headcount: None });
        assert!(build_card(EventId(0), &e).summary.layoff_badge.is_none());
        e.layoffs = Some(Layoffs { company: "META".into(), headcount: Some(0) });
        assert!(build_card(EventId(0), &e).summary.layoff_badge.is_none());
    }

    #[test]
    fn test_universe_is_sorted_and_distinct() {
        let mut a = Event::new(d("2024-01-01"), "a");
        a.tags = vec!["Policy".into(), "Model".into()];
        let mut b = Event::new(d("2024-01-02"), "b");
        b.tags = vec!["Model".into()];
        let store = EventStore::new(vec![a, b]);
        let rendered = Renderer::render(&store);
        let tags: Vec<&String> = rendered.universe.get(Category::Tags).iter().collect();
        assert_eq!(tags, vec!["Model", "Policy"]);
        assert_eq!(rendered.universe.len(Category::Models), 0);
        assert_eq!(rendered.cards.len(), 2);
    }

    #[test]
    fn test_unknown_tag_gets_neutral_accent() {
        assert_eq!(accent_for(Some("Weather")), NEUTRAL_ACCENT);
        assert_eq!(accent_for(None), NEUTRAL_ACCENT);
    }
}
