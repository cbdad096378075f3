//! Timeline event records and the immutable store they are loaded into.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::logging::{log, obj, Domain, Level};
use serde_json::json;

/// Structured layoff sub-record. `company` is the ticker the chart keys on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layoffs {
    #[serde(default)]
    pub company: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headcount: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(with = "day_format")]
    pub date: NaiveDate,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "labels", skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
    #[serde(default, deserialize_with = "labels", skip_serializing_if = "Vec::is_empty")]
    pub organizations: Vec<String>,
    #[serde(default, deserialize_with = "labels", skip_serializing_if = "Vec::is_empty")]
    pub key_figures: Vec<String>,
    #[serde(default, deserialize_with = "labels", skip_serializing_if = "Vec::is_empty")]
    pub impact_areas: Vec<String>,
    #[serde(default, deserialize_with = "labels", skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layoffs: Option<Layoffs>,
}

impl Event {
    pub fn new(date: NaiveDate, title: impl Into<String>) -> Self {
        Self {
            date,
            title: title.into(),
            description: String::new(),
            models: Vec::new(),
            organizations: Vec::new(),
            key_figures: Vec::new(),
            impact_areas: Vec::new(),
            tags: Vec::new(),
            link: None,
            layoffs: None,
        }
    }

    pub fn labels(&self, category: Category) -> &[String] {
        match category {
            Category::Models => &self.models,
            Category::Organizations => &self.organizations,
            Category::KeyFigures => &self.key_figures,
            Category::ImpactAreas => &self.impact_areas,
            Category::Tags => &self.tags,
        }
    }

    pub fn has_label(&self, category: Category, value: &str) -> bool {
        self.labels(category).iter().any(|l| l == value)
    }

    /// First tag; only used to pick an accent colour.
    pub fn primary_tag(&self) -> Option<&str> {
        self.tags.first().map(String::as_str)
    }

    /// Known, non-zero headcount of a layoff event.
    pub fn layoff_headcount(&self) -> Option<u64> {
        self.layoffs.as_ref().and_then(|l| l.headcount).filter(|n| *n > 0)
    }
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp, keeps the day.
pub fn parse_event_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.date())
}

mod day_format {
    use super::parse_event_date;
    use chrono::NaiveDate;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&date.format("%Y-%m-%d").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(d)?;
        parse_event_date(&raw).ok_or_else(|| D::Error::custom(format!("invalid date '{}'", raw)))
    }
}

/// Null or missing lists read as empty; duplicates are dropped keeping first occurrence.
fn labels<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let raw: Option<Vec<String>> = Option::deserialize(d)?;
    Ok(dedup_labels(raw.unwrap_or_default()))
}

pub(crate) fn dedup_labels(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

// =============================================================================
// Categories
// =============================================================================

/// One of the five filterable attribute dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Models,
    Organizations,
    KeyFigures,
    ImpactAreas,
    Tags,
}

impl Category {
    /// Fixed processing order, also used for stale-selection tie-breaks.
    pub const ALL: [Category; 5] = [
        Category::Models,
        Category::Organizations,
        Category::KeyFigures,
        Category::ImpactAreas,
        Category::Tags,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Models => "models",
            Category::Organizations => "organizations",
            Category::KeyFigures => "key_figures",
            Category::ImpactAreas => "impact_areas",
            Category::Tags => "tags",
        }
    }

    pub fn control_id(&self) -> &'static str {
        match self {
            Category::Models => "model-filter",
            Category::Organizations => "organization-filter",
            Category::KeyFigures => "key-figure-filter",
            Category::ImpactAreas => "impact-area-filter",
            Category::Tags => "tag-filter",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Category::Models => "Models",
            Category::Organizations => "Organizations",
            Category::KeyFigures => "Key Figures",
            Category::ImpactAreas => "Impact Areas",
            Category::Tags => "Tags",
        }
    }

    pub fn data_attr(&self) -> &'static str {
        match self {
            Category::Models => "data-models",
            Category::Organizations => "data-organizations",
            Category::KeyFigures => "data-key-figures",
            Category::ImpactAreas => "data-impact-areas",
            Category::Tags => "data-tags",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s || c.control_id() == s)
            .or(match s {
                "keyFigures" => Some(Category::KeyFigures),
                "impactAreas" => Some(Category::ImpactAreas),
                _ => None,
            })
            .ok_or_else(|| anyhow::anyhow!("unknown filter category '{}'", s))
    }
}

// =============================================================================
// EventStore
// =============================================================================

/// Index of an event inside its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub usize);

/// Ordered, immutable event collection; ascending by date, ties keep input order.
#[derive(Debug, Clone, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new(mut events: Vec<Event>) -> Self {
        for e in events.iter_mut() {
            for c in Category::ALL {
                let list = match c {
                    Category::Models => &mut e.models,
                    Category::Organizations => &mut e.organizations,
                    Category::KeyFigures => &mut e.key_figures,
                    Category::ImpactAreas => &mut e.impact_areas,
                    Category::Tags => &mut e.tags,
                };
                *list = dedup_labels(std::mem::take(list));
            }
        }
        events.sort_by_key(|e| e.date);
        Self { events }
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let events: Vec<Event> = serde_json::from_str(raw).context("parse events json")?;
        Ok(Self::new(events))
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let events: Vec<Event> = serde_yaml::from_str(raw).context("parse events yaml")?;
        Ok(Self::new(events))
    }

    /// Loads `.yaml`/`.yml` as YAML, anything else as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read events from {}", path.display()))?;
        let store = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&raw)?,
            _ => Self::from_json_str(&raw)?,
        };
        log(
            Level::Info,
            Domain::Data,
            "events_loaded",
            obj(&[
                ("path", json!(path.display().to_string())),
                ("count", json!(store.len())),
            ]),
        );
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.events.get(id.0)
    }

    pub fn ids(&self) -> impl Iterator<Item = EventId> {
        (0..self.events.len()).map(EventId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EventId, &Event)> {
        self.events.iter().enumerate().map(|(i, e)| (EventId(i), e))
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_missing_optional_fields_are_empty() {
        let store = EventStore::from_json_str(r#"[{"date":"2024-01-05","title":"A"}]"#).unwrap();
        let e = store.get(EventId(0)).unwrap();
        assert!(e.models.is_empty());
        assert!(e.tags.is_empty());
        assert!(e.primary_tag().is_none());
        assert!(e.layoffs.is_none());
        assert_eq!(e.description, "");
    }

    #[test]
    fn test_null_lists_and_duplicates() {
        let store = EventStore::from_json_str(
            r#"[{"date":"2024-01-05","title":"A","models":null,"tags":["Model","Policy","Model"]}]"#,
        )
        .unwrap();
        let e = store.get(EventId(0)).unwrap();
        assert!(e.models.is_empty());
        assert_eq!(e.tags, vec!["Model".to_string(), "Policy".to_string()]);
        assert_eq!(e.primary_tag(), Some("Model"));
    }

    #[test]
    fn test_timestamp_dates_keep_day() {
        assert_eq!(parse_event_date("2024-03-01T15:30:00Z"), Some(d("2024-03-01")));
        assert_eq!(parse_event_date("2024-03-01"), Some(d("2024-03-01")));
        assert_eq!(parse_event_date("March 1st"), None);
    }

    #[test]
    fn test_invalid_date_rejected() {
        assert!(EventStore::from_json_str(r#"[{"date":"soon","title":"A"}]"#).is_err());
    }

    #[test]
    fn test_store_sorts_stably_by_date() {
        let store = EventStore::new(vec![
            Event::new(d("2024-02-10"), "late"),
            Event::new(d("2024-01-05"), "first"),
            Event::new(d("2024-01-05"), "second"),
        ]);
        let titles: Vec<&str> = store.events().iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["first", "second", "late"]);
    }

    #[test]
    fn test_yaml_layoffs() {
        let yaml = r#"
- date: 2024-01-10
  title: Cuts
  description: Meta trims staff
  organizations: [Meta]
  layoffs:
    company: META
    headcount: 1200
"#;
        let store = EventStore::from_yaml_str(yaml).unwrap();
        let e = store.get(EventId(0)).unwrap();
        assert_eq!(e.layoff_headcount(), Some(1200));
        assert_eq!(e.layoffs.as_ref().unwrap().company, "META");
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("key_figures".parse::<Category>().unwrap(), Category::KeyFigures);
        assert_eq!("keyFigures".parse::<Category>().unwrap(), Category::KeyFigures);
        assert_eq!("tag-filter".parse::<Category>().unwrap(), Category::Tags);
        assert!("colors".parse::<Category>().is_err());
    }
}
