//! Month/week bucketing and same-day stacking.

use anyhow::anyhow;
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::event::{EventId, EventStore};
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::render::{BucketKey, DateBucket};
use serde_json::json;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingMode {
    #[default]
    Month,
    Week,
}

impl GroupingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupingMode::Month => "month",
            GroupingMode::Week => "week",
        }
    }
}

impl fmt::Display for GroupingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "month" => Ok(GroupingMode::Month),
            "week" => Ok(GroupingMode::Week),
            other => Err(anyhow!("unknown grouping mode '{}'", other)),
        }
    }
}

/// Monday of the ISO week containing `date`.
pub fn iso_week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Rank of an event among visible same-day events in its bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stack {
    pub rank: usize,
    pub z_index: usize,
    pub offset_px: usize,
}

impl Stack {
    fn at(rank: usize) -> Self {
        Self { rank, z_index: 10 + rank, offset_px: rank * 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardPlacement {
    pub id: EventId,
    pub visible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<Stack>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketView {
    pub key: BucketKey,
    pub label: String,
    /// No visible events; collapsed but kept
    pub empty: bool,
    pub cards: Vec<CardPlacement>,
}

impl BucketView {
    pub fn visible_ids(&self) -> impl Iterator<Item = EventId> + '_ {
        self.cards.iter().filter(|c| c.visible).map(|c| c.id)
    }
}

/// Stacking for one bucket. Computed from scratch, so reapplying never accumulates.
pub fn stack_bucket(
    store: &EventStore,
    events: &[EventId],
    visible: &BTreeSet<EventId>,
) -> BTreeMap<EventId, Stack> {
    let mut by_day: BTreeMap<NaiveDate, Vec<EventId>> = BTreeMap::new();
    for id in events.iter().filter(|id| visible.contains(id)) {
        if let Some(e) = store.get(*id) {
            by_day.entry(e.date).or_default().push(*id);
        }
    }
    by_day
        .into_values()
        .filter(|ids| ids.len() > 1)
        .flat_map(|ids| ids.into_iter().enumerate().map(|(rank, id)| (id, Stack::at(rank))))
        .collect()
}

/// Owns both bucket sets; switching mode only changes which one is displayed.
#[derive(Debug, Clone)]
pub struct GroupingController {
    mode: GroupingMode,
    month: Vec<DateBucket>,
    week: Option<Vec<DateBucket>>,
}

impl GroupingController {
    pub fn new(store: &EventStore, month: Vec<DateBucket>, mode: GroupingMode) -> Self {
        let mut ctl = Self { mode: GroupingMode::Month, month, week: None };
        ctl.set_mode(store, mode);
        ctl
    }

    pub fn mode(&self) -> GroupingMode {
        self.mode
    }

    /// Returns whether the displayed mode changed.
    pub fn set_mode(&mut self, store: &EventStore, mode: GroupingMode) -> bool {
        if mode == GroupingMode::Week {
            self.ensure_week_buckets(store);
        }
        let changed = self.mode != mode;
        self.mode = mode;
        if changed {
            log(
                Level::Info,
                Domain::Grouping,
                "mode_changed",
                obj(&[("mode", v_str(mode.as_str()))]),
            );
        }
        changed
    }

    pub fn month_buckets(&self) -> &[DateBucket] {
        &self.month
    }

    pub fn week_buckets(&self) -> Option<&[DateBucket]> {
        self.week.as_deref()
    }

    /// Builds week buckets from the month-level entries once; later calls reuse them.
    pub fn ensure_week_buckets(&mut self, store: &EventStore) -> &[DateBucket] {
        let month = &self.month;
        let week = self.week.get_or_insert_with(|| {
            let mut buckets: BTreeMap<NaiveDate, Vec<EventId>> = BTreeMap::new();
            for id in month.iter().flat_map(|b| b.events.iter()) {
                if let Some(e) = store.get(*id) {
                    buckets.entry(iso_week_start(e.date)).or_default().push(*id);
                }
            }
            log(
                Level::Debug,
                Domain::Grouping,
                "week_buckets_built",
                obj(&[("count", json!(buckets.len()))]),
            );
            buckets
                .into_iter()
                .map(|(start, events)| {
                    let key = BucketKey::Week(start);
                    DateBucket { key, label: key.label(), events }
                })
                .collect()
        });
        week.as_slice()
    }

    pub fn displayed(&self) -> &[DateBucket] {
        match (self.mode, &self.week) {
            (GroupingMode::Week, Some(week)) => week,
            _ => &self.month,
        }
    }

    /// Visibility, empty-bucket and stacking passes over the displayed buckets.
    pub fn layout(&self, store: &EventStore, visible: &BTreeSet<EventId>) -> Vec<BucketView> {
        self.displayed()
            .iter()
            .map(|bucket| {
                let stacks = stack_bucket(store, &bucket.events, visible);
                let cards: Vec<CardPlacement> = bucket
                    .events
                    .iter()
                    .map(|id| CardPlacement {
                        id: *id,
                        visible: visible.contains(id),
                        stack: stacks.get(id).copied(),
                    })
                    .collect();
                BucketView {
                    key: bucket.key,
                    label: bucket.label.clone(),
                    empty: !cards.iter().any(|c| c.visible),
                    cards,
                }
            })
            .collect()
    }
}
