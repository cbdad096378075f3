//! Filter selection, visibility and option scaffolding.
//!
//! The engine is the single owner of the current [`FilterSelection`] and of the
//! visible-event set. Every user change runs the full sequence (apply, rescaffold,
//! notify) before returning, so no intermediate state is ever observable.
//!
//! Scaffolding narrows each category's offered options to the values present in
//! the visible events. A selection whose value is no longer offered is reset. When
//! nothing is visible, selections are cleared one at a time in [`Category::ALL`]
//! order until something is.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::event::{Category, Event, EventId, EventStore};
use crate::logging::{log_selection, log_selection_reset};
use crate::render::OptionSets;

// =============================================================================
// Selection
// =============================================================================

/// One optional selected value per category; `None` means no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSelection {
    values: [Option<String>; 5],
}

impl FilterSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form; an empty string means "All".
    pub fn with(mut self, category: Category, value: &str) -> Self {
        self.set(category, Some(value));
        self
    }

    pub fn get(&self, category: Category) -> Option<&str> {
        self.values[category.index()].as_deref()
    }

    pub fn set(&mut self, category: Category, value: Option<&str>) {
        self.values[category.index()] = value.filter(|v| !v.is_empty()).map(str::to_string);
    }

    pub fn clear(&mut self, category: Category) {
        self.values[category.index()] = None;
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    pub fn active(&self) -> impl Iterator<Item = (Category, &str)> {
        Category::ALL
            .into_iter()
            .filter_map(move |c| self.get(c).map(|v| (c, v)))
    }

    /// AND across categories with a selection; each must be in the event's label set.
    pub fn matches(&self, event: &Event) -> bool {
        self.active().all(|(c, v)| event.has_label(c, v))
    }
}

impl Serialize for FilterSelection {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(None)?;
        for (c, v) in self.active() {
            map.serialize_entry(c.as_str(), v)?;
        }
        map.end()
    }
}

// =============================================================================
// Notification suppression
// =============================================================================

/// Scoped suppression of the change handler. Restores the previous state on drop.
struct SuppressGuard {
    flag: Arc<AtomicBool>,
    prev: bool,
}

impl SuppressGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Self {
        let prev = flag.swap(true, Ordering::SeqCst);
        Self { flag: Arc::clone(flag), prev }
    }
}

impl Drop for SuppressGuard {
    fn drop(&mut self) {
        self.flag.store(self.prev, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    Applied,
    /// Arrived while a programmatic update held the guard; nothing ran.
    Suppressed,
}

/// Projection of one filter dropdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterControl {
    pub category: Category,
    pub id: &'static str,
    pub options: Vec<String>,
    pub value: Option<String>,
    /// Fewer options offered than exist across all events.
    pub constrained: bool,
}

// =============================================================================
// Engine
// =============================================================================

pub struct FilterEngine {
    selection: FilterSelection,
    universe: OptionSets,
    options: OptionSets,
    visible: BTreeSet<EventId>,
    suppress: Arc<AtomicBool>,
    changed: watch::Sender<u64>,
    generation: u64,
}

impl FilterEngine {
    pub fn new(store: &EventStore, universe: OptionSets) -> Self {
        let (changed, _) = watch::channel(0);
        let mut engine = Self {
            selection: FilterSelection::new(),
            options: universe.clone(),
            universe,
            visible: store.ids().collect(),
            suppress: Arc::new(AtomicBool::new(false)),
            changed,
            generation: 0,
        };
        engine.rescaffold(store);
        engine
    }

    /// Receiver for the payload-free "filters changed" signal.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    /// Change handler for one control. `None` or `""` selects "All".
    pub fn select(&mut self, store: &EventStore, category: Category, value: Option<&str>) -> ChangeOutcome {
        if self.suppress.load(Ordering::SeqCst) {
            return ChangeOutcome::Suppressed;
        }
        self.selection.set(category, value);
        self.apply_and_rescaffold(store);
        log_selection(category.as_str(), self.selection.get(category), self.visible.len());
        self.notify();
        ChangeOutcome::Applied
    }

    /// Replaces every category's selection at once.
    pub fn apply_selection(&mut self, store: &EventStore, selection: &FilterSelection) -> ChangeOutcome {
        if self.suppress.load(Ordering::SeqCst) {
            return ChangeOutcome::Suppressed;
        }
        self.selection = selection.clone();
        self.apply_and_rescaffold(store);
        self.notify();
        ChangeOutcome::Applied
    }

    pub fn clear_all(&mut self, store: &EventStore) {
        {
            let _guard = SuppressGuard::acquire(&self.suppress);
            for c in Category::ALL {
                self.write_control(store, c, None);
            }
        }
        self.visible = store.ids().collect();
        self.rescaffold(store);
        self.notify();
    }

    /// Recomputes visibility only; used after regrouping.
    pub fn apply(&mut self, store: &EventStore) {
        self.visible = store
            .iter()
            .filter(|(_, e)| self.selection.matches(e))
            .map(|(id, _)| id)
            .collect();
    }

    fn apply_and_rescaffold(&mut self, store: &EventStore) {
        self.apply(store);
        self.rescaffold(store);
    }

    fn rescaffold(&mut self, store: &EventStore) {
        let _guard = SuppressGuard::acquire(&self.suppress);
        loop {
            self.options = OptionSets::collect(self.visible.iter().filter_map(|id| store.get(*id)));
            let stale = self
                .selection
                .active()
                .find(|(c, v)| !self.options.contains(*c, v))
                .map(|(c, v)| (c, v.to_string()));
            match stale {
                Some((category, value)) => {
                    log_selection_reset(category.as_str(), &value);
                    self.write_control(store, category, None);
                    self.apply(store);
                }
                None => break,
            }
        }
    }

    /// Programmatic control write. The control reports the change back through the
    /// regular handler, which must be suppressed here.
    fn write_control(&mut self, store: &EventStore, category: Category, value: Option<&str>) {
        self.selection.set(category, value);
        let outcome = self.select(store, category, value);
        debug_assert_eq!(outcome, ChangeOutcome::Suppressed);
    }

    fn notify(&mut self) {
        self.generation += 1;
        self.changed.send_replace(self.generation);
    }

    pub fn selection(&self) -> &FilterSelection {
        &self.selection
    }

    pub fn visible(&self) -> &BTreeSet<EventId> {
        &self.visible
    }

    pub fn is_visible(&self, id: EventId) -> bool {
        self.visible.contains(&id)
    }

    pub fn options(&self, category: Category) -> &BTreeSet<String> {
        self.options.get(category)
    }

    pub fn universe(&self) -> &OptionSets {
        &self.universe
    }

    pub fn is_constrained(&self, category: Category) -> bool {
        self.options.len(category) < self.universe.len(category)
    }

    /// Number of completed user actions so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn controls(&self) -> Vec<FilterControl> {
        Category::ALL
            .into_iter()
            .map(|c| FilterControl {
                category: c,
                id: c.control_id(),
                options: self.options.get(c).iter().cloned().collect(),
                value: self.selection.get(c).map(str::to_string),
                constrained: self.is_constrained(c),
            })
            .collect()
    }
}
