//! Keyboard navigation over the displayed layout.

use anyhow::anyhow;
use std::str::FromStr;

use crate::event::EventId;
use crate::grouping::BucketView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Left,
    Right,
    Up,
    Down,
}

impl FromStr for Key {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "ArrowLeft" | "left" => Ok(Key::Left),
            "ArrowRight" | "right" => Ok(Key::Right),
            "ArrowUp" | "up" => Ok(Key::Up),
            "ArrowDown" | "down" => Ok(Key::Down),
            other => Err(anyhow!("unknown key '{}'", other)),
        }
    }
}

/// Next focused card, or `None` when the key leads nowhere. Without a current focus
/// the first visible card is chosen.
pub fn navigate(layout: &[BucketView], current: Option<EventId>, key: Key) -> Option<EventId> {
    let flat: Vec<(usize, EventId)> = layout
        .iter()
        .enumerate()
        .flat_map(|(bi, b)| b.visible_ids().map(move |id| (bi, id)))
        .collect();
    let Some(pos) = current.and_then(|c| flat.iter().position(|(_, id)| *id == c)) else {
        return flat.first().map(|(_, id)| *id);
    };
    let bucket = flat[pos].0;

    match key {
        Key::Left => pos.checked_sub(1).map(|p| flat[p].1),
        Key::Right => flat.get(pos + 1).map(|(_, id)| *id),
        Key::Up => bucket
            .checked_sub(1)
            .and_then(|b| layout[b].visible_ids().next()),
        Key::Down => layout.get(bucket + 1).and_then(|b| b.visible_ids().next()),
    }
}
