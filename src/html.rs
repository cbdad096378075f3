//! Static HTML projection of a session view.

use std::fmt::Write;

use crate::event::{Category, EventStore};
use crate::filter::FilterControl;
use crate::grouping::{BucketView, CardPlacement, GroupingMode};
use crate::render::Card;

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Everything the page needs, borrowed from the session.
pub struct PageInput<'a> {
    pub store: &'a EventStore,
    pub cards: &'a [Card],
    pub controls: &'a [FilterControl],
    pub layout: &'a [BucketView],
    pub mode: GroupingMode,
}

fn write_control(out: &mut String, control: &FilterControl) {
    let class = if control.constrained { " class=\"scaffolded\"" } else { "" };
    let _ = writeln!(
        out,
        "<label for=\"{id}\">{label}</label><select id=\"{id}\"{class}>",
        id = control.id,
        label = control.category.label(),
    );
    let selected = |v: Option<&str>| if control.value.as_deref() == v { " selected" } else { "" };
    let _ = writeln!(out, "<option value=\"\"{}>All</option>", selected(None));
    for opt in &control.options {
        let _ = writeln!(
            out,
            "<option value=\"{v}\"{s}>{v}</option>",
            v = escape_html(opt),
            s = selected(Some(opt.as_str())),
        );
    }
    out.push_str("</select>\n");
}

/// Multi-valued label attribute. `|` keeps labels that contain commas intact.
fn label_attr(labels: &[String]) -> String {
    escape_html(&labels.join("|"))
}

fn write_card(out: &mut String, input: &PageInput<'_>, placement: &CardPlacement) {
    let Some(card) = input.cards.get(placement.id.0) else { return };
    let Some(event) = input.store.get(placement.id) else { return };

    let mut classes = vec!["event-card"];
    if event.layoffs.is_some() {
        classes.push("layoff-event");
    }
    if !placement.visible {
        classes.push("filtered-out");
    }
    let mut style = format!("border-left-color: {};", card.accent);
    if let Some(stack) = placement.stack {
        classes.push("stacked-event");
        let _ = write!(style, " z-index: {}; margin-top: {}px;", stack.z_index, stack.offset_px);
    }

    let _ = write!(
        out,
        "<div class=\"{}\" data-id=\"{}\" data-event-date=\"{}\"",
        classes.join(" "),
        card.id.0,
        card.date
    );
    for c in Category::ALL {
        let _ = write!(out, " {}=\"{}\"", c.data_attr(), label_attr(event.labels(c)));
    }
    let _ = write!(
        out,
        " data-primary-tag=\"{}\" data-link=\"{}\"",
        escape_html(event.primary_tag().unwrap_or("")),
        escape_html(card.detail.link.as_deref().unwrap_or(""))
    );
    if let Some(layoffs) = &event.layoffs {
        let headcount = event.layoff_headcount().map(|n| n.to_string()).unwrap_or_default();
        let _ = write!(
            out,
            " data-layoff-ticker=\"{}\" data-layoff-headcount=\"{}\"",
            escape_html(&layoffs.company),
            headcount
        );
    }
    let _ = writeln!(out, " style=\"{}\">", style);

    out.push_str("<div class=\"card-content\">\n");
    let _ = writeln!(out, "<div class=\"event-date\">{}</div>", escape_html(&card.summary.date));
    let _ = writeln!(out, "<div class=\"event-title\">{}</div>", escape_html(&card.summary.title));
    if let Some(badge) = &card.summary.layoff_badge {
        let _ = writeln!(out, "<span class=\"layoff-badge\">{}</span>", escape_html(badge));
    }
    out.push_str("</div>\n<div class=\"card-detail\" style=\"display: none\">\n");
    let _ = writeln!(out, "<div class=\"event-date\">{}</div>", escape_html(&card.detail.date));
    let _ = writeln!(out, "<div class=\"event-title\">{}</div>", escape_html(&card.detail.title));
    let _ = writeln!(
        out,
        "<div class=\"event-description\">{}</div>",
        escape_html(&card.detail.description)
    );
    out.push_str("<div class=\"event-metadata\">\n");
    for line in &card.detail.metadata {
        let _ = writeln!(
            out,
            "<div class=\"metadata-item\"><span class=\"metadata-label\">{}</span> <span class=\"metadata-value\">{}</span></div>",
            line.label,
            escape_html(&line.value)
        );
    }
    out.push_str("</div>\n");
    if let Some(link) = &card.detail.link {
        let _ = writeln!(
            out,
            "<a class=\"event-link\" href=\"{}\" target=\"_blank\" rel=\"noopener\">Read more</a>",
            escape_html(link)
        );
    }
    if !card.detail.tags.is_empty() {
        out.push_str("<div class=\"event-tags\">");
        for tag in &card.detail.tags {
            let _ = write!(out, "<span class=\"tag\">{}</span>", escape_html(tag));
        }
        out.push_str("</div>\n");
    }
    out.push_str("</div>\n</div>\n");
}

pub fn render_page(input: &PageInput<'_>) -> String {
    let mut out = String::from(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>AI Timeline</title></head>\n<body>\n",
    );
    out.push_str("<nav class=\"filters\">\n");
    for control in input.controls {
        write_control(&mut out, control);
    }
    out.push_str("</nav>\n<main class=\"timeline\">\n");

    let (group_class, key_attr) = match input.mode {
        GroupingMode::Month => ("timeline-group monthly-group", "data-year-month"),
        GroupingMode::Week => ("timeline-group weekly-group", "data-week-start"),
    };
    for bucket in input.layout {
        let empty = if bucket.empty { " empty-group" } else { "" };
        let _ = writeln!(
            out,
            "<div class=\"{}{}\" {}=\"{}\">\n<div class=\"group-label\">{}</div>\n<div class=\"group-events\">",
            group_class,
            empty,
            key_attr,
            bucket.key,
            escape_html(&bucket.label)
        );
        for placement in &bucket.cards {
            write_card(&mut out, input, placement);
        }
        out.push_str("</div>\n</div>\n");
    }
    out.push_str("</main>\n</body>\n</html>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, Layoffs};
    use crate::filter::FilterEngine;
    use crate::grouping::GroupingController;
    use crate::render::Renderer;
    use chrono::NaiveDate;

    fn page(store: &EventStore) -> String {
        let rendered = Renderer::render(store);
        let engine = FilterEngine::new(store, rendered.universe.clone());
        let grouping = GroupingController::new(store, rendered.month_buckets.clone(), GroupingMode::Month);
        render_page(&PageInput {
            store,
            cards: &rendered.cards,
            controls: &engine.controls(),
            layout: &grouping.layout(store, engine.visible()),
            mode: GroupingMode::Month,
        })
    }

    #[test]
    fn test_labels_with_commas_stay_distinct() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let mut one = Event::new(day, "one");
        one.key_figures = vec!["Altman, Sam".into()];
        let mut two = Event::new(day, "two");
        two.key_figures = vec!["Altman".into(), "Sam".into()];
        let html = page(&EventStore::new(vec![one, two]));
        assert!(html.contains("data-key-figures=\"Altman, Sam\""));
        assert!(html.contains("data-key-figures=\"Altman|Sam\""));
    }

    #[test]
    fn test_card_and_group_markup() {
        let mut e = Event::new(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(), "Cuts");
        e.tags = vec!["Economic".into()];
        e.layoffs = Some(Layoffs { company: "META".into(), headcount: Some(1200) });
        let html = page(&EventStore::new(vec![e]));
        assert!(html.contains("class=\"event-card layoff-event\""));
        assert!(html.contains("data-event-date=\"2024-01-10\""));
        assert!(html.contains("data-layoff-ticker=\"META\" data-layoff-headcount=\"1200\""));
        assert!(html.contains("data-primary-tag=\"Economic\""));
        assert!(html.contains("class=\"timeline-group monthly-group\" data-year-month=\"2024-01\""));
        assert!(html.contains("<div class=\"group-label\">January 2024</div>"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
        assert_eq!(escape_html("plain"), "plain");
    }
}
