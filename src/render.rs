//! Terminal rendering for calstore types.

use calstore_core::{BackendEvent, Component, EventTime, ViewEvent};
use owo_colors::OwoColorize;

pub trait Render {
    fn render(&self) -> String;
}

/// Format a date as a human-readable label (e.g. "Today", "Tomorrow", "Wed Feb 25")
pub fn date_label(time: &EventTime) -> String {
    let today = chrono::Local::now().date_naive();

    let date = match time {
        EventTime::DateTimeUtc(dt) => dt.with_timezone(&chrono::Local).date_naive(),
        other => other.naive().date(),
    };

    match (date - today).num_days() {
        0 => "Today".to_string(),
        1 => "Tomorrow".to_string(),
        -1 => "Yesterday".to_string(),
        _ => date.format("%a %b %-d %Y").to_string(),
    }
}

/// Format the time portion (e.g. "  15:00" or "all-day")
fn format_time(time: &EventTime) -> String {
    match time {
        EventTime::Date(_) => "all-day".to_string(),
        EventTime::DateTimeUtc(dt) => format!("{:>7}", dt.with_timezone(&chrono::Local).format("%H:%M")),
        other => format!("{:>7}", other.naive().format("%H:%M")),
    }
}

impl Render for Component {
    fn render(&self) -> String {
        let time = self
            .dtstart()
            .or_else(|| self.due())
            .map(|t| format_time(&t))
            .unwrap_or_else(|| format!("{:>7}", "-"));
        let summary = self.summary().unwrap_or("(no title)");
        let mut line = format!("{} {}", time, summary);
        if self.rrule().is_some() {
            line.push_str(&format!(" {}", "↻".cyan()));
        }
        if self.recurrence_id().is_some() {
            line.push_str(&format!(" {}", "(moved)".yellow()));
        }
        if let Some(location) = self.location() {
            line.push_str(&format!(" {}", format!("@ {location}").dimmed()));
        }
        if let Some(uid) = self.uid() {
            line.push_str(&format!(" {}", format!("[{uid}]").dimmed()));
        }
        line
    }
}

impl Render for ViewEvent {
    fn render(&self) -> String {
        match self {
            ViewEvent::Added(comps) => comps
                .iter()
                .map(|c| format!("{} {}", "+".green(), c.render()))
                .collect::<Vec<_>>()
                .join("\n"),
            ViewEvent::Modified(comps) => comps
                .iter()
                .map(|c| format!("{} {}", "~".yellow(), c.render()))
                .collect::<Vec<_>>()
                .join("\n"),
            ViewEvent::Removed(ids) => ids
                .iter()
                .map(|id| format!("{} {}", "-".red(), id.to_string().dimmed()))
                .collect::<Vec<_>>()
                .join("\n"),
            ViewEvent::Complete => "Watching for changes (Ctrl-C to stop)".dimmed().to_string(),
        }
    }
}

impl Render for BackendEvent {
    fn render(&self) -> String {
        match self {
            BackendEvent::ComponentCreated(comp) => format!("{} {}", "+".green(), comp.render()),
            BackendEvent::ComponentModified { new, .. } => format!("{} {}", "~".yellow(), new.render()),
            BackendEvent::ComponentRemoved { id, new, .. } => match new {
                Some(master) => format!("{} {} {}", "-".red(), id, format!("from {}", master.render()).dimmed()),
                None => format!("{} {}", "-".red(), id),
            },
            BackendEvent::PropertyChanged { name, value } => format!("{} {} = {}", "*".blue(), name, value),
            BackendEvent::Collection(info) => format!("{} {:?}", "*".blue(), info),
            BackendEvent::Error(message) => format!("{} {}", "!".red(), message.red()),
        }
    }
}
