use anyhow::{Context, Result};
use calstore_core::time::format_utc;
use calstore_core::{Component, EventTime, Property};
use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use owo_colors::OwoColorize;

use crate::render::Render;

pub fn from_file(path: &str) -> Result<()> {
    let text = super::read_input(path)?;
    let backend = super::open_store()?;
    let objects = super::submitted_objects(&backend, &text)?;
    let refs: Vec<&str> = objects.iter().map(String::as_str).collect();
    let created = backend.create_objects(&refs)?;
    backend.close()?;

    for comp in &created {
        println!("{} {}", "Created".green(), comp.render());
    }
    Ok(())
}

/// Create a single event from a title, start and duration.
pub fn quick(title: &str, start: &str, duration: &str, location: Option<&str>) -> Result<()> {
    let length = humantime::parse_duration(duration).with_context(|| format!("Invalid duration '{duration}'"))?;
    let length = Duration::from_std(length).context("Duration out of range")?;

    let mut event = Component::new("VEVENT");
    event.push_prop(Property::new("DTSTAMP", format_utc(&Utc::now())));
    event.push_prop(Property::new("SUMMARY", escape_text(title)));

    if let Ok(date) = NaiveDate::parse_from_str(start, "%Y-%m-%d") {
        // All-day events span whole days, at least one.
        let days = length.num_days().max(1);
        event.set_dtstart(&EventTime::Date(date));
        event.set_dtend(&EventTime::Date(date + Duration::days(days)));
    } else {
        let naive = NaiveDateTime::parse_from_str(start, "%Y-%m-%dT%H:%M")
            .with_context(|| format!("Invalid start '{start}', expected YYYY-MM-DD or YYYY-MM-DDTHH:MM"))?;
        let begin = super::local_to_utc(naive)?;
        event.set_dtstart(&EventTime::DateTimeUtc(begin));
        event.set_dtend(&EventTime::DateTimeUtc(begin + length));
    }
    if let Some(location) = location {
        event.push_prop(Property::new("LOCATION", escape_text(location)));
    }

    let text = event.to_string();
    let backend = super::open_store()?;
    let created = backend.create_objects(&[text.as_str()])?;
    backend.close()?;

    for comp in &created {
        println!("{} {}", "Created".green(), comp.render());
    }
    Ok(())
}

fn escape_text(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_text_values() {
        assert_eq!(escape_text("Lunch; bring snacks, drinks"), "Lunch\\; bring snacks\\, drinks");
    }
}
