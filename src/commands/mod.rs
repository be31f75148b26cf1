pub mod config;
pub mod freebusy;
pub mod get;
pub mod info;
pub mod list;
pub mod modify;
pub mod new;
pub mod receive;
pub mod remove;
pub mod sync;
pub mod watch;

use std::io::Read;

use anyhow::{Context, Result};
use calstore_core::ics::parse_container;
use calstore_core::time::format_utc;
use calstore_core::{CalBackend, StoreConfig};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Number of days `list` shows when no range is given
pub const DEFAULT_LIST_DAYS: i64 = 3;

/// Open the store named by the global config.
pub fn open_store() -> Result<CalBackend> {
    let config = StoreConfig::load()?;
    let backend = CalBackend::from_config(&config)?;
    let writable = backend.open()?;
    if !writable {
        tracing::warn!("Store is read-only, changes will not be saved");
    }
    Ok(backend)
}

/// Contents of `path`, or stdin for "-".
pub fn read_input(path: &str) -> Result<String> {
    if path == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Could not read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("Could not read {path}"))
}

/// Split a submitted file into one text per object component. Embedded
/// VTIMEZONEs are added to the store first so the objects can use them.
pub fn submitted_objects(backend: &CalBackend, text: &str) -> Result<Vec<String>> {
    let (wrapped, calendar) = parse_container(text)?;
    if wrapped {
        return Ok(vec![text.to_string()]);
    }

    let mut objects = Vec::new();
    for comp in &calendar.components {
        if comp.name == "VTIMEZONE" {
            backend.add_timezone(&comp.to_string())?;
        } else {
            objects.push(comp.to_string());
        }
    }
    if objects.is_empty() {
        anyhow::bail!("No calendar objects in input");
    }
    Ok(objects)
}

/// Parse a CLI date: RFC 3339, a local "YYYY-MM-DDTHH:MM", or a local day
/// (its start, or its end when `end_of_day` is set).
pub fn parse_date(value: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M") {
        return local_to_utc(naive);
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{value}', expected YYYY-MM-DD or YYYY-MM-DDTHH:MM"))?;
    let naive = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    }
    .context("Invalid time of day")?;
    local_to_utc(naive)
}

pub fn local_to_utc(naive: NaiveDateTime) -> Result<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("{naive} does not exist in the local timezone"))
}

/// Query for everything occurring in `[start, end]`.
pub fn time_range_query(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    format!(
        "(occur-in-time-range? (make-time \"{}\") (make-time \"{}\"))",
        format_utc(&start),
        format_utc(&end)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_dates_keep_their_offset() {
        let parsed = parse_date("2025-03-20T15:00:00+01:00", false).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 3, 20, 14, 0, 0).unwrap());
    }

    #[test]
    fn day_bounds_cover_the_whole_day() {
        let start = parse_date("2025-03-20", false).unwrap();
        let end = parse_date("2025-03-20", true).unwrap();
        assert_eq!((end - start).num_seconds(), 86_399);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_date("next tuesday", false).is_err());
    }

    #[test]
    fn range_query_uses_utc_stamps() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(
            time_range_query(start, end),
            r#"(occur-in-time-range? (make-time "20250101T000000Z") (make-time "20250102T000000Z"))"#
        );
    }
}
