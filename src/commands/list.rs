use anyhow::Result;
use chrono::{Duration, Utc};
use owo_colors::OwoColorize;

use crate::render::{Render, date_label};

pub fn run(query: Option<String>, from: Option<&str>, to: Option<&str>) -> Result<()> {
    let query = match query {
        Some(query) => query,
        None => {
            let start = match from {
                Some(from) => super::parse_date(from, false)?,
                None => Utc::now(),
            };
            let end = match to {
                Some(to) => super::parse_date(to, true)?,
                None => start + Duration::days(super::DEFAULT_LIST_DAYS),
            };
            super::time_range_query(start, end)
        }
    };

    let backend = super::open_store()?;
    let mut components = backend.get_object_list(&query)?;

    if components.is_empty() {
        println!("{}", "No objects found".dimmed());
        return Ok(());
    }

    components.sort_by_key(|c| c.dtstart().or_else(|| c.due()).map(|t| t.naive()));

    // Group by day
    let mut current_date: Option<String> = None;
    for comp in &components {
        let label = comp
            .dtstart()
            .or_else(|| comp.due())
            .map(|t| date_label(&t))
            .unwrap_or_else(|| "Undated".to_string());

        if current_date.as_ref() != Some(&label) {
            if current_date.is_some() {
                println!();
            }
            println!("{}", label.bold());
            current_date = Some(label);
        }
        println!("  {}", comp.render());
    }

    Ok(())
}
