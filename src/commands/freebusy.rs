use anyhow::Result;
use chrono::{Duration, Utc};
use owo_colors::OwoColorize;

pub fn run(users: &[String], from: Option<&str>, to: Option<&str>) -> Result<()> {
    let start = match from {
        Some(from) => super::parse_date(from, false)?,
        None => Utc::now(),
    };
    let end = match to {
        Some(to) => super::parse_date(to, true)?,
        None => start + Duration::days(7),
    };

    let backend = super::open_store()?;
    let users: Vec<&str> = users.iter().map(String::as_str).collect();
    let vfreebusys = backend.get_free_busy(&users, start, end)?;

    if vfreebusys.is_empty() {
        println!(
            "{}",
            "No matching accounts. Add [[accounts]] to the config or pass a configured address.".dimmed()
        );
        return Ok(());
    }

    for vfb in &vfreebusys {
        let organizer = vfb.find_prop("ORGANIZER").map(|p| p.value.as_str()).unwrap_or("?");
        println!("{}", organizer.bold());

        let mut any = false;
        for period in vfb.find_props("FREEBUSY") {
            any = true;
            let label = period.param("X-SUMMARY").unwrap_or("busy");
            println!("  {} {}", period.value, label.dimmed());
        }
        if !any {
            println!("  {}", "free".green());
        }
    }
    Ok(())
}
