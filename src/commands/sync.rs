use anyhow::Result;
use owo_colors::OwoColorize;

pub fn run() -> Result<()> {
    let backend = super::open_store()?;
    // open() already drained the log once; poll again in case others wrote since.
    let applied = backend.refresh()?;
    backend.close()?;

    if applied == 0 {
        println!("{}", "Up to date".dimmed());
    } else {
        println!("{} {} change(s) from other stores", "Applied".green(), applied);
    }
    Ok(())
}
