use anyhow::Result;
use calstore_core::StoreConfig;
use owo_colors::OwoColorize;

pub fn run() -> Result<()> {
    let config_path = StoreConfig::config_path()?;
    let config = StoreConfig::load()?;

    println!("{}", "Paths".bold());
    println!("  Config:     {}", config_path.display());
    println!("  Calendar:   {}", config.calendar_path().display());
    if let Some(sync) = &config.sync {
        println!("  Sync log:   {} ({})", sync.dir().display(), sync.collection);
        println!("  App id:     {}", sync.app_id());
    }

    println!();
    println!("{}", "Store".bold());
    println!("  Kind:       {}", config.kind);
    println!("  Save delay: {}", config.save_delay);
    if config.refresh.enabled {
        println!("  Refresh:    every {}", config.refresh.interval);
    } else {
        println!("  Refresh:    {}", "disabled".dimmed());
    }
    for account in &config.accounts {
        println!("  Account:    {}", account.address);
    }

    Ok(())
}
