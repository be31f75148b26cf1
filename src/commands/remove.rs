use anyhow::Result;
use calstore_core::{ComponentId, ModType};
use owo_colors::OwoColorize;

use crate::render::Render;

pub fn run(uid: &str, rid: Option<String>, mod_type: ModType) -> Result<()> {
    let backend = super::open_store()?;
    let id = ComponentId::new(uid, rid);
    let results = backend.remove_objects(std::slice::from_ref(&id), mod_type)?;
    backend.close()?;

    for (_, remaining) in &results {
        match remaining {
            Some(master) => println!("{} {} {}", "Removed".red(), id, format!("(series now {})", master.render()).dimmed()),
            None => println!("{} {}", "Removed".red(), id),
        }
    }
    Ok(())
}
