use anyhow::Result;
use calstore_core::ModType;
use owo_colors::OwoColorize;

use crate::render::Render;

pub fn run(path: &str, mod_type: ModType) -> Result<()> {
    let text = super::read_input(path)?;
    let backend = super::open_store()?;
    let objects = super::submitted_objects(&backend, &text)?;
    let refs: Vec<&str> = objects.iter().map(String::as_str).collect();

    let (_, updated) = backend.modify_objects(&refs, mod_type)?;
    backend.close()?;

    for comp in &updated {
        println!("{} {}", "Updated".yellow(), comp.render());
    }
    Ok(())
}
