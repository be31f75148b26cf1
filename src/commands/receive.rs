use anyhow::Result;
use owo_colors::OwoColorize;

pub fn run(path: &str) -> Result<()> {
    let text = super::read_input(path)?;
    let backend = super::open_store()?;
    let applied = backend.receive_objects(&text)?;
    backend.close()?;

    if applied.is_empty() {
        println!("{}", "Nothing to apply".dimmed());
    }
    for id in &applied {
        println!("{} {}", "Applied".green(), id);
    }
    Ok(())
}
