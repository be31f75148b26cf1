use anyhow::Result;
use calstore_core::BackendProperty;
use owo_colors::OwoColorize;

pub fn run() -> Result<()> {
    let backend = super::open_store()?;
    let revision = backend.get_backend_property(BackendProperty::Revision)?;
    let capabilities = backend.get_backend_property(BackendProperty::Capabilities)?;
    let count = backend.get_object_list("#t")?.len();

    println!("{}", "Store".bold());
    println!("  File:       {}", backend.path().display());
    println!("  Kind:       {}", backend.kind());
    println!("  Components: {}", count);
    println!("  Revision:   {}", revision);
    println!();
    println!("{}", "Capabilities".bold());
    for capability in capabilities.split(',') {
        println!("  {}", capability);
    }
    Ok(())
}
