use anyhow::Result;

pub fn run(uid: &str, rid: Option<&str>) -> Result<()> {
    let backend = super::open_store()?;
    let comp = backend.get_object(uid, rid)?;
    print!("{comp}");
    Ok(())
}
