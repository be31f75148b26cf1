use anyhow::Result;

use crate::render::Render;

/// Stream a live view until Ctrl-C, along with store errors.
pub async fn run(query: &str) -> Result<()> {
    let backend = super::open_store()?;
    let mut view = backend.start_view(query)?;
    let mut events = backend.subscribe();

    loop {
        tokio::select! {
            update = view.recv() => match update {
                Some(update) => println!("{}", update.render()),
                None => break,
            },
            event = events.recv() => {
                if let Ok(event @ calstore_core::BackendEvent::Error(_)) = event {
                    eprintln!("{}", event.render());
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    backend.stop_view(&view);
    backend.close()?;
    Ok(())
}
