//! Empty-trash command implementation.

use passdb_codec::Credentials;
use passdb_core::ChangeEvent;
use std::path::Path;
use tracing::info;

/// Runs the empty-trash command.
pub fn run(
    path: &Path,
    credentials: &Credentials,
    compact: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let doc = super::open(path, credentials)?;
    let events = doc.subscribe();

    doc.empty_trash()?;
    let mut released = 0;
    if compact {
        released += doc.compact_attachments()?;
    }
    doc.save()?;
    info!(path = %path.display(), compact, "trash emptied");

    for event in events.try_iter() {
        if let ChangeEvent::TrashEmptied {
            groups,
            entries,
            released: freed,
        } = event
        {
            println!("Removed {} groups and {} entries", groups, entries);
            released += freed;
        }
    }
    println!("Released {} attachments", released);
    Ok(())
}
