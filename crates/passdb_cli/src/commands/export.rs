//! Export command implementation.

use passdb_codec::Credentials;
use std::path::Path;
use tracing::info;

/// Runs the export command.
///
/// The output holds every password in plain text.
pub fn run(
    path: &Path,
    credentials: &Credentials,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let doc = super::open(path, credentials)?;
    doc.export_xml_to(output)?;
    info!(output = %output.display(), "exported unencrypted XML");
    println!("Exported {:?} to {:?}", path, output);
    Ok(())
}
