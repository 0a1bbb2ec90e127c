//! Inspect command implementation.

use passdb_codec::Credentials;
use passdb_model::Compression;
use passdb_storage::{FileBackend, StorageBackend};
use serde::Serialize;
use std::path::Path;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Layout name (KDB or KDBX).
    pub layout: String,
    /// File version from the header.
    pub format: String,
    /// Key transformation rounds.
    pub transform_rounds: u64,
    /// Whether the payload is gzip-compressed.
    pub compressed: bool,
    /// Content counts (only with credentials).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentStats>,
}

/// Counts available once the database is decrypted.
#[derive(Debug, Serialize)]
pub struct ContentStats {
    /// Number of groups, root included.
    pub groups: usize,
    /// Number of entries.
    pub entries: usize,
    /// Number of stored attachment binaries.
    pub binaries: usize,
    /// Number of entries in the trash.
    pub trashed_entries: usize,
    /// Database display name.
    pub name: String,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    credentials: &Credentials,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No database found at {:?}", path).into());
    }
    let backend = FileBackend::open_read_only(path);
    let data = backend.read_all()?;
    let header = passdb_codec::read_header(&data)?;

    let content = if credentials.is_empty() {
        None
    } else {
        let doc = super::open(path, credentials)?;
        Some(doc.with_tree(|tree| ContentStats {
            groups: tree.group_count(),
            entries: tree.entry_count(),
            binaries: tree.attachments().len(),
            trashed_entries: tree
                .walk_entries()
                .iter()
                .filter(|e| tree.is_entry_trashed(e.id()))
                .count(),
            name: tree.meta().database_name.clone(),
        })?)
    };

    let result = InspectResult {
        path: path.display().to_string(),
        size: backend.size()?,
        layout: header.version.to_string(),
        format: header.format.to_string(),
        transform_rounds: header.transform_rounds,
        compressed: header.compression == Compression::Gzip,
        content,
    };

    // Output
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Database: {}", result.path);
    println!();
    println!("Header:");
    println!("  Layout:      {} {}", result.layout, result.format);
    println!("  Size:        {} bytes", result.size);
    println!("  Rounds:      {}", result.transform_rounds);
    println!("  Compressed:  {}", result.compressed);

    match &result.content {
        Some(content) => {
            println!();
            println!("Content:");
            if !content.name.is_empty() {
                println!("  Name:        {}", content.name);
            }
            println!("  Groups:      {}", content.groups);
            println!("  Entries:     {}", content.entries);
            println!("  In trash:    {}", content.trashed_entries);
            println!("  Attachments: {}", content.binaries);
        }
        None => {
            println!();
            println!("(pass --password or --key-file to inspect content)");
        }
    }
}
