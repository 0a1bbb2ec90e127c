//! Verify command implementation.

use passdb_codec::Credentials;
use passdb_model::Tree;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of groups checked.
    pub groups: usize,
    /// Number of entries checked.
    pub entries: usize,
    /// Attachment references pointing at missing binaries.
    pub dangling_references: usize,
    /// Stored binaries no entry references.
    pub unreferenced_binaries: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.dangling_references == 0 && self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path, credentials: &Credentials) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying database at {:?}", path);
    println!();

    let doc = super::open(path, credentials)?;
    let result = doc.with_tree(check)?;

    println!("  Groups checked:         {}", result.groups);
    println!("  Entries checked:        {}", result.entries);
    println!("  Dangling attachments:   {}", result.dangling_references);
    println!("  Unreferenced binaries:  {}", result.unreferenced_binaries);
    for error in &result.errors {
        println!("  ERROR: {}", error);
    }
    println!();

    if result.is_ok() {
        println!("Verification passed");
        Ok(())
    } else {
        Err("Verification failed".into())
    }
}

/// Checks the structural invariants of a decoded tree.
pub(crate) fn check(tree: &Tree) -> VerifyResult {
    let mut result = VerifyResult {
        groups: tree.group_count(),
        entries: tree.entry_count(),
        ..VerifyResult::default()
    };
    if let Err(err) = tree.validate() {
        result.errors.push(err.to_string());
    }

    let live = tree.live_binary_ids();
    result.dangling_references = live
        .iter()
        .filter(|id| !tree.attachments().contains(**id))
        .count();
    result.unreferenced_binaries = tree
        .attachments()
        .iter()
        .filter(|(id, _)| !live.contains(id))
        .count();
    result
}
