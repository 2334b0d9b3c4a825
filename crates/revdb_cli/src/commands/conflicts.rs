//! Conflicts command implementation.

use revdb_core::{Datastore, KeepCurrent};
use std::path::Path;

/// Runs the conflicts command.
pub fn run(path: &Path, name: &str, keep_current: bool) -> Result<(), Box<dyn std::error::Error>> {
    let manager = super::open_root(path)?;
    let ds = manager.get_datastore(name)?;

    let conflicted = ds.conflicted_document_ids()?;
    if conflicted.is_empty() {
        println!("No conflicted documents in {name}");
        return Ok(());
    }

    for doc_id in &conflicted {
        let leaves = ds.conflicts(doc_id)?;
        let revs: Vec<String> = leaves.iter().map(|r| r.rev_id.to_string()).collect();
        println!("{doc_id}: {}", revs.join(" "));
    }

    if keep_current {
        let resolved = resolve_all(&ds)?;
        println!("Resolved {resolved} document(s)");
    }
    Ok(())
}

/// Resolves every conflicted document in favour of its current winner and
/// returns how many were resolved.
pub fn resolve_all(ds: &Datastore) -> Result<usize, Box<dyn std::error::Error>> {
    let mut resolved = 0;
    for doc_id in ds.conflicted_document_ids()? {
        if ds.resolve_with(&doc_id, &KeepCurrent)?.is_some() {
            tracing::info!(doc_id = %doc_id, "kept current revision");
            resolved += 1;
        }
    }
    Ok(resolved)
}
