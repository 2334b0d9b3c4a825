//! Inspect command implementation.

use revdb_core::DatastoreManager;
use serde::Serialize;
use std::path::Path;

/// Datastore inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Datastore name.
    pub name: String,
    /// Live documents.
    pub documents: usize,
    /// Documents whose winner is a tombstone.
    pub deleted_documents: usize,
    /// Stored revisions.
    pub revisions: usize,
    /// Conflicted documents.
    pub conflicted_documents: usize,
    /// Replication checkpoints.
    pub checkpoints: usize,
    /// Highest sequence assigned.
    pub last_sequence: u64,
    /// Revision log size in bytes.
    pub log_bytes: u64,
    /// Index definitions (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexes: Option<Vec<IndexInfo>>,
}

/// One index definition.
#[derive(Debug, Serialize)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,
    /// Indexed field paths.
    pub fields: Vec<String>,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    name: Option<&str>,
    show_indexes: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = super::open_root(path)?;
    let results = collect(&manager, name, show_indexes)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        _ => {
            if results.is_empty() {
                println!("No datastores under {}", path.display());
            }
            for result in &results {
                print_text_output(result);
            }
        }
    }

    Ok(())
}

/// Gathers statistics for one datastore, or for every datastore.
pub fn collect(
    manager: &DatastoreManager,
    name: Option<&str>,
    show_indexes: bool,
) -> Result<Vec<InspectResult>, Box<dyn std::error::Error>> {
    let names = match name {
        Some(name) => vec![name.to_string()],
        None => manager.list_datastores()?,
    };

    let mut results = Vec::with_capacity(names.len());
    for name in names {
        let ds = manager.get_datastore(&name)?;
        let stats = ds.stats()?;
        let indexes = if show_indexes {
            Some(
                ds.list_indexes()?
                    .into_iter()
                    .map(|def| IndexInfo {
                        name: def.name,
                        fields: def.fields,
                    })
                    .collect(),
            )
        } else {
            None
        };
        results.push(InspectResult {
            name,
            documents: stats.documents,
            deleted_documents: stats.deleted_documents,
            revisions: stats.revisions,
            conflicted_documents: stats.conflicted_documents,
            checkpoints: stats.checkpoints,
            last_sequence: stats.last_sequence,
            log_bytes: stats.log_bytes,
            indexes,
        });
    }
    Ok(results)
}

fn print_text_output(result: &InspectResult) {
    println!("Datastore: {}", result.name);
    println!("  Documents:   {}", result.documents);
    println!("  Deleted:     {}", result.deleted_documents);
    println!("  Revisions:   {}", result.revisions);
    println!("  Conflicted:  {}", result.conflicted_documents);
    println!("  Checkpoints: {}", result.checkpoints);
    println!("  Sequence:    {}", result.last_sequence);
    println!("  Log size:    {} bytes", result.log_bytes);
    if let Some(indexes) = &result.indexes {
        println!("  Indexes:");
        for index in indexes {
            println!("    {} ({})", index.name, index.fields.join(", "));
        }
    }
}
