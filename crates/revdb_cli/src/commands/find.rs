//! Find command implementation.

use revdb_bridge::revision_to_json;
use revdb_core::{Datastore, Query, Value};
use std::path::Path;

/// Runs the find command, printing one document per line.
pub fn run(path: &Path, name: &str, query: &str) -> Result<(), Box<dyn std::error::Error>> {
    let manager = super::open_root(path)?;
    let ds = manager.get_datastore(name)?;
    let documents = query_documents(&ds, query)?;

    for doc in &documents {
        println!("{}", serde_json::to_string(doc)?);
    }
    tracing::debug!(datastore = name, matches = documents.len(), "query finished");
    Ok(())
}

/// Parses `query` and returns the matching documents as JSON.
pub fn query_documents(
    ds: &Datastore,
    query: &str,
) -> Result<Vec<serde_json::Value>, Box<dyn std::error::Error>> {
    let json: serde_json::Value = serde_json::from_str(query)?;
    let value = Value::from(json.clone());
    let query = if json.get("selector").is_some() {
        Query::from_value(&value)?
    } else {
        Query::parse(&value)?
    };

    let result = ds.find(&query)?;
    tracing::debug!(plan = ?result.plan(), "query plan");
    Ok(result.iter().map(|r| revision_to_json(&r)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_and_full_query_forms() {
        let ds = Datastore::open_in_memory("f").unwrap();
        for (id, n) in [("a", 1), ("b", 2), ("c", 3)] {
            ds.save(Some(id), None, Value::object().with("n", n), false)
                .unwrap();
        }

        let docs = query_documents(&ds, r#"{"n": {"$gte": 2}}"#).unwrap();
        assert_eq!(docs.len(), 2);

        let docs = query_documents(
            &ds,
            r#"{"selector": {"n": {"$gte": 1}}, "sort": [{"n": "desc"}], "limit": 1}"#,
        )
        .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["_id"], "c");

        assert!(query_documents(&ds, "not json").is_err());
        assert!(query_documents(&ds, r#"{"n": {"$bogus": 1}}"#).is_err());
    }
}
