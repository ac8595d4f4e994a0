//! Inspect command implementation.

use super::open_engine;
use bistro_store::DatabaseInfo;
use serde::Serialize;
use std::path::Path;

/// Journal inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Journal path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Databases recorded in the journal.
    pub databases: Vec<DatabaseInfo>,
}

/// Runs the inspect command.
pub async fn run(journal: &Path, show_indexes: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine(journal)?;
    let result = InspectResult {
        path: journal.display().to_string(),
        journal_size: std::fs::metadata(journal)?.len(),
        databases: engine.databases(None).await?,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result, show_indexes);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult, show_indexes: bool) {
    println!("Journal: {}", result.path);
    println!("Size:    {} bytes", result.journal_size);
    if result.databases.is_empty() {
        println!("No databases");
        return;
    }

    for db in &result.databases {
        println!();
        println!("Database {} (version {})", db.name, db.version);
        for store in &db.stores {
            let key = match (&store.key_path, store.auto_increment) {
                (Some(path), true) => format!("key {path}, autoincrement"),
                (Some(path), false) => format!("key {path}"),
                (None, true) => "autoincrement".to_string(),
                (None, false) => "out-of-line keys".to_string(),
            };
            println!("  {:<16} {:>8} records  ({key})", store.name, store.record_count);
            if show_indexes {
                for index in &store.indexes {
                    let unique = if index.unique { ", unique" } else { "" };
                    println!("    index {} on {}{unique}", index.name, index.key_path);
                }
            }
        }
    }
}
