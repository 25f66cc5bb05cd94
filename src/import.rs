//! Seeding the catalogue from a JSON file.
//!
//! The file is an array of books:
//!
//! ```json
//! [
//!   {"title": "Mort", "isbn": "0552131067",
//!    "authors": [{"family_name": "Pratchett", "given_names": "Terry"}],
//!    "series": [{"name": "Discworld", "number": "4"}]}
//! ]
//! ```

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::models::NewRecord;
use crate::store::sqlite::SqliteRecordStore;
use crate::store::RecordStore;

pub fn read_records(path: &Path) -> Result<Vec<NewRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse import file: {}", path.display()))
}

/// Insert every record, returning the new row ids in file order.
pub async fn import_records(store: &dyn RecordStore, records: &[NewRecord]) -> Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(records.len());
    for record in records {
        ids.push(store.insert_record(record).await?);
    }
    Ok(ids)
}

/// `shelf import <file>`.
pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let records = read_records(path)?;
    let pool = db::connect(config).await?;
    let store = SqliteRecordStore::new(pool);

    let ids = import_records(&store, &records).await?;
    tracing::info!(count = ids.len(), "imported books");
    store.pool().close().await;

    println!("import {}", path.display());
    println!("  books added: {}", ids.len());
    println!("ok");
    Ok(())
}
