//! Record storage abstraction for shelf-sync.
//!
//! The [`RecordStore`] trait covers everything a refresh pass needs from the
//! catalogue: reading rows, reading their author and series lists, and
//! writing merged updates back. Backends:
//!
//! | Backend | Purpose |
//! |---------|---------|
//! | [`sqlite::SqliteRecordStore`] | The catalogue database used by the CLI |
//! | [`memory::InMemoryRecordStore`] | Tests and embedding in other tools |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Author, BookRow, NewRecord, Series, UpdateSet};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All book rows, ordered by row id.
    async fn fetch_all_records(&self) -> Result<Vec<BookRow>>;

    /// Author and series lists for one book, in stored order.
    async fn read_aux_lists(&self, row_id: i64) -> Result<(Vec<Author>, Vec<Series>)>;

    /// Write an update to one book.
    ///
    /// Scalars in `update` replace the stored columns. Author and series lists
    /// replace the stored lists; unless `force_list_rewrite` is set, a list
    /// equal to the stored one is left untouched.
    async fn write_record(
        &self,
        row_id: i64,
        update: &UpdateSet,
        force_list_rewrite: bool,
    ) -> Result<()>;

    /// Add a book, returning its row id.
    async fn insert_record(&self, record: &NewRecord) -> Result<i64>;
}
