//! In-memory [`RecordStore`] implementation for tests.
//!
//! Books live in a `BTreeMap` behind `std::sync::RwLock`. Every
//! [`write_record`](RecordStore::write_record) call is also logged so tests
//! can assert on exactly what a refresh pass wrote.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{Author, BookRow, NewRecord, Series, UpdateSet};

use super::RecordStore;

#[derive(Debug, Clone)]
struct StoredBook {
    row: BookRow,
    authors: Vec<Author>,
    series: Vec<Series>,
}

/// A logged call to `write_record`.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCall {
    pub row_id: i64,
    pub update: UpdateSet,
    pub force_list_rewrite: bool,
}

pub struct InMemoryRecordStore {
    books: RwLock<BTreeMap<i64, StoredBook>>,
    writes: Mutex<Vec<WriteCall>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(BTreeMap::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Every write so far, oldest first.
    pub fn writes(&self) -> Vec<WriteCall> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current stored state of one book.
    pub fn get(&self, row_id: i64) -> Option<(BookRow, Vec<Author>, Vec<Series>)> {
        let books = self.books.read().unwrap_or_else(PoisonError::into_inner);
        books
            .get(&row_id)
            .map(|b| (b.row.clone(), b.authors.clone(), b.series.clone()))
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn fetch_all_records(&self) -> Result<Vec<BookRow>> {
        let books = self.books.read().unwrap_or_else(PoisonError::into_inner);
        Ok(books.values().map(|b| b.row.clone()).collect())
    }

    async fn read_aux_lists(&self, row_id: i64) -> Result<(Vec<Author>, Vec<Series>)> {
        let books = self.books.read().unwrap_or_else(PoisonError::into_inner);
        Ok(books
            .get(&row_id)
            .map(|b| (b.authors.clone(), b.series.clone()))
            .unwrap_or_default())
    }

    async fn write_record(
        &self,
        row_id: i64,
        update: &UpdateSet,
        force_list_rewrite: bool,
    ) -> Result<()> {
        {
            let mut books = self.books.write().unwrap_or_else(PoisonError::into_inner);
            let Some(book) = books.get_mut(&row_id) else {
                bail!("No book with id {}", row_id);
            };
            for (field, value) in &update.scalars {
                book.row.scalars.insert(*field, value.clone());
            }
            if let Some(authors) = &update.authors {
                if force_list_rewrite || *authors != book.authors {
                    book.authors = authors.clone();
                }
            }
            if let Some(series) = &update.series {
                if force_list_rewrite || *series != book.series {
                    book.series = series.clone();
                }
            }
        }
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(WriteCall {
                row_id,
                update: update.clone(),
                force_list_rewrite,
            });
        Ok(())
    }

    async fn insert_record(&self, record: &NewRecord) -> Result<i64> {
        let mut books = self.books.write().unwrap_or_else(PoisonError::into_inner);
        let row_id = books.keys().next_back().copied().unwrap_or(0) + 1;
        books.insert(
            row_id,
            StoredBook {
                row: BookRow {
                    row_id,
                    scalars: record.scalars.clone(),
                },
                authors: record.authors.clone(),
                series: record.series.clone(),
            },
        );
        Ok(row_id)
    }
}
