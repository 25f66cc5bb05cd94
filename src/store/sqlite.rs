//! SQLite-backed [`RecordStore`] implementation.
//!
//! Books live in `books`, one column per [`ScalarField`]. Authors and series
//! are shared rows linked to books through `book_authors` / `book_series`
//! with an explicit `position` so list order survives a round trip.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::BTreeMap;

use crate::models::{Author, BookRow, NewRecord, ScalarField, Series, UpdateSet};

use super::RecordStore;

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn authors_for(&self, row_id: i64) -> Result<Vec<Author>> {
        let rows = sqlx::query(
            r#"
            SELECT a.family_name, a.given_names
            FROM book_authors ba JOIN authors a ON a.id = ba.author_id
            WHERE ba.book_id = ?
            ORDER BY ba.position
            "#,
        )
        .bind(row_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<Author> {
                Ok(Author {
                    family_name: r.try_get("family_name")?,
                    given_names: r.try_get("given_names")?,
                })
            })
            .collect()
    }

    async fn series_for(&self, row_id: i64) -> Result<Vec<Series>> {
        let rows = sqlx::query(
            r#"
            SELECT s.name, bs.num
            FROM book_series bs JOIN series s ON s.id = bs.series_id
            WHERE bs.book_id = ?
            ORDER BY bs.position
            "#,
        )
        .bind(row_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<Series> {
                Ok(Series {
                    name: r.try_get("name")?,
                    number: r.try_get("num")?,
                })
            })
            .collect()
    }
}

fn scalar_columns() -> String {
    ScalarField::ALL
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn row_to_book(row: &SqliteRow) -> Result<BookRow> {
    let mut scalars = BTreeMap::new();
    for field in ScalarField::ALL {
        let value: Option<String> = row.try_get(field.name())?;
        if let Some(v) = value {
            scalars.insert(field, v);
        }
    }
    Ok(BookRow {
        row_id: row.try_get("id")?,
        scalars,
    })
}

async fn replace_authors(
    tx: &mut Transaction<'_, Sqlite>,
    row_id: i64,
    authors: &[Author],
) -> Result<()> {
    sqlx::query("DELETE FROM book_authors WHERE book_id = ?")
        .bind(row_id)
        .execute(&mut **tx)
        .await?;

    for (position, author) in authors.iter().enumerate() {
        sqlx::query(
            "INSERT INTO authors (family_name, given_names) VALUES (?, ?) ON CONFLICT(family_name, given_names) DO NOTHING",
        )
        .bind(&author.family_name)
        .bind(&author.given_names)
        .execute(&mut **tx)
        .await?;

        let author_id: i64 =
            sqlx::query_scalar("SELECT id FROM authors WHERE family_name = ? AND given_names = ?")
                .bind(&author.family_name)
                .bind(&author.given_names)
                .fetch_one(&mut **tx)
                .await?;

        sqlx::query("INSERT INTO book_authors (book_id, author_id, position) VALUES (?, ?, ?)")
            .bind(row_id)
            .bind(author_id)
            .bind(position as i64)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

async fn replace_series(
    tx: &mut Transaction<'_, Sqlite>,
    row_id: i64,
    series: &[Series],
) -> Result<()> {
    sqlx::query("DELETE FROM book_series WHERE book_id = ?")
        .bind(row_id)
        .execute(&mut **tx)
        .await?;

    for (position, entry) in series.iter().enumerate() {
        sqlx::query("INSERT INTO series (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(&entry.name)
            .execute(&mut **tx)
            .await?;

        let series_id: i64 = sqlx::query_scalar("SELECT id FROM series WHERE name = ?")
            .bind(&entry.name)
            .fetch_one(&mut **tx)
            .await?;

        sqlx::query(
            "INSERT INTO book_series (book_id, series_id, num, position) VALUES (?, ?, ?, ?)",
        )
        .bind(row_id)
        .bind(series_id)
        .bind(&entry.number)
        .bind(position as i64)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn fetch_all_records(&self) -> Result<Vec<BookRow>> {
        let sql = format!("SELECT id, {} FROM books ORDER BY id", scalar_columns());
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_book).collect()
    }

    async fn read_aux_lists(&self, row_id: i64) -> Result<(Vec<Author>, Vec<Series>)> {
        Ok((self.authors_for(row_id).await?, self.series_for(row_id).await?))
    }

    async fn write_record(
        &self,
        row_id: i64,
        update: &UpdateSet,
        force_list_rewrite: bool,
    ) -> Result<()> {
        let mut authors = update.authors.as_ref();
        let mut series = update.series.as_ref();
        if !force_list_rewrite {
            if authors.is_some() && authors == Some(&self.authors_for(row_id).await?) {
                authors = None;
            }
            if series.is_some() && series == Some(&self.series_for(row_id).await?) {
                series = None;
            }
        }

        let mut tx = self.pool.begin().await?;

        if !update.scalars.is_empty() {
            // Column names come from ScalarField, never from input.
            let assignments = update
                .scalars
                .keys()
                .map(|f| format!("{} = ?", f.name()))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!("UPDATE books SET {} WHERE id = ?", assignments);
            let mut query = sqlx::query(&sql);
            for value in update.scalars.values() {
                query = query.bind(value);
            }
            let result = query
                .bind(row_id)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to update book {}", row_id))?;
            if result.rows_affected() == 0 {
                anyhow::bail!("No book with id {}", row_id);
            }
        }

        if let Some(list) = authors {
            replace_authors(&mut tx, row_id, list).await?;
        }
        if let Some(list) = series {
            replace_series(&mut tx, row_id, list).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn insert_record(&self, record: &NewRecord) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let row_id = if record.scalars.is_empty() {
            sqlx::query("INSERT INTO books DEFAULT VALUES")
                .execute(&mut *tx)
                .await?
                .last_insert_rowid()
        } else {
            let columns = record
                .scalars
                .keys()
                .map(|f| f.name())
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = vec!["?"; record.scalars.len()].join(", ");
            let sql = format!("INSERT INTO books ({}) VALUES ({})", columns, placeholders);
            let mut query = sqlx::query(&sql);
            for value in record.scalars.values() {
                query = query.bind(value);
            }
            query.execute(&mut *tx).await?.last_insert_rowid()
        };

        replace_authors(&mut tx, row_id, &record.authors).await?;
        replace_series(&mut tx, row_id, &record.series).await?;

        tx.commit().await?;
        Ok(row_id)
    }
}
