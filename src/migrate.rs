use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all catalogue tables. Idempotent.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Create books table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS books (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT,
            isbn TEXT,
            publisher TEXT,
            date_published TEXT,
            pages TEXT,
            list_price TEXT,
            format TEXT,
            genre TEXT,
            language TEXT,
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create authors table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS authors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            family_name TEXT NOT NULL,
            given_names TEXT NOT NULL DEFAULT '',
            UNIQUE(family_name, given_names)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS book_authors (
            book_id INTEGER NOT NULL,
            author_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (book_id, position),
            FOREIGN KEY (book_id) REFERENCES books(id),
            FOREIGN KEY (author_id) REFERENCES authors(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create series tables
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS series (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS book_series (
            book_id INTEGER NOT NULL,
            series_id INTEGER NOT NULL,
            num TEXT,
            position INTEGER NOT NULL,
            PRIMARY KEY (book_id, position),
            FOREIGN KEY (book_id) REFERENCES books(id),
            FOREIGN KEY (series_id) REFERENCES series(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_book_authors_author ON book_authors(author_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_book_series_series ON book_series(series_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_books_isbn ON books(isbn)")
        .execute(pool)
        .await?;

    Ok(())
}
