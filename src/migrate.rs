use sqlx::SqlitePool;

use crate::error::Result;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // AUTOINCREMENT keeps numbers monotonic: a removed entry's number is never reused.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS books (
            number INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            filetype TEXT NOT NULL,
            content_hash TEXT NOT NULL UNIQUE,
            pagenum INTEGER,
            tags TEXT NOT NULL DEFAULT '',
            hide INTEGER,
            spread INTEGER,
            r2l INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE fts USING fts5(
                number UNINDEXED,
                page UNINDEXED,
                ngram
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_books_title ON books(title)")
        .execute(pool)
        .await?;

    Ok(())
}
