//! Storage abstraction for the library catalogue and full-text index.
//!
//! The [`Store`] trait is everything the indexing, registration, and search
//! pipelines need from persistence. [`SqliteStore`] implements it over a
//! `books` table and an FTS5 virtual table `fts(number, page, ngram)`.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`insert_document`](Store::insert_document) | Register a record, assigning its number |
//! | [`replace_index`](Store::replace_index) | Atomically swap a document's index and refresh its record |
//! | [`search`](Store::search) | BM25-ranked FTS match, optionally within one document |
//! | [`delete_document`](Store::delete_document) | Drop record and index together |

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::error::{LibraryError, Result};
use crate::models::{
    Document, DocumentFilter, IndexEntry, IndexUpdate, MetadataEdit, NewDocument,
};
use crate::{db, migrate};

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_document(&self, number: i64) -> Result<Option<Document>>;

    /// Records for `numbers`, in the given order; unknown numbers are skipped.
    async fn documents_by_numbers(&self, numbers: &[i64]) -> Result<Vec<Document>>;

    async fn list_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>>;

    async fn find_by_hash(&self, content_hash: &str) -> Result<Vec<Document>>;

    /// Documents whose title contains `needle` (case-insensitive, literal).
    async fn find_by_title(&self, needle: &str) -> Result<Vec<Document>>;

    /// Inserts a record and returns its number.
    ///
    /// Fails with [`LibraryError::DuplicateContent`] when the hash is taken,
    /// including when a concurrent registration won the race.
    async fn insert_document(&self, doc: &NewDocument) -> Result<i64>;

    async fn update_metadata(&self, number: i64, edit: &MetadataEdit) -> Result<()>;

    async fn delete_document(&self, number: i64) -> Result<()>;

    async fn delete_index(&self, number: i64) -> Result<()>;

    async fn insert_index(&self, entries: &[IndexEntry]) -> Result<()>;

    /// Replaces every index entry of `number` and applies `update` to its
    /// record in one transaction. Readers see the old or the new index,
    /// never neither.
    async fn replace_index(
        &self,
        number: i64,
        entries: &[IndexEntry],
        update: &IndexUpdate,
    ) -> Result<()>;

    /// Index entries of one document in reading order.
    async fn index_entries(&self, number: i64) -> Result<Vec<IndexEntry>>;

    /// Ranked FTS rows matching `expression`.
    async fn search(
        &self,
        expression: &str,
        number: Option<i64>,
        limit: i64,
    ) -> Result<Vec<IndexEntry>>;

    /// Sorted union of every document's tags.
    async fn all_tags(&self) -> Result<Vec<String>>;

    /// Number of a random visible document.
    async fn random_number(&self) -> Result<Option<i64>>;
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connects to the configured database and brings the schema up to date.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn duplicate_of(&self, content_hash: &str) -> LibraryError {
        let existing = match self.find_by_hash(content_hash).await {
            Ok(docs) => docs.into_iter().map(|d| (d.number, d.title)).collect(),
            Err(e) => return e,
        };
        LibraryError::DuplicateContent {
            hash: content_hash.to_string(),
            existing,
        }
    }
}

const DOCUMENT_COLUMNS: &str =
    "number, title, filetype, content_hash, pagenum, tags, hide, spread, r2l, created_at";

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let filetype: String = row.try_get("filetype")?;
    Ok(Document {
        number: row.try_get("number")?,
        title: row.try_get("title")?,
        format: filetype.parse()?,
        content_hash: row.try_get("content_hash")?,
        page_count: row.try_get("pagenum")?,
        tags: row.try_get("tags")?,
        hidden: row.try_get("hide")?,
        spread: row.try_get("spread")?,
        right_to_left: row.try_get("r2l")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_entry(row: &SqliteRow) -> Result<IndexEntry> {
    Ok(IndexEntry {
        number: row.try_get("number")?,
        position: row.try_get("page")?,
        text: row.try_get("ngram")?,
    })
}

/// Escapes `LIKE` wildcards so `needle` matches literally (with `ESCAPE '\'`).
pub(crate) fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// FTS5 rejects expressions it cannot parse with these messages.
fn is_fts_syntax_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            let message = db.message();
            message.starts_with("fts5:")
                || message.contains("unterminated string")
                || message.starts_with("no such column")
        }
        _ => false,
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_document(&self, number: i64) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM books WHERE number = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn documents_by_numbers(&self, numbers: &[i64]) -> Result<Vec<Document>> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; numbers.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM books WHERE number IN ({})",
            DOCUMENT_COLUMNS, placeholders
        );
        let mut query = sqlx::query(&sql);
        for number in numbers {
            query = query.bind(*number);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut by_number = HashMap::with_capacity(rows.len());
        for row in &rows {
            let doc = row_to_document(row)?;
            by_number.insert(doc.number, doc);
        }
        Ok(numbers
            .iter()
            .filter_map(|n| by_number.remove(n))
            .collect())
    }

    async fn list_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        let sql = format!(
            r#"
            SELECT {} FROM books
            WHERE (? IS NULL OR tags LIKE ? ESCAPE '\')
              AND (? OR COALESCE(hide, 0) = 0)
            ORDER BY {}
            "#,
            DOCUMENT_COLUMNS,
            filter.sort.sql()
        );
        let pattern = filter
            .tag
            .as_deref()
            .map(|tag| format!("%{}%", escape_like(tag.trim())));

        let rows = sqlx::query(&sql)
            .bind(&pattern)
            .bind(&pattern)
            .bind(filter.include_hidden)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_document).collect()
    }

    async fn find_by_hash(&self, content_hash: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM books WHERE content_hash = ? ORDER BY number",
            DOCUMENT_COLUMNS
        ))
        .bind(content_hash)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_document).collect()
    }

    async fn find_by_title(&self, needle: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            r#"SELECT {} FROM books WHERE title LIKE ? ESCAPE '\' ORDER BY number DESC"#,
            DOCUMENT_COLUMNS
        ))
        .bind(format!("%{}%", escape_like(needle)))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_document).collect()
    }

    async fn insert_document(&self, doc: &NewDocument) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO books (title, filetype, content_hash, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&doc.title)
        .bind(doc.format.as_str())
        .bind(&doc.content_hash)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => Err(self.duplicate_of(&doc.content_hash).await),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_metadata(&self, number: i64, edit: &MetadataEdit) -> Result<()> {
        let done = sqlx::query(
            r#"
            UPDATE books SET
                title = COALESCE(?, title),
                tags = COALESCE(?, tags),
                hide = COALESCE(?, hide),
                spread = COALESCE(?, spread),
                r2l = COALESCE(?, r2l)
            WHERE number = ?
            "#,
        )
        .bind(&edit.title)
        .bind(&edit.tags)
        .bind(edit.hidden)
        .bind(edit.spread)
        .bind(edit.right_to_left)
        .bind(number)
        .execute(&self.pool)
        .await?;

        if done.rows_affected() == 0 {
            return Err(LibraryError::DocumentNotFound(number));
        }
        Ok(())
    }

    async fn delete_document(&self, number: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM fts WHERE number = ?")
            .bind(number)
            .execute(&mut *tx)
            .await?;

        let done = sqlx::query("DELETE FROM books WHERE number = ?")
            .bind(number)
            .execute(&mut *tx)
            .await?;

        if done.rows_affected() == 0 {
            return Err(LibraryError::DocumentNotFound(number));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_index(&self, number: i64) -> Result<()> {
        sqlx::query("DELETE FROM fts WHERE number = ?")
            .bind(number)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_index(&self, entries: &[IndexEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query("INSERT INTO fts (number, page, ngram) VALUES (?, ?, ?)")
                .bind(entry.number)
                .bind(entry.position)
                .bind(&entry.text)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_index(
        &self,
        number: i64,
        entries: &[IndexEntry],
        update: &IndexUpdate,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM fts WHERE number = ?")
            .bind(number)
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            sqlx::query("INSERT INTO fts (number, page, ngram) VALUES (?, ?, ?)")
                .bind(number)
                .bind(entry.position)
                .bind(&entry.text)
                .execute(&mut *tx)
                .await?;
        }

        // Display flags only take the defaults while still unset.
        let updated = sqlx::query(
            r#"
            UPDATE books SET
                pagenum = ?,
                content_hash = ?,
                title = COALESCE(?, title),
                hide = COALESCE(hide, ?),
                spread = COALESCE(spread, ?),
                r2l = COALESCE(r2l, ?)
            WHERE number = ?
            "#,
        )
        .bind(update.page_count)
        .bind(&update.content_hash)
        .bind(&update.title)
        .bind(update.defaults.hidden)
        .bind(update.defaults.spread)
        .bind(update.defaults.right_to_left)
        .bind(number)
        .execute(&mut *tx)
        .await;

        let done = match updated {
            Ok(done) => done,
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                return Err(self.duplicate_of(&update.content_hash).await);
            }
            Err(e) => return Err(e.into()),
        };
        if done.rows_affected() == 0 {
            return Err(LibraryError::DocumentNotFound(number));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn index_entries(&self, number: i64) -> Result<Vec<IndexEntry>> {
        let rows = sqlx::query("SELECT number, page, ngram FROM fts WHERE number = ? ORDER BY page")
            .bind(number)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn search(
        &self,
        expression: &str,
        number: Option<i64>,
        limit: i64,
    ) -> Result<Vec<IndexEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT number, page, ngram
            FROM fts
            WHERE fts MATCH ?
              AND (? IS NULL OR number = ?)
            ORDER BY bm25(fts)
            LIMIT ?
            "#,
        )
        .bind(expression)
        .bind(number)
        .bind(number)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            if is_fts_syntax_error(&e) {
                LibraryError::MalformedQuery(expression.to_string())
            } else {
                e.into()
            }
        })?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn all_tags(&self) -> Result<Vec<String>> {
        let tags: Vec<String> = sqlx::query_scalar("SELECT tags FROM books WHERE tags != ''")
            .fetch_all(&self.pool)
            .await?;

        let unique: BTreeSet<&str> = tags.iter().flat_map(|t| t.split_whitespace()).collect();
        Ok(unique.into_iter().map(str::to_string).collect())
    }

    async fn random_number(&self) -> Result<Option<i64>> {
        let number = sqlx::query_scalar(
            "SELECT number FROM books WHERE COALESCE(hide, 0) = 0 ORDER BY RANDOM() LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DisplayDefaults, FileFormat, SortOrder};

    async fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = SqliteStore::open(&Config::in_dir(tmp.path())).await.unwrap();
        (tmp, store)
    }

    fn new_doc(title: &str, hash: &str) -> NewDocument {
        NewDocument {
            title: title.to_string(),
            format: FileFormat::Pdf,
            content_hash: hash.to_string(),
        }
    }

    fn update(page_count: i64, hash: &str) -> IndexUpdate {
        IndexUpdate {
            page_count,
            content_hash: hash.to_string(),
            title: None,
            defaults: DisplayDefaults {
                hidden: false,
                spread: true,
                right_to_left: false,
            },
        }
    }

    fn entry(number: i64, position: f64, text: &str) -> IndexEntry {
        IndexEntry {
            number,
            position,
            text: text.to_string(),
        }
    }

    #[test]
    fn like_escaping() {
        assert_eq!(escape_like("100%_a\\b"), "100\\%\\_a\\\\b");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[tokio::test]
    async fn numbers_are_monotonic() {
        let (_tmp, store) = open_store().await;
        let first = store.insert_document(&new_doc("a", "h1")).await.unwrap();
        let second = store.insert_document(&new_doc("b", "h2")).await.unwrap();
        assert!(second > first);
        store.delete_document(second).await.unwrap();
        let third = store.insert_document(&new_doc("c", "h3")).await.unwrap();
        assert!(third > second);
    }

    #[tokio::test]
    async fn duplicate_hash_is_rejected() {
        let (_tmp, store) = open_store().await;
        let first = store.insert_document(&new_doc("Dune", "same")).await.unwrap();
        let err = store
            .insert_document(&new_doc("Dune again", "same"))
            .await
            .unwrap_err();
        match err {
            LibraryError::DuplicateContent { hash, existing } => {
                assert_eq!(hash, "same");
                assert_eq!(existing, vec![(first, "Dune".to_string())]);
            }
            other => panic!("expected DuplicateContent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn replace_index_swaps_entries_and_keeps_explicit_flags() {
        let (_tmp, store) = open_store().await;
        let n = store.insert_document(&new_doc("t", "h")).await.unwrap();
        store
            .replace_index(
                n,
                &[entry(n, 0.0, "old text"), entry(n, 1.0, "more old")],
                &update(2, "h"),
            )
            .await
            .unwrap();

        let doc = store.get_document(n).await.unwrap().unwrap();
        assert_eq!(doc.page_count, Some(2));
        assert_eq!(doc.spread, Some(true));
        assert_eq!(doc.hidden, Some(false));

        store
            .update_metadata(
                n,
                &MetadataEdit {
                    spread: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        store
            .replace_index(n, &[entry(n, 0.0, "new text")], &update(1, "h2"))
            .await
            .unwrap();

        let doc = store.get_document(n).await.unwrap().unwrap();
        assert_eq!(doc.spread, Some(false));
        assert_eq!(doc.page_count, Some(1));
        assert_eq!(doc.content_hash, "h2");
        let entries = store.index_entries(n).await.unwrap();
        assert_eq!(entries, vec![entry(n, 0.0, "new text")]);
    }

    #[tokio::test]
    async fn replace_index_for_missing_document_rolls_back() {
        let (_tmp, store) = open_store().await;
        let err = store
            .replace_index(42, &[entry(42, 0.0, "orphan")], &update(1, "h"))
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::DocumentNotFound(42)));
        assert!(store.index_entries(42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_ranks_and_filters() {
        let (_tmp, store) = open_store().await;
        let a = store.insert_document(&new_doc("a", "ha")).await.unwrap();
        let b = store.insert_document(&new_doc("b", "hb")).await.unwrap();
        store
            .insert_index(&[
                entry(a, 0.0, "the whale is white"),
                entry(a, 1.0, "nothing here"),
                entry(b, 0.5, "whale whale whale"),
            ])
            .await
            .unwrap();

        let hits = store.search("\"whale\"", None, 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].number, b);
        assert_eq!(hits[0].position, 0.5);

        let only_a = store.search("\"whale\"", Some(a), 10).await.unwrap();
        assert_eq!(only_a, vec![entry(a, 0.0, "the whale is white")]);

        let limited = store.search("\"whale\"", None, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn fts_syntax_errors_are_malformed_queries() {
        let (_tmp, store) = open_store().await;
        let err = store.search("\"unterminated", None, 10).await.unwrap_err();
        assert!(matches!(err, LibraryError::MalformedQuery(_)));
        let err = store.search("AND OR", None, 10).await.unwrap_err();
        assert!(matches!(err, LibraryError::MalformedQuery(_)));
    }

    #[tokio::test]
    async fn listing_filters_hidden_and_tags() {
        let (_tmp, store) = open_store().await;
        let a = store.insert_document(&new_doc("Alpha", "1")).await.unwrap();
        let b = store.insert_document(&new_doc("beta", "2")).await.unwrap();
        let c = store.insert_document(&new_doc("Gamma", "3")).await.unwrap();
        store
            .update_metadata(
                a,
                &MetadataEdit {
                    tags: Some("sf manga".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .update_metadata(
                c,
                &MetadataEdit {
                    tags: Some("sf".into()),
                    hidden: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let numbers = |docs: Vec<Document>| docs.iter().map(|d| d.number).collect::<Vec<_>>();

        let visible = store.list_documents(&DocumentFilter::default()).await.unwrap();
        assert_eq!(numbers(visible), vec![b, a]);

        let all = DocumentFilter {
            include_hidden: true,
            sort: SortOrder::NumberAsc,
            ..Default::default()
        };
        assert_eq!(numbers(store.list_documents(&all).await.unwrap()), vec![a, b, c]);

        let sf = DocumentFilter {
            tag: Some("sf".into()),
            include_hidden: true,
            ..Default::default()
        };
        assert_eq!(numbers(store.list_documents(&sf).await.unwrap()), vec![c, a]);

        let wildcard = DocumentFilter { tag: Some("%".into()), ..Default::default() };
        assert!(store.list_documents(&wildcard).await.unwrap().is_empty());

        assert_eq!(store.all_tags().await.unwrap(), vec!["manga", "sf"]);
        assert_eq!(numbers(store.find_by_title("ALP").await.unwrap()), vec![a]);
        assert_eq!(numbers(store.documents_by_numbers(&[c, 99, a]).await.unwrap()), vec![c, a]);
        assert_eq!(store.random_number().await.unwrap().map(|n| n == c), Some(false));
    }

    #[tokio::test]
    async fn edits_and_deletes_report_missing_documents() {
        let (_tmp, store) = open_store().await;
        let err = store
            .update_metadata(7, &MetadataEdit::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::DocumentNotFound(7)));
        let err = store.delete_document(7).await.unwrap_err();
        assert!(matches!(err, LibraryError::DocumentNotFound(7)));
        assert_eq!(store.random_number().await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_search_sees_old_or_new_index() {
        let (_tmp, store) = open_store().await;
        let store = std::sync::Arc::new(store);
        let n = store.insert_document(&new_doc("t", "h")).await.unwrap();
        let two = vec![entry(n, 0.0, "whale one"), entry(n, 1.0, "whale two")];
        let three = vec![
            entry(n, 0.0, "whale one"),
            entry(n, 1.0, "whale two"),
            entry(n, 2.0, "whale three"),
        ];
        store.replace_index(n, &two, &update(2, "h")).await.unwrap();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for round in 0..40 {
                    let (entries, pages) = if round % 2 == 0 {
                        (&three, 3)
                    } else {
                        (&two, 2)
                    };
                    store
                        .replace_index(n, entries, &update(pages, "h"))
                        .await
                        .unwrap();
                }
            })
        };
        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut counts = Vec::new();
                for _ in 0..200 {
                    let rows = store.search("\"whale\"", Some(n), 100).await.unwrap();
                    counts.push(rows.len());
                    tokio::task::yield_now().await;
                }
                counts
            })
        };

        writer.await.unwrap();
        let counts = reader.await.unwrap();
        assert!(
            counts.iter().all(|&c| c == 2 || c == 3),
            "partial index observed: {counts:?}"
        );
    }
}
