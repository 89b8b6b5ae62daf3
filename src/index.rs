//! Index writer: extract, tokenize, and atomically replace a document's
//! full-text index.
//!
//! Extraction runs on a blocking thread. Nothing is written to the index
//! until every page has been extracted, so a corrupt file leaves the previous
//! index untouched.

use std::path::Path;

use image::DynamicImage;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::error::{LibraryError, Result};
use crate::extract::{extractor_for, Pages};
use crate::library::Library;
use crate::models::{clean_title, FileFormat, IndexEntry, IndexUpdate};
use crate::tokenize::index_text;

/// Lowercase hex SHA-256 of a stored file.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Tokenizes extracted pages into index entries for `number`.
///
/// Pages whose text is empty after tokenization produce no entry.
pub fn build_entries(number: i64, pages: Pages, ngram_size: usize) -> Result<Vec<IndexEntry>> {
    let mut entries = Vec::new();
    for page in pages {
        let page = page?;
        let text = index_text(&page.text, ngram_size);
        if text.trim().is_empty() {
            continue;
        }
        entries.push(IndexEntry {
            number,
            position: page.position,
            text,
        });
    }
    Ok(entries)
}

/// Everything extracted from one stored file.
struct Extraction {
    page_count: usize,
    entries: Vec<IndexEntry>,
    title: Option<String>,
    thumbnail: DynamicImage,
    content_hash: String,
}

fn extract_document(
    number: i64,
    format: FileFormat,
    path: &Path,
    config: &IndexConfig,
    want_title: bool,
) -> Result<Extraction> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => LibraryError::FileNotFound(path.to_path_buf()),
        _ => e.into(),
    })?;
    let content_hash = content_hash(&bytes);
    drop(bytes);

    let extractor = extractor_for(format, config);
    let page_count = extractor.page_count(path)?;
    let entries = build_entries(number, extractor.extract_pages(path)?, config.ngram_size)?;
    let thumbnail = extractor.extract_thumbnail_source(path)?;
    let title = if want_title {
        extractor
            .title(path)?
            .map(|t| clean_title(&t))
            .filter(|t| !t.is_empty())
    } else {
        None
    };

    Ok(Extraction {
        page_count,
        entries,
        title,
        thumbnail,
        content_hash,
    })
}

/// Outcome of a successful re-index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub number: i64,
    pub page_count: usize,
    pub entries: usize,
    /// Title taken from embedded metadata, when requested and present.
    pub title: Option<String>,
}

/// Re-extracts document `number` and replaces its index in one transaction.
///
/// With `extract_title`, an embedded title (PDF Info, EPUB `dc:title`,
/// Markdown heading) replaces the stored one. Display flags get the
/// configured defaults only while unset.
pub async fn reindex(library: &Library, number: i64, extract_title: bool) -> Result<IndexReport> {
    let doc = library.document(number).await?;
    let path = library.files().path(number, doc.format);
    let config = library.config().index.clone();
    let format = doc.format;

    debug!(number, %format, path = %path.display(), "extracting");
    let extraction = tokio::task::spawn_blocking(move || {
        extract_document(number, format, &path, &config, extract_title)
    })
    .await??;

    let update = IndexUpdate {
        page_count: extraction.page_count as i64,
        content_hash: extraction.content_hash,
        title: extraction.title.clone(),
        defaults: library.config().display.defaults(),
    };
    library
        .store()
        .replace_index(number, &extraction.entries, &update)
        .await?;

    // Only a committed index gets a new thumbnail.
    let files = library.files().clone();
    let max_size = library.config().thumbnail.max_size;
    let thumbnail = extraction.thumbnail;
    tokio::task::spawn_blocking(move || files.save_thumbnail(number, &thumbnail, max_size))
        .await??;

    info!(
        number,
        pages = extraction.page_count,
        entries = extraction.entries.len(),
        "reindexed"
    );

    Ok(IndexReport {
        number,
        page_count: extraction.page_count,
        entries: extraction.entries.len(),
        title: extraction.title,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::PageText;

    fn pages(items: Vec<(f64, &str)>) -> Pages {
        let items: Vec<Result<PageText>> = items
            .into_iter()
            .map(|(position, text)| Ok(PageText::new(position, text)))
            .collect();
        Box::new(items.into_iter())
    }

    #[test]
    fn hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn entries_mix_words_and_ngrams() {
        let entries = build_entries(
            7,
            pages(vec![(0.0, "plain words"), (1.0, ""), (2.0, "日本語"), (3.0, "   ")]),
            2,
        )
        .unwrap();
        assert_eq!(
            entries,
            vec![
                IndexEntry {
                    number: 7,
                    position: 0.0,
                    text: "plain words".into()
                },
                IndexEntry {
                    number: 7,
                    position: 2.0,
                    text: "日本 本語".into()
                },
            ]
        );
    }

    #[test]
    fn extraction_errors_abort_the_build() {
        let failing: Pages = Box::new(
            vec![
                Ok(PageText::new(0.0, "fine")),
                Err(LibraryError::extraction(FileFormat::Epub, "broken section")),
            ]
            .into_iter(),
        );
        let err = build_entries(1, failing, 2).unwrap_err();
        assert!(matches!(err, LibraryError::Extraction { .. }));
    }
}
