//! Registration and removal flows.
//!
//! Registration order:
//!
//! 1. hash the incoming bytes and refuse a known hash up front;
//! 2. insert the record (the `UNIQUE(content_hash)` constraint settles
//!    concurrent registrations of the same content: exactly one wins);
//! 3. write the file under the new number;
//! 4. run the first index with title extraction.
//!
//! A failure after step 2 removes the record, file, and thumbnail again,
//! so a rejected registration leaves storage as it was.

use std::path::{Path, PathBuf};
use std::time::Duration;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{LibraryError, Result};
use crate::index::{content_hash, reindex};
use crate::library::Library;
use crate::models::{clean_title, Document, FileFormat, MetadataEdit, NewDocument};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Title used when neither the caller nor the file provides one.
pub const UNTITLED: &str = "untitled";

/// Registers `bytes` as a new document and indexes it.
///
/// With `extract_title`, an embedded title replaces `title`.
pub async fn register_bytes(
    library: &Library,
    bytes: &[u8],
    format: FileFormat,
    title: &str,
    extract_title: bool,
) -> Result<Document> {
    let store = library.store();
    let hash = content_hash(bytes);

    let existing = store.find_by_hash(&hash).await?;
    if !existing.is_empty() {
        return Err(LibraryError::DuplicateContent {
            hash,
            existing: existing.into_iter().map(|d| (d.number, d.title)).collect(),
        });
    }

    let title = match clean_title(title) {
        t if t.is_empty() => UNTITLED.to_string(),
        t => t,
    };
    let number = store
        .insert_document(&NewDocument {
            title,
            format,
            content_hash: hash.clone(),
        })
        .await?;

    if let Err(e) = library.files().save(number, format, bytes) {
        discard(library, number, format).await;
        return Err(e);
    }

    match reindex(library, number, extract_title).await {
        Ok(report) => {
            info!(number, %format, hash = %hash, pages = report.page_count, "registered");
            library.document(number).await
        }
        Err(e) => {
            warn!(number, error = %e, "first index failed, discarding registration");
            discard(library, number, format).await;
            Err(e)
        }
    }
}

/// Undoes a partial registration. Cleanup failures are logged, not returned.
async fn discard(library: &Library, number: i64, format: FileFormat) {
    if let Err(e) = library.store().delete_document(number).await {
        warn!(number, error = %e, "could not delete record");
    }
    if let Err(e) = library.files().delete(number, format) {
        warn!(number, error = %e, "could not delete file");
    }
    if let Err(e) = library.files().delete_thumbnail(number) {
        warn!(number, error = %e, "could not delete thumbnail");
    }
}

/// Format from a file name's extension.
pub fn format_of(path: &Path) -> Result<FileFormat> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    ext.parse()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Registers a local file; the title defaults to the file stem.
pub async fn register_path(library: &Library, path: &Path) -> Result<Document> {
    let format = format_of(path)?;
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => LibraryError::FileNotFound(path.to_path_buf()),
        _ => e.into(),
    })?;
    register_bytes(library, &bytes, format, &file_stem(path), true).await
}

/// Downloads and registers a document.
///
/// The format comes from the response `Content-Type`; the title defaults to
/// the last URL path segment without its extension.
pub async fn register_url(library: &Library, url: &str) -> Result<Document> {
    let client = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| LibraryError::Download(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| LibraryError::Download(format!("{}: {}", url, e)))?;

    let mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let format = FileFormat::from_mime(&mime).ok_or_else(|| {
        LibraryError::UnsupportedFormat(if mime.is_empty() {
            "no content type".to_string()
        } else {
            mime.clone()
        })
    })?;

    let file_name = response
        .url()
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|segment| {
            urlencoding::decode(segment)
                .unwrap_or_else(|_| segment.into())
                .to_string()
        })
        .unwrap_or_default();
    let title = file_stem(Path::new(&file_name));

    let bytes = response
        .bytes()
        .await
        .map_err(|e| LibraryError::Download(format!("{}: {}", url, e)))?;
    debug!(url, %format, size = bytes.len(), "downloaded");

    register_bytes(library, &bytes, format, &title, true).await
}

/// Default import patterns: every supported suffix.
fn default_patterns() -> Vec<String> {
    ["pdf", "zip", "cbz", "epub", "md", "markdown"]
        .iter()
        .map(|ext| format!("**/*.{}", ext))
        .collect()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
    }
    Ok(builder.build()?)
}

/// Supported files under `root` matching `include` (all supported
/// formats when empty), sorted by path.
pub fn collect_files(root: &Path, include: &[String]) -> Result<Vec<PathBuf>> {
    let patterns = if include.is_empty() {
        default_patterns()
    } else {
        include.to_vec()
    };
    let include_set = build_globset(&patterns)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if !include_set.is_match(relative) {
            continue;
        }
        if format_of(path).is_err() {
            debug!(path = %path.display(), "skipping unsupported file");
            continue;
        }
        paths.push(path.to_path_buf());
    }
    paths.sort();
    Ok(paths)
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub added: Vec<Document>,
    pub duplicates: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Registers every matching file under `root`. Per-file failures are
/// recorded and the import continues.
pub async fn import_dir(
    library: &Library,
    root: &Path,
    include: &[String],
) -> Result<ImportReport> {
    if !root.is_dir() {
        return Err(LibraryError::FileNotFound(root.to_path_buf()));
    }
    let mut report = ImportReport::default();
    for path in collect_files(root, include)? {
        match register_path(library, &path).await {
            Ok(doc) => report.added.push(doc),
            Err(LibraryError::DuplicateContent { .. }) => {
                debug!(path = %path.display(), "already in library");
                report.duplicates.push(path);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "import failed");
                report.failed.push((path, e.to_string()));
            }
        }
    }
    Ok(report)
}

/// Removes a document: record and index first, then its files.
///
/// Missing files are tolerated; other file-system errors propagate.
pub async fn remove(library: &Library, number: i64) -> Result<Document> {
    let doc = library.document(number).await?;
    library.store().delete_document(number).await?;

    if !library.files().delete(number, doc.format)? {
        warn!(number, "document file was already missing");
    }
    library.files().delete_thumbnail(number)?;

    info!(number, title = %doc.title, "removed");
    Ok(doc)
}

/// Creates a Markdown note, or rewrites note `number` in place.
///
/// A new note without `title` takes its first heading. Rewriting keeps the
/// stored title unless `title` is given.
pub async fn write_note(
    library: &Library,
    number: Option<i64>,
    title: Option<&str>,
    text: &str,
) -> Result<Document> {
    let Some(number) = number else {
        let doc = register_bytes(
            library,
            text.as_bytes(),
            FileFormat::Md,
            title.unwrap_or(UNTITLED),
            title.is_none(),
        )
        .await?;
        return Ok(doc);
    };

    let doc = library.document(number).await?;
    if doc.format != FileFormat::Md {
        return Err(LibraryError::UnsupportedFormat(format!(
            "#{} is {}, only md notes can be rewritten",
            number, doc.format
        )));
    }

    let hash = content_hash(text.as_bytes());
    let others: Vec<(i64, String)> = library
        .store()
        .find_by_hash(&hash)
        .await?
        .into_iter()
        .filter(|d| d.number != number)
        .map(|d| (d.number, d.title))
        .collect();
    if !others.is_empty() {
        return Err(LibraryError::DuplicateContent {
            hash,
            existing: others,
        });
    }

    let previous = library.files().read(number, FileFormat::Md)?;
    library.files().overwrite(number, FileFormat::Md, text.as_bytes())?;
    if let Err(e) = reindex(library, number, false).await {
        // Put the old note back so file and index agree.
        library.files().overwrite(number, FileFormat::Md, &previous)?;
        return Err(e);
    }

    match title {
        Some(title) => {
            library
                .edit(
                    number,
                    MetadataEdit {
                        title: Some(title.to_string()),
                        ..Default::default()
                    },
                )
                .await
        }
        None => library.document(number).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_from_extensions() {
        assert_eq!(format_of(Path::new("a/b/Book.PDF")).unwrap(), FileFormat::Pdf);
        assert_eq!(format_of(Path::new("c.cbz")).unwrap(), FileFormat::Zip);
        assert!(format_of(Path::new("notes.txt")).is_err());
        assert!(format_of(Path::new("README")).is_err());
    }

    #[test]
    fn collect_files_filters_and_sorts() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("comics/vol1")).unwrap();
        for name in ["b.pdf", "a.EPUB", "notes.txt", "comics/vol1/x.cbz", "n.md"] {
            std::fs::write(root.join(name), b"x").unwrap();
        }

        let all = collect_files(root, &[]).unwrap();
        let names: Vec<String> = all
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a.EPUB", "b.pdf", "comics/vol1/x.cbz", "n.md"]);

        let comics = collect_files(root, &["comics/**".to_string()]).unwrap();
        assert_eq!(comics.len(), 1);

        assert!(collect_files(root, &["[".to_string()]).is_err());
    }
}
