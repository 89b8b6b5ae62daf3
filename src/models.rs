//! Core data models used throughout the library.
//!
//! These types represent the documents, index entries, and search results
//! that flow through the registration, indexing, and retrieval pipeline.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::LibraryError;

/// Stored file format. The tag doubles as the on-disk file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Pdf,
    Zip,
    Epub,
    Md,
}

impl FileFormat {
    pub const ALL: [FileFormat; 4] = [
        FileFormat::Pdf,
        FileFormat::Zip,
        FileFormat::Epub,
        FileFormat::Md,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Pdf => "pdf",
            FileFormat::Zip => "zip",
            FileFormat::Epub => "epub",
            FileFormat::Md => "md",
        }
    }

    /// Maps a download's `Content-Type` (parameters ignored) to a format.
    pub fn from_mime(mime: &str) -> Option<FileFormat> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "application/pdf" => Some(FileFormat::Pdf),
            "application/zip" | "application/x-zip-compressed" | "application/x-cbz" => {
                Some(FileFormat::Zip)
            }
            "application/epub+zip" => Some(FileFormat::Epub),
            "text/markdown" | "text/x-markdown" => Some(FileFormat::Md),
            _ => None,
        }
    }
}

impl FromStr for FileFormat {
    type Err = LibraryError;

    /// Accepts a format tag or file suffix, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Ok(FileFormat::Pdf),
            "zip" | "cbz" => Ok(FileFormat::Zip),
            "epub" => Ok(FileFormat::Epub),
            "md" | "markdown" => Ok(FileFormat::Md),
            _ => Err(LibraryError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered document as stored in the `books` table.
///
/// Display flags are `None` until the first index run applies the configured
/// defaults; an explicit `Some(false)` set by the user is never overwritten.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub number: i64,
    pub title: String,
    pub format: FileFormat,
    pub content_hash: String,
    pub page_count: Option<i64>,
    pub tags: String,
    pub hidden: Option<bool>,
    pub spread: Option<bool>,
    pub right_to_left: Option<bool>,
    pub created_at: i64,
}

impl Document {
    /// Space-delimited tags as a list, empty tokens dropped.
    pub fn tag_list(&self) -> Vec<&str> {
        self.tags.split_whitespace().collect()
    }
}

/// Longest title kept, in chars.
pub const MAX_TITLE_CHARS: usize = 1000;

/// Trims `title` and cuts it to [`MAX_TITLE_CHARS`].
pub fn clean_title(title: &str) -> String {
    title.trim().chars().take(MAX_TITLE_CHARS).collect()
}

/// Fields supplied when registering a new document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub title: String,
    pub format: FileFormat,
    pub content_hash: String,
}

/// A metadata edit. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct MetadataEdit {
    pub title: Option<String>,
    pub tags: Option<String>,
    pub hidden: Option<bool>,
    pub spread: Option<bool>,
    pub right_to_left: Option<bool>,
}

/// Values written to the document record alongside a fresh index.
#[derive(Debug, Clone)]
pub struct IndexUpdate {
    pub page_count: i64,
    pub content_hash: String,
    /// Only set on first registration so user title edits survive re-indexing.
    pub title: Option<String>,
    pub defaults: DisplayDefaults,
}

/// Display flag values applied when the stored flag is still absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayDefaults {
    pub hidden: bool,
    pub spread: bool,
    pub right_to_left: bool,
}

/// One row of the full-text index.
///
/// `position` is a page number for PDF/ZIP and `section + chunk/split` for
/// EPUB sub-chunks, so numeric order is reading order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexEntry {
    pub number: i64,
    pub position: f64,
    pub text: String,
}

/// Listing sort orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SortOrder {
    TitleAsc,
    TitleDesc,
    NumberAsc,
    #[default]
    NumberDesc,
}

impl SortOrder {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            SortOrder::TitleAsc => "title ASC",
            SortOrder::TitleDesc => "title DESC",
            SortOrder::NumberAsc => "number ASC",
            SortOrder::NumberDesc => "number DESC",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    /// Substring match against the tag field.
    pub tag: Option<String>,
    pub include_hidden: bool,
    pub sort: SortOrder,
}

/// A matched page/chunk with its rendered excerpt.
#[derive(Debug, Clone, Serialize)]
pub struct PageHit {
    pub position: f64,
    pub excerpt: String,
}

/// Search hits for one document, in rank order of first appearance.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub number: i64,
    pub title: String,
    pub title_match: bool,
    pub hits: Vec<PageHit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_suffix() {
        assert_eq!("PDF".parse::<FileFormat>().unwrap(), FileFormat::Pdf);
        assert_eq!(".cbz".parse::<FileFormat>().unwrap(), FileFormat::Zip);
        assert_eq!("markdown".parse::<FileFormat>().unwrap(), FileFormat::Md);
        let err = "docx".parse::<FileFormat>().unwrap_err();
        assert!(matches!(err, LibraryError::UnsupportedFormat(_)));
    }

    #[test]
    fn format_from_mime() {
        assert_eq!(
            FileFormat::from_mime("application/pdf; charset=binary"),
            Some(FileFormat::Pdf)
        );
        assert_eq!(
            FileFormat::from_mime("application/epub+zip"),
            Some(FileFormat::Epub)
        );
        assert_eq!(FileFormat::from_mime("text/html"), None);
    }

    #[test]
    fn titles_are_trimmed_and_capped() {
        assert_eq!(clean_title("  Dune \n"), "Dune");
        let long = "あ".repeat(MAX_TITLE_CHARS + 5);
        assert_eq!(clean_title(&long).chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn tag_list_skips_blanks() {
        let doc = Document {
            number: 1,
            title: "t".into(),
            format: FileFormat::Zip,
            content_hash: String::new(),
            page_count: None,
            tags: " manga  sf ".into(),
            hidden: None,
            spread: None,
            right_to_left: None,
            created_at: 0,
        };
        assert_eq!(doc.tag_list(), vec!["manga", "sf"]);
    }
}
