//! Error taxonomy for the library.
//!
//! Every fallible library operation returns [`Result`]. The CLI wraps these
//! in `anyhow` at the top level; callers that need to branch (import,
//! tests) match on [`LibraryError`] directly.

use std::path::PathBuf;

use crate::models::FileFormat;

pub type Result<T> = std::result::Result<T, LibraryError>;

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("no entry #{0} found")]
    DocumentNotFound(i64),

    #[error("page {page} of entry #{number} not found")]
    PageNotFound { number: i64, page: usize },

    #[error("page {page} has no embedded image to export")]
    NoPageImage { page: usize },

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("unsupported format: {0:?}")]
    UnsupportedFormat(String),

    #[error("same file already exists in the library ({})", describe_existing(.existing))]
    DuplicateContent {
        hash: String,
        existing: Vec<(i64, String)>,
    },

    #[error("no meaningful query generated for {0:?}")]
    MalformedQuery(String),

    #[error("failed to extract {format} content: {reason}")]
    Extraction { format: FileFormat, reason: String },

    #[error("file collision for entry #{0}, try again")]
    Collision(i64),

    #[error("download failed: {0}")]
    Download(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid include pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl LibraryError {
    /// True for the document / page / file absent conditions.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LibraryError::DocumentNotFound(_)
                | LibraryError::PageNotFound { .. }
                | LibraryError::FileNotFound(_)
        )
    }

    pub(crate) fn extraction(format: FileFormat, reason: impl ToString) -> Self {
        LibraryError::Extraction {
            format,
            reason: reason.to_string(),
        }
    }
}

fn describe_existing(existing: &[(i64, String)]) -> String {
    existing
        .iter()
        .map(|(number, title)| format!("No. {} {}", number, title))
        .collect::<Vec<_>>()
        .join(", ")
}
