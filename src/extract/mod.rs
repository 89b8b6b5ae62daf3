//! Per-format document extraction.
//!
//! Each supported [`FileFormat`] has an [`Extractor`] that knows how to
//! count pages, produce the ordered `(position, text)` stream that feeds the
//! full-text index, and pick a thumbnail source image. The index writer only
//! sees the trait; format-specific parsing libraries stay behind it.
//!
//! | Format | Pages | Text | Thumbnail |
//! |--------|-------|------|-----------|
//! | PDF | native page count | text layer per page, OCR-cleaned | first page image |
//! | ZIP | image entries, natural order | none | first image |
//! | EPUB | linear spine items | spine sections, split into chunks | cover item |
//! | Markdown | one page | rendered plain text | placeholder |
//!
//! Extractors are synchronous; callers on the async runtime run them under
//! `spawn_blocking`.

pub mod archive;
pub mod epub;
pub mod markdown;
pub mod pdf;

use std::path::Path;

use image::DynamicImage;

use crate::config::IndexConfig;
use crate::error::{LibraryError, Result};
use crate::models::FileFormat;

/// One unit of extracted text and its position in reading order.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub position: f64,
    pub text: String,
}

impl PageText {
    pub fn new(position: f64, text: impl Into<String>) -> Self {
        Self {
            position,
            text: text.into(),
        }
    }
}

/// Lazily produced page texts.
pub type Pages = Box<dyn Iterator<Item = Result<PageText>>>;

/// Placeholder dimensions used when a document has no usable cover.
pub const PLACEHOLDER_SIZE: (u32, u32) = (100, 140);

pub fn placeholder_thumbnail() -> DynamicImage {
    DynamicImage::new_rgb8(PLACEHOLDER_SIZE.0, PLACEHOLDER_SIZE.1)
}

/// Format-specific extraction capabilities.
pub trait Extractor {
    fn format(&self) -> FileFormat;

    fn page_count(&self, path: &Path) -> Result<usize>;

    /// Ordered page/chunk texts. Formats without a text layer yield nothing.
    fn extract_pages(&self, path: &Path) -> Result<Pages>;

    fn extract_thumbnail_source(&self, path: &Path) -> Result<DynamicImage>;

    /// Title from embedded metadata, if the format carries one.
    fn title(&self, _path: &Path) -> Result<Option<String>> {
        Ok(None)
    }

    /// Image of the 0-based `page`, or `None` when the page is out of range.
    fn page_image(&self, _path: &Path, _page: usize) -> Result<Option<DynamicImage>> {
        Err(LibraryError::UnsupportedFormat(format!(
            "{} has no page images",
            self.format()
        )))
    }
}

/// Selects the extractor for `format`.
pub fn extractor_for(format: FileFormat, config: &IndexConfig) -> Box<dyn Extractor> {
    match format {
        FileFormat::Pdf => Box::new(pdf::PdfExtractor),
        FileFormat::Zip => Box::new(archive::ZipExtractor),
        FileFormat::Epub => Box::new(epub::EpubExtractor::new(config.epub_chunk_split)),
        FileFormat::Md => Box::new(markdown::MarkdownExtractor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    #[test]
    fn dispatch_matches_format() {
        let config = IndexConfig::default();
        for format in FileFormat::ALL {
            assert_eq!(extractor_for(format, &config).format(), format);
        }
    }

    #[test]
    fn placeholder_dimensions() {
        assert_eq!(placeholder_thumbnail().dimensions(), PLACEHOLDER_SIZE);
    }

    #[test]
    fn markdown_has_no_page_images() {
        let config = IndexConfig::default();
        let err = extractor_for(FileFormat::Md, &config)
            .page_image(Path::new("/nonexistent.md"), 0)
            .unwrap_err();
        assert!(matches!(err, LibraryError::UnsupportedFormat(_)));
    }
}
