//! PDF documents via `lopdf`.
//!
//! Text comes from the document's text layer, one index unit per page,
//! passed through [`clean_ocr_text`]. Scanned books typically carry one
//! JPEG per page; that embedded image serves as the page image and the
//! first page's image as the thumbnail source.

use std::path::Path;

use image::{DynamicImage, ImageFormat};
use lopdf::{Document, Object, ObjectId};
use tracing::{debug, warn};

use super::{placeholder_thumbnail, Extractor, PageText, Pages};
use crate::error::{LibraryError, Result};
use crate::models::FileFormat;
use crate::tokenize::clean_ocr_text;

fn load(path: &Path) -> Result<Document> {
    if !path.exists() {
        return Err(LibraryError::FileNotFound(path.to_path_buf()));
    }
    Document::load(path).map_err(|e| LibraryError::extraction(FileFormat::Pdf, e))
}

/// Page object ids in page order.
fn page_ids(doc: &Document) -> Vec<(u32, ObjectId)> {
    doc.get_pages().into_iter().collect()
}

/// Decodes a PDF text string: UTF-16BE with BOM, else UTF-8 / Latin-1.
fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn info_title(doc: &Document) -> Option<String> {
    let info = doc.trailer.get(b"Info").ok()?;
    let dict = match info {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_dict().ok()?,
        other => other.as_dict().ok()?,
    };
    let title = dict.get(b"Title").ok()?.as_str().ok()?;
    let title = decode_text_string(title).trim().to_string();
    (!title.is_empty()).then_some(title)
}

/// Largest JPEG image drawn on the page, `None` when the page draws none.
fn embedded_page_image(doc: &Document, page_id: ObjectId) -> Result<Option<DynamicImage>> {
    let images = doc
        .get_page_images(page_id)
        .map_err(|e| LibraryError::extraction(FileFormat::Pdf, e))?;

    let Some(best) = images
        .iter()
        .filter(|img| {
            img.filters
                .as_ref()
                .is_some_and(|filters| filters.iter().any(|f| f == "DCTDecode"))
        })
        .max_by_key(|img| img.width * img.height)
    else {
        return Ok(None);
    };

    image::load_from_memory_with_format(best.content, ImageFormat::Jpeg)
        .map(Some)
        .map_err(|e| LibraryError::extraction(FileFormat::Pdf, e))
}

pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn format(&self) -> FileFormat {
        FileFormat::Pdf
    }

    fn page_count(&self, path: &Path) -> Result<usize> {
        Ok(load(path)?.get_pages().len())
    }

    fn extract_pages(&self, path: &Path) -> Result<Pages> {
        let doc = load(path)?;
        let pages = page_ids(&doc);
        Ok(Box::new(pages.into_iter().enumerate().map(
            move |(index, (page_number, _))| {
                let text = match doc.extract_text(&[page_number]) {
                    Ok(raw) => clean_ocr_text(&raw),
                    Err(e) => {
                        // Image-only or exotic-encoding pages: keep the page, drop the text.
                        warn!(page = index, error = %e, "unreadable PDF text layer");
                        String::new()
                    }
                };
                Ok(PageText::new(index as f64, text))
            },
        )))
    }

    fn extract_thumbnail_source(&self, path: &Path) -> Result<DynamicImage> {
        match self.page_image(path, 0) {
            Ok(Some(image)) => Ok(image),
            Ok(None) => Ok(placeholder_thumbnail()),
            Err(LibraryError::NoPageImage { .. }) => Ok(placeholder_thumbnail()),
            Err(LibraryError::Extraction { reason, .. }) => {
                debug!(path = %path.display(), %reason, "no usable first-page image");
                Ok(placeholder_thumbnail())
            }
            Err(e) => Err(e),
        }
    }

    fn title(&self, path: &Path) -> Result<Option<String>> {
        Ok(info_title(&load(path)?))
    }

    fn page_image(&self, path: &Path, page: usize) -> Result<Option<DynamicImage>> {
        let doc = load(path)?;
        match page_ids(&doc).get(page) {
            Some(&(_, page_id)) => match embedded_page_image(&doc, page_id)? {
                Some(image) => Ok(Some(image)),
                // In range, but a text-only page.
                None => Err(LibraryError::NoPageImage { page }),
            },
            None => Ok(None),
        }
    }
}
