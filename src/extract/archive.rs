//! ZIP image archives (comics, scanned books).
//!
//! Pages are the archive's image entries in natural filename order, so
//! `page2.jpg` precedes `page10.jpg`. Archives carry no text layer.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use image::DynamicImage;
use zip::ZipArchive;

use super::{placeholder_thumbnail, Extractor, Pages};
use crate::error::{LibraryError, Result};
use crate::models::FileFormat;

/// Entry suffixes recognized as page images (compared case-insensitively).
pub const IMAGE_SUFFIXES: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp"];

/// Width every digit run is zero-padded to before comparison.
const DIGIT_WIDTH: usize = 6;

/// Maximum decompressed bytes read from a single entry (zip-bomb protection).
const MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

/// Sort key that orders embedded numbers numerically.
///
/// The name is split into alternating digit / non-digit runs and each digit
/// run is zero-padded to six places: `p2.jpg` → `p000002.jpg`.
pub fn natural_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len() + DIGIT_WIDTH);
    let mut run = String::new();
    let mut run_is_digit = false;

    for c in name.chars() {
        let is_digit = c.is_ascii_digit();
        if is_digit != run_is_digit {
            push_run(&mut key, &run, run_is_digit);
            run.clear();
            run_is_digit = is_digit;
        }
        run.push(c);
    }
    push_run(&mut key, &run, run_is_digit);
    key
}

fn push_run(key: &mut String, run: &str, is_digit: bool) {
    if is_digit {
        let trimmed = run.trim_start_matches('0');
        let digits = if trimmed.is_empty() { "0" } else { trimmed };
        key.push_str(&format!("{:0>width$}", digits, width = DIGIT_WIDTH));
    } else {
        key.push_str(run);
    }
}

pub fn is_image_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    IMAGE_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// Sorts names in place by [`natural_key`].
pub fn sort_natural(names: &mut [String]) {
    names.sort_by_cached_key(|name| natural_key(name));
}

fn open(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => LibraryError::FileNotFound(path.to_path_buf()),
        _ => e.into(),
    })?;
    ZipArchive::new(file).map_err(|e| LibraryError::extraction(FileFormat::Zip, e))
}

fn image_entries(archive: &ZipArchive<File>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| !name.ends_with('/') && is_image_name(name))
        .map(str::to_string)
        .collect();
    sort_natural(&mut names);
    names
}

fn decode_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<DynamicImage> {
    let entry = archive
        .by_name(name)
        .map_err(|e| LibraryError::extraction(FileFormat::Zip, e))?;
    let mut bytes = Vec::new();
    entry.take(MAX_ENTRY_BYTES).read_to_end(&mut bytes)?;
    image::load_from_memory(&bytes)
        .map_err(|e| LibraryError::extraction(FileFormat::Zip, format!("{}: {}", name, e)))
}

pub struct ZipExtractor;

impl Extractor for ZipExtractor {
    fn format(&self) -> FileFormat {
        FileFormat::Zip
    }

    fn page_count(&self, path: &Path) -> Result<usize> {
        Ok(image_entries(&open(path)?).len())
    }

    fn extract_pages(&self, path: &Path) -> Result<Pages> {
        // Validate the archive even though there is no text to yield.
        open(path)?;
        Ok(Box::new(std::iter::empty()))
    }

    fn extract_thumbnail_source(&self, path: &Path) -> Result<DynamicImage> {
        Ok(self
            .page_image(path, 0)?
            .unwrap_or_else(placeholder_thumbnail))
    }

    fn page_image(&self, path: &Path, page: usize) -> Result<Option<DynamicImage>> {
        let mut archive = open(path)?;
        let names = image_entries(&archive);
        match names.get(page) {
            Some(name) => decode_entry(&mut archive, name).map(Some),
            None => Ok(None),
        }
    }
}
