//! EPUB packages, read directly with `zip` + `quick-xml`.
//!
//! Reading order follows the package spine (linear items only). Each
//! section's XHTML body is flattened to text and split into
//! `chunk_split` equal chunks so one long chapter does not become a single
//! index row. Chunk `k` of section `s` sits at position `s + k/split`,
//! rounded to two decimals.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use image::DynamicImage;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::warn;
use zip::ZipArchive;

use super::{placeholder_thumbnail, Extractor, PageText, Pages};
use crate::error::{LibraryError, Result};
use crate::models::FileFormat;

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Maximum decompressed bytes read from a single entry (zip-bomb protection).
const MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

fn epub_error(reason: impl ToString) -> LibraryError {
    LibraryError::extraction(FileFormat::Epub, reason)
}

#[derive(Debug, Clone)]
struct ManifestItem {
    /// Archive path, resolved against the package document's directory.
    path: String,
    media_type: String,
    properties: Vec<String>,
}

#[derive(Debug, Default)]
struct Package {
    title: Option<String>,
    /// EPUB2 `<meta name="cover" content="...">` manifest id.
    cover_id: Option<String>,
    manifest: HashMap<String, ManifestItem>,
    /// `(idref, linear)` in spine order.
    spine: Vec<(String, bool)>,
}

impl Package {
    /// Linear spine items present in the manifest, in reading order.
    fn reading_order(&self) -> Vec<&ManifestItem> {
        self.spine
            .iter()
            .filter(|(_, linear)| *linear)
            .filter_map(|(idref, _)| {
                let item = self.manifest.get(idref);
                if item.is_none() {
                    warn!(%idref, "spine references a missing manifest item");
                }
                item
            })
            .collect()
    }

    /// EPUB3 `cover-image` item, else the EPUB2 cover metadata target.
    fn cover_item(&self) -> Option<&ManifestItem> {
        self.manifest
            .values()
            .find(|item| item.properties.iter().any(|p| p == "cover-image"))
            .or_else(|| {
                self.cover_id
                    .as_ref()
                    .and_then(|id| self.manifest.get(id))
            })
    }
}

fn open(path: &Path) -> Result<ZipArchive<File>> {
    if !path.exists() {
        return Err(LibraryError::FileNotFound(path.to_path_buf()));
    }
    ZipArchive::new(File::open(path)?).map_err(epub_error)
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| epub_error(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry.take(MAX_ENTRY_BYTES).read_to_end(&mut out)?;
    Ok(out)
}

fn attr(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Joins `href` onto `base_dir`, resolving `.`/`..` and percent-escapes.
fn resolve_href(base_dir: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or_default();
    let href = urlencoding::decode(href).unwrap_or_else(|_| href.into());
    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();
    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn rootfile_path(container_xml: &[u8]) -> Result<String> {
    let mut reader = Reader::from_reader(container_xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"rootfile" => {
                if let Some(path) = attr(&e, b"full-path") {
                    return Ok(path);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(epub_error(e)),
            _ => {}
        }
        buf.clear();
    }
    Err(epub_error("container.xml names no rootfile"))
}

fn parse_package(opf: &[u8], opf_dir: &str) -> Result<Package> {
    let mut package = Package::default();
    let mut reader = Reader::from_reader(opf);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_title = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"title" if package.title.is_none() => in_title = true,
                b"meta" => {
                    if attr(&e, b"name").as_deref() == Some("cover") {
                        package.cover_id = attr(&e, b"content");
                    }
                }
                b"item" => {
                    if let (Some(id), Some(href)) = (attr(&e, b"id"), attr(&e, b"href")) {
                        let item = ManifestItem {
                            path: resolve_href(opf_dir, &href),
                            media_type: attr(&e, b"media-type").unwrap_or_default(),
                            properties: attr(&e, b"properties")
                                .map(|p| p.split_whitespace().map(str::to_string).collect())
                                .unwrap_or_default(),
                        };
                        package.manifest.insert(id, item);
                    }
                }
                b"itemref" => {
                    if let Some(idref) = attr(&e, b"idref") {
                        let linear = attr(&e, b"linear").map_or(true, |v| v != "no");
                        package.spine.push((idref, linear));
                    }
                }
                _ => {}
            },
            Ok(Event::Text(t)) if in_title => {
                let text = t.unescape().map_err(epub_error)?;
                let text = text.trim();
                if !text.is_empty() {
                    package.title = Some(text.to_string());
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"title" => in_title = false,
            Ok(Event::Eof) => break,
            Err(e) => return Err(epub_error(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(package)
}

fn read_package(archive: &mut ZipArchive<File>) -> Result<Package> {
    let container = read_entry(archive, CONTAINER_PATH)?;
    let opf_path = rootfile_path(&container)?;
    let opf_dir = opf_path.rsplit_once('/').map_or("", |(dir, _)| dir).to_string();
    let opf = read_entry(archive, &opf_path)?;
    parse_package(&opf, &opf_dir)
}

/// Named character references common in XHTML that XML does not predefine.
fn html_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "nbsp" => "\u{a0}",
        "ensp" => "\u{2002}",
        "emsp" => "\u{2003}",
        "thinsp" => "\u{2009}",
        "ndash" => "–",
        "mdash" => "—",
        "hellip" => "…",
        "lsquo" => "‘",
        "rsquo" => "’",
        "ldquo" => "“",
        "rdquo" => "”",
        "laquo" => "«",
        "raquo" => "»",
        "middot" => "·",
        "copy" => "©",
        _ => return None,
    })
}

/// Text content of an XHTML document's `<body>`, lines trimmed and joined
/// with single spaces. Script and style contents are skipped.
pub fn body_text(xhtml: &[u8]) -> String {
    let mut reader = Reader::from_reader(xhtml);
    reader.config_mut().check_end_names = false;

    let mut buf = Vec::new();
    let mut raw = String::new();
    let mut in_body = false;
    let mut skip_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"body" => in_body = true,
                b"script" | b"style" => skip_depth += 1,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"body" => in_body = false,
                b"script" | b"style" => skip_depth = skip_depth.saturating_sub(1),
                _ => {}
            },
            Ok(Event::Text(t)) if in_body && skip_depth == 0 => match t.unescape_with(html_entity) {
                Ok(text) => raw.push_str(&text),
                Err(_) => raw.push_str(&String::from_utf8_lossy(&t)),
            },
            Ok(Event::CData(t)) if in_body && skip_depth == 0 => {
                raw.push_str(&String::from_utf8_lossy(&t));
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(error = %e, "malformed XHTML section, keeping text read so far");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Position of chunk `k` of `section` when split `split` ways.
pub fn chunk_position(section: usize, chunk: usize, split: usize) -> f64 {
    let hundredths = ((chunk * 100) as f64 / split as f64).round() as usize;
    (section * 100 + hundredths) as f64 / 100.0
}

/// Splits a section into `split` equal chunks; the last takes the remainder.
///
/// Sections shorter than `split` chars stay whole; empty sections yield none.
pub fn split_section(section: usize, text: &str, split: usize) -> Vec<PageText> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let split = split.max(1);
    let chunk_len = chars.len() / split;
    if chunk_len == 0 {
        return vec![PageText::new(section as f64, text)];
    }

    (0..split)
        .map(|k| {
            let start = k * chunk_len;
            let end = if k + 1 == split {
                chars.len()
            } else {
                start + chunk_len
            };
            PageText::new(
                chunk_position(section, k, split),
                chars[start..end].iter().collect::<String>(),
            )
        })
        .collect()
}

/// Lazily reads spine sections and yields their chunks.
struct SectionChunks {
    archive: ZipArchive<File>,
    sections: std::vec::IntoIter<(usize, String)>,
    pending: VecDeque<PageText>,
    split: usize,
}

impl Iterator for SectionChunks {
    type Item = Result<PageText>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(Ok(chunk));
            }
            let (section, path) = self.sections.next()?;
            match read_entry(&mut self.archive, &path) {
                Ok(xhtml) => {
                    let text = body_text(&xhtml);
                    self.pending
                        .extend(split_section(section, &text, self.split));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

pub struct EpubExtractor {
    chunk_split: usize,
}

impl EpubExtractor {
    pub fn new(chunk_split: usize) -> Self {
        Self {
            chunk_split: chunk_split.max(1),
        }
    }
}

impl Extractor for EpubExtractor {
    fn format(&self) -> FileFormat {
        FileFormat::Epub
    }

    fn page_count(&self, path: &Path) -> Result<usize> {
        let mut archive = open(path)?;
        Ok(read_package(&mut archive)?.reading_order().len())
    }

    fn extract_pages(&self, path: &Path) -> Result<Pages> {
        let mut archive = open(path)?;
        let package = read_package(&mut archive)?;
        let sections: Vec<(usize, String)> = package
            .reading_order()
            .into_iter()
            .map(|item| item.path.clone())
            .enumerate()
            .collect();
        Ok(Box::new(SectionChunks {
            archive,
            sections: sections.into_iter(),
            pending: VecDeque::new(),
            split: self.chunk_split,
        }))
    }

    /// The cover image, or a blank placeholder. A missing or undecodable
    /// cover never fails the caller.
    fn extract_thumbnail_source(&self, path: &Path) -> Result<DynamicImage> {
        let mut archive = open(path)?;
        let package = read_package(&mut archive)?;
        let Some(cover) = package.cover_item() else {
            return Ok(placeholder_thumbnail());
        };

        let decoded = read_entry(&mut archive, &cover.path).and_then(|bytes| {
            image::load_from_memory(&bytes).map_err(epub_error)
        });
        match decoded {
            Ok(image) => Ok(image),
            Err(e) => {
                warn!(
                    cover = %cover.path,
                    media_type = %cover.media_type,
                    error = %e,
                    "unusable EPUB cover"
                );
                Ok(placeholder_thumbnail())
            }
        }
    }

    fn title(&self, path: &Path) -> Result<Option<String>> {
        let mut archive = open(path)?;
        Ok(read_package(&mut archive)?.title)
    }
}
