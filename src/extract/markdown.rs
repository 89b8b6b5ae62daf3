//! Markdown notes, rendered to plain text with `pulldown-cmark`.

use std::path::Path;

use image::DynamicImage;
use pulldown_cmark::{Event, Parser, Tag, TagEnd};

use super::{placeholder_thumbnail, Extractor, PageText, Pages};
use crate::error::{LibraryError, Result};
use crate::models::FileFormat;

fn read_source(path: &Path) -> Result<String> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(LibraryError::FileNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    String::from_utf8(bytes).map_err(|e| LibraryError::extraction(FileFormat::Md, e))
}

/// Rendered note: block texts joined with single spaces, plus the first heading.
#[derive(Debug, Default, PartialEq)]
pub struct RenderedNote {
    pub text: String,
    pub first_heading: Option<String>,
}

pub fn render(source: &str) -> RenderedNote {
    let mut blocks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut heading: Option<String> = None;
    let mut first_heading = None;

    for event in Parser::new(source) {
        match event {
            Event::Start(Tag::Heading { .. }) if first_heading.is_none() => {
                heading = Some(String::new());
            }
            Event::Text(text) | Event::Code(text) => {
                current.push_str(&text);
                if let Some(h) = heading.as_mut() {
                    h.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => current.push(' '),
            Event::End(TagEnd::Heading(_)) => {
                if let Some(h) = heading.take() {
                    let h = h.trim();
                    if !h.is_empty() {
                        first_heading = Some(h.to_string());
                    }
                }
                blocks.push(std::mem::take(&mut current));
            }
            Event::End(
                TagEnd::Paragraph | TagEnd::Item | TagEnd::CodeBlock | TagEnd::TableRow,
            ) => blocks.push(std::mem::take(&mut current)),
            _ => {}
        }
    }
    blocks.push(current);

    let text = blocks
        .iter()
        .flat_map(|block| block.lines())
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    RenderedNote {
        text,
        first_heading,
    }
}

pub struct MarkdownExtractor;

impl Extractor for MarkdownExtractor {
    fn format(&self) -> FileFormat {
        FileFormat::Md
    }

    fn page_count(&self, path: &Path) -> Result<usize> {
        Ok(usize::from(!render(&read_source(path)?).text.is_empty()))
    }

    fn extract_pages(&self, path: &Path) -> Result<Pages> {
        let text = render(&read_source(path)?).text;
        let page = (!text.is_empty()).then(|| Ok(PageText::new(0.0, text)));
        Ok(Box::new(page.into_iter()))
    }

    fn extract_thumbnail_source(&self, _path: &Path) -> Result<DynamicImage> {
        Ok(placeholder_thumbnail())
    }

    fn title(&self, path: &Path) -> Result<Option<String>> {
        Ok(render(&read_source(path)?).first_heading)
    }
}
