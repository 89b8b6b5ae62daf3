use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::DisplayDefaults;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,
    #[serde(default = "default_thumbnails_dir")]
    pub thumbnails_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            documents_dir: default_documents_dir(),
            thumbnails_dir: default_thumbnails_dir(),
        }
    }
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("./data/documents")
}
fn default_thumbnails_dir() -> PathBuf {
    PathBuf::from("./data/thumbnails")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Number of equal chunks each EPUB spine section is split into.
    #[serde(default = "default_epub_chunk_split")]
    pub epub_chunk_split: usize,
    #[serde(default = "default_ngram_size")]
    pub ngram_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            epub_chunk_split: default_epub_chunk_split(),
            ngram_size: default_ngram_size(),
        }
    }
}

fn default_epub_chunk_split() -> usize {
    10
}
fn default_ngram_size() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThumbnailConfig {
    #[serde(default = "default_thumbnail_size")]
    pub max_size: u32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_size: default_thumbnail_size(),
        }
    }
}

fn default_thumbnail_size() -> u32 {
    400
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_result_limit")]
    pub result_limit: i64,
    #[serde(default = "default_excerpt_context")]
    pub excerpt_context: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            result_limit: default_result_limit(),
            excerpt_context: default_excerpt_context(),
        }
    }
}

fn default_result_limit() -> i64 {
    500
}
fn default_excerpt_context() -> usize {
    40
}

#[derive(Debug, Deserialize, Clone)]
pub struct DisplayConfig {
    #[serde(default = "default_true")]
    pub spread: bool,
    #[serde(default)]
    pub right_to_left: bool,
    #[serde(default)]
    pub hidden: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            spread: true,
            right_to_left: false,
            hidden: false,
        }
    }
}

fn default_true() -> bool {
    true
}

impl DisplayConfig {
    pub fn defaults(&self) -> DisplayDefaults {
        DisplayDefaults {
            hidden: self.hidden,
            spread: self.spread,
            right_to_left: self.right_to_left,
        }
    }
}

impl Config {
    /// Configuration rooted at `dir`, with every other setting defaulted.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            db: DbConfig {
                path: dir.join("shelf.sqlite"),
            },
            storage: StorageConfig {
                documents_dir: dir.join("documents"),
                thumbnails_dir: dir.join("thumbnails"),
            },
            index: IndexConfig::default(),
            thumbnail: ThumbnailConfig::default(),
            search: SearchConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Fractions are stored at 2-decimal precision, so more than 100 chunks
    // per section would collide.
    if !(1..=100).contains(&config.index.epub_chunk_split) {
        anyhow::bail!("index.epub_chunk_split must be in [1, 100]");
    }

    if config.index.ngram_size == 0 {
        anyhow::bail!("index.ngram_size must be > 0");
    }

    if config.thumbnail.max_size == 0 {
        anyhow::bail!("thumbnail.max_size must be > 0");
    }

    if config.search.result_limit < 1 {
        anyhow::bail!("search.result_limit must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"/tmp/shelf.sqlite\"\n").unwrap();
        assert_eq!(config.index.epub_chunk_split, 10);
        assert_eq!(config.index.ngram_size, 2);
        assert_eq!(config.thumbnail.max_size, 400);
        assert_eq!(config.search.result_limit, 500);
        assert_eq!(config.search.excerpt_context, 40);
        assert_eq!(
            config.display.defaults(),
            DisplayDefaults {
                hidden: false,
                spread: true,
                right_to_left: false
            }
        );
        assert_eq!(
            config.storage.documents_dir,
            PathBuf::from("./data/documents")
        );
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let config = parse(
            "[db]\npath = \"x.sqlite\"\n[display]\nright_to_left = true\n[search]\nexcerpt_context = 10\n",
        )
        .unwrap();
        assert!(config.display.right_to_left);
        assert!(config.display.spread);
        assert_eq!(config.search.excerpt_context, 10);
        assert_eq!(config.search.result_limit, 500);
    }

    #[test]
    fn rejects_out_of_range_split() {
        let err = parse("[db]\npath = \"x\"\n[index]\nepub_chunk_split = 101\n").unwrap_err();
        assert!(err.to_string().contains("epub_chunk_split"));
        assert!(parse("[db]\npath = \"x\"\n[index]\nepub_chunk_split = 0\n").is_err());
    }

    #[test]
    fn rejects_zero_ngram() {
        assert!(parse("[db]\npath = \"x\"\n[index]\nngram_size = 0\n").is_err());
    }

    #[test]
    fn missing_db_section_is_an_error() {
        assert!(parse("[search]\nresult_limit = 5\n").is_err());
    }
}
