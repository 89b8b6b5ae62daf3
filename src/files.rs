//! On-disk document and thumbnail storage.
//!
//! Documents live at `<documents_dir>/<number>.<format>`, thumbnails at
//! `<thumbnails_dir>/<number>.jpg`.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::{LibraryError, Result};
use crate::models::FileFormat;

#[derive(Debug, Clone)]
pub struct FileStore {
    documents_dir: PathBuf,
    thumbnails_dir: PathBuf,
}

/// Removes `path`, treating an already-missing file as success.
fn remove_if_present(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "already absent");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

impl FileStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            documents_dir: config.documents_dir.clone(),
            thumbnails_dir: config.thumbnails_dir.clone(),
        }
    }

    pub fn path(&self, number: i64, format: FileFormat) -> PathBuf {
        self.documents_dir
            .join(format!("{}.{}", number, format.as_str()))
    }

    pub fn thumbnail_path(&self, number: i64) -> PathBuf {
        self.thumbnails_dir.join(format!("{}.jpg", number))
    }

    /// Writes a new document file. An existing file is never overwritten.
    pub fn save(&self, number: i64, format: FileFormat, bytes: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.documents_dir)?;
        let path = self.path(number, format);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(LibraryError::Collision(number))
            }
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = file.write_all(bytes).and_then(|_| file.sync_all()) {
            drop(file);
            let _ = std::fs::remove_file(&path);
            return Err(e.into());
        }
        Ok(path)
    }

    /// Overwrites an existing document file (note rewrites).
    pub fn overwrite(&self, number: i64, format: FileFormat, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path(number, format);
        if !path.exists() {
            return Err(LibraryError::FileNotFound(path));
        }
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    pub fn read(&self, number: i64, format: FileFormat) -> Result<Vec<u8>> {
        let path = self.path(number, format);
        std::fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => LibraryError::FileNotFound(path.clone()),
            _ => e.into(),
        })
    }

    /// Best-effort removal: a missing file is fine, other failures propagate.
    pub fn delete(&self, number: i64, format: FileFormat) -> Result<bool> {
        remove_if_present(&self.path(number, format))
    }

    /// Fits `image` into a `max_size` square (aspect preserved, never
    /// enlarged) and stores it as an RGB JPEG.
    pub fn save_thumbnail(
        &self,
        number: i64,
        image: &DynamicImage,
        max_size: u32,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.thumbnails_dir)?;
        let fitted = if image.width() > max_size || image.height() > max_size {
            image.thumbnail(max_size, max_size)
        } else {
            image.clone()
        };
        let path = self.thumbnail_path(number);
        DynamicImage::ImageRgb8(fitted.to_rgb8()).save_with_format(&path, ImageFormat::Jpeg)?;
        Ok(path)
    }

    pub fn delete_thumbnail(&self, number: i64) -> Result<bool> {
        remove_if_present(&self.thumbnail_path(number))
    }
}
