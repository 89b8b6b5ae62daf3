//! The library handle and its catalogue operations.
//!
//! [`Library`] bundles configuration, the [`Store`], and the [`FileStore`];
//! the indexing, registration, and search flows take it by reference.

use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat};
use tracing::info;

use crate::config::Config;
use crate::error::{LibraryError, Result};
use crate::extract::extractor_for;
use crate::files::FileStore;
use crate::models::{clean_title, Document, DocumentFilter, MetadataEdit};
use crate::store::{SqliteStore, Store};

pub struct Library {
    config: Config,
    store: Arc<dyn Store>,
    files: FileStore,
}

impl Library {
    /// Opens the SQLite catalogue named in `config`, creating it if needed.
    pub async fn open(config: Config) -> Result<Self> {
        let store = SqliteStore::open(&config).await?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    pub fn with_store(config: Config, store: Arc<dyn Store>) -> Self {
        let files = FileStore::new(&config.storage);
        Self {
            config,
            store,
            files,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub async fn document(&self, number: i64) -> Result<Document> {
        self.store
            .get_document(number)
            .await?
            .ok_or(LibraryError::DocumentNotFound(number))
    }

    pub async fn list(&self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        self.store.list_documents(filter).await
    }

    pub async fn tags(&self) -> Result<Vec<String>> {
        self.store.all_tags().await
    }

    /// Applies a metadata edit and returns the updated record.
    pub async fn edit(&self, number: i64, edit: MetadataEdit) -> Result<Document> {
        let edit = MetadataEdit {
            title: edit.title.map(|t| clean_title(&t)).filter(|t| !t.is_empty()),
            tags: edit.tags.map(|t| t.trim().to_string()),
            ..edit
        };
        self.store.update_metadata(number, &edit).await?;
        info!(number, "metadata updated");
        self.document(number).await
    }

    pub async fn random(&self) -> Result<Option<Document>> {
        match self.store.random_number().await? {
            Some(number) => self.store.get_document(number).await,
            None => Ok(None),
        }
    }

    /// Image of the 0-based `page` of a PDF or ZIP document.
    pub async fn page_image(&self, number: i64, page: usize) -> Result<DynamicImage> {
        let doc = self.document(number).await?;
        let path = self.files.path(number, doc.format);
        let index_config = self.config.index.clone();

        let image = tokio::task::spawn_blocking(move || {
            extractor_for(doc.format, &index_config).page_image(&path, page)
        })
        .await??;

        image.ok_or(LibraryError::PageNotFound { number, page })
    }

    /// Writes a page image to `out`, encoded by the file extension (JPEG if none).
    pub async fn export_page(&self, number: i64, page: usize, out: &Path) -> Result<()> {
        let image = self.page_image(number, page).await?;
        let format = ImageFormat::from_path(out).unwrap_or(ImageFormat::Jpeg);
        let image = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
            _ => image,
        };
        image.save_with_format(out, format)?;
        Ok(())
    }
}
