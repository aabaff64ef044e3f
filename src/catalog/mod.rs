//! Product catalog: embedding index, on-disk artifacts and the shared service.

pub mod build;
pub mod index;
pub mod storage;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;

pub use build::{read_catalog, CatalogRow};
pub use index::{CatalogIndex, Neighbor, ProductMeta};
pub use storage::CatalogStorage;

use crate::config::Config;
use crate::embedding::ImageEmbedder;

/// Shared catalog access point. The first caller to need the index loads
/// it (or rebuilds it from the CSV when artifacts are missing or invalid);
/// the lock guarantees a single build even under concurrent jobs.
pub struct CatalogService {
    config: Config,
    embedder: Arc<dyn ImageEmbedder>,
    state: Mutex<Option<Arc<CatalogIndex>>>,
}

impl CatalogService {
    pub fn new(config: Config, embedder: Arc<dyn ImageEmbedder>) -> Self {
        Self {
            config,
            embedder,
            state: Mutex::new(None),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn ImageEmbedder> {
        &self.embedder
    }

    /// Get the loaded index, loading or rebuilding it if necessary.
    /// Concurrent callers block here rather than building twice.
    pub fn ensure_loaded(&self) -> anyhow::Result<Arc<CatalogIndex>> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(index) = state.as_ref() {
            return Ok(index.clone());
        }

        let index = Arc::new(self.load_or_build()?);
        *state = Some(index.clone());
        Ok(index)
    }

    /// Force a rebuild from the CSV, replacing any loaded index and
    /// persisted artifacts.
    pub fn rebuild(&self) -> anyhow::Result<Arc<CatalogIndex>> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let storage = self.storage();
        storage.delete().context("removing stale catalog artifacts")?;

        let index = Arc::new(self.build_and_save(&storage)?);
        *state = Some(index.clone());
        Ok(index)
    }

    fn storage(&self) -> CatalogStorage {
        CatalogStorage::new(
            self.config.catalog_embeddings_path(),
            self.config.catalog_product_ids_path(),
        )
    }

    fn load_or_build(&self) -> anyhow::Result<CatalogIndex> {
        let storage = self.storage();
        let model_id = self.embedder.model_id_hash();
        let dimensions = self.embedder.dimensions();

        if storage.exists() {
            match storage.load(&model_id, dimensions) {
                Ok((embeddings, product_ids)) => {
                    log::info!("loaded catalog index: {} rows", embeddings.len());
                    let rows = read_catalog(&self.config.catalog_csv_path())?;
                    let metadata = build::load_metadata(&rows);
                    return CatalogIndex::from_parts(
                        embeddings,
                        product_ids,
                        metadata,
                        dimensions,
                    )
                    .context("restoring catalog index from artifacts");
                }
                Err(err) => {
                    log::warn!("catalog artifacts unusable, rebuilding: {err}");
                }
            }
        } else {
            log::info!("catalog artifacts missing, building from csv");
        }

        self.build_and_save(&storage)
    }

    fn build_and_save(&self, storage: &CatalogStorage) -> anyhow::Result<CatalogIndex> {
        let rows = read_catalog(&self.config.catalog_csv_path())?;
        let index = build::build(
            &rows,
            &self.embedder,
            Duration::from_secs(self.config.matching.download_timeout_secs),
        )?;

        storage
            .save(
                index.embeddings(),
                index.product_ids(),
                &self.embedder.model_id_hash(),
                index.dimensions(),
            )
            .context("persisting catalog artifacts")?;

        log::info!("catalog index built: {} rows", index.len());
        Ok(index)
    }
}
