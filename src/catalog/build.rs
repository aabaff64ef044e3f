//! Builds catalog embeddings from the product CSV.
//!
//! Every image URL in the CSV becomes one index row; products with several
//! images get several rows sharing the same product id. Rows whose image
//! cannot be downloaded, decoded or embedded are skipped with a warning so
//! one dead URL never sinks the whole build.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;

use crate::catalog::index::{CatalogIndex, ProductMeta};
use crate::embedding::ImageEmbedder;

/// One row of the product catalog CSV.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogRow {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub color: String,
    pub image_url: String,
}

/// Read all rows from the catalog CSV, skipping rows that fail to parse.
pub fn read_catalog(path: &Path) -> anyhow::Result<Vec<CatalogRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening catalog csv at {path:?}"))?;

    let mut rows = Vec::new();
    for (line, record) in reader.deserialize::<CatalogRow>().enumerate() {
        match record {
            Ok(row) => rows.push(row),
            Err(err) => {
                log::warn!("skipping malformed catalog row {}: {err}", line + 2);
            }
        }
    }

    if rows.is_empty() {
        anyhow::bail!("catalog csv at {path:?} contains no usable rows");
    }

    Ok(rows)
}

/// Product id -> metadata, first row wins for products spanning several rows.
pub fn load_metadata(rows: &[CatalogRow]) -> HashMap<String, ProductMeta> {
    let mut metadata = HashMap::new();
    for row in rows {
        metadata.entry(row.id.clone()).or_insert_with(|| ProductMeta {
            title: row.title.clone(),
            category: row.category.clone(),
            color: row.color.clone(),
            image_url: row.image_url.clone(),
        });
    }
    metadata
}

/// Download, embed and index every catalog row. Returns the built index
/// along with the flat artifacts for persistence.
pub fn build(
    rows: &[CatalogRow],
    embedder: &Arc<dyn ImageEmbedder>,
    download_timeout: Duration,
) -> anyhow::Result<CatalogIndex> {
    let client = reqwest::blocking::Client::builder()
        .timeout(download_timeout)
        .build()
        .context("building catalog download client")?;

    let mut index = CatalogIndex::new(embedder.dimensions(), load_metadata(rows));

    let progress = ProgressBar::new(rows.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    progress.set_message("embedding catalog");

    let mut skipped = 0usize;
    for row in rows {
        progress.inc(1);
        match embed_row(row, &client, embedder.as_ref()) {
            Ok(embedding) => {
                if let Err(err) = index.push(row.id.clone(), embedding) {
                    log::warn!("skipping catalog row for {}: {err}", row.id);
                    skipped += 1;
                }
            }
            Err(err) => {
                log::warn!("skipping catalog row for {}: {err:#}", row.id);
                skipped += 1;
            }
        }
    }
    progress.finish_and_clear();

    if index.len() == 0 {
        anyhow::bail!("catalog build produced no embeddings ({skipped} rows skipped)");
    }

    if skipped > 0 {
        log::info!(
            "catalog build finished: {} rows indexed, {skipped} skipped",
            index.len()
        );
    }

    Ok(index)
}

fn embed_row(
    row: &CatalogRow,
    client: &reqwest::blocking::Client,
    embedder: &dyn ImageEmbedder,
) -> anyhow::Result<Vec<f32>> {
    let response = client
        .get(&row.image_url)
        .send()
        .with_context(|| format!("downloading {}", row.image_url))?
        .error_for_status()
        .with_context(|| format!("downloading {}", row.image_url))?;

    let bytes = response.bytes().context("reading image body")?;

    // Re-encode into a format the embedding model is guaranteed to decode.
    let decoded = image::load_from_memory(&bytes).context("decoding product image")?;
    let mut temp = tempfile::Builder::new()
        .prefix("catalog-")
        .suffix(".png")
        .tempfile()
        .context("creating temp image file")?;
    decoded
        .save(temp.path())
        .context("writing temp product image")?;
    temp.flush().ok();

    embedder
        .embed_image(temp.path())
        .context("embedding product image")
}
