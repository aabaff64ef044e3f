//! Visual matching: detection crop -> embedding -> nearest catalog product.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogIndex;
use crate::config::MatchingConfig;
use crate::detect::Detection;
use crate::embedding::ImageEmbedder;

/// Crops narrower or shorter than this are noise, not garments.
const MIN_CROP_SIDE: u32 = 10;

/// How close the best catalog neighbor is to the query crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Similar,
}

/// One detection resolved against the catalog. Carries the detected
/// garment class plus the matched product's representative metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductMatch {
    /// Detected garment class, e.g. "dress" or "jacket"
    #[serde(rename = "type")]
    pub product_type: String,
    pub match_type: MatchType,
    pub matched_product_id: String,
    pub confidence: f32,
    pub title: String,
    pub category: String,
    pub color: String,
    pub image_url: String,
}

/// Classify a similarity score against the configured thresholds.
/// `None` means the candidate is dropped entirely.
pub fn classify(score: f32, config: &MatchingConfig) -> Option<MatchType> {
    if score < config.similarity_floor {
        None
    } else if score > config.exact_threshold {
        Some(MatchType::Exact)
    } else {
        Some(MatchType::Similar)
    }
}

/// Resolve one detection against the catalog: crop, embed, search the
/// `top_k` nearest rows, keep the candidates that survive the similarity
/// floor. A detection may legitimately yield zero matches. Crop or
/// embedding failures drop the detection with a warning rather than
/// failing the whole video.
pub fn match_detection(
    detection: &Detection,
    frame_path: &Path,
    embedder: &dyn ImageEmbedder,
    index: &CatalogIndex,
    config: &MatchingConfig,
) -> Vec<ProductMatch> {
    let crop = match crop_detection(frame_path, &detection.bbox) {
        Ok(Some(crop)) => crop,
        Ok(None) => return vec![],
        Err(err) => {
            log::warn!(
                "dropping detection in frame {}: {err:#}",
                detection.frame_index
            );
            return vec![];
        }
    };

    let query = match embedder.embed_image(crop.path()) {
        Ok(query) => query,
        Err(err) => {
            log::warn!(
                "dropping detection in frame {}: {err}",
                detection.frame_index
            );
            return vec![];
        }
    };

    let neighbors = match index.search(&query, config.top_k.max(1)) {
        Ok(neighbors) => neighbors,
        Err(err) => {
            log::warn!(
                "dropping detection in frame {}: {err}",
                detection.frame_index
            );
            return vec![];
        }
    };

    neighbors
        .into_iter()
        .filter_map(|neighbor| {
            let match_type = classify(neighbor.score, config)?;
            let meta = index.meta(&neighbor.product_id).cloned().unwrap_or_default();

            Some(ProductMatch {
                product_type: detection.class_name.clone(),
                match_type,
                matched_product_id: neighbor.product_id,
                confidence: neighbor.score,
                title: meta.title,
                category: meta.category,
                color: meta.color,
                image_url: meta.image_url,
            })
        })
        .collect()
}

/// Cut the bounding box out of the frame and write it as a PNG temp file.
/// Returns `Ok(None)` for degenerate boxes that are too small to embed.
fn crop_detection(
    frame_path: &Path,
    bbox: &[u32; 4],
) -> anyhow::Result<Option<tempfile::NamedTempFile>> {
    let frame = image::open(frame_path)
        .with_context(|| format!("opening frame {frame_path:?}"))?;

    let [x, y, w, h] = *bbox;
    let x = x.min(frame.width().saturating_sub(1));
    let y = y.min(frame.height().saturating_sub(1));
    let w = w.min(frame.width() - x);
    let h = h.min(frame.height() - y);

    if w < MIN_CROP_SIDE || h < MIN_CROP_SIDE {
        return Ok(None);
    }

    let crop = frame.crop_imm(x, y, w, h);
    let temp = tempfile::Builder::new()
        .prefix("crop-")
        .suffix(".png")
        .tempfile()
        .context("creating crop temp file")?;
    crop.save(temp.path()).context("writing crop temp file")?;

    Ok(Some(temp))
}
