//! Image embedding wrapper for fastembed.
//!
//! Wraps fastembed's CLIP-family image models behind a small trait so the
//! matching engine and catalog builder can be exercised with a stub model in
//! tests. Embeddings leave this module unit-normalized.

use fastembed::{ImageEmbedding, ImageEmbeddingModel, ImageInitOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

pub trait ImageEmbedder: Send + Sync {
    /// Embed one image file into a unit vector.
    fn embed_image(&self, image_path: &Path) -> Result<Vec<f32>, EmbeddingError>;

    /// Embedding dimensions produced by this model.
    fn dimensions(&self) -> usize;

    /// Model name, used to key persisted catalog artifacts.
    fn name(&self) -> &str;

    /// SHA256 of the model name, stored in the catalog artifact header so a
    /// model swap invalidates the persisted embeddings.
    fn model_id_hash(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.name().as_bytes());
        hasher.finalize().into()
    }
}

/// Wrapper around fastembed's ImageEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct ClipImageEmbedder {
    model: Mutex<ImageEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl ClipImageEmbedder {
    /// Create a new image embedding model with the given name.
    ///
    /// The model is downloaded on first use if not cached. Models are cached
    /// in the `clip/` subdirectory of `cache_dir`.
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_name)?;
        let dimensions = Self::model_dimensions(&model_enum);

        let models_dir = cache_dir.join("clip");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = ImageInitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let model = ImageEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    /// Parse model name string to fastembed enum.
    fn parse_model_name(name: &str) -> Result<ImageEmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "clip-vit-b-32" | "clipvitb32" => Ok(ImageEmbeddingModel::ClipVitB32),
            "resnet50" | "resnet-50" => Ok(ImageEmbeddingModel::Resnet50),
            "unicom-vit-b-32" | "unicomvitb32" => Ok(ImageEmbeddingModel::UnicomVitB32),
            "unicom-vit-b-16" | "unicomvitb16" => Ok(ImageEmbeddingModel::UnicomVitB16),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: clip-vit-b-32, resnet50, unicom-vit-b-32, unicom-vit-b-16",
                name
            ))),
        }
    }

    fn model_dimensions(model: &ImageEmbeddingModel) -> usize {
        match model {
            ImageEmbeddingModel::ClipVitB32 => 512,
            ImageEmbeddingModel::Resnet50 => 2048,
            ImageEmbeddingModel::UnicomVitB32 => 512,
            ImageEmbeddingModel::UnicomVitB16 => 768,
            _ => 512,
        }
    }
}

impl ImageEmbedder for ClipImageEmbedder {
    fn embed_image(&self, image_path: &Path) -> Result<Vec<f32>, EmbeddingError> {
        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let embeddings = model
            .embed(vec![image_path], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        let embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))?;

        Ok(normalize(embedding))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

/// Scale a vector to unit L2 norm. Zero vectors come back unchanged.
pub fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_model_name() {
        let tmp = tempfile::tempdir().unwrap();
        let result = ClipImageEmbedder::new("nonexistent-model", tmp.path().to_path_buf());
        assert!(matches!(result, Err(EmbeddingError::InvalidModel(_))));
    }

    #[test]
    fn test_normalize_produces_unit_vector() {
        let v = normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_leaves_zero_vector() {
        assert_eq!(normalize(vec![0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
    }

    // Integration test requires model download - run with --ignored
    #[test]
    #[ignore = "requires model download"]
    fn test_clip_model_creation() {
        let tmp = tempfile::tempdir().unwrap();
        let model = ClipImageEmbedder::new("clip-vit-b-32", tmp.path().to_path_buf());
        assert!(model.is_ok());

        let model = model.unwrap();
        assert_eq!(model.name(), "clip-vit-b-32");
        assert_eq!(model.dimensions(), 512);
    }
}
