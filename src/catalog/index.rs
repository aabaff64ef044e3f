//! In-memory catalog index with inner-product similarity search.
//!
//! Holds one unit-norm embedding per catalog row (a product can appear more
//! than once, one row per shot angle) plus a parallel product-id list and a
//! per-product metadata map.

use std::collections::HashMap;

/// Display metadata for one product, taken from the first catalog row seen
/// for its id (the representative shot angle).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductMeta {
    pub title: String,
    pub category: String,
    pub color: String,
    pub image_url: String,
}

/// A nearest-neighbor hit from the index.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub product_id: String,
    /// Inner product over unit vectors, i.e. cosine similarity
    pub score: f32,
}

pub struct CatalogIndex {
    embeddings: Vec<Vec<f32>>,
    product_ids: Vec<String>,
    metadata: HashMap<String, ProductMeta>,
    dimensions: usize,
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,

    #[error("Embeddings and product ids are not parallel: {embeddings} rows vs {ids} ids")]
    ParallelMismatch { embeddings: usize, ids: usize },
}

impl CatalogIndex {
    pub fn new(dimensions: usize, metadata: HashMap<String, ProductMeta>) -> Self {
        Self {
            embeddings: Vec::new(),
            product_ids: Vec::new(),
            metadata,
            dimensions,
        }
    }

    /// Assemble an index from persisted parts.
    pub fn from_parts(
        embeddings: Vec<Vec<f32>>,
        product_ids: Vec<String>,
        metadata: HashMap<String, ProductMeta>,
        dimensions: usize,
    ) -> Result<Self, IndexError> {
        if embeddings.len() != product_ids.len() {
            return Err(IndexError::ParallelMismatch {
                embeddings: embeddings.len(),
                ids: product_ids.len(),
            });
        }
        for embedding in &embeddings {
            if embedding.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: dimensions,
                    got: embedding.len(),
                });
            }
        }

        Ok(Self {
            embeddings,
            product_ids,
            metadata,
            dimensions,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn embeddings(&self) -> &[Vec<f32>] {
        &self.embeddings
    }

    pub fn product_ids(&self) -> &[String] {
        &self.product_ids
    }

    pub fn meta(&self, product_id: &str) -> Option<&ProductMeta> {
        self.metadata.get(product_id)
    }

    /// Append one catalog row.
    ///
    /// Returns an error if the embedding has the wrong dimensions or zero
    /// norm (cannot participate in cosine similarity).
    pub fn push(&mut self, product_id: String, embedding: Vec<f32>) -> Result<(), IndexError> {
        if embedding.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        let norm = l2_norm(&embedding);
        if norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        self.embeddings.push(embedding);
        self.product_ids.push(product_id);
        Ok(())
    }

    /// Search for the `top_k` nearest catalog rows by inner product.
    ///
    /// Rows are unit vectors, so the inner product is cosine similarity.
    /// Results come back similarity-descending. The same product id can
    /// appear more than once when several of its rows are close.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }
        if l2_norm(query) < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let mut results: Vec<Neighbor> = self
            .embeddings
            .iter()
            .zip(self.product_ids.iter())
            .map(|(embedding, product_id)| Neighbor {
                product_id: product_id.clone(),
                score: dot(query, embedding),
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);

        Ok(results)
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
