//! Per-video aggregation: collapse frame-level matches into one entry per
//! catalog product and assemble the final analysis document.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::matching::ProductMatch;

/// Final analysis for one video, persisted as `outputs/<video_id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoAnalysis {
    pub video_id: String,
    pub vibes: Vec<String>,
    pub products: Vec<ProductMatch>,
}

/// Keep one match per product id, the one with the highest confidence.
/// The survivors are ordered by confidence descending so the strongest
/// match leads the report; ties keep first-seen order.
pub fn dedupe_products(matches: Vec<ProductMatch>) -> Vec<ProductMatch> {
    let mut best: HashMap<String, (usize, ProductMatch)> = HashMap::new();

    for (seen, candidate) in matches.into_iter().enumerate() {
        match best.get(&candidate.matched_product_id) {
            Some((_, current)) if current.confidence >= candidate.confidence => {}
            _ => {
                best.insert(candidate.matched_product_id.clone(), (seen, candidate));
            }
        }
    }

    let mut products: Vec<(usize, ProductMatch)> = best.into_values().collect();
    products.sort_by(|(a_seen, a), (b_seen, b)| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a_seen.cmp(b_seen))
    });

    products.into_iter().map(|(_, product)| product).collect()
}
