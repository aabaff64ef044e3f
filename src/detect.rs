//! Object detection adapter and the `Detection` type it produces.

use crate::config::DetectionConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One bounding region in one extracted frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    pub class_name: String,
    /// [x, y, w, h] in frame pixel coordinates
    pub bbox: [u32; 4],
    pub confidence: f32,
    pub frame_index: i64,
}

pub trait Detector: Send + Sync {
    /// Detect garments in one frame. Per-frame detection failure is recovered
    /// locally: the adapter logs and returns an empty list, never an error.
    fn detect(&self, frame_path: &Path) -> Vec<Detection>;
}

static FRAME_INDEX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"frame_(\d+)").expect("valid frame index regex"));

/// Parse the frame index out of a `frame_0042.jpg` style file name.
/// Returns -1 when the name does not carry one.
pub fn frame_index_from_path(frame_path: &Path) -> i64 {
    frame_path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| FRAME_INDEX_RE.captures(name))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(-1)
}

/// YOLO-style HTTP detection service client.
///
/// Contract: `POST {endpoint}/detect?conf=<threshold>` with the frame bytes
/// as the body, JSON `[{"class_name", "bbox": [x,y,w,h], "confidence"}]`
/// back. The frame index is derived from the file name on this side.
pub struct HttpDetector {
    endpoint: String,
    confidence_threshold: f32,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    class_name: String,
    bbox: [u32; 4],
    confidence: f32,
}

impl HttpDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            confidence_threshold: config.confidence_threshold,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn detect_inner(&self, frame_path: &Path) -> anyhow::Result<Vec<Detection>> {
        let bytes = std::fs::read(frame_path)?;
        let frame_index = frame_index_from_path(frame_path);

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;

        let response = client
            .post(format!("{}/detect", self.endpoint))
            .query(&[("conf", self.confidence_threshold.to_string())])
            .header("content-type", "application/octet-stream")
            .body(bytes)
            .send()?
            .error_for_status()?;

        let wire: Vec<WireDetection> = response.json()?;

        Ok(wire
            .into_iter()
            .map(|d| Detection {
                class_name: d.class_name,
                bbox: d.bbox,
                confidence: d.confidence,
                frame_index,
            })
            .collect())
    }
}

impl Detector for HttpDetector {
    fn detect(&self, frame_path: &Path) -> Vec<Detection> {
        match self.detect_inner(frame_path) {
            Ok(detections) => {
                log::info!(
                    "detected {} items in frame {:?}",
                    detections.len(),
                    frame_path.file_name().unwrap_or_default()
                );
                detections
            }
            Err(err) => {
                log::error!("detection failed for frame {frame_path:?}: {err}");
                vec![]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_index_parsed_from_name() {
        assert_eq!(
            frame_index_from_path(Path::new("/tmp/frames/reel/frame_0042.jpg")),
            42
        );
        assert_eq!(frame_index_from_path(Path::new("frame_0001.jpg")), 1);
    }

    #[test]
    fn test_frame_index_defaults_to_minus_one() {
        assert_eq!(frame_index_from_path(Path::new("cover.jpg")), -1);
    }

    #[test]
    fn test_detector_returns_empty_on_missing_frame() {
        let detector = HttpDetector::new(&crate::config::DetectionConfig::default());
        assert!(detector.detect(Path::new("/no/such/frame.jpg")).is_empty());
    }
}
