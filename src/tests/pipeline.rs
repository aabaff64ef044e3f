use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgb, RgbImage};

use crate::catalog::{CatalogService, CatalogStorage};
use crate::config::Config;
use crate::detect::{Detection, Detector};
use crate::embedding::{EmbeddingError, ImageEmbedder};
use crate::matching::MatchType;
use crate::pipeline::{self, PipelineContext, VideoRequest};
use crate::transcribe::Transcriber;
use crate::vibes::VibeClassifier;

/// Embeds an image as its mean RGB color, unit-normalized. Red, green and
/// blue images land exactly on the three axes, which makes similarity
/// scores against axis-aligned catalog rows predictable.
pub struct ColorEmbedder;

impl ImageEmbedder for ColorEmbedder {
    fn embed_image(&self, image_path: &Path) -> Result<Vec<f32>, EmbeddingError> {
        let image = image::open(image_path)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
            .to_rgb8();

        let mut sums = [0f64; 3];
        for pixel in image.pixels() {
            for channel in 0..3 {
                sums[channel] += pixel.0[channel] as f64;
            }
        }

        let norm = sums.iter().map(|s| s * s).sum::<f64>().sqrt();
        if norm == 0.0 {
            return Ok(vec![0.0, 0.0, 0.0]);
        }
        Ok(sums.iter().map(|s| (s / norm) as f32).collect())
    }

    fn dimensions(&self) -> usize {
        3
    }

    fn name(&self) -> &str {
        "color-test"
    }
}

pub struct StaticTranscriber {
    pub text: String,
    pub calls: AtomicUsize,
}

impl Transcriber for Arc<StaticTranscriber> {
    fn transcribe(&self, _video_path: &Path, _video_id: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }
}

pub struct StaticDetector {
    pub detections: Vec<Detection>,
    pub calls: AtomicUsize,
}

impl Detector for Arc<StaticDetector> {
    fn detect(&self, _frame_path: &Path) -> Vec<Detection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.detections.clone()
    }
}

pub struct StaticVibes {
    pub reply: Vec<String>,
    pub calls: AtomicUsize,
}

impl VibeClassifier for Arc<StaticVibes> {
    fn classify(&self, _texts: &[String], _allowed: &[String]) -> Vec<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone()
    }
}

/// Detector that comes up empty for one designated frame, the way the
/// HTTP adapter recovers a failed request, and detects normally elsewhere.
pub struct FrameSkippingDetector {
    pub detections: Vec<Detection>,
    pub dead_frame: &'static str,
    pub calls: AtomicUsize,
}

impl Detector for Arc<FrameSkippingDetector> {
    fn detect(&self, frame_path: &Path) -> Vec<Detection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = frame_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if name == self.dead_frame {
            return vec![];
        }
        self.detections.clone()
    }
}

pub struct TestEnv {
    pub ctx: PipelineContext,
    pub transcriber: Arc<StaticTranscriber>,
    pub detector: Arc<StaticDetector>,
    pub vibes: Arc<StaticVibes>,
    pub tmp: tempfile::TempDir,
}

fn detection(bbox: [u32; 4]) -> Detection {
    Detection {
        class_name: "dress".to_string(),
        bbox,
        confidence: 0.8,
        frame_index: 1,
    }
}

/// Build an isolated environment with pre-seeded catalog artifacts,
/// cached frames and a cached transcript, so no network or ffmpeg is
/// ever touched. Catalog: p1 on the red axis, p2 on the green axis.
pub fn create_env(detections: Vec<Detection>, frame_color: Rgb<u8>) -> TestEnv {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let base = tmp.path().to_str().unwrap();
    let config = Config::load_with(base).expect("failed to load config");

    std::fs::create_dir_all(config.data_dir()).unwrap();
    std::fs::write(
        config.catalog_csv_path(),
        "id,title,category,color,image_url\n\
         p1,Red Dress,dress,red,https://cdn.example/p1.jpg\n\
         p2,Green Dress,dress,green,https://cdn.example/p2.jpg\n",
    )
    .unwrap();
    std::fs::write(
        config.vibes_list_path(),
        r#"["Coquette", "Clean Girl", "Y2K"]"#,
    )
    .unwrap();

    let embedder: Arc<dyn ImageEmbedder> = Arc::new(ColorEmbedder);
    let storage = CatalogStorage::new(
        config.catalog_embeddings_path(),
        config.catalog_product_ids_path(),
    );
    storage
        .save(
            &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
            &["p1".to_string(), "p2".to_string()],
            &embedder.model_id_hash(),
            3,
        )
        .unwrap();

    // cached frame and transcript for video "reel_1"
    let frames_dir = config.frames_dir_for("reel_1");
    std::fs::create_dir_all(&frames_dir).unwrap();
    RgbImage::from_pixel(64, 64, frame_color)
        .save(frames_dir.join("frame_0001.jpg"))
        .unwrap();

    std::fs::create_dir_all(config.transcripts_dir()).unwrap();
    std::fs::write(config.transcript_path("reel_1"), "soft summer looks").unwrap();

    let transcriber = Arc::new(StaticTranscriber {
        text: "unused".to_string(),
        calls: AtomicUsize::new(0),
    });
    let detector = Arc::new(StaticDetector {
        detections,
        calls: AtomicUsize::new(0),
    });
    let vibes = Arc::new(StaticVibes {
        reply: vec!["coquette".to_string()],
        calls: AtomicUsize::new(0),
    });

    let catalog = Arc::new(CatalogService::new(config.clone(), embedder));

    let ctx = PipelineContext {
        config,
        transcriber: Arc::new(transcriber.clone()),
        detector: Arc::new(detector.clone()),
        vibe_classifier: Arc::new(vibes.clone()),
        catalog,
    };

    TestEnv {
        ctx,
        transcriber,
        detector,
        vibes,
        tmp,
    }
}

#[test]
fn test_full_run_matches_and_persists() {
    let env = create_env(vec![detection([0, 0, 32, 32])], Rgb([255, 0, 0]));

    let analysis = pipeline::run(&env.ctx, &VideoRequest::new("reel_1", "https://v.example/reel_1.mp4")).unwrap();

    assert_eq!(analysis.video_id, "reel_1");
    assert_eq!(analysis.products.len(), 1);
    let product = &analysis.products[0];
    assert_eq!(product.matched_product_id, "p1");
    assert_eq!(product.match_type, MatchType::Exact);
    assert_eq!(product.product_type, "dress");
    assert_eq!(product.color, "red");
    assert!(product.confidence > 0.99);
    assert_eq!(analysis.vibes, vec!["coquette"]);

    // cached artifacts were reused, nothing was downloaded or transcribed
    assert_eq!(env.transcriber.calls.load(Ordering::SeqCst), 0);

    // result persisted
    let saved = std::fs::read(env.ctx.config.output_path("reel_1")).unwrap();
    let saved: crate::aggregate::VideoAnalysis = serde_json::from_slice(&saved).unwrap();
    assert_eq!(saved, analysis);
}

#[test]
fn test_repeated_detections_collapse_to_one_product() {
    let env = create_env(
        vec![detection([0, 0, 32, 32]), detection([16, 16, 32, 32])],
        Rgb([255, 0, 0]),
    );

    let analysis = pipeline::run(&env.ctx, &VideoRequest::new("reel_1", "https://v.example/reel_1.mp4")).unwrap();
    assert_eq!(analysis.products.len(), 1);
    assert_eq!(analysis.products[0].matched_product_id, "p1");
}

#[test]
fn test_weak_similarity_is_dropped_but_vibes_still_run() {
    // white frame embeds to [1,1,1]/sqrt(3); best dot product ~0.577
    let env = create_env(vec![detection([0, 0, 32, 32])], Rgb([255, 255, 255]));

    let analysis = pipeline::run(&env.ctx, &VideoRequest::new("reel_1", "https://v.example/reel_1.mp4")).unwrap();

    assert!(analysis.products.is_empty());
    // a detection was seen, so the classifier runs even with zero matches
    assert_eq!(env.vibes.calls.load(Ordering::SeqCst), 1);
    assert_eq!(analysis.vibes, vec!["coquette"]);
}

#[test]
fn test_no_detections_means_no_vibes() {
    let env = create_env(vec![], Rgb([255, 0, 0]));

    let analysis = pipeline::run(&env.ctx, &VideoRequest::new("reel_1", "https://v.example/reel_1.mp4")).unwrap();

    assert!(analysis.products.is_empty());
    assert!(analysis.vibes.is_empty());
    assert_eq!(env.vibes.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_fresh_output_short_circuits() {
    let env = create_env(vec![detection([0, 0, 32, 32])], Rgb([255, 0, 0]));

    let first = pipeline::run(&env.ctx, &VideoRequest::new("reel_1", "https://v.example/reel_1.mp4")).unwrap();
    let detector_calls = env.detector.calls.load(Ordering::SeqCst);
    assert!(detector_calls > 0);

    // second run must come from the cached output, without re-detection
    let second = pipeline::run(&env.ctx, &VideoRequest::new("reel_1", "https://v.example/reel_1.mp4")).unwrap();
    assert_eq!(first, second);
    assert_eq!(env.detector.calls.load(Ordering::SeqCst), detector_calls);
}

#[test]
fn test_missing_vibe_list_does_not_fail_job() {
    let env = create_env(vec![detection([0, 0, 32, 32])], Rgb([255, 0, 0]));
    std::fs::remove_file(env.ctx.config.vibes_list_path()).unwrap();

    let analysis = pipeline::run(&env.ctx, &VideoRequest::new("reel_1", "https://v.example/reel_1.mp4")).unwrap();

    // matching survives, vibes degrade to empty without a classifier call
    assert_eq!(analysis.products.len(), 1);
    assert_eq!(analysis.products[0].matched_product_id, "p1");
    assert!(analysis.vibes.is_empty());
    assert_eq!(env.vibes.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_one_dead_frame_does_not_abort_the_job() {
    let env = create_env(vec![], Rgb([255, 0, 0]));

    // nine more frames besides the one the environment seeds
    let frames_dir = env.ctx.config.frames_dir_for("reel_1");
    for i in 2..=10 {
        RgbImage::from_pixel(64, 64, Rgb([255, 0, 0]))
            .save(frames_dir.join(format!("frame_{i:04}.jpg")))
            .unwrap();
    }

    let detector = Arc::new(FrameSkippingDetector {
        detections: vec![detection([0, 0, 32, 32])],
        dead_frame: "frame_0004.jpg",
        calls: AtomicUsize::new(0),
    });
    let mut ctx = env.ctx;
    ctx.detector = Arc::new(detector.clone());

    let analysis = pipeline::run(&ctx, &VideoRequest::new("reel_1", "https://v.example/reel_1.mp4")).unwrap();

    // every frame was visited, and the nine healthy ones carried the match
    assert_eq!(detector.calls.load(Ordering::SeqCst), 10);
    assert_eq!(analysis.products.len(), 1);
    assert_eq!(analysis.products[0].matched_product_id, "p1");
}

#[test]
fn test_tiny_detection_is_ignored() {
    let env = create_env(vec![detection([0, 0, 4, 4])], Rgb([255, 0, 0]));

    let analysis = pipeline::run(&env.ctx, &VideoRequest::new("reel_1", "https://v.example/reel_1.mp4")).unwrap();
    assert!(analysis.products.is_empty());
}
