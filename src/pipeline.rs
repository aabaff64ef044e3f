//! End-to-end analysis of one video: download, transcribe, extract frames,
//! detect garments, match against the catalog, classify vibes, persist the
//! result. Runs on a queue worker thread.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::aggregate::{dedupe_products, VideoAnalysis};
use crate::cache::JobArtifacts;
use crate::catalog::CatalogService;
use crate::config::Config;
use crate::detect::Detector;
use crate::frames::{extract_frames, list_frames};
use crate::matching::match_detection;
use crate::media::download_video;
use crate::transcribe::Transcriber;
use crate::vibes::VibeClassifier;

/// Everything a worker needs to process one video.
pub struct PipelineContext {
    pub config: Config,
    pub transcriber: Arc<dyn Transcriber>,
    pub detector: Arc<dyn Detector>,
    pub vibe_classifier: Arc<dyn VibeClassifier>,
    pub catalog: Arc<CatalogService>,
}

/// One analysis request. Caption and hashtags are optional text signal
/// for vibe classification, alongside the transcript.
#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub video_id: String,
    pub video_url: String,
    pub caption: Option<String>,
    pub hashtags: Vec<String>,
}

impl VideoRequest {
    pub fn new(video_id: impl Into<String>, video_url: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            video_url: video_url.into(),
            caption: None,
            hashtags: Vec::new(),
        }
    }
}

pub fn run(ctx: &PipelineContext, request: &VideoRequest) -> anyhow::Result<VideoAnalysis> {
    let config = &ctx.config;
    let video_id = request.video_id.as_str();
    let output_path = config.output_path(video_id);
    let frames_dir = config.frames_dir_for(video_id);
    let transcript_path = config.transcript_path(video_id);

    let artifacts = JobArtifacts::new(
        output_path.clone(),
        frames_dir.clone(),
        transcript_path.clone(),
    );

    // One stale artifact invalidates all of them; otherwise partial caches
    // from different runs could be mixed into one result.
    if artifacts.purge_if_stale(config.cache_ttl())? {
        log::info!("purged stale artifacts for video {video_id}");
    }

    if artifacts.output_exists() {
        log::info!("cache hit for video {video_id}");
        let data = std::fs::read(&output_path)?;
        return serde_json::from_slice(&data)
            .with_context(|| format!("parsing cached output for {video_id}"));
    }

    let mut frames = list_frames(&frames_dir);
    let need_frames = frames.is_empty();
    let need_transcript = !transcript_path.is_file();

    if need_frames || need_transcript {
        let video = download_video(&request.video_url)?;

        if need_transcript {
            let transcript = ctx.transcriber.transcribe(video.path(), video_id)?;
            save_transcript(&transcript_path, &transcript)?;
        }

        if need_frames {
            frames = extract_frames(video.path(), &frames_dir, config.frame_rate);
        }
    }

    if frames.is_empty() {
        anyhow::bail!("no frames extracted from video {video_id}");
    }

    let transcript = std::fs::read_to_string(&transcript_path)
        .with_context(|| format!("reading transcript for {video_id}"))?;

    let index = ctx.catalog.ensure_loaded()?;
    let embedder = ctx.catalog.embedder();

    let mut detection_count = 0usize;
    let mut matches = Vec::new();
    for frame in &frames {
        let detections = ctx.detector.detect(frame);
        detection_count += detections.len();

        for detection in &detections {
            matches.extend(match_detection(
                detection,
                frame,
                embedder.as_ref(),
                &index,
                &config.matching,
            ));
        }
    }

    log::info!(
        "video {video_id}: {} frames, {detection_count} detections, {} matches",
        frames.len(),
        matches.len()
    );

    // Vibes describe garments; a video with nothing detected gets none,
    // and the classifier is never called for it. An unreadable vocabulary
    // degrades to an empty list like any other classification failure.
    let allowed = if detection_count > 0 {
        match load_vibe_list(&config.vibes_list_path()) {
            Ok(allowed) => allowed,
            Err(err) => {
                log::error!("vibe list unavailable for {video_id}, skipping vibes: {err:#}");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let vibes = if detection_count > 0 && !allowed.is_empty() {
        let mut texts = Vec::new();
        if !request.hashtags.is_empty() {
            texts.push(request.hashtags.join(" "));
        }
        if let Some(caption) = request.caption.as_ref().filter(|c| !c.trim().is_empty()) {
            texts.push(caption.clone());
        }
        texts.push(transcript);
        ctx.vibe_classifier.classify(&texts, &allowed)
    } else {
        Vec::new()
    };

    let analysis = VideoAnalysis {
        video_id: video_id.to_string(),
        vibes,
        products: dedupe_products(matches),
    };

    save_output(&output_path, &analysis)?;
    Ok(analysis)
}

/// Closed vibe vocabulary, a JSON string array at `data/vibeslist.json`.
fn load_vibe_list(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading vibe list at {path:?}"))?;
    serde_json::from_str(&content).context("vibe list is not a JSON string array")
}

fn save_transcript(path: &Path, transcript: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp = path.with_extension("tmp");
    std::fs::write(&temp, transcript)?;
    std::fs::rename(&temp, path)?;
    Ok(())
}

fn save_output(path: &Path, analysis: &VideoAnalysis) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp = path.with_extension("tmp");
    std::fs::write(&temp, serde_json::to_vec_pretty(analysis)?)?;
    std::fs::rename(&temp, path)?;
    Ok(())
}
