//! Transcription adapter: media bytes in, transcript text out.

use crate::config::TranscriptionConfig;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub trait Transcriber: Send + Sync {
    /// Transcribe the audio track of a local media file. Failure here is
    /// fatal to the job; a silent empty transcript is never substituted.
    fn transcribe(&self, video_path: &Path, video_id: &str) -> anyhow::Result<String>;
}

/// Whisper-style HTTP transcription service client.
///
/// Contract: `POST {endpoint}/transcribe?model=<size>` with the raw media
/// bytes as the body, JSON `{"text": "..."}` back.
pub struct HttpTranscriber {
    endpoint: String,
    model_size: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl HttpTranscriber {
    pub fn new(config: &TranscriptionConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model_size: config.model_size.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl Transcriber for HttpTranscriber {
    fn transcribe(&self, video_path: &Path, video_id: &str) -> anyhow::Result<String> {
        log::info!("transcribing audio for {video_id}");

        let bytes = std::fs::read(video_path)
            .with_context(|| format!("failed to read media file {video_path:?}"))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;

        let response = client
            .post(format!("{}/transcribe", self.endpoint))
            .query(&[("model", self.model_size.as_str())])
            .header("content-type", "application/octet-stream")
            .body(bytes)
            .send()
            .with_context(|| format!("transcription request failed for {video_id}"))?;

        if !response.status().is_success() {
            bail!(
                "transcription service returned status {} for {video_id}",
                response.status()
            );
        }

        let parsed: TranscriptionResponse = response
            .json()
            .with_context(|| format!("malformed transcription response for {video_id}"))?;

        log::info!(
            "transcription for {video_id} complete ({} chars)",
            parsed.text.len()
        );
        Ok(parsed.text)
    }
}
