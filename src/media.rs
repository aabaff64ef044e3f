//! Media acquisition: resolve a remote video reference into a local file.

use anyhow::{bail, Context};
use std::time::Duration;
use tempfile::NamedTempFile;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Derive the video identifier from a video reference: the stem of the last
/// path segment, for URLs and bare paths alike.
///
/// `https://cdn.example.com/media/reel_001.mp4` -> `reel_001`
pub fn video_id_from_url(video_url: &str) -> String {
    let last_segment = match url::Url::parse(video_url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|segments| segments.last().map(|s| s.to_string()))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| video_url.to_string()),
        // not an absolute URL, treat as a filesystem-ish path
        Err(_) => video_url
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(video_url)
            .to_string(),
    };

    match last_segment.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem.to_string(),
        _ => last_segment,
    }
}

/// Download a video into a named temp file. The file is deleted when the
/// returned handle is dropped, on every exit path of the owning stage.
pub fn download_video(video_url: &str) -> anyhow::Result<NamedTempFile> {
    log::info!("downloading video from {video_url}");

    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .context("failed to build http client")?;

    let response = client
        .get(video_url)
        .send()
        .with_context(|| format!("failed to fetch video from {video_url}"))?;

    if !response.status().is_success() {
        bail!(
            "video download from {video_url} returned status {}",
            response.status()
        );
    }

    let bytes = response
        .bytes()
        .with_context(|| format!("failed to read video body from {video_url}"))?;

    if bytes.is_empty() {
        bail!("video download from {video_url} returned an empty body");
    }

    let mut tmp = tempfile::Builder::new()
        .suffix(".mp4")
        .tempfile()
        .context("failed to create temp file for video")?;

    use std::io::Write;
    tmp.write_all(&bytes)
        .context("failed to write downloaded video to temp file")?;
    tmp.flush()?;

    log::info!("downloaded {} bytes from {video_url}", bytes.len());
    Ok(tmp)
}
