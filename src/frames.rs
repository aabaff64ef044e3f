//! Frame extraction adapter, backed by an ffmpeg subprocess.

use std::path::{Path, PathBuf};
use std::process::Command;

/// Extract frames from `video_path` into `frames_dir` at `frame_rate` frames
/// per second of video time, named `frame_0001.jpg`, `frame_0002.jpg`, ...
///
/// Returns the extracted frame paths in frame order. Extraction failure
/// comes back as an empty list; the caller decides whether that is fatal.
pub fn extract_frames(video_path: &Path, frames_dir: &Path, frame_rate: u32) -> Vec<PathBuf> {
    if let Err(err) = std::fs::create_dir_all(frames_dir) {
        log::error!("failed to create frame dir {frames_dir:?}: {err}");
        return vec![];
    }

    log::info!("extracting frames from {video_path:?} at {frame_rate} fps");

    let pattern = frames_dir.join("frame_%04d.jpg");
    let result = Command::new("ffmpeg")
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-i")
        .arg(video_path)
        .arg("-vf")
        .arg(format!("fps={frame_rate}"))
        .arg("-q:v")
        .arg("2")
        .arg(&pattern)
        .output();

    match result {
        Ok(output) if output.status.success() => {}
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::error!(
                "ffmpeg exited with {} for {video_path:?}: {}",
                output.status,
                stderr.trim()
            );
            return vec![];
        }
        Err(err) => {
            log::error!("failed to spawn ffmpeg for {video_path:?}: {err}");
            return vec![];
        }
    }

    let frames = list_frames(frames_dir);
    log::info!("extracted {} frames into {frames_dir:?}", frames.len());
    frames
}

/// List frame files in a directory, ordered by frame number (file name order,
/// the zero-padded naming makes the two agree).
pub fn list_frames(frames_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(frames_dir) else {
        return vec![];
    };

    let mut frames: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .map(|ext| ext == "jpg")
                    .unwrap_or(false)
        })
        .collect();

    frames.sort();
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_frames_is_ordered() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["frame_0003.jpg", "frame_0001.jpg", "frame_0002.jpg"] {
            std::fs::write(tmp.path().join(name), b"jpg").unwrap();
        }
        // non-frame files are ignored
        std::fs::write(tmp.path().join("notes.txt"), b"x").unwrap();

        let frames = list_frames(tmp.path());
        let names: Vec<_> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["frame_0001.jpg", "frame_0002.jpg", "frame_0003.jpg"]);
    }

    #[test]
    fn test_list_frames_missing_dir_is_empty() {
        assert!(list_frames(Path::new("/no/such/dir")).is_empty());
    }

    #[test]
    fn test_extract_frames_bad_input_degrades_to_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let bogus = tmp.path().join("not_a_video.mp4");
        std::fs::write(&bogus, b"garbage").unwrap();

        let frames = extract_frames(&bogus, &tmp.path().join("frames"), 1);
        assert!(frames.is_empty());
    }
}
