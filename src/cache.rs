//! TTL gatekeeping for per-job artifacts.
//!
//! A job leaves three artifacts behind: the output JSON, the extracted frame
//! directory and the transcript file. They form one logical cache entry: if
//! any of them has outlived the TTL, all of them are purged so the next
//! submission re-runs the whole pipeline instead of rebuilding from a
//! partially stale state.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// True iff `path` exists and its mtime is older than `ttl`.
/// A missing path is never stale.
pub fn is_stale(path: &Path, ttl: Duration) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };

    match SystemTime::now().duration_since(modified) {
        Ok(age) => age > ttl,
        // mtime in the future, treat as fresh
        Err(_) => false,
    }
}

/// Recursively remove a file or directory tree. Removing a path that does
/// not exist is not an error. Children are removed before their directory.
pub fn purge(path: &Path) -> std::io::Result<()> {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return Ok(());
    };

    if meta.is_dir() {
        for entry in std::fs::read_dir(path)? {
            purge(&entry?.path())?;
        }
        std::fs::remove_dir(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// The three filesystem artifacts belonging to one video identifier.
#[derive(Debug, Clone)]
pub struct JobArtifacts {
    pub output: PathBuf,
    pub frames_dir: PathBuf,
    pub transcript: PathBuf,
}

impl JobArtifacts {
    pub fn new(output: PathBuf, frames_dir: PathBuf, transcript: PathBuf) -> Self {
        Self {
            output,
            frames_dir,
            transcript,
        }
    }

    fn paths(&self) -> [&Path; 3] {
        [&self.output, &self.frames_dir, &self.transcript]
    }

    pub fn any_stale(&self, ttl: Duration) -> bool {
        self.paths().iter().any(|p| is_stale(p, ttl))
    }

    /// Check the combined entry and, when any artifact is stale, purge all
    /// three. Returns true when a purge happened, so the caller can also drop
    /// the job's status record.
    pub fn purge_if_stale(&self, ttl: Duration) -> std::io::Result<bool> {
        if !self.any_stale(ttl) {
            return Ok(false);
        }

        log::info!(
            "cache entry expired, purging {:?}, {:?}, {:?}",
            self.output,
            self.frames_dir,
            self.transcript
        );
        self.purge_all()?;
        Ok(true)
    }

    pub fn purge_all(&self) -> std::io::Result<()> {
        for path in self.paths() {
            purge(path)?;
        }
        Ok(())
    }

    pub fn output_exists(&self) -> bool {
        self.output.is_file()
    }
}
