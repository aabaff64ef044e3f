//! In-memory job registry with a JSON snapshot on disk.
//!
//! Jobs are keyed by video id. The snapshot exists so operators can inspect
//! the registry and so a restart starts from a known state; in-flight
//! entries are not resumable and are dropped when the snapshot is loaded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::aggregate::VideoAnalysis;
use crate::storage::StorageManager;

const SNAPSHOT_FILE: &str = "jobs.json";

pub fn now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Done { output: VideoAnalysis },
    Error { message: String },
}

impl JobStatus {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRecord {
    pub video_id: String,
    pub video_url: String,
    pub status: JobStatus,
    pub submitted_at: u128,
    pub updated_at: u128,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    jobs: Vec<JobRecord>,
    now: u128,
}

/// Outcome of a submission attempt.
pub enum Submission {
    /// A new pending record was created; the caller must enqueue a task.
    Accepted(JobRecord),
    /// A job for this video is already pending or running.
    AlreadyQueued(JobRecord),
}

pub struct JobStore {
    jobs: Mutex<HashMap<String, JobRecord>>,
    storage: Arc<dyn StorageManager>,
}

impl JobStore {
    /// Load the registry from its snapshot. Pending and running entries
    /// belong to a previous process and are discarded.
    pub fn load(storage: Arc<dyn StorageManager>) -> Self {
        let mut jobs = HashMap::new();

        if storage.exists(SNAPSHOT_FILE) {
            match storage
                .read(SNAPSHOT_FILE)
                .map_err(anyhow::Error::from)
                .and_then(|data| Ok(serde_json::from_slice::<Snapshot>(&data)?))
            {
                Ok(snapshot) => {
                    for record in snapshot.jobs {
                        if record.status.is_in_flight() {
                            log::warn!(
                                "dropping interrupted job for video {}",
                                record.video_id
                            );
                            continue;
                        }
                        jobs.insert(record.video_id.clone(), record);
                    }
                }
                Err(err) => {
                    log::error!("failed to read job snapshot, starting empty: {err}");
                }
            }
        }

        let store = Self {
            jobs: Mutex::new(jobs),
            storage,
        };
        store.persist(&store.lock());
        store
    }

    /// Register a job for the video, or return the one already in flight.
    /// Terminal records (done or error) are replaced by a fresh pending one.
    pub fn submit(&self, video_id: &str, video_url: &str) -> Submission {
        let mut jobs = self.lock();

        if let Some(existing) = jobs.get(video_id) {
            if existing.status.is_in_flight() {
                return Submission::AlreadyQueued(existing.clone());
            }
        }

        let record = JobRecord {
            video_id: video_id.to_string(),
            video_url: video_url.to_string(),
            status: JobStatus::Pending,
            submitted_at: now(),
            updated_at: now(),
        };
        jobs.insert(video_id.to_string(), record.clone());
        self.persist(&jobs);

        Submission::Accepted(record)
    }

    /// Move a pending job to running. Returns false when the job is not
    /// pending anymore, in which case the worker must not run it.
    pub fn begin(&self, video_id: &str) -> bool {
        let mut jobs = self.lock();
        let started = match jobs.get_mut(video_id) {
            Some(record) if record.status == JobStatus::Pending => {
                record.status = JobStatus::Running;
                record.updated_at = now();
                true
            }
            _ => false,
        };
        if started {
            self.persist(&jobs);
        }
        started
    }

    pub fn complete(&self, video_id: &str, output: VideoAnalysis) {
        self.finish(video_id, JobStatus::Done { output });
    }

    /// Record a done job directly, for cache hits served without a run
    /// (fresh output on disk but no record, e.g. after a restart).
    pub fn record_done(&self, video_id: &str, video_url: &str, output: VideoAnalysis) -> JobRecord {
        let mut jobs = self.lock();
        let record = JobRecord {
            video_id: video_id.to_string(),
            video_url: video_url.to_string(),
            status: JobStatus::Done { output },
            submitted_at: now(),
            updated_at: now(),
        };
        jobs.insert(video_id.to_string(), record.clone());
        self.persist(&jobs);
        record
    }

    /// Drop a job record entirely, used when its artifacts are purged.
    /// In-flight jobs are left alone; their worker owns the record.
    pub fn remove(&self, video_id: &str) {
        let mut jobs = self.lock();
        match jobs.get(video_id) {
            Some(record) if !record.status.is_in_flight() => {
                jobs.remove(video_id);
                self.persist(&jobs);
            }
            _ => {}
        }
    }

    pub fn fail(&self, video_id: &str, message: String) {
        self.finish(video_id, JobStatus::Error { message });
    }

    pub fn get(&self, video_id: &str) -> Option<JobRecord> {
        self.lock().get(video_id).cloned()
    }

    pub fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.lock().values().cloned().collect();
        records.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        records
    }

    fn finish(&self, video_id: &str, status: JobStatus) {
        let mut jobs = self.lock();
        if let Some(record) = jobs.get_mut(video_id) {
            record.status = status;
            record.updated_at = now();
            self.persist(&jobs);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, JobRecord>> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, jobs: &HashMap<String, JobRecord>) {
        let snapshot = Snapshot {
            jobs: jobs.values().cloned().collect(),
            now: now(),
        };
        let data = match serde_json::to_vec_pretty(&snapshot) {
            Ok(data) => data,
            Err(err) => {
                log::error!("failed to serialize job snapshot: {err}");
                return;
            }
        };
        if let Err(err) = self.storage.write(SNAPSHOT_FILE, &data) {
            log::error!("failed to write job snapshot: {err}");
        }
    }
}
