use crate::storage::{self, StorageManager};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const TASK_QUEUE_MAX_THREADS: u16 = 4;

/// Default cache TTL for job artifacts (outputs, frames, transcripts)
const DEFAULT_CACHE_TTL_MINUTES: u64 = 30;
/// Default frame sampling rate (frames per second of video time)
const DEFAULT_FRAME_RATE: u32 = 1;
/// Default image embedding model for catalog matching
const DEFAULT_MATCHING_MODEL: &str = "clip-vit-b-32";
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Configuration for the object detection adapter
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Base URL of the detection inference service
    #[serde(default = "default_detection_endpoint")]
    pub endpoint: String,

    /// Minimum detection confidence [0.0, 1.0]
    #[serde(default = "default_detection_confidence")]
    pub confidence_threshold: f32,

    /// Request timeout in seconds
    #[serde(default = "default_detection_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_detection_endpoint(),
            confidence_threshold: default_detection_confidence(),
            timeout_secs: default_detection_timeout_secs(),
        }
    }
}

fn default_detection_endpoint() -> String {
    "http://127.0.0.1:8600".to_string()
}

fn default_detection_confidence() -> f32 {
    0.3
}

fn default_detection_timeout_secs() -> u64 {
    60
}

/// Configuration for the transcription adapter
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Base URL of the transcription service
    #[serde(default = "default_transcription_endpoint")]
    pub endpoint: String,

    /// Whisper model size hint passed to the service
    #[serde(default = "default_transcription_model_size")]
    pub model_size: String,

    /// Request timeout in seconds
    #[serde(default = "default_transcription_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_transcription_endpoint(),
            model_size: default_transcription_model_size(),
            timeout_secs: default_transcription_timeout_secs(),
        }
    }
}

fn default_transcription_endpoint() -> String {
    "http://127.0.0.1:8700".to_string()
}

fn default_transcription_model_size() -> String {
    "small".to_string()
}

fn default_transcription_timeout_secs() -> u64 {
    180
}

/// Configuration for LLM-based vibe classification
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VibeConfig {
    /// Chat-completions endpoint (OpenAI-compatible)
    #[serde(default = "default_vibe_endpoint")]
    pub endpoint: String,

    /// Model name to request
    #[serde(default = "default_vibe_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_vibe_api_key_env")]
    pub api_key_env: String,

    /// Maximum number of vibes attached to one video
    #[serde(default = "default_max_vibes")]
    pub max_vibes: usize,

    /// Request timeout in seconds
    #[serde(default = "default_vibe_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VibeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_vibe_endpoint(),
            model: default_vibe_model(),
            api_key_env: default_vibe_api_key_env(),
            max_vibes: default_max_vibes(),
            timeout_secs: default_vibe_timeout_secs(),
        }
    }
}

fn default_vibe_endpoint() -> String {
    "https://api.groq.com/openai/v1/chat/completions".to_string()
}

fn default_vibe_model() -> String {
    "llama3-8b-8192".to_string()
}

fn default_vibe_api_key_env() -> String {
    "REELMATCH_VIBE_API_KEY".to_string()
}

fn default_max_vibes() -> usize {
    3
}

fn default_vibe_timeout_secs() -> u64 {
    30
}

/// Configuration for visual matching against the catalog
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Image embedding model name
    #[serde(default = "default_matching_model")]
    pub model: String,

    /// Number of nearest neighbors considered per detection
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Candidates below this similarity are dropped entirely
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f32,

    /// Candidates above this similarity are classified "exact"
    #[serde(default = "default_exact_threshold")]
    pub exact_threshold: f32,

    /// Timeout for catalog image downloads during index builds, in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            model: default_matching_model(),
            top_k: default_top_k(),
            similarity_floor: default_similarity_floor(),
            exact_threshold: default_exact_threshold(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

fn default_matching_model() -> String {
    DEFAULT_MATCHING_MODEL.to_string()
}

fn default_top_k() -> usize {
    1
}

fn default_similarity_floor() -> f32 {
    0.75
}

fn default_exact_threshold() -> f32 {
    0.9
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "task_queue_max_threads")]
    pub task_queue_max_threads: u16,
    #[serde(default = "default_cache_ttl_minutes")]
    pub cache_ttl_minutes: u64,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub vibe: VibeConfig,
    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn task_queue_max_threads() -> u16 {
    TASK_QUEUE_MAX_THREADS
}

fn default_cache_ttl_minutes() -> u64 {
    DEFAULT_CACHE_TTL_MINUTES
}

fn default_frame_rate() -> u32 {
    DEFAULT_FRAME_RATE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            task_queue_max_threads: task_queue_max_threads(),
            cache_ttl_minutes: default_cache_ttl_minutes(),
            frame_rate: default_frame_rate(),
            detection: DetectionConfig::default(),
            transcription: TranscriptionConfig::default(),
            vibe: VibeConfig::default(),
            matching: MatchingConfig::default(),
            base_path: String::new(),
        }
    }
}

impl Config {
    fn validate(&mut self) {
        if self.task_queue_max_threads == 0 {
            self.task_queue_max_threads = 1
        }

        if self.frame_rate == 0 {
            self.frame_rate = 1
        }

        if self.cache_ttl_minutes == 0 {
            panic!("cache_ttl_minutes must be greater than 0");
        }

        let det = &self.detection;
        if !(0.0..=1.0).contains(&det.confidence_threshold) {
            panic!(
                "detection.confidence_threshold must be between 0.0 and 1.0, got {}",
                det.confidence_threshold
            );
        }

        let m = &self.matching;
        if !(0.0..=1.0).contains(&m.similarity_floor) {
            panic!(
                "matching.similarity_floor must be between 0.0 and 1.0, got {}",
                m.similarity_floor
            );
        }
        if !(0.0..=1.0).contains(&m.exact_threshold) {
            panic!(
                "matching.exact_threshold must be between 0.0 and 1.0, got {}",
                m.exact_threshold
            );
        }
        if m.exact_threshold < m.similarity_floor {
            panic!(
                "matching.exact_threshold ({}) must not be below matching.similarity_floor ({})",
                m.exact_threshold, m.similarity_floor
            );
        }
        if m.top_k == 0 {
            panic!("matching.top_k must be greater than 0");
        }
        if m.download_timeout_secs == 0 {
            panic!("matching.download_timeout_secs must be greater than 0");
        }
    }

    pub fn load_with(base_path: &str) -> anyhow::Result<Self> {
        let store = storage::BackendLocal::new(base_path)?;

        // create new if does not exist
        if !store.exists("config.yaml") {
            store.write(
                "config.yaml",
                serde_yml::to_string(&Self::default())?.as_bytes(),
            )?;
        }

        let config_str = String::from_utf8(store.read("config.yaml")?)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_string();

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write("config.yaml", config_str.as_bytes())?;
        Ok(())
    }

    pub fn base_path(&self) -> PathBuf {
        PathBuf::from(&self.base_path)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.base_path().join("data")
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.data_dir().join("videos")
    }

    pub fn catalog_csv_path(&self) -> PathBuf {
        self.data_dir().join("catalog.csv")
    }

    pub fn vibes_list_path(&self) -> PathBuf {
        self.data_dir().join("vibeslist.json")
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.data_dir().join("frames")
    }

    /// Frame directory for one video: `data/frames/<video_id>/`
    pub fn frames_dir_for(&self, video_id: &str) -> PathBuf {
        self.frames_dir().join(video_id)
    }

    pub fn transcripts_dir(&self) -> PathBuf {
        self.data_dir().join("transcripts")
    }

    pub fn transcript_path(&self, video_id: &str) -> PathBuf {
        self.transcripts_dir()
            .join(format!("{video_id}_transcript.txt"))
    }

    pub fn models_dir(&self) -> PathBuf {
        self.base_path().join("models")
    }

    pub fn catalog_embeddings_path(&self) -> PathBuf {
        self.models_dir().join("catalog_embeddings.bin")
    }

    pub fn catalog_product_ids_path(&self) -> PathBuf {
        self.models_dir().join("catalog_product_ids.json")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.base_path().join("outputs")
    }

    pub fn output_path(&self, video_id: &str) -> PathBuf {
        self.outputs_dir().join(format!("{video_id}.json"))
    }

    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_ttl_minutes * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_default_config() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().to_str().unwrap();

        let config = Config::load_with(base).unwrap();
        assert!(tmp.path().join("config.yaml").exists());
        assert_eq!(config.task_queue_max_threads, TASK_QUEUE_MAX_THREADS);
        assert_eq!(config.cache_ttl_minutes, 30);
        assert_eq!(config.matching.similarity_floor, 0.75);
        assert_eq!(config.matching.exact_threshold, 0.9);
    }

    #[test]
    fn test_artifact_paths_are_scoped_by_video_id() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_with(tmp.path().to_str().unwrap()).unwrap();

        assert_eq!(
            config.output_path("reel_001"),
            tmp.path().join("outputs").join("reel_001.json")
        );
        assert_eq!(
            config.frames_dir_for("reel_001"),
            tmp.path().join("data").join("frames").join("reel_001")
        );
        assert_eq!(
            config.transcript_path("reel_001"),
            tmp.path()
                .join("data")
                .join("transcripts")
                .join("reel_001_transcript.txt")
        );
    }

    #[test]
    fn test_zero_threads_coerced_to_one() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.yaml"),
            "task_queue_max_threads: 0\n",
        )
        .unwrap();

        let config = Config::load_with(tmp.path().to_str().unwrap()).unwrap();
        assert_eq!(config.task_queue_max_threads, 1);
    }
}
