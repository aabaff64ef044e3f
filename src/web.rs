use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::signal;

use crate::{
    cache::JobArtifacts,
    config::Config,
    jobs::{JobRecord, JobStatus, JobStore, Submission, Task},
    media,
    pipeline::{PipelineContext, VideoRequest},
};

#[derive(Clone)]
struct SharedState {
    config: Config,
    store: Arc<JobStore>,
    task_tx: mpsc::Sender<Task>,
}

pub fn start_daemon(
    ctx: Arc<PipelineContext>,
    store: Arc<JobStore>,
    task_tx: mpsc::Sender<Task>,
    queue_handle: JoinHandle<()>,
) {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async { start_app(ctx, store, task_tx, queue_handle).await });
}

async fn start_app(
    ctx: Arc<PipelineContext>,
    store: Arc<JobStore>,
    task_tx: mpsc::Sender<Task>,
    queue_handle: JoinHandle<()>,
) {
    let listen_addr = ctx.config.listen_addr.clone();
    let shared_state = Arc::new(SharedState {
        config: ctx.config.clone(),
        store,
        task_tx: task_tx.clone(),
    });

    async fn shutdown_signal(task_tx: mpsc::Sender<Task>, queue_handle: JoinHandle<()>) {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        // drain running jobs before the process exits
        log::warn!("waiting for job queue to stop");
        let _ = task_tx.send(Task::Shutdown);
        let _ = tokio::task::spawn_blocking(move || {
            let _ = queue_handle.join();
        })
        .await;
    }

    let signal = shutdown_signal(task_tx, queue_handle);

    let app = router(shared_state.clone()).layer(
        tower_http::trace::TraceLayer::new_for_http()
            .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
            .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO)),
    );

    let listener = tokio::net::TcpListener::bind(&listen_addr).await.unwrap();
    log::info!("listening on {listen_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .unwrap();
}

fn router(shared_state: Arc<SharedState>) -> Router {
    Router::new()
        .nest_service(
            "/api/outputs/",
            tower_http::services::ServeDir::new(shared_state.config.outputs_dir()),
        )
        .nest_service(
            "/videos/",
            tower_http::services::ServeDir::new(shared_state.config.videos_dir()),
        )
        .route("/api/jobs", post(submit_job))
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/:video_id", get(job_status))
        .route("/api/videos", get(list_videos))
        .route("/api/config", get(get_config))
        .with_state(shared_state)
}

#[derive(Debug)]
enum HttpError {
    BadRequest(String),
    NotFound,
    Internal(anyhow::Error),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        match self {
            HttpError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, json!({"error": msg}).to_string())
            }
            HttpError::NotFound => (
                StatusCode::NOT_FOUND,
                json!({"error": "job not found"}).to_string(),
            ),
            HttpError::Internal(err) => {
                log::error!("{err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": err.to_string()}).to_string(),
                )
            }
        }
        .into_response()
    }
}

impl From<anyhow::Error> for HttpError {
    fn from(err: anyhow::Error) -> Self {
        HttpError::Internal(err)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitJobRequest {
    pub video_url: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

async fn submit_job(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<JobRecord>), HttpError> {
    log::debug!("payload: {payload:?}");

    let video_url = payload.video_url.trim().to_string();
    if video_url.is_empty() {
        return Err(HttpError::BadRequest("video_url is required".to_string()));
    }

    let video_id = media::video_id_from_url(&video_url);
    if video_id.is_empty() {
        return Err(HttpError::BadRequest(
            "could not derive a video id from video_url".to_string(),
        ));
    }

    let state = state.clone();
    tokio::task::block_in_place(move || {
        // Staleness first: an expired entry reverts the job to absent.
        let artifacts = JobArtifacts::new(
            state.config.output_path(&video_id),
            state.config.frames_dir_for(&video_id),
            state.config.transcript_path(&video_id),
        );
        if artifacts
            .purge_if_stale(state.config.cache_ttl())
            .map_err(anyhow::Error::from)?
        {
            state.store.remove(&video_id);
        }

        // A fresh output short-circuits without scheduling a run.
        if artifacts.output_exists() {
            if let Ok(output) = load_output(&state.config.output_path(&video_id)) {
                let record = state.store.record_done(&video_id, &video_url, output);
                return Ok((StatusCode::OK, Json(record)));
            }
        }

        match state.store.submit(&video_id, &video_url) {
            Submission::Accepted(record) => {
                state
                    .task_tx
                    .send(Task::Analyze(VideoRequest {
                        video_id: record.video_id.clone(),
                        video_url: record.video_url.clone(),
                        caption: payload.caption.clone(),
                        hashtags: payload.hashtags.clone(),
                    }))
                    .map_err(|_| {
                        HttpError::Internal(anyhow::anyhow!("job queue is shutting down"))
                    })?;
                Ok((StatusCode::ACCEPTED, Json(record)))
            }
            Submission::AlreadyQueued(record) => Ok((StatusCode::OK, Json(record))),
        }
    })
}

fn load_output(path: &std::path::Path) -> anyhow::Result<crate::aggregate::VideoAnalysis> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

async fn job_status(
    State(state): State<Arc<SharedState>>,
    Path(video_id): Path<String>,
) -> Result<Json<JobRecord>, HttpError> {
    let record = state.store.get(&video_id);

    // The persisted output is authoritative: a completed video still polls
    // as done when the registry lost its record (restart, wiped snapshot).
    let already_done = matches!(
        record.as_ref().map(|r| &r.status),
        Some(JobStatus::Done { .. })
    );
    if !already_done {
        let output_path = state.config.output_path(&video_id);
        if output_path.is_file() {
            if let Ok(output) = load_output(&output_path) {
                let video_url = record.map(|r| r.video_url).unwrap_or_default();
                return Ok(Json(state.store.record_done(&video_id, &video_url, output)));
            }
        }
    }

    record.map(Json).ok_or(HttpError::NotFound)
}

async fn list_jobs(State(state): State<Arc<SharedState>>) -> Json<Vec<JobRecord>> {
    Json(state.store.list())
}

#[derive(Debug, Serialize)]
struct VideoEntry {
    video_id: String,
    video_url: String,
}

/// Locally available source videos, served statically under `/videos/`.
async fn list_videos(State(state): State<Arc<SharedState>>) -> Json<Vec<VideoEntry>> {
    let Ok(entries) = std::fs::read_dir(state.config.videos_dir()) else {
        return Json(vec![]);
    };

    let mut videos: Vec<VideoEntry> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(".mp4"))
        .map(|name| VideoEntry {
            video_id: name.trim_end_matches(".mp4").to_string(),
            video_url: format!("/videos/{name}"),
        })
        .collect();
    videos.sort_by(|a, b| a.video_id.cmp(&b.video_id));

    Json(videos)
}

async fn get_config(State(state): State<Arc<SharedState>>) -> Json<Config> {
    Json(state.config.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BackendLocal;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state(dir: &std::path::Path) -> (Arc<SharedState>, mpsc::Receiver<Task>) {
        let config = Config::load_with(dir.to_str().unwrap()).unwrap();
        let backend = BackendLocal::new(dir.to_str().unwrap()).unwrap();
        let store = Arc::new(JobStore::load(Arc::new(backend)));
        let (task_tx, task_rx) = mpsc::channel();
        (
            Arc::new(SharedState {
                config,
                store,
                task_tx,
            }),
            task_rx,
        )
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_submit_enqueues_and_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, task_rx) = test_state(tmp.path());

        let request = || {
            Request::builder()
                .method("POST")
                .uri("/api/jobs")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"video_url": "https://v.example/reel_77.mp4"}"#,
                ))
                .unwrap()
        };

        let response = router(state.clone()).oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let job = body_json(response).await;
        assert_eq!(job["video_id"], "reel_77");
        assert_eq!(job["status"]["state"], "pending");

        // exactly one task enqueued
        assert!(matches!(task_rx.try_recv(), Ok(Task::Analyze(_))));

        // same URL again: existing record, nothing new enqueued
        let response = router(state).oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(task_rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_submit_with_fresh_output_short_circuits() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, task_rx) = test_state(tmp.path());

        let output = crate::aggregate::VideoAnalysis {
            video_id: "reel_done".to_string(),
            vibes: vec!["y2k".to_string()],
            products: vec![],
        };
        let output_path = state.config.output_path("reel_done");
        std::fs::create_dir_all(output_path.parent().unwrap()).unwrap();
        std::fs::write(&output_path, serde_json::to_vec(&output).unwrap()).unwrap();

        let request = Request::builder()
            .method("POST")
            .uri("/api/jobs")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"video_url": "https://v.example/reel_done.mp4"}"#,
            ))
            .unwrap();

        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let job = body_json(response).await;
        assert_eq!(job["status"]["state"], "done");
        assert_eq!(job["status"]["output"]["vibes"][0], "y2k");

        // no run scheduled
        assert!(task_rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_submit_rejects_empty_url() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, _task_rx) = test_state(tmp.path());

        let request = Request::builder()
            .method("POST")
            .uri("/api/jobs")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"video_url": "  "}"#))
            .unwrap();

        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_job_status_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, _task_rx) = test_state(tmp.path());

        let request = Request::builder()
            .uri("/api/jobs/nope")
            .body(Body::empty())
            .unwrap();

        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_job_status_falls_back_to_persisted_output() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, _task_rx) = test_state(tmp.path());

        // output on disk, but the registry has no record for it
        let output = crate::aggregate::VideoAnalysis {
            video_id: "reel_lost".to_string(),
            vibes: vec![],
            products: vec![],
        };
        let output_path = state.config.output_path("reel_lost");
        std::fs::create_dir_all(output_path.parent().unwrap()).unwrap();
        std::fs::write(&output_path, serde_json::to_vec(&output).unwrap()).unwrap();

        let request = Request::builder()
            .uri("/api/jobs/reel_lost")
            .body(Body::empty())
            .unwrap();

        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let job = body_json(response).await;
        assert_eq!(job["status"]["state"], "done");
        assert_eq!(job["status"]["output"]["video_id"], "reel_lost");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_videos_enumerates_mp4_files() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, _task_rx) = test_state(tmp.path());

        let videos_dir = state.config.videos_dir();
        std::fs::create_dir_all(&videos_dir).unwrap();
        std::fs::write(videos_dir.join("reel_b.mp4"), b"mp4").unwrap();
        std::fs::write(videos_dir.join("reel_a.mp4"), b"mp4").unwrap();
        std::fs::write(videos_dir.join("notes.txt"), b"x").unwrap();

        let request = Request::builder()
            .uri("/api/videos")
            .body(Body::empty())
            .unwrap();

        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let videos = body_json(response).await;
        assert_eq!(videos[0]["video_id"], "reel_a");
        assert_eq!(videos[0]["video_url"], "/videos/reel_a.mp4");
        assert_eq!(videos[1]["video_id"], "reel_b");
        assert!(videos.get(2).is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_job_status_reports_error_state() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, _task_rx) = test_state(tmp.path());

        state.store.submit("reel_9", "https://v.example/reel_9.mp4");
        state.store.begin("reel_9");
        state.store.fail("reel_9", "detector unreachable".to_string());

        let request = Request::builder()
            .uri("/api/jobs/reel_9")
            .body(Body::empty())
            .unwrap();

        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let job = body_json(response).await;
        assert_eq!(job["status"]["state"], "error");
        assert_eq!(job["status"]["message"], "detector unreachable");
    }
}
