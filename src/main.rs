use std::sync::{mpsc, Arc};

use clap::Parser;

mod aggregate;
mod cache;
mod catalog;
mod cli;
mod config;
mod detect;
mod embedding;
mod frames;
mod jobs;
mod matching;
mod media;
mod pipeline;
mod storage;
#[cfg(test)]
mod tests;
mod transcribe;
mod vibes;
mod web;

use catalog::CatalogService;
use config::Config;
use detect::HttpDetector;
use embedding::ClipImageEmbedder;
use jobs::{JobStore, Task};
use pipeline::PipelineContext;
use transcribe::HttpTranscriber;
use vibes::LlmVibeClassifier;

fn base_path() -> String {
    std::env::var("REELMATCH_PATH").unwrap_or_else(|_| ".".to_string())
}

pub fn parse_hashtags(hashtags: String) -> Vec<String> {
    hashtags
        .split(',')
        .flat_map(|value| value.split(' ').filter(|value| !value.is_empty()))
        .map(|s| s.trim_start_matches('#').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn build_context(config: Config) -> anyhow::Result<Arc<PipelineContext>> {
    let embedder = Arc::new(ClipImageEmbedder::new(
        &config.matching.model,
        config.models_dir(),
    )?);

    let catalog = Arc::new(CatalogService::new(config.clone(), embedder));

    Ok(Arc::new(PipelineContext {
        transcriber: Arc::new(HttpTranscriber::new(&config.transcription)),
        detector: Arc::new(HttpDetector::new(&config.detection)),
        vibe_classifier: Arc::new(LlmVibeClassifier::new(&config.vibe)),
        catalog,
        config,
    }))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();
    let base = base_path();
    let config = Config::load_with(&base)?;

    match args.command {
        cli::Command::Daemon {} => {
            let ctx = build_context(config)?;
            let store = Arc::new(JobStore::load(Arc::new(storage::BackendLocal::new(&base)?)));

            let (task_tx, task_rx) = mpsc::channel::<Task>();
            let queue_handle = std::thread::spawn({
                let ctx = ctx.clone();
                let store = store.clone();
                move || jobs::start_queue(task_rx, ctx, store)
            });

            web::start_daemon(ctx, store, task_tx, queue_handle);
            Ok(())
        }

        cli::Command::Run {
            url,
            caption,
            hashtags,
        } => {
            let ctx = build_context(config)?;
            let video_id = media::video_id_from_url(&url);
            if video_id.is_empty() {
                anyhow::bail!("could not derive a video id from {url}");
            }

            let request = pipeline::VideoRequest {
                video_id,
                video_url: url,
                caption,
                hashtags: hashtags.map(parse_hashtags).unwrap_or_default(),
            };

            let analysis = pipeline::run(&ctx, &request)?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
            Ok(())
        }

        cli::Command::BuildIndex {} => {
            let ctx = build_context(config)?;
            let index = ctx.catalog.rebuild()?;
            println!(
                "catalog index built: {} rows, {} dimensions",
                index.len(),
                index.dimensions()
            );
            Ok(())
        }

        cli::Command::Jobs {} => {
            let store = JobStore::load(Arc::new(storage::BackendLocal::new(&base)?));
            println!("{}", serde_json::to_string_pretty(&store.list())?);
            Ok(())
        }
    }
}
