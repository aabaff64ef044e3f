use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP daemon and the job queue.
    Daemon {},

    /// Analyze a single video synchronously and print the result.
    Run {
        /// URL of the video to analyze
        url: String,

        /// Caption text, extra signal for vibe classification
        #[clap(long)]
        caption: Option<String>,

        /// Comma-separated hashtags, extra signal for vibe classification
        #[clap(long)]
        hashtags: Option<String>,
    },

    /// Build (or rebuild) the catalog embedding index from the CSV.
    BuildIndex {},

    /// Print the job registry.
    Jobs {},
}
