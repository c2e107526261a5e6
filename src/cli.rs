//! Command-line interface definitions.
//!
//! Three subcommands cover the system's entry points: `batch` runs the
//! aggregation pipeline once, `serve` runs the dashboard (optionally with an
//! in-process schedule), and `deploy` merges a staged data directory into
//! the live one. API keys can come from flags or environment variables.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Thai news and travel content aggregator.
///
/// # Examples
///
/// ```sh
/// # One-off aggregation run
/// sawasdee_news --data-dir ./data batch
///
/// # Dashboard with a batch run every six hours
/// sawasdee_news --data-dir ./data serve --schedule "0 0 */6 * * *"
///
/// # Promote staged data
/// sawasdee_news --data-dir ./live deploy --incoming ./staging --dry-run
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Data directory holding the JSON documents
    #[arg(short, long, default_value = "./data")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pull feeds, analyze fresh articles, and merge them into the archive
    Batch {
        /// Gemini API key
        #[arg(long, env = "GEMINI_API_KEY")]
        gemini_api_key: String,

        /// WAQI token for the air-quality panel
        #[arg(long, env = "WAQI_TOKEN")]
        waqi_token: Option<String>,

        /// Google Maps key for event geocoding
        #[arg(long, env = "MAPS_API_KEY")]
        maps_api_key: Option<String>,
    },

    /// Serve the dashboard API and admin console
    Serve {
        /// Bind address, overriding the configured one
        #[arg(long)]
        bind: Option<String>,

        /// Six-field cron expression; runs the batch in-process on schedule
        #[arg(long)]
        schedule: Option<String>,

        /// Gemini API key (required for scheduled or admin-triggered refresh)
        #[arg(long, env = "GEMINI_API_KEY")]
        gemini_api_key: Option<String>,

        /// WAQI token for the air-quality panel
        #[arg(long, env = "WAQI_TOKEN")]
        waqi_token: Option<String>,

        /// Google Maps key for event geocoding
        #[arg(long, env = "MAPS_API_KEY")]
        maps_api_key: Option<String>,
    },

    /// Merge a staged data directory into this one without clobbering
    /// curation
    Deploy {
        /// Staged data directory to merge from
        #[arg(long)]
        incoming: PathBuf,

        /// Report the merge without writing
        #[arg(long)]
        dry_run: bool,

        /// Deploy even when the staged archive is older than the live one
        #[arg(long)]
        force: bool,
    },
}
