//! # Sawasdee News
//!
//! A Thai news and travel content aggregator. A scheduled batch job pulls
//! RSS feeds, filters out duplicates, summarizes and translates fresh
//! articles through Gemini, and persists everything to flat JSON files. A
//! dashboard API serves the aggregated content alongside curated travel
//! events, reader comments, and air-quality/exchange-rate panels, with an
//! admin console for manual curation.
//!
//! ## Usage
//!
//! ```sh
//! sawasdee_news --data-dir ./data batch
//! sawasdee_news --data-dir ./data serve --schedule "0 0 */6 * * *"
//! sawasdee_news --data-dir ./live deploy --incoming ./staging
//! ```
//!
//! ## Architecture
//!
//! The batch pipeline runs to completion per invocation:
//! 1. **Indexing**: pull items from every configured RSS/Atom feed
//! 2. **Dedup**: seen-set, signature, and near-duplicate title filtering
//! 3. **Analysis**: Gemini summarization/translation (parallel, bounded)
//! 4. **Merge**: date-keyed archive update plus panel refresh
//!
//! The `serve` subcommand exposes the store over HTTP and can run the same
//! batch on a cron schedule in-process.

use std::error::Error;
use std::sync::atomic::Ordering;

use clap::Parser;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod api;
mod batch;
mod cli;
mod config;
mod dedup;
mod deploy;
mod error;
mod models;
mod panels;
mod server;
mod sources;
mod store;
mod utils;

use api::{with_backoff, GeminiClient};
use cli::{Cli, Commands};
use config::AppConfig;
use error::AggregatorError;
use panels::PanelKeys;
use server::{AdminAuth, AppState};
use store::JsonStore;
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let args = Cli::parse();
    debug!(?args.data_dir, "Parsed CLI arguments");

    // Early check: ensure the data dir is writable
    if let Err(e) = ensure_writable_dir(&args.data_dir).await {
        error!(
            path = %args.data_dir.display(),
            error = %e,
            "Data directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let store = JsonStore::new(&args.data_dir);
    let config = AppConfig::load(&args.data_dir).await?;

    match args.command {
        Commands::Batch {
            gemini_api_key,
            waqi_token,
            maps_api_key,
        } => {
            let keys = PanelKeys {
                waqi_token,
                maps_api_key,
            };
            let model = with_backoff(GeminiClient::new(gemini_api_key, config.gemini_model.clone()));
            let stats = batch::run_batch(&store, &config, &model, Some(&keys)).await?;
            info!(
                analyzed = stats.analyzed,
                skipped_seen = stats.skipped_seen,
                skipped_similar = stats.skipped_similar,
                failed = stats.failed,
                "Batch finished"
            );
        }

        Commands::Serve {
            bind,
            schedule,
            gemini_api_key,
            waqi_token,
            maps_api_key,
        } => {
            let keys = PanelKeys {
                waqi_token,
                maps_api_key,
            };
            let bind_addr = bind.unwrap_or_else(|| config.bind_addr.clone());
            let state = AppState::new(store, config, keys, gemini_api_key.clone());

            let _scheduler = match schedule {
                Some(expr) => Some(start_scheduler(&expr, &state, gemini_api_key).await?),
                None => None,
            };

            server::serve(state, AdminAuth::from_env(), &bind_addr).await?;
        }

        Commands::Deploy {
            incoming,
            dry_run,
            force,
        } => {
            let options = deploy::DeployOptions { dry_run, force };
            match deploy::safe_deploy(
                &incoming,
                &args.data_dir,
                config.similarity_threshold,
                options,
            )
            .await
            {
                Ok(report) => info!(
                    added = report.topics_added,
                    replaced = report.topics_replaced,
                    skipped = report.topics_skipped,
                    events = report.events_total,
                    manual_kept = report.manual_events_kept,
                    comment_threads = report.comment_threads,
                    processed_urls = report.processed_urls,
                    dry_run,
                    "Deploy finished"
                ),
                Err(e @ AggregatorError::StaleDeploy(_)) => {
                    error!(error = %e, "Deploy refused");
                    std::process::exit(2);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    info!(elapsed = ?start_time.elapsed(), "Execution complete");
    Ok(())
}

/// Register the in-process batch schedule.
///
/// The returned scheduler must stay alive for the lifetime of the process;
/// dropping it cancels the jobs.
async fn start_scheduler(
    expr: &str,
    state: &AppState,
    gemini_api_key: Option<String>,
) -> Result<JobScheduler, Box<dyn Error>> {
    let Some(api_key) = gemini_api_key else {
        warn!("No Gemini API key; --schedule ignored (refresh would have nothing to analyze)");
        return Ok(JobScheduler::new().await?);
    };

    let scheduler = JobScheduler::new().await?;
    let job_state = state.clone();
    let job = Job::new_async(expr, move |_uuid, _scheduler| {
        let state = job_state.clone();
        let api_key = api_key.clone();
        Box::pin(async move {
            if state
                .refresh_running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                warn!("Scheduled refresh skipped; previous run still in progress");
                return;
            }
            let config = state.config.read().await.clone();
            let model = with_backoff(GeminiClient::new(api_key, config.gemini_model.clone()));
            info!("Scheduled refresh starting");
            match batch::run_batch(&state.store, &config, &model, Some(&state.keys)).await {
                Ok(stats) => info!(analyzed = stats.analyzed, "Scheduled refresh finished"),
                Err(e) => error!(error = %e, "Scheduled refresh failed"),
            }
            state.refresh_running.store(false, Ordering::SeqCst);
        })
    })?;
    scheduler.add(job).await?;
    scheduler.start().await?;
    info!(schedule = expr, "Batch schedule registered");
    Ok(scheduler)
}
