use crate::cli::{Args, Command};
use anyhow::Context;
use clap::Parser;
use futures::future::join_all;
use inflight::client::{ApiClient, RequestOptions};
use inflight::config::Config;
use inflight::logging::setup_logging;
use inflight::utils::fmt_duration;
use std::process::ExitCode;
use tokio::time::Instant;
use tracing::{error, info, warn};

mod cli;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config before anything else so startup logs are never silently dropped
    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load config: {err}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        "starting inflight"
    );

    match run(args.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = ?err, "inflight failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    match command {
        Command::Stats => {
            println!("{config:#?}");
            Ok(())
        }
        Command::Fetch {
            endpoint,
            concurrency,
            rounds,
            params,
        } => {
            let client = ApiClient::from_config(&config.client, config.dedup.clone())
                .context("Failed to create API client")?;
            let options = params
                .into_iter()
                .fold(RequestOptions::new(), |options, (name, value)| {
                    options.param(name, value)
                });

            for round in 1..=rounds {
                let start = Instant::now();
                let calls = (0..concurrency).map(|_| client.get(&endpoint, options.clone()));
                let results = join_all(calls).await;

                let failed: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
                if let Some(err) = failed.first() {
                    warn!(round, error = %err, status = ?err.status(), "round had failures");
                }
                info!(
                    round,
                    concurrency,
                    failed = failed.len(),
                    duration = fmt_duration(start.elapsed()),
                    "round complete"
                );
            }

            let stats = client.dedup_stats();
            info!(
                total = stats.total_requests,
                hits = stats.cache_hits,
                misses = stats.cache_misses,
                dedup_rate = stats.dedup_rate,
                "deduplication summary"
            );
            let report = serde_json::json!({
                "dedup": stats,
                "endpoints": client.all_metrics(),
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to render report")?
            );

            client.deduplicator().destroy();
            Ok(())
        }
    }
}
