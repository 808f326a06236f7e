/*
newscast - single-binary main.rs
Runs one pipeline pass and prints the result, or serves the HTTP API with --serve.
*/

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use newscast::pipeline::PipelineBuilder;
use newscast::server::{launch_rocket, AppState};
use newscast::storage::{PodcastArchive, RunHistory};

#[derive(Parser, Debug)]
#[command(name = "newscast", about = "Daily news digest: fetch, deduplicate, summarize, narrate, deliver")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Start the HTTP server instead of running once
    #[arg(long, conflicts_with = "cleanup")]
    serve: bool,

    /// Delete expired archived podcasts and exit
    #[arg(long)]
    cleanup: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = load_config(args.config).await?;

    if args.cleanup {
        return cleanup_archive(&config).await;
    }

    let client = reqwest::Client::builder()
        .user_agent(config.politeness.user_agent())
        .build()
        .context("failed to build HTTP client")?;

    let history = match &config.database {
        Some(db) => match RunHistory::open(&db.path).await {
            Ok(history) => {
                info!(db_path = %db.path, "run history enabled");
                Some(history)
            }
            Err(e) => {
                error!(%e, db_path = %db.path, "failed to open run history database");
                return Err(e);
            }
        },
        None => None,
    };

    let pipeline = PipelineBuilder::from_config(&config, client)
        .history(history)
        .build();
    let pipeline = Arc::new(pipeline);
    let cancel = CancellationToken::new();

    if args.serve {
        let state = AppState::new(pipeline, cancel);
        return launch_rocket(&config.server, state).await;
    }

    // Ctrl-C stops the run at the next stage boundary
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("ctrl-c received, cancelling pipeline run");
            signal_token.cancel();
        }
    });

    let result = pipeline.run_detached(cancel).await;
    let json = serde_json::to_string_pretty(&result).context("failed to serialize run result")?;
    println!("{}", json);

    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

/// Layer config.toml (or --config) over config.default.toml.
async fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = explicit {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    .map_err(|e| {
        error!(%e, "failed to load configuration");
        e
    })?;
    config.validate()?;
    info!(default = ?default_path, override = ?override_path, sources = config.enabled_sources().len(), "configuration loaded");
    Ok(config)
}

async fn cleanup_archive(config: &Config) -> Result<()> {
    let Some(dir) = &config.storage.archive_dir else {
        warn!("storage.archive_dir not set; nothing to clean up");
        return Ok(());
    };
    let archive = PodcastArchive::new(dir, config.storage.retention_days());
    let report = archive.cleanup_expired(Utc::now()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
