use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{get, post, routes, Build, Rocket, State};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use common::ServerConfig;

use crate::pipeline::{Pipeline, RunResult};
use crate::storage::{ArchivedPodcast, CleanupReport, RunRecord};

/// Application state stored inside Rocket managed state.
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub pipeline: Arc<Pipeline>,
    /// Held for the duration of a triggered run; one run at a time.
    pub run_lock: Mutex<()>,
    /// Parent token for triggered runs, cancelled on shutdown.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, shutdown: CancellationToken) -> Self {
        Self {
            started_at: Utc::now(),
            pipeline,
            run_lock: Mutex::new(()),
            shutdown,
        }
    }
}

#[derive(Serialize)]
struct ServiceInfo {
    service: &'static str,
    version: &'static str,
    status: &'static str,
    uptime_seconds: i64,
    history_enabled: bool,
    archive_enabled: bool,
}

#[derive(Serialize)]
struct StorageResponse {
    archive_dir: String,
    retention_days: i64,
    podcasts: Vec<ArchivedPodcast>,
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

/// Service info with uptime and which optional stores are wired.
#[get("/")]
async fn index(state: &State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "newscast",
        version: env!("CARGO_PKG_VERSION"),
        status: "ok",
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        history_enabled: state.pipeline.history().is_some(),
        archive_enabled: state.pipeline.archive().is_some(),
    })
}

/// Run the pipeline once and return its result.
/// Answers 409 while another triggered run is in progress.
#[post("/api/v1/run")]
async fn trigger_run(state: &State<AppState>) -> Result<(Status, Json<RunResult>), Status> {
    let _running = state.run_lock.try_lock().map_err(|_| {
        tracing::warn!("run requested while another run is in progress");
        Status::Conflict
    })?;

    let result = state
        .pipeline
        .clone()
        .run_detached(state.shutdown.child_token())
        .await;
    let status = if result.is_success() {
        Status::Ok
    } else {
        Status::InternalServerError
    };
    Ok((status, Json(result)))
}

#[get("/api/v1/runs?<limit>")]
async fn list_runs(state: &State<AppState>, limit: Option<i64>) -> Result<Json<Vec<RunRecord>>, Status> {
    let history = state.pipeline.history().ok_or(Status::NotFound)?;
    let runs = history
        .recent(limit.unwrap_or(20).clamp(1, 500))
        .await
        .map_err(|e| {
            tracing::error!("failed to list runs: {:#}", e);
            Status::InternalServerError
        })?;
    Ok(Json(runs))
}

#[get("/api/v1/storage")]
async fn storage_info(state: &State<AppState>) -> Result<Json<StorageResponse>, Status> {
    let archive = state.pipeline.archive().ok_or(Status::NotFound)?;
    let podcasts = archive.list().await.map_err(|e| {
        tracing::error!("failed to list archive: {:#}", e);
        Status::InternalServerError
    })?;
    Ok(Json(StorageResponse {
        archive_dir: archive.dir().display().to_string(),
        retention_days: archive.retention_days(),
        podcasts,
    }))
}

#[post("/api/v1/storage/cleanup")]
async fn storage_cleanup(state: &State<AppState>) -> Result<Json<CleanupReport>, Status> {
    let archive = state.pipeline.archive().ok_or(Status::NotFound)?;
    let report = archive.cleanup_expired(Utc::now()).await.map_err(|e| {
        tracing::error!("archive cleanup failed: {:#}", e);
        Status::InternalServerError
    })?;
    Ok(Json(report))
}

/// Rocket instance with state and routes, bound per `[server]`.
pub fn build_rocket(server: &ServerConfig, state: AppState) -> Rocket<Build> {
    let mut fig = rocket::Config::figment();
    if let Some(address) = &server.address {
        fig = fig.merge(("address", address.clone()));
    }
    if let Some(port) = server.port {
        fig = fig.merge(("port", port));
    }

    rocket::custom(fig).manage(state).mount(
        "/",
        routes![
            index,
            health,
            trigger_run,
            list_runs,
            storage_info,
            storage_cleanup,
        ],
    )
}

pub async fn launch_rocket(server: &ServerConfig, state: AppState) -> Result<()> {
    let shutdown = state.shutdown.clone();

    // Launch Rocket - this will run until shutdown (SIGINT/SIGTERM etc.)
    tracing::info!("Starting Rocket HTTP server");
    let outcome = build_rocket(server, state).launch().await;
    shutdown.cancel();
    outcome.map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
