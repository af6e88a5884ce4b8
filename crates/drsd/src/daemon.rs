//! Daemon assembly — builds the scheduler from `drsd.toml`, runs the
//! control loops, and serves the REST API until Ctrl-C.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};

use drs_controller::{ClusterController, Drs, FileSource};
use drs_core::DaemonConfig;
use drs_orchestrator::{DryRunMigrationApi, Orchestrator, OrchestratorConfig};

const DEFAULT_PORT: u16 = 8450;
const DEFAULT_DRY_RUN_POLLS: u32 = 3;

/// Orchestrator tuning taken from the `[daemon]` section.
fn orchestrator_config(config: &DaemonConfig) -> OrchestratorConfig {
    let defaults = OrchestratorConfig::default();
    let d = &config.daemon;
    OrchestratorConfig {
        poll_interval: d.poll_interval_ms.map(Duration::from_millis).unwrap_or(defaults.poll_interval),
        job_timeout: d.job_timeout_secs.map(Duration::from_secs).unwrap_or(defaults.job_timeout),
        max_attempts: d.max_attempts.unwrap_or(defaults.max_attempts).max(1),
        ..defaults
    }
}

/// One file-backed controller per configured cluster.
pub fn build_drs(config: &DaemonConfig) -> Drs {
    let source = Arc::new(FileSource::new(&config.daemon.data_dir));
    let orchestrator_config = orchestrator_config(config);
    let polls = config.daemon.dry_run_polls.unwrap_or(DEFAULT_DRY_RUN_POLLS);

    let mut drs = Drs::new();
    for cluster in &config.clusters {
        let api = Arc::new(DryRunMigrationApi::new(polls));
        let orchestrator = Orchestrator::new(cluster.id.as_str(), api, orchestrator_config.clone());
        drs.add_cluster(ClusterController::new(
            cluster.id.as_str(),
            source.clone(),
            source.clone(),
            source.clone(),
            orchestrator,
        ));
    }
    drs
}

/// Write `drsd.toml` and scaffold each cluster's input directory.
pub fn init(config_path: &Path, data_dir: &Path, clusters: &[String]) -> anyhow::Result<()> {
    if config_path.exists() {
        anyhow::bail!("{} already exists", config_path.display());
    }
    let config = DaemonConfig::scaffold(data_dir, clusters);
    std::fs::write(config_path, config.to_toml_string()?)
        .with_context(|| format!("write {}", config_path.display()))?;

    let source = FileSource::new(data_dir);
    for cluster in clusters {
        let dir = source
            .scaffold_cluster(cluster)
            .with_context(|| format!("scaffold cluster {cluster}"))?;
        info!(cluster = %cluster, path = ?dir, "cluster directory ready");
    }
    Ok(())
}

/// Run every cluster's control loop and the API server until Ctrl-C.
pub async fn run(config_path: &Path, port: Option<u16>) -> anyhow::Result<()> {
    info!("DRS daemon starting");

    let config = DaemonConfig::from_file(config_path)
        .with_context(|| format!("load {}", config_path.display()))?;
    if config.clusters.is_empty() {
        anyhow::bail!("no clusters configured in {}", config_path.display());
    }
    std::fs::create_dir_all(&config.daemon.data_dir)?;

    // ── Scheduler ──────────────────────────────────────────────
    let drs = build_drs(&config);
    info!(clusters = ?drs.clusters(), data_dir = ?config.daemon.data_dir, "scheduler initialized");

    // ── Shutdown signal ────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_handles = drs.spawn(shutdown_rx);

    // ── API server ─────────────────────────────────────────────
    let router = drs_api::build_router(drs);
    let port = port.or(config.daemon.port).unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Control loops cancel their in-flight jobs on the way out.
    for handle in loop_handles {
        let _ = handle.await;
    }

    info!("DRS daemon stopped");
    Ok(())
}
