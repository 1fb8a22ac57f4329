//! warmd — the WarmGrid daemon.
//!
//! Single binary that assembles the provisioner:
//! - Kubernetes workload client
//! - Pool manager + registry
//! - Replenisher and periodic reconciliation tasks
//! - Session API
//!
//! # Usage
//!
//! ```text
//! warmd run --port 8081
//! ```
//!
//! Pool behavior is configured through the environment (`POOL_SIZE`,
//! `NAMESPACE`, `REPLENISH_INTERVAL_SECONDS`, ...); see
//! `warmgrid_state::PoolConfig`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use warmgrid_cluster::{KubeWorkloadClient, WorkloadClient};
use warmgrid_pool::{PoolManager, Replenisher};
use warmgrid_state::PoolConfig;

#[derive(Parser)]
#[command(name = "warmd", about = "WarmGrid session provisioner daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the provisioner (session API + background pool maintenance).
    Run {
        /// Port the session API listens on.
        #[arg(long, default_value = "8081")]
        port: u16,

        /// Periodic reconciliation interval in seconds (0 disables it;
        /// the startup pass always runs).
        #[arg(long, default_value = "60")]
        reconcile_interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,warmd=debug,warmgrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            port,
            reconcile_interval,
        } => run(port, reconcile_interval).await,
    }
}

async fn run(port: u16, reconcile_interval: u64) -> anyhow::Result<()> {
    info!("WarmGrid provisioner starting");

    let config = PoolConfig::from_env()?;
    info!(
        target_pool_size = config.target_pool_size,
        namespace = %config.namespace,
        image = %config.template.image,
        "pool configuration loaded"
    );

    // In-cluster config first, kubeconfig as the fallback.
    let client = Arc::new(KubeWorkloadClient::connect(&config.namespace).await?);
    info!(namespace = %config.namespace, "workload client connected");

    let replenish_interval = config.replenish_interval;
    let manager = Arc::new(PoolManager::new(client, config));

    // Adopt whatever the cluster already runs, then fill to target.
    match manager.reconcile().await {
        Ok(report) => info!(
            adopted = report.added.len(),
            "startup reconciliation complete"
        ),
        Err(e) => warn!(
            error = %e,
            "startup reconciliation failed; starting with an empty registry"
        ),
    }
    manager.warm_up().await;

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let replenisher = Replenisher::new(manager.clone(), replenish_interval);
    let replenish_handle = tokio::spawn(replenisher.run(shutdown_rx.clone()));

    let reconcile_handle = tokio::spawn(reconcile_loop(
        manager.clone(),
        Duration::from_secs(reconcile_interval),
        shutdown_rx,
    ));

    // ── Session API ────────────────────────────────────────────

    let router = warmgrid_api::build_router(manager);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "session API starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = replenish_handle.await;
    let _ = reconcile_handle.await;

    info!("WarmGrid provisioner stopped");
    Ok(())
}

/// Periodic self-heal: re-derive the registry from cluster labels.
async fn reconcile_loop<C: WorkloadClient + 'static>(
    manager: Arc<PoolManager<C>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if interval.is_zero() {
        info!("periodic reconciliation disabled");
        return;
    }
    info!(interval_secs = interval.as_secs(), "reconciliation loop started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match manager.reconcile().await {
                    Ok(report) if !report.is_clean() => info!(
                        added = report.added.len(),
                        removed = report.removed.len(),
                        corrected = report.corrected.len(),
                        "reconciliation corrected the registry"
                    ),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "reconciliation failed; retrying next tick"),
                }
            }
            _ = shutdown.changed() => {
                info!("reconciliation loop shutting down");
                break;
            }
        }
    }
}
