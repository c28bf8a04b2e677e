//! Daemon lifecycle: startup, reload on SIGHUP, shutdown on SIGINT/SIGTERM.
//! Signal handling is unix-only.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use carbond_core::{Metrics, MetricsSnapshot, Result, RuntimeConfig};
use carbond_storage::{Coordinator, MetricDatabase, MonitoringWorker, Writer};

use crate::receiver;

/// Load a new snapshot and swap it in. Nothing is paused if loading fails.
pub fn reload(config_file: &Path, coordinator: &Coordinator) -> Result<()> {
    let next = match RuntimeConfig::load(config_file) {
        Ok(next) => next,
        Err(e) => {
            error!("reload failed, keeping current configuration: {}", e);
            return Err(e);
        }
    };

    let current = coordinator.current();
    if next.daemon.line_receiver_port != current.daemon.line_receiver_port
        || next.daemon.udp_receiver_port != current.daemon.udp_receiver_port
    {
        warn!("receiver port changes take effect after a restart");
    }

    coordinator.reconfigure(next);
    Ok(())
}

pub struct Daemon {
    config_file: PathBuf,
    db: Arc<MetricDatabase>,
    coordinator: Arc<Coordinator>,
}

impl Daemon {
    /// Load configuration and start the writer and monitoring workers
    pub fn start(config_file: &Path) -> Result<Self> {
        let config = RuntimeConfig::load(config_file)?;
        info!(
            storage_dir = %config.daemon.storage_dir.display(),
            version = carbond_core::VERSION,
            "starting carbond"
        );

        let db = Arc::new(MetricDatabase::new(Metrics::new()));
        let coordinator = Arc::new(Coordinator::new(config));
        coordinator.spawn(Writer::new(db.clone()))?;
        coordinator.spawn(MonitoringWorker::new(db.clone()))?;

        Ok(Self {
            config_file: config_file.to_path_buf(),
            db,
            coordinator,
        })
    }

    pub fn database(&self) -> &Arc<MetricDatabase> {
        &self.db
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn reload(&self) -> Result<()> {
        reload(&self.config_file, &self.coordinator)
    }

    /// Serve receivers until `shutdown` resolves, reloading on SIGHUP
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<MetricsSnapshot>
    where
        F: Future<Output = ()>,
    {
        let config = self.coordinator.current();
        let tcp = receiver::bind_tcp(config.daemon.line_receiver_port).await?;
        let udp = receiver::bind_udp(config.daemon.udp_receiver_port).await?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let tcp_task = tokio::spawn(receiver::run_tcp(tcp, self.db.clone(), stop_rx.clone()));
        let udp_task = tokio::spawn(receiver::run_udp(udp, self.db.clone(), stop_rx));

        let mut hangup = hangup_signal()?;
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = hangup.recv() => {
                    info!("received SIGHUP, reloading configuration");
                    let config_file = self.config_file.clone();
                    let coordinator = self.coordinator.clone();
                    // Reload parks the workers, so keep it off the async threads
                    let result = tokio::task::spawn_blocking(move || reload(&config_file, &coordinator)).await;
                    if let Err(e) = result {
                        error!("reload task failed: {}", e);
                    }
                }
            }
        }

        let _ = stop_tx.send(true);
        for (name, task) in [("tcp", tcp_task), ("udp", udp_task)] {
            if let Err(e) = task.await {
                error!(receiver = name, "receiver task failed: {}", e);
            }
        }

        Ok(tokio::task::spawn_blocking(move || self.stop()).await?)
    }

    /// Stop workers, then persist whatever is still buffered
    pub fn stop(self) -> MetricsSnapshot {
        self.coordinator.shutdown();

        let config = self.coordinator.current();
        let flushed = Writer::new(self.db.clone()).drain(&config);
        let stats = self.db.stats().snapshot();
        info!(
            flushed_metrics = flushed,
            received = stats.points_received,
            written = stats.points_written,
            dropped = stats.points_dropped,
            "carbond stopped"
        );
        stats
    }
}

fn hangup_signal() -> std::io::Result<tokio::signal::unix::Signal> {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
}

/// Resolves on SIGINT or SIGTERM
pub async fn terminate_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
