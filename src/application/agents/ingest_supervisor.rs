//! Supervises one ingestion worker per tracked symbol.
//!
//! Workers that surrender after repeated connection failures are respawned
//! after a cooldown. On shutdown the supervisor waits for every worker to
//! wind down within the grace period.

use crate::application::agents::ingest_worker::{IngestWorker, WorkerExit};
use crate::config::IngestConfig;
use crate::infrastructure::bus::StreamBus;
use crate::infrastructure::observability::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct IngestSupervisor {
    symbols: Vec<String>,
    config: IngestConfig,
    bus: Arc<StreamBus>,
    metrics: Metrics,
    shutdown: watch::Receiver<bool>,
}

impl IngestSupervisor {
    pub fn new(
        symbols: Vec<String>,
        config: IngestConfig,
        bus: Arc<StreamBus>,
        metrics: Metrics,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            symbols,
            config,
            bus,
            metrics,
            shutdown,
        }
    }

    fn spawn_worker(
        &self,
        tasks: &mut JoinSet<(String, WorkerExit)>,
        symbol: String,
        cooldown: Option<Duration>,
    ) {
        let worker = IngestWorker::new(
            symbol.clone(),
            self.config.clone(),
            Arc::clone(&self.bus),
            self.metrics.clone(),
            self.shutdown.clone(),
        );
        let mut shutdown = self.shutdown.clone();

        tasks.spawn(async move {
            if let Some(delay) = cooldown {
                tokio::select! {
                    _ = shutdown.changed() => return (symbol, WorkerExit::Shutdown),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            let exit = worker.run().await;
            (symbol, exit)
        });
    }

    pub async fn run(mut self) {
        info!(
            "IngestSupervisor: starting {} workers (1 per symbol)",
            self.symbols.len()
        );

        let mut tasks: JoinSet<(String, WorkerExit)> = JoinSet::new();
        for symbol in self.symbols.clone() {
            self.spawn_worker(&mut tasks, symbol, None);
        }

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                joined = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Some(Ok((symbol, WorkerExit::Surrendered))) => {
                            warn!(
                                "IngestSupervisor: worker {} surrendered, respawn in {:?}",
                                symbol, self.config.respawn_cooldown
                            );
                            let cooldown = self.config.respawn_cooldown;
                            self.spawn_worker(&mut tasks, symbol, Some(cooldown));
                        }
                        Some(Ok((symbol, WorkerExit::Shutdown))) => {
                            info!("IngestSupervisor: worker {} stopped", symbol);
                        }
                        Some(Err(e)) => {
                            error!("IngestSupervisor: worker task failed: {}", e);
                        }
                        None => {}
                    }
                }
            }
        }

        info!("IngestSupervisor: shutting down, waiting for workers");
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("IngestSupervisor: grace period elapsed, aborting remaining workers");
            tasks.abort_all();
        }
        info!("IngestSupervisor: stopped");
    }
}
