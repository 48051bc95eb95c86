//! Process wiring: build every component, start the task tree, tear it
//! down on shutdown.

use crate::application::agents::{IngestSupervisor, MetricsEngine, RuleEngine};
use crate::config::Config;
use crate::domain::repositories::{
    MetricsSnapshotRepository, RuleRepository, UserSettingsRepository,
};
use crate::infrastructure::binance::FuturesMarketClient;
use crate::infrastructure::bus::{
    ALERT_SUBJECT, ALERTS_STREAM, BARS_STREAM, METRICS_STREAM, METRICS_SUBJECT, StreamBus,
    StreamConfig,
};
use crate::infrastructure::notify::WebhookDispatcher;
use crate::infrastructure::observability::{Metrics, MetricsReporter};
use crate::infrastructure::persistence::repositories::{
    PgMetricsSnapshotRepository, PgRuleRepository, PgUserSettingsRepository,
};
use crate::infrastructure::persistence::{
    AlertRow, BatchWriter, BatchWriterConfig, CandleRow, Database, MetricsRow, PgAlertExecutor,
    PgCandleExecutor, PgMetricsExecutor,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DISCOVERY_ATTEMPTS: u32 = 5;
const DISCOVERY_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Fully wired but not yet running pipeline
pub struct Application {
    pub config: Config,
    metrics: Metrics,
    bus: Arc<StreamBus>,
    rule_repository: Arc<dyn RuleRepository>,
    settings_repository: Arc<dyn UserSettingsRepository>,
    snapshot_repository: Arc<dyn MetricsSnapshotRepository>,
    candle_writer: BatchWriter<CandleRow>,
    metrics_writer: BatchWriter<MetricsRow>,
    alert_writer: BatchWriter<AlertRow>,
    dispatcher: Arc<WebhookDispatcher>,
    symbols: Vec<String>,
}

/// Running pipeline; dropping it does not stop the tasks, call `shutdown`
pub struct SystemHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    pub metrics: Metrics,
}

impl SystemHandle {
    /// Propagate shutdown and wait for the task tree within the grace period
    pub async fn shutdown(self, grace: Duration) {
        info!("Initiating graceful shutdown...");
        let _ = self.shutdown_tx.send(true);

        let drain = async {
            for task in self.tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("Shutdown grace period elapsed, forcing exit");
        }
        info!("Shutdown complete.");
    }
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        info!("Building screener application...");

        let metrics = Metrics::new()?;

        let bus = Arc::new(StreamBus::new());
        for (name, subjects) in [
            (BARS_STREAM, vec!["candles.1m.*"]),
            (METRICS_STREAM, vec![METRICS_SUBJECT]),
            (ALERTS_STREAM, vec![ALERT_SUBJECT]),
        ] {
            bus.add_stream(
                StreamConfig::new(name, &subjects)
                    .max_age(config.engine.bus_max_age)
                    .max_messages(config.engine.bus_max_messages),
            )
            .with_context(|| format!("Failed to declare stream {}", name))?;
        }

        let timeseries = Database::connect(
            &config.database.timeseries_url,
            &config.database,
            "time-series",
        )
        .await?;
        timeseries.init_timeseries_schema().await?;

        let metadata =
            Database::connect(&config.database.metadata_url, &config.database, "metadata").await?;
        metadata.init_metadata_schema().await?;
        metadata.seed_default_rules().await?;

        let rule_repository: Arc<dyn RuleRepository> =
            Arc::new(PgRuleRepository::new(metadata.pool.clone()));
        let settings_repository: Arc<dyn UserSettingsRepository> =
            Arc::new(PgUserSettingsRepository::new(metadata.pool.clone()));
        let snapshot_repository: Arc<dyn MetricsSnapshotRepository> = Arc::new(
            PgMetricsSnapshotRepository::new(timeseries.pool.clone(), Duration::from_secs(5)),
        );

        let writer_config = BatchWriterConfig::from(&config.database);
        let deadline = config.database.statement_timeout;
        let candle_writer = BatchWriter::new(
            Arc::new(PgCandleExecutor::new(timeseries.pool.clone(), deadline)),
            writer_config.clone(),
            metrics.clone(),
        );
        let metrics_writer = BatchWriter::new(
            Arc::new(PgMetricsExecutor::new(timeseries.pool.clone(), deadline)),
            writer_config.clone(),
            metrics.clone(),
        );
        let alert_writer = BatchWriter::new(
            Arc::new(PgAlertExecutor::new(timeseries.pool.clone(), deadline)),
            writer_config,
            metrics.clone(),
        );

        let dispatcher = Arc::new(WebhookDispatcher::new(&config.alerts, metrics.clone()));

        let symbols = Self::resolve_symbols(&config).await?;
        info!("Tracking {} symbols", symbols.len());

        Ok(Self {
            config,
            metrics,
            bus,
            rule_repository,
            settings_repository,
            snapshot_repository,
            candle_writer,
            metrics_writer,
            alert_writer,
            dispatcher,
            symbols,
        })
    }

    /// Explicit override, or discovery of the top perpetual contracts.
    /// Discovery that keeps failing is fatal: without a symbol set there is
    /// nothing to run.
    async fn resolve_symbols(config: &Config) -> Result<Vec<String>> {
        if !config.ingest.symbols.is_empty() {
            let symbols: Vec<String> = config
                .ingest
                .symbols
                .iter()
                .map(|s| s.to_uppercase())
                .collect();
            info!("Using {} symbols from configuration", symbols.len());
            return Ok(symbols);
        }

        let client = FuturesMarketClient::new(config.ingest.rest_base_url.clone());
        let mut last_error = None;
        for attempt in 1..=DISCOVERY_ATTEMPTS {
            match client.top_perpetual_symbols(config.ingest.symbol_limit).await {
                Ok(symbols) if !symbols.is_empty() => return Ok(symbols),
                Ok(_) => {
                    warn!("Symbol discovery returned an empty universe (attempt {})", attempt);
                    last_error = Some(anyhow::anyhow!("empty universe"));
                }
                Err(e) => {
                    warn!("Symbol discovery failed (attempt {}): {}", attempt, e);
                    last_error = Some(e);
                }
            }
            tokio::time::sleep(DISCOVERY_RETRY_DELAY).await;
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("symbol discovery failed")))
            .context("Could not obtain the symbol universe at startup")
    }

    /// Spawn the full task tree
    pub async fn start(self) -> Result<SystemHandle> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        // Persistence first so every producer has a live sink
        tasks.push(tokio::spawn(
            self.candle_writer.clone().run(shutdown_rx.clone()),
        ));
        tasks.push(tokio::spawn(
            self.metrics_writer.clone().run(shutdown_rx.clone()),
        ));
        tasks.push(tokio::spawn(
            self.alert_writer.clone().run(shutdown_rx.clone()),
        ));

        // Rule catalogue is mandatory
        let rules = self
            .rule_repository
            .load_rules()
            .await
            .context("Failed to load the rule catalogue")?;
        let rule_engine = Arc::new(RuleEngine::new(
            rules,
            Arc::clone(&self.bus),
            self.alert_writer.clone(),
            Arc::clone(&self.dispatcher),
            self.metrics.clone(),
            self.config.alerts.clone(),
        ));

        {
            let engine = Arc::clone(&rule_engine);
            let shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = engine.run_event_loop(shutdown).await {
                    error!("RuleEngine event loop failed: {}", e);
                }
            }));
        }
        {
            let engine = Arc::clone(&rule_engine);
            let repository = Arc::clone(&self.snapshot_repository);
            let shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(engine.run_poll_loop(repository, shutdown)));
        }

        // Metrics engine over the bar stream
        let metrics_engine = MetricsEngine::new(
            Arc::clone(&self.bus),
            Some(self.candle_writer.clone()),
            self.metrics_writer.clone(),
            self.metrics.clone(),
            self.config.engine.clone(),
        );
        {
            let shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = metrics_engine.run(shutdown).await {
                    error!("MetricsEngine failed: {}", e);
                }
            }));
        }

        // Ingestion workers
        let supervisor = IngestSupervisor::new(
            self.symbols.clone(),
            self.config.ingest.clone(),
            Arc::clone(&self.bus),
            self.metrics.clone(),
            shutdown_rx.clone(),
        );
        tasks.push(tokio::spawn(supervisor.run()));

        // User notification settings refresher
        {
            let repository = Arc::clone(&self.settings_repository);
            let dispatcher = Arc::clone(&self.dispatcher);
            let refresh = self.config.alerts.settings_refresh;
            let mut shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(refresh);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => {
                            match repository.load_all().await {
                                Ok(settings) => dispatcher.update_user_settings(settings),
                                Err(e) => warn!("User settings refresh failed: {}", e),
                            }
                        }
                    }
                }
            }));
        }

        if self.config.observability.enabled {
            let reporter = MetricsReporter::new(
                self.metrics.clone(),
                self.config.observability.interval_secs,
            );
            tasks.push(tokio::spawn(reporter.run(shutdown_rx)));
            info!(
                "Metrics reporter started (interval: {}s)",
                self.config.observability.interval_secs
            );
        }

        info!("Screener pipeline running.");
        Ok(SystemHandle {
            shutdown_tx,
            tasks,
            metrics: self.metrics,
        })
    }
}
