//! Time- and size-triggered transactional batch writer.
//!
//! Callers enqueue rows without blocking; a background task flushes when the
//! pending count reaches the batch size or the flush interval elapses,
//! whichever first. Each flush is one transaction of natural-key upserts
//! behind the `BatchExecutor` port. A failed batch is reported and dropped:
//! persistence is at-most-once, recovery rides on the bus broadcast.

use crate::config::DatabaseConfig;
use crate::infrastructure::observability::Metrics;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

/// Transactional sink for one batch of rows
#[async_trait]
pub trait BatchExecutor<R>: Send + Sync {
    async fn execute(&self, rows: &[R]) -> Result<()>;
}

/// A row destined for one target table
pub trait PersistRow: Clone + Send + Sync + 'static {
    fn table() -> &'static str;
}

#[derive(Debug, Clone)]
pub struct BatchWriterConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub queue_capacity: usize,
    pub drain_grace: Duration,
}

impl Default for BatchWriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            flush_interval: Duration::from_secs(5),
            queue_capacity: 10_000,
            drain_grace: Duration::from_secs(5),
        }
    }
}

impl From<&DatabaseConfig> for BatchWriterConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            flush_interval: config.flush_interval,
            queue_capacity: config.queue_capacity,
            drain_grace: config.drain_grace,
        }
    }
}

struct WriterShared<R> {
    queue: Mutex<VecDeque<R>>,
    size_trigger: Notify,
    config: BatchWriterConfig,
    executor: Arc<dyn BatchExecutor<R>>,
    metrics: Metrics,
}

/// Handle for enqueuing; clone freely, run the flush loop once
pub struct BatchWriter<R: PersistRow> {
    shared: Arc<WriterShared<R>>,
}

impl<R: PersistRow> Clone for BatchWriter<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: PersistRow> BatchWriter<R> {
    pub fn new(
        executor: Arc<dyn BatchExecutor<R>>,
        config: BatchWriterConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            shared: Arc::new(WriterShared {
                queue: Mutex::new(VecDeque::new()),
                size_trigger: Notify::new(),
                config,
                executor,
                metrics,
            }),
        }
    }

    /// Non-blocking enqueue. On overflow the oldest pending row is dropped:
    /// freshness beats completeness for this domain.
    pub fn enqueue(&self, row: R) {
        let should_flush = {
            let mut queue = self
                .shared
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if queue.len() >= self.shared.config.queue_capacity {
                queue.pop_front();
                warn!(
                    "BatchWriter[{}]: queue full, dropped oldest pending row",
                    R::table()
                );
                self.shared
                    .metrics
                    .persist_rows_dropped_total
                    .with_label_values(&[R::table()])
                    .inc();
            }
            queue.push_back(row);
            queue.len() >= self.shared.config.batch_size
        };

        if should_flush {
            self.shared.size_trigger.notify_one();
        }
    }

    pub fn pending(&self) -> usize {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Flush one batch (up to `batch_size` rows). Returns rows taken.
    async fn flush_once(&self) -> usize {
        let batch: Vec<R> = {
            let mut queue = self
                .shared
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let take = queue.len().min(self.shared.config.batch_size);
            queue.drain(..take).collect()
        };

        if batch.is_empty() {
            return 0;
        }

        match self.shared.executor.execute(&batch).await {
            Ok(()) => {
                self.shared
                    .metrics
                    .persist_flushes_total
                    .with_label_values(&[R::table()])
                    .inc();
                debug!("BatchWriter[{}]: flushed {} rows", R::table(), batch.len());
            }
            Err(e) => {
                warn!(
                    "BatchWriter[{}]: batch of {} dropped after failed flush: {}",
                    R::table(),
                    batch.len(),
                    e
                );
                self.shared
                    .metrics
                    .persist_rows_dropped_total
                    .with_label_values(&[R::table()])
                    .inc_by(batch.len() as f64);
            }
        }
        batch.len()
    }

    /// Flush loop. Runs until shutdown, then drains within the grace period.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.shared.config.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    while self.flush_once().await > 0 {}
                }
                _ = self.shared.size_trigger.notified() => {
                    while self.pending() >= self.shared.config.batch_size {
                        self.flush_once().await;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        let pending = self.pending();
        if pending > 0 {
            info!(
                "BatchWriter[{}]: draining {} pending rows",
                R::table(),
                pending
            );
        }
        let drain = async {
            while self.flush_once().await > 0 {}
        };
        if tokio::time::timeout(self.shared.config.drain_grace, drain)
            .await
            .is_err()
        {
            let left = self.pending();
            warn!(
                "BatchWriter[{}]: drain grace elapsed with {} rows undrained",
                R::table(),
                left
            );
            self.shared
                .metrics
                .persist_rows_dropped_total
                .with_label_values(&[R::table()])
                .inc_by(left as f64);
        }
    }
}
