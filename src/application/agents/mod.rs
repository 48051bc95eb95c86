mod ingest_supervisor;
mod ingest_worker;
mod metrics_engine;
mod rule_engine;

pub use ingest_supervisor::IngestSupervisor;
pub use ingest_worker::{IngestWorker, WorkerExit};
pub use metrics_engine::{MetricsEngine, compute_metrics};
pub use rule_engine::RuleEngine;
