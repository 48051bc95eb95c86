mod batch_writer;
mod database;
pub mod repositories;
mod rows;

pub use batch_writer::{BatchExecutor, BatchWriter, BatchWriterConfig, PersistRow};
pub use database::Database;
pub use rows::{
    AlertRow, CandleRow, MetricsRow, PgAlertExecutor, PgCandleExecutor, PgMetricsExecutor, round3,
};
