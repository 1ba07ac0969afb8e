pub mod breaker;
pub mod config;
pub mod error;
pub mod error_log;
pub mod message;
pub mod queue;
pub mod retry;
pub mod snapshot;
pub mod store;
pub mod telemetry;
pub mod transform;
pub mod worker;

pub use breaker::{CircuitBreaker, CircuitState};
pub use config::PipelineConfig;
pub use error::{
    AuditError, BreakerError, ConfigError, PipelineError, SinkError, SnapshotError, TransportError,
};
pub use error_log::ErrorLog;
pub use message::{Message, MessageStatus, ProcessedRecord};
pub use queue::{LocalQueue, Transport};
pub use retry::RetryPolicy;
pub use snapshot::SnapshotStore;
pub use store::{AuditRow, AuditStatistics, AuditStatus, AuditStore, Sink, SqliteSink};
pub use worker::{BatchReport, ProcessOutcome, Worker};
