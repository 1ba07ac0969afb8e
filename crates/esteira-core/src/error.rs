use uuid::Uuid;

/// Failures raised by a transport implementation.
///
/// `Duplicate` is the only domain error a transport may raise; everything
/// else is infrastructure (broker connectivity, body encoding) and carries
/// no recovery plan beyond what the caller decides.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("duplicate message: {0} is already queued")]
    Duplicate(Uuid),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures raised by the processed-record sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("duplicate key: a record for {0} already exists")]
    DuplicateKey(Uuid),

    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Failures raised by the audit store.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit row already exists for message {0}")]
    DuplicateMessageId(Uuid),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Outcome of a call placed through the circuit breaker: either the breaker
/// refused the call outright, or the wrapped action failed and its error is
/// rethrown unchanged after accounting.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker is open")]
    Open,

    #[error(transparent)]
    Inner(E),
}

/// Invalid construction parameters or an unreadable configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Failures raised by the snapshot store. A missing or unparseable snapshot
/// file is not an error (it reads as the empty list); only real I/O faults
/// surface here.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors the worker has no dead-letter plan for. These escape
/// `process_one` so that infrastructure faults and programming errors
/// surface instead of being absorbed into a quarantine path.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Audit(#[from] AuditError),
}
