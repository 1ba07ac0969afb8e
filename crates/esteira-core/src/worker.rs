use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::breaker::CircuitBreaker;
use crate::error::{BreakerError, PipelineError, SinkError};
use crate::error_log::ErrorLog;
use crate::message::{MessageStatus, ProcessedRecord};
use crate::queue::Transport;
use crate::retry::RetryPolicy;
use crate::store::audit::AuditStore;
use crate::store::sink::Sink;
use crate::transform;

/// Result of a single `process_one` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The main queue was empty.
    NoWork,
    /// The message was committed to the sink.
    Completed,
    /// The message was quarantined to the dead-letter queue.
    Failed,
}

/// Totals from a batch driver run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub completed: usize,
    pub failed: usize,
}

enum CommitError {
    /// The breaker refused the call; the sink was not invoked.
    Refused,
    /// The sink failed and the retry budget (if any) is spent.
    Sink(SinkError),
}

/// Orchestrates the processing protocol: dequeue, validate, audit,
/// transform, then commit through `breaker(retry(sink.save))`, quarantining
/// to the DLQ when the commit gives up.
///
/// Optional collaborators are explicit: without a retry policy a commit is a
/// single attempt, without a breaker commits are never short-circuited, and
/// without an error log or audit store those side streams are skipped. The
/// worker owns its collaborators for its lifetime and never retains a
/// message after commit or quarantine.
pub struct Worker {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn Sink>,
    retry: Option<RetryPolicy>,
    breaker: Option<CircuitBreaker>,
    error_log: Option<ErrorLog>,
    audit: Option<AuditStore>,
}

impl Worker {
    pub fn new(transport: Arc<dyn Transport>, sink: Arc<dyn Sink>) -> Self {
        Self {
            transport,
            sink,
            retry: None,
            breaker: None,
            error_log: None,
            audit: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_error_log(mut self, error_log: ErrorLog) -> Self {
        self.error_log = Some(error_log);
        self
    }

    pub fn with_audit(mut self, audit: AuditStore) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    pub fn audit(&self) -> Option<&AuditStore> {
        self.audit.as_ref()
    }

    /// Process the next message off the main queue, if any.
    ///
    /// Errors the worker has a dead-letter plan for (validation, commit
    /// failure, breaker refusal) resolve to [`ProcessOutcome::Failed`];
    /// everything else escapes as [`PipelineError`].
    #[tracing::instrument(skip(self))]
    pub fn process_one(&self) -> Result<ProcessOutcome, PipelineError> {
        let Some(mut message) = self.transport.dequeue()? else {
            return Ok(ProcessOutcome::NoWork);
        };
        let message_id = message.id;
        debug!(msg_id = %message_id, source = %message.source, "message dequeued");

        if !message.is_valid() {
            warn!(msg_id = %message_id, "validation failed, quarantining");
            message.status = MessageStatus::Failed;
            self.transport.enqueue_dlq(message)?;
            self.audit_start(message_id)?;
            self.audit_end(message_id, false, Some("Validation failed"))?;
            return Ok(ProcessOutcome::Failed);
        }

        self.audit_start(message_id)?;

        let mut record = transform::transform(&message);
        record.status = MessageStatus::Completed;

        match self.commit(message_id, &record) {
            Ok(()) => {
                info!(msg_id = %message_id, "message processed");
                self.audit_end(message_id, true, None)?;
                Ok(ProcessOutcome::Completed)
            }
            Err(CommitError::Refused) => {
                warn!(msg_id = %message_id, "circuit breaker open, quarantining without retry");
                message.status = MessageStatus::Failed;
                self.transport.enqueue_dlq(message)?;
                self.log_error(message_id, 0, &BreakerError::<SinkError>::Open);
                self.audit_end(message_id, false, Some("Circuit breaker open"))?;
                Ok(ProcessOutcome::Failed)
            }
            Err(CommitError::Sink(err)) => {
                warn!(msg_id = %message_id, error = %err, "commit failed, quarantining");
                message.status = MessageStatus::Failed;
                self.transport.enqueue_dlq(message)?;
                self.log_error(message_id, 0, &err);
                self.audit_end(message_id, false, Some(&err.to_string()))?;
                Ok(ProcessOutcome::Failed)
            }
        }
    }

    /// Iterate [`process_one`](Self::process_one) at most `max` times,
    /// stopping early when the main queue drains.
    pub fn process_up_to(&self, max: usize) -> Result<BatchReport, PipelineError> {
        let mut report = BatchReport::default();
        for _ in 0..max {
            match self.process_one()? {
                ProcessOutcome::NoWork => break,
                ProcessOutcome::Completed => report.completed += 1,
                ProcessOutcome::Failed => report.failed += 1,
            }
        }
        Ok(report)
    }

    /// Drain the batch visible at call time. The main depth is sampled once
    /// and exactly that many iterations run, so arrivals during the drain
    /// wait for the next call.
    pub fn process_all(&self) -> Result<BatchReport, PipelineError> {
        let depth = self.transport.depth()?;
        debug!(depth, "draining sampled batch");
        self.process_up_to(depth)
    }

    /// Commit the record through the breaker (if any) around the retry
    /// policy (if any). Each sink failure is error-logged with its attempt
    /// index before the retry layer decides; the retry hook records the
    /// scheduled back-off before each sleep.
    fn commit(&self, message_id: Uuid, record: &ProcessedRecord) -> Result<(), CommitError> {
        let save_with_retry = || match &self.retry {
            Some(policy) => policy.run_with_hook(
                |attempt| {
                    self.sink.save(record).map_err(|err| {
                        self.log_error(message_id, attempt, &err);
                        err
                    })
                },
                |retry, delay| self.log_retry_scheduled(message_id, retry, delay),
            ),
            None => self.sink.save(record).map_err(|err| {
                self.log_error(message_id, 0, &err);
                err
            }),
        };

        match &self.breaker {
            Some(breaker) => match breaker.call(&save_with_retry) {
                Ok(()) => Ok(()),
                Err(BreakerError::Open) => Err(CommitError::Refused),
                Err(BreakerError::Inner(err)) => Err(CommitError::Sink(err)),
            },
            None => save_with_retry().map_err(CommitError::Sink),
        }
    }

    fn audit_start(&self, message_id: Uuid) -> Result<(), PipelineError> {
        if let Some(audit) = &self.audit {
            audit.log_start(message_id)?;
        }
        Ok(())
    }

    fn audit_end(
        &self,
        message_id: Uuid,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<(), PipelineError> {
        if let Some(audit) = &self.audit {
            audit.log_end(message_id, success, error_message)?;
        }
        Ok(())
    }

    /// Error-log writes are best effort; the audit store stays the durable
    /// record of the failure.
    fn log_error<E: std::error::Error>(&self, message_id: Uuid, attempt: u32, err: &E) {
        if let Some(log) = &self.error_log {
            if let Err(io_err) = log.record(message_id, attempt, err) {
                error!(error = %io_err, "failed to append to error log");
            }
        }
    }

    fn log_retry_scheduled(&self, message_id: Uuid, retry: u32, delay: Duration) {
        if let Some(log) = &self.error_log {
            if let Err(io_err) = log.record_retry_scheduled(message_id, retry, delay) {
                error!(error = %io_err, "failed to append to error log");
            }
        }
    }
}
