use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{BreakerError, ConfigError};

/// Observable breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// Three-state failure-rate guard around a fallible action.
///
/// A single mutex serialises every state read and transition, so `state()`
/// always observes the post-transition state of the preceding call. While a
/// half-open probe is in flight, contending callers are refused as if the
/// breaker were still open.
pub struct CircuitBreaker {
    failure_threshold: u32,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Fails when `failure_threshold` is zero.
    pub fn new(failure_threshold: u32, timeout: Duration) -> Result<Self, ConfigError> {
        if failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit breaker failure threshold must be positive".to_string(),
            ));
        }
        Ok(Self {
            failure_threshold,
            timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        })
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Return the breaker to `Closed` with a zeroed failure counter.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
    }

    /// Run `op` under the breaker. In `Open`, fails with
    /// [`BreakerError::Open`] without invoking `op` until the timeout has
    /// elapsed; the underlying error is always rethrown after accounting.
    pub fn call<T, E, F>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => {}
                CircuitState::Open => {
                    let waited = inner
                        .last_failure
                        .map(|at| at.elapsed())
                        .unwrap_or(Duration::MAX);
                    if waited < self.timeout {
                        return Err(BreakerError::Open);
                    }
                    debug!("breaker timeout elapsed, admitting probe");
                    inner.state = CircuitState::HalfOpen;
                }
                // A probe is already in flight.
                CircuitState::HalfOpen => return Err(BreakerError::Open),
            }
        }

        match op() {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            debug!("breaker closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.last_failure = Some(Instant::now());
                warn!(failures = inner.failure_count, "circuit breaker opened");
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.last_failure = Some(Instant::now());
                warn!("probe failed, circuit breaker re-opened");
            }
            _ => {}
        }
    }
}
