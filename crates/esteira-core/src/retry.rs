use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Callback invoked before each back-off sleep with the 1-based index of the
/// upcoming retry and the delay about to be observed.
pub type RetryObserver = Box<dyn Fn(u32, Duration) + Send + Sync>;

/// Bounded retry with exponential back-off.
///
/// The wrapped operation runs at most `max_retries + 1` times; delays double
/// from `base_delay` (1 s, 2 s, 4 s, ... with the default base). The error
/// from the final attempt is surfaced unchanged. The policy keeps no state
/// between invocations.
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    observer: Option<RetryObserver>,
}

impl RetryPolicy {
    /// Default back-off base: one second, doubling per attempt.
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Self::DEFAULT_BASE_DELAY,
            observer: None,
        }
    }

    /// Override the back-off base. Delays remain `base * 2^attempt`.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Register the observer invoked before each back-off sleep.
    pub fn with_observer(mut self, observer: impl Fn(u32, Duration) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay preceding the retry that follows the given zero-based attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// Run `op` under the policy (synchronous surface). The closure receives
    /// the zero-based attempt index.
    pub fn run<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run_with_hook(op, |_, _| {})
    }

    /// [`run`](Self::run) with an additional per-call hook observing the
    /// same (1-based retry index, delay) contract as the registered
    /// observer. The hook fires after the observer, before the sleep.
    pub fn run_with_hook<T, E, F, H>(&self, mut op: F, mut hook: H) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        H: FnMut(u32, Duration),
    {
        let mut attempt = 0u32;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(_) if attempt < self.max_retries => {
                    let delay = self.delay_for_attempt(attempt);
                    attempt += 1;
                    warn!(retry = attempt, delay_ms = delay.as_millis() as u64, "attempt failed, retry scheduled");
                    self.notify(attempt, delay);
                    hook(attempt, delay);
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Asynchronous surface: identical outcomes and observer callbacks; the
    /// waiting primitive is `tokio::time::sleep` instead of a thread sleep.
    pub async fn run_async<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(_) if attempt < self.max_retries => {
                    let delay = self.delay_for_attempt(attempt);
                    attempt += 1;
                    warn!(retry = attempt, delay_ms = delay.as_millis() as u64, "attempt failed, retry scheduled");
                    self.notify(attempt, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn notify(&self, retry: u32, delay: Duration) {
        if let Some(observer) = &self.observer {
            observer(retry, delay);
        }
    }
}
