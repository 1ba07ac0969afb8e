use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

/// Line separating two error blocks.
const SEPARATOR: &str =
    "--------------------------------------------------------------------------------";

/// Append-only, human-readable error sink. Writers serialise under a mutex
/// so no record interleaves with another.
pub struct ErrorLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl ErrorLog {
    /// Open the log in append mode, creating the containing directory if
    /// absent.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a failed attempt.
    pub fn record<E>(&self, message_id: Uuid, attempt: u32, error: &E) -> io::Result<()>
    where
        E: std::error::Error,
    {
        self.write_block(
            message_id,
            attempt,
            short_type_name::<E>(),
            &error.to_string(),
            &source_trace(error),
        )
    }

    /// Record an attempt whose failure carried no detail. Placeholder fields
    /// keep the block shape intact.
    pub fn record_unknown(&self, message_id: Uuid, attempt: u32) -> io::Result<()> {
        self.write_block(
            message_id,
            attempt,
            "Unknown",
            "No exception details",
            "No stack trace available",
        )
    }

    /// Record that a retry was scheduled, before the back-off sleep.
    pub fn record_retry_scheduled(
        &self,
        message_id: Uuid,
        retry: u32,
        delay: Duration,
    ) -> io::Result<()> {
        self.write_block(
            message_id,
            retry,
            "RetryScheduled",
            &format!("retry {retry} scheduled after {:.3}s", delay.as_secs_f64()),
            "No stack trace available",
        )
    }

    fn write_block(
        &self,
        message_id: Uuid,
        attempt: u32,
        kind: &str,
        message: &str,
        trace: &str,
    ) -> io::Result<()> {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut file = self.file.lock();
        writeln!(file, "[{timestamp}]")?;
        writeln!(file, "Message ID: {message_id}")?;
        writeln!(file, "Attempt: {attempt}")?;
        writeln!(file, "Exception Type: {kind}")?;
        writeln!(file, "Error Message: {message}")?;
        writeln!(file, "Stack Trace: {trace}")?;
        writeln!(file, "{SEPARATOR}")?;
        file.flush()
    }
}

/// Last path segment of the concrete error type, generics stripped.
fn short_type_name<E>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// The `source()` chain of an error, or the placeholder when it has none.
fn source_trace(error: &dyn std::error::Error) -> String {
    let mut frames = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        frames.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    if frames.is_empty() {
        "No stack trace available".to_string()
    } else {
        frames.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer {
        #[source]
        inner: Inner,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("inner failure")]
    struct Inner;

    fn open_log(dir: &tempfile::TempDir) -> ErrorLog {
        ErrorLog::open(dir.path().join("errors.log")).unwrap()
    }

    #[test]
    fn block_carries_every_field_and_the_separator() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);
        let id = Uuid::now_v7();

        log.record(id, 2, &Outer { inner: Inner }).unwrap();

        let contents = fs::read_to_string(log.path()).unwrap();
        assert!(contents.contains(&format!("Message ID: {id}")));
        assert!(contents.contains("Attempt: 2"));
        assert!(contents.contains("Exception Type: Outer"));
        assert!(contents.contains("Error Message: outer failure"));
        assert!(contents.contains("Stack Trace: caused by: inner failure"));
        assert!(contents.contains(&"-".repeat(80)));
    }

    #[test]
    fn sourceless_error_gets_the_trace_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);

        log.record(Uuid::now_v7(), 0, &Inner).unwrap();

        let contents = fs::read_to_string(log.path()).unwrap();
        assert!(contents.contains("Stack Trace: No stack trace available"));
    }

    #[test]
    fn missing_error_writes_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);

        log.record_unknown(Uuid::now_v7(), 1).unwrap();

        let contents = fs::read_to_string(log.path()).unwrap();
        assert!(contents.contains("Exception Type: Unknown"));
        assert!(contents.contains("Error Message: No exception details"));
        assert!(contents.contains("Stack Trace: No stack trace available"));
    }

    #[test]
    fn retry_scheduled_block_names_the_retry_and_delay() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);

        log.record_retry_scheduled(Uuid::now_v7(), 2, Duration::from_secs(2))
            .unwrap();

        let contents = fs::read_to_string(log.path()).unwrap();
        assert!(contents.contains("Exception Type: RetryScheduled"));
        assert!(contents.contains("retry 2 scheduled after 2.000s"));
    }

    #[test]
    fn open_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep/logs/errors.log");
        ErrorLog::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn concurrent_writers_never_interleave_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(open_log(&dir));

        let writers: Vec<_> = (0..8)
            .map(|_| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for attempt in 0..50 {
                        log.record(Uuid::now_v7(), attempt, &Inner).unwrap();
                    }
                })
            })
            .collect();
        for handle in writers {
            handle.join().unwrap();
        }

        let contents = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 8 * 50 * 7, "every block is exactly 7 lines");
        for block in lines.chunks(7) {
            assert!(block[0].starts_with('['));
            assert!(block[1].starts_with("Message ID: "));
            assert!(block[2].starts_with("Attempt: "));
            assert!(block[3].starts_with("Exception Type: "));
            assert!(block[4].starts_with("Error Message: "));
            assert!(block[5].starts_with("Stack Trace: "));
            assert_eq!(block[6], SEPARATOR);
        }
    }
}
