//! Process-wide diagnostic log file.
//!
//! When [`LOG_DIRECTORY_ENV`] names a directory, every agent built in the
//! process writes its diagnostic events to one shared file there through a
//! non-blocking `tracing-appender` worker. Agents hold the writer as an
//! `Arc` lease; the worker is flushed and closed when the last lease is
//! released, and a later build opens it again.
//!
//! The OpenTelemetry SDK reports its own diagnostics as `tracing` events on
//! `opentelemetry*` targets; [`LogFileWriter::sdk_layer`] routes those into the
//! same file.

use crate::diagnostics::{DiagnosticEvent, DiagnosticSink};
use crate::error::AgentError;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::SystemTime;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::Layer;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::registry::LookupSpan;

/// Directory for the diagnostic log file. File logging is off when unset.
pub const LOG_DIRECTORY_ENV: &str = "ELASTIC_OTEL_LOG_DIRECTORY";

static SHARED: Mutex<Weak<LogFileWriter>> = Mutex::new(Weak::new());

/// Shared writer for the diagnostic log file.
pub struct LogFileWriter {
    path: PathBuf,
    writer: NonBlocking,
    _guard: WorkerGuard,
}

impl LogFileWriter {
    fn open(directory: &Path) -> Result<Self, AgentError> {
        let log_file_error = |source: Box<dyn std::error::Error + Send + Sync>| AgentError::LogFile {
            path: directory.to_path_buf(),
            source,
        };

        std::fs::create_dir_all(directory).map_err(|e| log_file_error(Box::new(e)))?;

        let prefix = format!("elastic-otel.{}", std::process::id());
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(&prefix)
            .filename_suffix("log")
            .build(directory)
            .map_err(|e| log_file_error(Box::new(e)))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);

        Ok(Self {
            path: directory.join(format!("{prefix}.log")),
            writer,
            _guard: guard,
        })
    }

    /// Returns the process-wide writer for `directory`, opening it on first use.
    ///
    /// While a writer is live, later calls share it even when they name a
    /// different directory.
    pub fn acquire(directory: &Path) -> Result<Arc<Self>, AgentError> {
        let mut shared = SHARED
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(writer) = shared.upgrade() {
            if writer.path.parent() != Some(directory) {
                tracing::debug!(
                    target: "elastic_otel",
                    requested = %directory.display(),
                    active = %writer.path.display(),
                    "Diagnostic log file already open"
                );
            }
            return Ok(writer);
        }

        let writer = Arc::new(Self::open(directory)?);
        *shared = Arc::downgrade(&writer);
        Ok(writer)
    }

    /// Acquires the writer for [`LOG_DIRECTORY_ENV`], if set.
    ///
    /// Failures are logged and file logging stays off.
    pub fn from_env() -> Option<Arc<Self>> {
        let directory = std::env::var(LOG_DIRECTORY_ENV).ok()?;
        let directory = directory.trim();
        if directory.is_empty() {
            return None;
        }

        match Self::acquire(Path::new(directory)) {
            Ok(writer) => Some(writer),
            Err(e) => {
                tracing::warn!(target: "elastic_otel", error = %e, "File logging disabled");
                None
            }
        }
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one timestamped line.
    pub fn write_line(&self, message: &str) {
        let line = format!(
            "[{}][{}] {message}\n",
            humantime::format_rfc3339_millis(SystemTime::now()),
            std::process::id()
        );
        let mut writer = self.writer.clone();
        if let Err(e) = writer.write_all(line.as_bytes()) {
            tracing::debug!(target: "elastic_otel", error = %e, "Failed to write diagnostic log line");
        }
    }

    /// A `tracing` layer writing the OpenTelemetry SDK's own diagnostics
    /// (every `opentelemetry*` target, `DEBUG` and above) into this file.
    ///
    /// The layer holds a writer handle, not a lease: once the last lease is
    /// released its output is discarded.
    pub fn sdk_layer<S>(&self) -> impl Layer<S> + use<S>
    where
        S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    {
        tracing_subscriber::fmt::layer()
            .with_writer(self.writer.clone())
            .with_ansi(false)
            .with_target(true)
            .with_filter(Targets::new().with_target("opentelemetry", LevelFilter::DEBUG))
    }

    /// A diagnostic sink writing into this file for as long as any lease is held.
    pub(crate) fn sink(self: &Arc<Self>) -> Arc<dyn DiagnosticSink> {
        Arc::new(LogFileSink(Arc::downgrade(self)))
    }

    /// Releases a lease, flushing the worker on a blocking thread when it is the last.
    pub(crate) async fn release_async(lease: Arc<Self>) {
        if let Ok(writer) = Arc::try_unwrap(lease)
            && let Err(e) = tokio::task::spawn_blocking(move || drop(writer)).await
        {
            tracing::error!(target: "elastic_otel", error = %e, "Failed to close diagnostic log file");
        }
    }
}

impl std::fmt::Debug for LogFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFileWriter")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

struct LogFileSink(Weak<LogFileWriter>);

impl DiagnosticSink for LogFileSink {
    fn on_event(&self, event: &DiagnosticEvent<'_>) {
        if let Some(writer) = self.0.upgrade() {
            writer.write_line(&event.to_string());
        }
    }
}
