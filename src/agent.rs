//! The built agent and its teardown.
//!
//! An [`Agent`] owns the providers produced by
//! [`AgentBuilder::build`](crate::AgentBuilder::build) and a lease on the
//! diagnostic log file. Disposal (sync, async, explicit [`Agent::shutdown`] or
//! drop) happens at most once: a single atomic flag decides which caller
//! releases the resources and every other caller returns immediately.

use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::error::AgentError;
use crate::log_file::LogFileWriter;
use crate::signal::{MeterHandle, TracerHandle};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::Layer;
use tracing_subscriber::registry::LookupSpan;

#[derive(Default)]
struct Resources {
    tracer: Option<TracerHandle>,
    meter: Option<MeterHandle>,
    log_writer: Option<Arc<LogFileWriter>>,
}

/// Running distro telemetry.
///
/// Dropping the agent disposes it. Use [`dispose_async`](Self::dispose_async)
/// from async code to keep provider shutdown off the executor, or
/// [`shutdown`](Self::shutdown) to observe errors.
pub struct Agent {
    resources: Mutex<Resources>,
    diagnostics: Diagnostics,
    disposed: AtomicBool,
}

impl Agent {
    pub(crate) fn new(
        tracer: Option<TracerHandle>,
        meter: Option<MeterHandle>,
        log_writer: Option<Arc<LogFileWriter>>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            resources: Mutex::new(Resources {
                tracer,
                meter,
                log_writer,
            }),
            diagnostics,
            disposed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Resources> {
        self.resources
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The tracer provider, unless traces are disabled or the agent is disposed.
    pub fn tracer_provider(&self) -> Option<SdkTracerProvider> {
        self.lock().tracer.as_ref().map(|t| t.provider().clone())
    }

    /// The meter provider, unless metrics are disabled or the agent is disposed.
    pub fn meter_provider(&self) -> Option<SdkMeterProvider> {
        self.lock().meter.as_ref().map(|m| m.provider().clone())
    }

    /// Resource the providers were built with.
    pub fn resource(&self) -> Option<Resource> {
        let resources = self.lock();
        resources
            .tracer
            .as_ref()
            .and_then(TracerHandle::resource)
            .or_else(|| resources.meter.as_ref().and_then(MeterHandle::resource))
            .cloned()
    }

    /// A `tracing-opentelemetry` layer exporting the agent's sources through
    /// its tracer provider. `None` when traces are disabled or the agent is
    /// disposed.
    pub fn tracing_layer<S>(&self) -> Option<impl Layer<S> + use<S>>
    where
        S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    {
        self.lock().tracer.as_ref().map(|t| t.tracing_layer::<S>())
    }

    /// Whether the agent has released its resources.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Flushes all configured providers. Errors are logged but not returned.
    pub fn flush(&self) {
        let resources = self.lock();

        if let Some(tracer) = &resources.tracer
            && let Err(e) = tracer.provider().force_flush()
        {
            tracing::error!(target: "elastic_otel", error = %e, "Failed to flush tracer provider");
        }

        if let Some(meter) = &resources.meter
            && let Err(e) = meter.provider().force_flush()
        {
            tracing::error!(target: "elastic_otel", error = %e, "Failed to flush meter provider");
        }
    }

    /// Shuts down the providers and releases the log file lease.
    ///
    /// Errors are logged and suppressed. Calling this more than once, or
    /// after [`dispose_async`](Self::dispose_async), does nothing.
    pub fn dispose(&self) {
        let Some(resources) = self.claim() else {
            return;
        };

        shutdown_providers(resources.tracer, resources.meter);
        self.diagnostics.emit(DiagnosticEvent::AgentDisposed);
        drop(resources.log_writer);
    }

    /// Like [`dispose`](Self::dispose), but runs the blocking provider
    /// shutdown on tokio's blocking pool.
    ///
    /// Must be awaited inside a tokio runtime.
    pub async fn dispose_async(&self) {
        let Some(resources) = self.claim() else {
            return;
        };

        let Resources {
            tracer,
            meter,
            log_writer,
        } = resources;

        if (tracer.is_some() || meter.is_some())
            && let Err(e) = tokio::task::spawn_blocking(move || shutdown_providers(tracer, meter)).await
        {
            tracing::error!(target: "elastic_otel", error = %e, "Provider shutdown task failed");
        }

        self.diagnostics.emit(DiagnosticEvent::AgentDisposed);

        if let Some(lease) = log_writer {
            LogFileWriter::release_async(lease).await;
        }
    }

    /// Shuts down all configured providers, returning the first error if any.
    ///
    /// Every provider is shut down even when an earlier one fails.
    pub fn shutdown(self) -> Result<(), AgentError> {
        let Some(resources) = self.claim() else {
            return Ok(());
        };

        let mut first_error = None;

        if let Some(tracer) = resources.tracer {
            let provider = tracer.into_provider();
            if let Err(e) = provider.force_flush().and_then(|()| provider.shutdown()) {
                first_error.get_or_insert(AgentError::Shutdown(e));
            }
        }

        if let Some(meter) = resources.meter {
            let provider = meter.into_provider();
            if let Err(e) = provider.force_flush().and_then(|()| provider.shutdown()) {
                first_error.get_or_insert(AgentError::Shutdown(e));
            }
        }

        self.diagnostics.emit(DiagnosticEvent::AgentDisposed);
        drop(resources.log_writer);

        first_error.map_or(Ok(()), Err)
    }

    /// Marks the agent disposed and takes its resources. `None` if another
    /// caller got there first.
    fn claim(&self) -> Option<Resources> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(std::mem::take(&mut *self.lock()))
    }
}

fn shutdown_providers(tracer: Option<TracerHandle>, meter: Option<MeterHandle>) {
    if let Some(tracer) = tracer {
        let provider = tracer.into_provider();
        let _ = provider.force_flush();
        if let Err(e) = provider.shutdown() {
            tracing::error!(target: "elastic_otel", error = %e, "Failed to shut down tracer provider");
        }
    }

    if let Some(meter) = meter {
        let provider = meter.into_provider();
        let _ = provider.force_flush();
        if let Err(e) = provider.shutdown() {
            tracing::error!(target: "elastic_otel", error = %e, "Failed to shut down meter provider");
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resources = self.lock();
        f.debug_struct("Agent")
            .field("tracer", &resources.tracer.is_some())
            .field("meter", &resources.meter.is_some())
            .field("log_file", &resources.log_writer.as_ref().map(|w| w.path()))
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
