//! Error types for agent construction and lifecycle.

use figment::Error as FigmentError;
use std::path::PathBuf;

/// Errors from agent construction, registration and shutdown.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AgentError {
    /// A required argument was empty or malformed.
    ///
    /// Raised by the call that received the argument, before any builder
    /// state is touched.
    #[error("invalid argument `{parameter}`: {reason}")]
    InvalidArgument {
        /// Name of the offending parameter.
        parameter: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },

    /// Failed to extract exporter options from configuration sources.
    #[error("configuration error: {0}")]
    Config(#[source] Box<FigmentError>),

    /// Invalid endpoint URL format.
    #[error("invalid endpoint URL: {url} (must start with http:// or https://)")]
    InvalidEndpoint {
        /// The invalid URL that was provided.
        url: String,
    },

    /// Failed to create trace exporter.
    #[error("failed to create trace exporter")]
    TraceExporter(#[source] opentelemetry_otlp::ExporterBuildError),

    /// Failed to create metric exporter.
    #[error("failed to create metric exporter")]
    MetricExporter(#[source] opentelemetry_otlp::ExporterBuildError),

    /// Failed to initialise tracing subscriber.
    #[error("failed to initialise tracing subscriber")]
    TracingSubscriber(#[from] tracing_subscriber::util::TryInitError),

    /// Failed to open the diagnostic log file.
    #[error("failed to open diagnostic log file in {}", path.display())]
    LogFile {
        /// Directory the log file was to be created in.
        path: PathBuf,
        /// Underlying I/O or appender error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The service container rejected a registration.
    #[error("service registration failed: {0}")]
    Registration(String),

    /// A hosted service failed to start or stop.
    #[error("hosted service `{service}` failed")]
    HostedService {
        /// Name of the failing service.
        service: String,
        /// The error reported by the service.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Failed to shut down providers.
    #[error("failed to shut down providers")]
    Shutdown(#[source] opentelemetry_sdk::error::OTelSdkError),
}

impl AgentError {
    pub(crate) fn invalid_argument(parameter: &'static str, reason: &'static str) -> Self {
        Self::InvalidArgument { parameter, reason }
    }
}

/// Rejects empty and whitespace-only strings.
pub(crate) fn ensure_not_blank(parameter: &'static str, value: &str) -> Result<(), AgentError> {
    if value.trim().is_empty() {
        return Err(AgentError::invalid_argument(
            parameter,
            "must not be empty or whitespace",
        ));
    }
    Ok(())
}
