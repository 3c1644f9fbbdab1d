//! Elastic distribution of the OpenTelemetry SDK.
//!
//! Configures tracer and meter providers with Elastic defaults (resource
//! detection, a `transaction.id` span processor, baseline instrumentation and
//! an OTLP exporter) and hands back an [`Agent`] that owns them until it is
//! disposed.
//!
//! # Example
//!
//! ```no_run
//! use elastic_opentelemetry::{AgentBuilder, AgentError};
//!
//! fn main() -> Result<(), AgentError> {
//!     let mut builder = AgentBuilder::with_sources(["my_app"])?;
//!     builder.with_tracing_subscriber();
//!     let agent = builder.build()?;
//!
//!     tracing::info!("Application running");
//!
//!     agent.dispose();
//!     Ok(())
//! }
//! ```
//!
//! # Hosting
//!
//! With a service container, [`AgentBuilder::register`] defers the build to
//! the container's start hook and disposes the agent in its stop hook. See
//! [`ServiceHost`].
//!
//! # Configuration
//!
//! OTLP exporter options are resolved at build time from compiled defaults,
//! optional TOML files ([`AgentBuilder::with_config_file`]), the standard
//! `OTEL_EXPORTER_OTLP_*` variables and finally the callback given to
//! [`AgentBuilder::configure_otlp_exporter`]:
//!
//! ```toml
//! [exporter]
//! endpoint = "https://apm.example.com:443"
//! protocol = "grpc"
//! timeout = "5s"
//!
//! [exporter.headers]
//! authorization = "ApiKey ..."
//!
//! [exporters.backup]
//! endpoint = "http://collector:4318"
//! ```
//!
//! Setting `ELASTIC_OTEL_LOG_DIRECTORY` writes the distro's diagnostic events
//! to a log file in that directory.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod actions;
mod agent;
mod builder;
mod config;
mod diagnostics;
mod error;
mod exporter;
mod log_file;
mod pipeline;
mod processor;
mod registration;
mod resource;
mod signal;

pub use actions::{ConfigurationActions, ConfigurationStep};
pub use agent::Agent;
pub use builder::AgentBuilder;
pub use config::{AgentBuilderOptions, BatchConfig, OtlpExporterOptions, Protocol};
pub use diagnostics::{DiagnosticEvent, DiagnosticSink, Diagnostics};
pub use error::AgentError;
pub use exporter::ExporterCallback;
pub use log_file::{LOG_DIRECTORY_ENV, LogFileWriter};
pub use processor::{TRANSACTION_ID, TransactionIdProcessor};
pub use registration::{AgentSlot, HostedService, ServiceContainer, ServiceHost};
pub use resource::{
    DISTRO_NAME, DISTRO_VERSION, DefaultServiceDetector, ElasticEnvironmentVariableDetector,
    ResourceAction, RuntimeResourceDetector, ServiceNameEnvDetector, default_detectors,
    default_resource, distro_attributes,
};
pub use signal::{
    Instrumentation, MeterBuilder, MeterHandle, Signal, SignalBuilder, TracerBuilder, TracerHandle,
};

/// Re-exported for version compatibility with this crate's dependencies.
pub use opentelemetry;
/// Re-exported for version compatibility with this crate's dependencies.
pub use opentelemetry_sdk;
/// Re-exported for version compatibility with this crate's dependencies.
pub use tracing;
