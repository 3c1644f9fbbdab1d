//! Exporter options and builder options.
//!
//! OTLP exporter options are layered with figment, mirroring how the SDK's
//! named-options mechanism resolves them: compiled defaults, then the matching
//! table from any configuration files, then the standard `OTEL_EXPORTER_OTLP_*`
//! environment variables (unnamed option set only), then the caller's
//! callback. Nothing here is cached; every build resolves afresh.

use crate::diagnostics::DiagnosticSink;
use crate::error::{AgentError, ensure_not_blank};
use crate::registration::ServiceHost;
use figment::Figment;
use figment::providers::{Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// OTLP export protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// gRPC protocol (default port 4317).
    Grpc,
    /// HTTP with Protocol Buffers encoding (default port 4318).
    #[default]
    #[serde(alias = "http_binary", alias = "http-binary", alias = "http/protobuf")]
    HttpBinary,
    /// HTTP with JSON encoding (default port 4318).
    #[serde(alias = "http_json", alias = "http-json", alias = "http/json")]
    HttpJson,
}

impl Protocol {
    /// Returns the default endpoint for this protocol.
    #[must_use]
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Protocol::Grpc => "http://localhost:4317",
            Protocol::HttpBinary | Protocol::HttpJson => "http://localhost:4318",
        }
    }

    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim() {
            "grpc" => Some(Protocol::Grpc),
            "http/protobuf" => Some(Protocol::HttpBinary),
            "http/json" => Some(Protocol::HttpJson),
            _ => None,
        }
    }

    fn config_value(&self) -> &'static str {
        match self {
            Protocol::Grpc => "grpc",
            Protocol::HttpBinary => "httpbinary",
            Protocol::HttpJson => "httpjson",
        }
    }
}

/// Options for the distro's OTLP exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OtlpExporterOptions {
    /// OTLP endpoint URL.
    ///
    /// If not specified, uses the protocol's default:
    /// - gRPC: `http://localhost:4317`
    /// - HTTP: `http://localhost:4318`
    pub endpoint: Option<String>,

    /// Export protocol.
    pub protocol: Protocol,

    /// Request timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Headers sent with every export request.
    pub headers: HashMap<String, String>,

    /// Span batching.
    pub batch: BatchConfig,

    /// Interval between metric exports.
    #[serde(with = "humantime_serde")]
    pub metrics_interval: Duration,
}

impl Default for OtlpExporterOptions {
    fn default() -> Self {
        Self {
            endpoint: None,
            protocol: Protocol::default(),
            timeout: Duration::from_secs(10),
            headers: HashMap::new(),
            batch: BatchConfig::default(),
            metrics_interval: Duration::from_secs(60),
        }
    }
}

impl OtlpExporterOptions {
    /// Returns the effective endpoint URL, using protocol defaults if not specified.
    #[must_use]
    pub fn effective_endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| self.protocol.default_endpoint().to_string())
    }

    /// Returns the endpoint URL for a specific signal type.
    #[must_use]
    pub fn signal_endpoint(&self, signal_path: &str) -> String {
        let base = self.effective_endpoint();
        let base = base.trim_end_matches('/');

        match self.protocol {
            Protocol::Grpc => base.to_string(),
            Protocol::HttpBinary | Protocol::HttpJson => format!("{base}{signal_path}"),
        }
    }

    /// Resolves an option set from compiled defaults and `files`.
    ///
    /// `name` selects the `[exporters.<name>]` table; without a name the
    /// `[exporter]` table is used and the standard `OTEL_EXPORTER_OTLP_*`
    /// environment variables are layered on top.
    pub(crate) fn load(files: &[PathBuf], name: Option<&str>) -> Result<Self, AgentError> {
        let mut documents = Figment::new();
        for path in files {
            if path.exists() {
                documents = documents.merge(Toml::file(path));
            }
        }

        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        match name {
            Some(name) => {
                figment = figment.merge(documents.focus(&format!("exporters.{name}")));
            }
            None => {
                figment = figment
                    .merge(documents.focus("exporter"))
                    .merge(standard_env());
            }
        }

        figment.extract().map_err(|e| AgentError::Config(Box::new(e)))
    }

    pub(crate) fn validate(&self) -> Result<(), AgentError> {
        if let Some(url) = &self.endpoint
            && !url.starts_with("http://")
            && !url.starts_with("https://")
        {
            return Err(AgentError::InvalidEndpoint { url: url.clone() });
        }
        Ok(())
    }
}

/// Reads the standard OTLP exporter environment variables.
fn standard_env() -> Figment {
    let mut figment = Figment::new();

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        figment = figment.merge(Serialized::default("endpoint", endpoint));
    }

    if let Ok(protocol) = std::env::var("OTEL_EXPORTER_OTLP_PROTOCOL") {
        match Protocol::from_env_value(&protocol) {
            Some(protocol) => {
                figment = figment.merge(Serialized::default("protocol", protocol.config_value()));
            }
            None => {
                tracing::warn!(target: "elastic_otel", %protocol, "Ignoring unknown OTEL_EXPORTER_OTLP_PROTOCOL");
            }
        }
    }

    if let Ok(headers) = std::env::var("OTEL_EXPORTER_OTLP_HEADERS") {
        figment = figment.merge(Serialized::default("headers", parse_headers(&headers)));
    }

    if let Ok(timeout) = std::env::var("OTEL_EXPORTER_OTLP_TIMEOUT")
        && let Ok(millis) = timeout.trim().parse::<u64>()
    {
        figment = figment.merge(Serialized::default("timeout", format!("{millis}ms")));
    }

    figment
}

/// Parses `key1=value1,key2=value2`, skipping malformed pairs.
fn parse_headers(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Batch exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum queue size.
    pub max_queue_size: usize,

    /// Maximum batch size for export.
    pub max_export_batch_size: usize,

    /// Scheduled delay between exports.
    #[serde(with = "humantime_serde")]
    pub scheduled_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_export_batch_size: 512,
            scheduled_delay: Duration::from_secs(5),
        }
    }
}

/// Expert options controlling an [`AgentBuilder`](crate::AgentBuilder)'s initial registration.
///
/// Consumed once by [`AgentBuilder::with_options`](crate::AgentBuilder::with_options).
#[derive(Clone, Default)]
pub struct AgentBuilderOptions {
    logger: Option<Arc<dyn DiagnosticSink>>,
    services: Option<ServiceHost>,
    sources: Vec<String>,
    skip_otlp_exporter: bool,
    otlp_exporter_name: Option<String>,
}

impl AgentBuilderOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// An additional sink for diagnostic events, alongside the file log.
    pub fn with_logger(mut self, logger: Arc<dyn DiagnosticSink>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// The container [`AgentBuilder::register_services`](crate::AgentBuilder::register_services)
    /// registers into. A fresh [`ServiceHost`] is used when unset.
    pub fn with_services(mut self, services: ServiceHost) -> Self {
        self.services = Some(services);
        self
    }

    /// Initial source names, applied to every signal.
    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Stops the builder from registering OTLP exporters. Useful for tests.
    pub fn skip_otlp_exporter(mut self, skip: bool) -> Self {
        self.skip_otlp_exporter = skip;
        self
    }

    /// Named option set used when resolving OTLP exporter options.
    pub fn with_otlp_exporter_name(mut self, name: impl Into<String>) -> Self {
        self.otlp_exporter_name = Some(name.into());
        self
    }

    /// Initial source names.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Whether OTLP exporters are skipped.
    pub fn skips_otlp_exporter(&self) -> bool {
        self.skip_otlp_exporter
    }

    /// Named option set used when resolving OTLP exporter options.
    pub fn otlp_exporter_name(&self) -> Option<&str> {
        self.otlp_exporter_name.as_deref()
    }

    pub(crate) fn validate(&self) -> Result<(), AgentError> {
        for source in &self.sources {
            ensure_not_blank("sources", source)?;
        }
        if let Some(name) = &self.otlp_exporter_name {
            validate_exporter_name(name)?;
        }
        Ok(())
    }

    pub(crate) fn into_parts(self) -> OptionParts {
        OptionParts {
            logger: self.logger,
            services: self.services,
            sources: self.sources,
            skip_otlp_exporter: self.skip_otlp_exporter,
            otlp_exporter_name: self.otlp_exporter_name,
        }
    }
}

impl fmt::Debug for AgentBuilderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentBuilderOptions")
            .field("logger", &self.logger.is_some())
            .field("services", &self.services.is_some())
            .field("sources", &self.sources)
            .field("skip_otlp_exporter", &self.skip_otlp_exporter)
            .field("otlp_exporter_name", &self.otlp_exporter_name)
            .finish()
    }
}

pub(crate) struct OptionParts {
    pub(crate) logger: Option<Arc<dyn DiagnosticSink>>,
    pub(crate) services: Option<ServiceHost>,
    pub(crate) sources: Vec<String>,
    pub(crate) skip_otlp_exporter: bool,
    pub(crate) otlp_exporter_name: Option<String>,
}

pub(crate) fn validate_exporter_name(name: &str) -> Result<(), AgentError> {
    ensure_not_blank("name", name)?;
    if name.contains('.') {
        return Err(AgentError::invalid_argument("name", "must not contain '.'"));
    }
    Ok(())
}
