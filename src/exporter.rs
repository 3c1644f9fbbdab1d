//! OTLP exporter construction.

use crate::config::{OtlpExporterOptions, Protocol};
use crate::error::AgentError;
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig, WithTonicConfig};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tonic::metadata::{MetadataKey, MetadataMap, MetadataValue};

/// Caller callback applied to resolved exporter options.
pub type ExporterCallback = Arc<dyn Fn(&mut OtlpExporterOptions) + Send + Sync>;

/// Where a build takes its OTLP exporter options from.
#[derive(Clone, Default)]
pub(crate) struct ExporterSettings {
    pub(crate) files: Vec<PathBuf>,
    pub(crate) name: Option<String>,
    pub(crate) configure: Option<ExporterCallback>,
}

impl ExporterSettings {
    /// Resolves options afresh: files and environment, then the callback.
    pub(crate) fn resolve(&self) -> Result<OtlpExporterOptions, AgentError> {
        let mut options = OtlpExporterOptions::load(&self.files, self.name.as_deref())?;
        if let Some(configure) = &self.configure {
            configure(&mut options);
        }
        options.validate()?;
        Ok(options)
    }
}

impl fmt::Debug for ExporterSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExporterSettings")
            .field("files", &self.files)
            .field("name", &self.name)
            .field("configure", &self.configure.is_some())
            .finish()
    }
}

fn build_tonic_metadata(headers: &HashMap<String, String>) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    for (key, value) in headers {
        match (
            key.parse::<MetadataKey<_>>(),
            value.parse::<MetadataValue<_>>(),
        ) {
            (Ok(k), Ok(v)) => {
                metadata.insert(k, v);
            }
            _ => {
                tracing::warn!(target: "elastic_otel", header = %key, "Skipping invalid OTLP header");
            }
        }
    }
    metadata
}

macro_rules! build_exporter {
    ($options:expr, $exporter_type:ident, $signal_path:expr, $error_variant:ident) => {{
        let options: &OtlpExporterOptions = $options;
        match options.protocol {
            Protocol::Grpc => {
                let mut builder = opentelemetry_otlp::$exporter_type::builder()
                    .with_tonic()
                    .with_endpoint(options.effective_endpoint())
                    .with_timeout(options.timeout);

                if !options.headers.is_empty() {
                    builder = builder.with_metadata(build_tonic_metadata(&options.headers));
                }

                builder.build().map_err(AgentError::$error_variant)
            }
            Protocol::HttpBinary | Protocol::HttpJson => {
                let protocol = if options.protocol == Protocol::HttpJson {
                    opentelemetry_otlp::Protocol::HttpJson
                } else {
                    opentelemetry_otlp::Protocol::HttpBinary
                };
                let mut builder = opentelemetry_otlp::$exporter_type::builder()
                    .with_http()
                    .with_endpoint(options.signal_endpoint($signal_path))
                    .with_timeout(options.timeout)
                    .with_protocol(protocol);

                if !options.headers.is_empty() {
                    builder = builder.with_headers(options.headers.clone());
                }

                builder.build().map_err(AgentError::$error_variant)
            }
        }
    }};
}

/// Builds the OTLP span exporter described by `options`.
pub(crate) fn span_exporter(
    options: &OtlpExporterOptions,
) -> Result<opentelemetry_otlp::SpanExporter, AgentError> {
    build_exporter!(options, SpanExporter, "/v1/traces", TraceExporter)
}

/// Builds the OTLP metric exporter described by `options`.
pub(crate) fn metric_exporter(
    options: &OtlpExporterOptions,
) -> Result<opentelemetry_otlp::MetricExporter, AgentError> {
    build_exporter!(options, MetricExporter, "/v1/metrics", MetricExporter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_tonic_metadata_skips_invalid_keys() {
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), "ApiKey secret".to_string());
        headers.insert("bad key".to_string(), "value".to_string());

        let metadata = build_tonic_metadata(&headers);

        assert_eq!(metadata.len(), 1);
        assert!(metadata.get("authorization").is_some());
    }

    #[test]
    fn callback_runs_after_named_options_resolve() {
        let settings = ExporterSettings {
            files: Vec::new(),
            name: Some("primary".to_string()),
            configure: Some(Arc::new(|options: &mut OtlpExporterOptions| {
                options.endpoint = Some("https://apm.example.com".to_string());
                options
                    .headers
                    .insert("authorization".to_string(), "ApiKey abc".to_string());
            })),
        };

        let options = settings.resolve().unwrap();
        assert_eq!(options.endpoint.as_deref(), Some("https://apm.example.com"));
        assert_eq!(options.headers.len(), 1);
    }

    #[test]
    fn callback_producing_bad_endpoint_is_rejected() {
        let settings = ExporterSettings {
            name: Some("primary".to_string()),
            configure: Some(Arc::new(|options: &mut OtlpExporterOptions| {
                options.endpoint = Some("apm.example.com".to_string());
            })),
            ..Default::default()
        };

        assert!(matches!(
            settings.resolve(),
            Err(AgentError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn http_span_exporter_builds_without_a_runtime() {
        let options = OtlpExporterOptions::default();
        assert!(span_exporter(&options).is_ok());
    }
}
