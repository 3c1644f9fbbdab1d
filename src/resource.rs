//! Resource attribute contributors.
//!
//! The default resource is produced by running [`default_detectors`] in order
//! and appending [`distro_attributes`]. Detectors later in the chain overwrite
//! earlier ones for the same key, so the distro identity always wins.
//!
//! A caller-supplied [`ResourceAction`] replaces the default chain: it starts
//! from the SDK's default builder and the distro identity is appended after
//! it.

use opentelemetry::KeyValue;
use opentelemetry_resource_detectors::{
    HostResourceDetector, OsResourceDetector, ProcessResourceDetector,
};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::resource::{
    EnvResourceDetector, ResourceBuilder, ResourceDetector, TelemetryResourceDetector,
};
use opentelemetry_semantic_conventions::resource::{
    DEPLOYMENT_ENVIRONMENT_NAME, PROCESS_RUNTIME_DESCRIPTION, PROCESS_RUNTIME_NAME, SERVICE_INSTANCE_ID,
    SERVICE_NAME, SERVICE_VERSION, TELEMETRY_DISTRO_NAME, TELEMETRY_DISTRO_VERSION,
};
use std::sync::{Arc, OnceLock};

/// Value of `telemetry.distro.name`.
pub const DISTRO_NAME: &str = "elastic";

/// Value of `telemetry.distro.version`.
pub const DISTRO_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Caller-supplied resource configuration.
pub type ResourceAction = Arc<dyn Fn(ResourceBuilder) -> ResourceBuilder + Send + Sync>;

/// Attributes identifying this distribution.
pub fn distro_attributes() -> [KeyValue; 2] {
    [
        KeyValue::new(TELEMETRY_DISTRO_NAME, DISTRO_NAME),
        KeyValue::new(TELEMETRY_DISTRO_VERSION, DISTRO_VERSION),
    ]
}

/// The default detector chain, in precedence order (last wins).
pub fn default_detectors() -> Vec<Box<dyn ResourceDetector>> {
    vec![
        Box::new(DefaultServiceDetector),
        Box::new(TelemetryResourceDetector),
        Box::new(HostResourceDetector::default()),
        Box::new(OsResourceDetector),
        Box::new(ProcessResourceDetector),
        Box::new(RuntimeResourceDetector),
        Box::new(ElasticEnvironmentVariableDetector),
        Box::new(EnvResourceDetector::new()),
        Box::new(ServiceNameEnvDetector),
    ]
}

/// Runs the default chain and appends the distro identity.
pub fn default_resource() -> Resource {
    Resource::builder_empty()
        .with_detectors(&default_detectors())
        .with_attributes(distro_attributes())
        .build()
}

/// Runs `action` over the SDK default builder and appends the distro identity.
pub fn custom_resource(action: &ResourceAction) -> Resource {
    action(Resource::builder())
        .with_attributes(distro_attributes())
        .build()
}

/// `service.name` from the executable name and a process-wide `service.instance.id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultServiceDetector;

impl ResourceDetector for DefaultServiceDetector {
    fn detect(&self) -> Resource {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .filter(|name| !name.is_empty())
            .map_or_else(|| "unknown_service".to_string(), |name| format!("unknown_service:{name}"));

        Resource::builder_empty()
            .with_attributes([
                KeyValue::new(SERVICE_NAME, service_name),
                KeyValue::new(SERVICE_INSTANCE_ID, instance_id().to_string()),
            ])
            .build()
    }
}

fn instance_id() -> &'static uuid::Uuid {
    static INSTANCE_ID: OnceLock<uuid::Uuid> = OnceLock::new();
    INSTANCE_ID.get_or_init(uuid::Uuid::new_v4)
}

/// Rust runtime attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeResourceDetector;

impl ResourceDetector for RuntimeResourceDetector {
    fn detect(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes([
                KeyValue::new(PROCESS_RUNTIME_NAME, "rust"),
                KeyValue::new(
                    PROCESS_RUNTIME_DESCRIPTION,
                    format!(
                        "rust {}-{}{}",
                        std::env::consts::ARCH,
                        std::env::consts::OS,
                        if cfg!(debug_assertions) { " (debug)" } else { "" }
                    ),
                ),
            ])
            .build()
    }
}

/// Service attributes from the Elastic APM agent variables.
///
/// | Variable | Attribute |
/// |---|---|
/// | `ELASTIC_APM_SERVICE_NAME` | `service.name` |
/// | `ELASTIC_APM_SERVICE_VERSION` | `service.version` |
/// | `ELASTIC_APM_ENVIRONMENT` | `deployment.environment.name` |
#[derive(Debug, Clone, Copy, Default)]
pub struct ElasticEnvironmentVariableDetector;

impl ElasticEnvironmentVariableDetector {
    const MAPPINGS: [(&'static str, &'static str); 3] = [
        ("ELASTIC_APM_SERVICE_NAME", SERVICE_NAME),
        ("ELASTIC_APM_SERVICE_VERSION", SERVICE_VERSION),
        ("ELASTIC_APM_ENVIRONMENT", DEPLOYMENT_ENVIRONMENT_NAME),
    ];
}

impl ResourceDetector for ElasticEnvironmentVariableDetector {
    fn detect(&self) -> Resource {
        let attributes = Self::MAPPINGS.iter().filter_map(|(var, key)| {
            non_blank_env(var).map(|value| KeyValue::new(*key, value))
        });
        Resource::builder_empty().with_attributes(attributes).build()
    }
}

/// `service.name` from `OTEL_SERVICE_NAME`, only when set.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceNameEnvDetector;

impl ResourceDetector for ServiceNameEnvDetector {
    fn detect(&self) -> Resource {
        let attributes = non_blank_env("OTEL_SERVICE_NAME").map(|name| KeyValue::new(SERVICE_NAME, name));
        Resource::builder_empty().with_attributes(attributes).build()
    }
}

fn non_blank_env(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
