//! Provider build orchestration.
//!
//! [`build_provider`] applies the distro's contributions and the caller's
//! steps to a fresh builder in a fixed order:
//!
//! 1. named sources
//! 2. baseline instrumentation
//! 3. distro processors
//! 4. resource
//! 5. caller steps, in insertion order
//! 6. OTLP exporter (unless skipped)
//!
//! Processors therefore always precede exporters, and the exporter is the
//! last thing registered on the builder.

use crate::actions::ConfigurationActions;
use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::error::AgentError;
use crate::exporter::ExporterSettings;
use crate::resource::{self, ResourceAction};
use crate::signal::{Instrumentation, SignalBuilder};

/// Everything a provider build reads besides the caller's steps.
pub(crate) struct BuildContext<'a> {
    pub(crate) sources: &'a [String],
    pub(crate) resource: Option<&'a ResourceAction>,
    pub(crate) exporter: &'a ExporterSettings,
    pub(crate) skip_exporter: bool,
    pub(crate) diagnostics: &'a Diagnostics,
}

pub(crate) fn build_provider<B: SignalBuilder>(
    mut builder: B,
    steps: ConfigurationActions<B>,
    cx: &BuildContext<'_>,
) -> Result<B::Provider, AgentError> {
    let signal = B::SIGNAL;

    for name in cx.sources {
        builder.add_source(name);
        cx.diagnostics
            .emit(DiagnosticEvent::SourceAdded { signal, name });
    }

    for instrumentation in Instrumentation::baseline(signal) {
        builder.add_instrumentation(*instrumentation);
        cx.diagnostics.emit(DiagnosticEvent::InstrumentationAdded {
            signal,
            instrumentation: *instrumentation,
        });
    }

    for processor in builder.add_distro_processors().iter().copied() {
        cx.diagnostics
            .emit(DiagnosticEvent::ProcessorAdded { signal, processor });
    }

    let resource = match cx.resource {
        Some(action) => resource::custom_resource(action),
        None => resource::default_resource(),
    };
    builder.set_resource(resource);
    cx.diagnostics.emit(DiagnosticEvent::ResourceConfigured {
        signal,
        custom: cx.resource.is_some(),
    });

    steps.compose()(&mut builder)?;

    if cx.skip_exporter {
        cx.diagnostics
            .emit(DiagnosticEvent::ExporterSkipped { signal });
    } else {
        let options = cx.exporter.resolve()?;
        builder.add_otlp_exporter(&options)?;
        cx.diagnostics.emit(DiagnosticEvent::ExporterAdded {
            signal,
            name: cx.exporter.name.as_deref(),
        });
    }

    let provider = builder.build();
    cx.diagnostics
        .emit(DiagnosticEvent::ProviderBuilt { signal });
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OtlpExporterOptions;
    use crate::signal::Signal;
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::Resource;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    struct RecordingBuilder {
        log: Log,
        resource: Option<Resource>,
    }

    impl RecordingBuilder {
        fn new(log: &Log) -> Self {
            Self {
                log: log.clone(),
                resource: None,
            }
        }

        fn record(&self, entry: impl Into<String>) {
            self.log.lock().unwrap().push(entry.into());
        }
    }

    impl SignalBuilder for RecordingBuilder {
        type Provider = Option<Resource>;
        const SIGNAL: Signal = Signal::Traces;

        fn add_source(&mut self, name: &str) {
            self.record(format!("source:{name}"));
        }

        fn add_instrumentation(&mut self, instrumentation: Instrumentation) {
            self.record(format!("instrumentation:{instrumentation}"));
        }

        fn add_distro_processors(&mut self) -> &'static [&'static str] {
            self.record("processor:distro");
            &["distro"]
        }

        fn set_resource(&mut self, resource: Resource) {
            self.record("resource");
            self.resource = Some(resource);
        }

        fn add_otlp_exporter(&mut self, options: &OtlpExporterOptions) -> Result<(), AgentError> {
            self.record(format!("exporter:{}", options.effective_endpoint()));
            Ok(())
        }

        fn build(self) -> Option<Resource> {
            self.record("build");
            self.resource
        }
    }

    fn named_exporter() -> ExporterSettings {
        ExporterSettings {
            name: Some("test".to_string()),
            configure: Some(Arc::new(|options: &mut OtlpExporterOptions| {
                options.endpoint = Some("http://collector:4318".to_string());
            })),
            ..Default::default()
        }
    }

    fn user_step(log: &Log, name: &'static str) -> impl FnOnce(&mut RecordingBuilder) + Send + 'static {
        let log = log.clone();
        move |_| log.lock().unwrap().push(format!("user:{name}"))
    }

    #[test]
    fn phases_run_in_fixed_order_with_exporter_last() {
        let log = Log::default();
        let mut steps = ConfigurationActions::new();
        steps.append(user_step(&log, "first"));
        steps.append(user_step(&log, "second"));

        let sources = vec!["MyApp.Activity".to_string()];
        let exporter = named_exporter();
        let diagnostics = Diagnostics::none();
        let cx = BuildContext {
            sources: &sources,
            resource: None,
            exporter: &exporter,
            skip_exporter: false,
            diagnostics: &diagnostics,
        };

        build_provider(RecordingBuilder::new(&log), steps, &cx).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "source:MyApp.Activity",
                "instrumentation:HttpClient",
                "instrumentation:GrpcClient",
                "instrumentation:Orm",
                "processor:distro",
                "resource",
                "user:first",
                "user:second",
                "exporter:http://collector:4318",
                "build",
            ]
        );
    }

    #[test]
    fn skipped_exporter_is_never_registered() {
        let log = Log::default();
        let exporter = named_exporter();
        let diagnostics = Diagnostics::none();
        let cx = BuildContext {
            sources: &[],
            resource: None,
            exporter: &exporter,
            skip_exporter: true,
            diagnostics: &diagnostics,
        };

        build_provider(RecordingBuilder::new(&log), ConfigurationActions::new(), &cx).unwrap();

        let log = log.lock().unwrap();
        assert!(!log.iter().any(|entry| entry.starts_with("exporter:")));
        assert_eq!(log.last().map(String::as_str), Some("build"));
    }

    #[test]
    fn failing_step_aborts_before_exporter_and_build() {
        let log = Log::default();
        let mut steps = ConfigurationActions::new();
        steps.push(Box::new(|_: &mut RecordingBuilder| -> Result<(), AgentError> {
            Err(AgentError::Registration("step failed".to_string()))
        }));
        steps.append(user_step(&log, "never"));

        let exporter = named_exporter();
        let diagnostics = Diagnostics::none();
        let cx = BuildContext {
            sources: &[],
            resource: None,
            exporter: &exporter,
            skip_exporter: false,
            diagnostics: &diagnostics,
        };

        let result = build_provider(RecordingBuilder::new(&log), steps, &cx);

        assert!(matches!(result, Err(AgentError::Registration(_))));
        let log = log.lock().unwrap();
        assert!(!log.iter().any(|e| e == "user:never" || e == "build" || e.starts_with("exporter:")));
    }

    #[test]
    fn custom_resource_keeps_service_name_and_distro_identity() {
        let log = Log::default();
        let action: ResourceAction = Arc::new(|builder: opentelemetry_sdk::resource::ResourceBuilder| {
            builder.with_attributes([
                KeyValue::new("service.name", "svc-a"),
                KeyValue::new("telemetry.distro.name", "other"),
            ])
        });
        let exporter = named_exporter();
        let diagnostics = Diagnostics::none();
        let cx = BuildContext {
            sources: &[],
            resource: Some(&action),
            exporter: &exporter,
            skip_exporter: true,
            diagnostics: &diagnostics,
        };

        let resource = build_provider(RecordingBuilder::new(&log), ConfigurationActions::new(), &cx)
            .unwrap()
            .unwrap();

        let get = |key: &'static str| {
            resource
                .get(&opentelemetry::Key::from_static_str(key))
                .map(|v| v.to_string())
        };
        assert_eq!(get("service.name").as_deref(), Some("svc-a"));
        assert_eq!(get("telemetry.distro.name").as_deref(), Some("elastic"));
    }
}
