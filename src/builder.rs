//! Builder for the distro agent.
//!
//! An [`AgentBuilder`] records configuration; nothing touches the SDK until
//! [`build`](AgentBuilder::build) or the container's start hook runs. For each
//! enabled signal the build applies, in order:
//!
//! 1. sources named at construction
//! 2. baseline instrumentation
//! 3. distro processors
//! 4. resource (custom action plus distro identity, or the default detectors)
//! 5. every `configure_*` / `add_*_source` call, in call order
//! 6. the OTLP exporter, unless skipped
//!
//! Invalid arguments are rejected by the call that receives them, before
//! anything is recorded.

use crate::actions::ConfigurationActions;
use crate::agent::Agent;
use crate::config::{AgentBuilderOptions, OptionParts, OtlpExporterOptions, validate_exporter_name};
use crate::diagnostics::{DiagnosticEvent, DiagnosticSink, Diagnostics};
use crate::error::{AgentError, ensure_not_blank};
use crate::exporter::ExporterSettings;
use crate::log_file::LogFileWriter;
use crate::pipeline::{BuildContext, build_provider};
use crate::registration::{AgentSlot, DistroHostedService, ServiceContainer, ServiceHost};
use crate::resource::ResourceAction;
use crate::signal::{MeterBuilder, TracerBuilder, TracerHandle};
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::resource::ResourceBuilder;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Builds an [`Agent`] with Elastic defaults.
///
/// # Example
///
/// ```no_run
/// use elastic_opentelemetry::{AgentBuilder, AgentError};
///
/// fn main() -> Result<(), AgentError> {
///     let mut builder = AgentBuilder::with_sources(["my_app"])?;
///     builder
///         .configure_resource(|r| r.with_service_name("checkout"))
///         .configure_otlp_exporter(
///             |o| o.endpoint = Some("https://apm.example.com:443".into()),
///             None,
///         )?;
///
///     let agent = builder.build()?;
///     // ...
///     agent.dispose();
///     Ok(())
/// }
/// ```
///
/// Building consumes the builder, so it cannot be built twice:
///
/// ```compile_fail
/// use elastic_opentelemetry::AgentBuilder;
///
/// let builder = AgentBuilder::new();
/// let _first = builder.build();
/// let _second = builder.build();
/// ```
#[must_use = "builders do nothing unless .build() or .register() is called"]
pub struct AgentBuilder {
    sources: Vec<String>,
    tracer_steps: ConfigurationActions<TracerBuilder>,
    meter_steps: ConfigurationActions<MeterBuilder>,
    resource: Option<ResourceAction>,
    exporter: ExporterSettings,
    skip_otlp_exporter: bool,
    traces: bool,
    metrics: bool,
    register_globals: bool,
    install_subscriber: bool,
    diagnostics: Diagnostics,
    log_writer: Option<Arc<LogFileWriter>>,
    services: Option<ServiceHost>,
}

impl AgentBuilder {
    /// Creates a builder with Elastic defaults and no named sources.
    ///
    /// File logging is enabled when `ELASTIC_OTEL_LOG_DIRECTORY` is set.
    pub fn new() -> Self {
        Self::from_parts(AgentBuilderOptions::new().into_parts())
    }

    /// Creates a builder that collects from the given sources on every signal.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidArgument`] if any name is empty or whitespace.
    pub fn with_sources<I, S>(sources: I) -> Result<Self, AgentError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_options(AgentBuilderOptions::new().with_sources(sources))
    }

    /// Creates a builder from expert options.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidArgument`] if a source name is blank or the
    /// exporter name is blank or contains `.`.
    pub fn with_options(options: AgentBuilderOptions) -> Result<Self, AgentError> {
        options.validate()?;
        Ok(Self::from_parts(options.into_parts()))
    }

    fn from_parts(parts: OptionParts) -> Self {
        let mut diagnostics = Diagnostics::none();
        let log_writer = LogFileWriter::from_env();
        if let Some(writer) = &log_writer {
            diagnostics.attach(writer.sink());
        }
        if let Some(logger) = parts.logger {
            diagnostics.attach(logger);
        }

        diagnostics.emit(DiagnosticEvent::BuilderInitialized);

        Self {
            sources: parts.sources,
            tracer_steps: ConfigurationActions::new(),
            meter_steps: ConfigurationActions::new(),
            resource: None,
            exporter: ExporterSettings {
                name: parts.otlp_exporter_name,
                ..Default::default()
            },
            skip_otlp_exporter: parts.skip_otlp_exporter,
            traces: true,
            metrics: true,
            register_globals: true,
            install_subscriber: false,
            diagnostics,
            log_writer,
            services: parts.services,
        }
    }

    /// Opts a source into trace collection.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidArgument`] if `name` is empty or whitespace.
    pub fn add_tracer_source(&mut self, name: &str) -> Result<&mut Self, AgentError> {
        ensure_not_blank("source_name", name)?;
        let name = name.to_string();
        self.tracer_steps.append(move |tracer| {
            tracer.add_source(name);
        });
        Ok(self)
    }

    /// Opts several sources into trace collection.
    ///
    /// Either every name is recorded or, if one is blank, none is.
    pub fn add_tracer_sources<I, S>(&mut self, names: I) -> Result<&mut Self, AgentError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = validated_sources(names)?;
        self.tracer_steps.append(move |tracer| {
            for name in names {
                tracer.add_source(name);
            }
        });
        Ok(self)
    }

    /// Replaces the default resource detectors with `configure`.
    ///
    /// `configure` receives the SDK's default resource builder; the distro
    /// identity attributes are appended after it and win on collision. The
    /// last call wins.
    pub fn configure_resource<F>(&mut self, configure: F) -> &mut Self
    where
        F: Fn(ResourceBuilder) -> ResourceBuilder + Send + Sync + 'static,
    {
        self.resource = Some(Arc::new(configure));
        self
    }

    /// Records a step against the tracer provider builder.
    pub fn configure_tracer<F>(&mut self, configure: F) -> &mut Self
    where
        F: FnOnce(&mut TracerBuilder) + Send + 'static,
    {
        self.tracer_steps.append(configure);
        self
    }

    /// Records a fallible step against the tracer provider builder. An error
    /// aborts the build.
    pub fn try_configure_tracer<F>(&mut self, configure: F) -> &mut Self
    where
        F: FnOnce(&mut TracerBuilder) -> Result<(), AgentError> + Send + 'static,
    {
        self.tracer_steps.push(Box::new(configure));
        self
    }

    /// Sets the resource action and opts sources into trace collection in one call.
    pub fn configure_tracer_with_resource<F, I, S>(
        &mut self,
        configure: F,
        sources: I,
    ) -> Result<&mut Self, AgentError>
    where
        F: Fn(ResourceBuilder) -> ResourceBuilder + Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sources = validated_sources(sources)?;
        self.configure_resource(configure);
        if !sources.is_empty() {
            self.tracer_steps.append(move |tracer| {
                for name in sources {
                    tracer.add_source(name);
                }
            });
        }
        Ok(self)
    }

    /// Opts a meter into export.
    ///
    /// Instruments on meters that are neither registered nor recorded by an
    /// enabled instrumentation are dropped.
    pub fn add_meter_source(&mut self, name: &str) -> Result<&mut Self, AgentError> {
        ensure_not_blank("meter_name", name)?;
        let name = name.to_string();
        self.meter_steps.append(move |meter| {
            meter.add_source(name);
        });
        Ok(self)
    }

    /// Records a step against the meter provider builder.
    pub fn configure_meter<F>(&mut self, configure: F) -> &mut Self
    where
        F: FnOnce(&mut MeterBuilder) + Send + 'static,
    {
        self.meter_steps.append(configure);
        self
    }

    /// Configures the distro's OTLP exporter.
    ///
    /// `name` selects a named option set (`[exporters.<name>]` in configuration
    /// files); `None` selects the unnamed set, which also reads the standard
    /// `OTEL_EXPORTER_OTLP_*` variables. `configure` runs on the resolved
    /// options at build time. The last call wins.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidArgument`] if `name` is blank or contains `.`.
    pub fn configure_otlp_exporter<F>(
        &mut self,
        configure: F,
        name: Option<&str>,
    ) -> Result<&mut Self, AgentError>
    where
        F: Fn(&mut OtlpExporterOptions) + Send + Sync + 'static,
    {
        if let Some(name) = name {
            validate_exporter_name(name)?;
        }
        self.exporter.configure = Some(Arc::new(configure));
        self.exporter.name = name.map(str::to_string);
        Ok(self)
    }

    /// Adds a TOML file to read exporter options from. Missing files are skipped.
    pub fn with_config_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.exporter.files.push(path.into());
        self
    }

    /// Stops the build from registering OTLP exporters.
    pub fn skip_otlp_exporter(&mut self, skip: bool) -> &mut Self {
        self.skip_otlp_exporter = skip;
        self
    }

    /// Enables or disables the tracer provider.
    ///
    /// Default: enabled
    pub fn traces(&mut self, enabled: bool) -> &mut Self {
        self.traces = enabled;
        self
    }

    /// Enables or disables the meter provider.
    ///
    /// Default: enabled
    pub fn metrics(&mut self, enabled: bool) -> &mut Self {
        self.metrics = enabled;
        self
    }

    /// Leaves the global providers and propagator untouched.
    pub fn without_global_providers(&mut self) -> &mut Self {
        self.register_globals = false;
        self
    }

    /// Installs a global `tracing` subscriber at build time: an `EnvFilter`
    /// (default `info`), a fmt layer and the agent's OpenTelemetry layer.
    pub fn with_tracing_subscriber(&mut self) -> &mut Self {
        self.install_subscriber = true;
        self
    }

    /// Attaches another diagnostic sink.
    pub fn with_diagnostic_sink(&mut self, sink: Arc<dyn DiagnosticSink>) -> &mut Self {
        self.diagnostics.attach(sink);
        self
    }

    /// Number of recorded tracer steps.
    pub fn pending_tracer_steps(&self) -> usize {
        self.tracer_steps.len()
    }

    /// Number of recorded meter steps.
    pub fn pending_meter_steps(&self) -> usize {
        self.meter_steps.len()
    }

    /// Builds the providers and wraps them in an [`Agent`].
    ///
    /// # Errors
    ///
    /// Returns the first error from a configuration step, exporter option
    /// resolution, exporter construction or subscriber installation. Providers
    /// built before the failure are shut down.
    pub fn build(self) -> Result<Agent, AgentError> {
        let Self {
            sources,
            tracer_steps,
            meter_steps,
            resource,
            exporter,
            skip_otlp_exporter,
            traces,
            metrics,
            register_globals,
            install_subscriber,
            diagnostics,
            log_writer,
            services: _,
        } = self;

        let cx = BuildContext {
            sources: &sources,
            resource: resource.as_ref(),
            exporter: &exporter,
            skip_exporter: skip_otlp_exporter,
            diagnostics: &diagnostics,
        };

        // Providers dropped on an error path shut themselves down.
        let tracer = if traces {
            Some(build_provider(TracerBuilder::new(), tracer_steps, &cx)?)
        } else {
            None
        };

        let meter = if metrics {
            Some(build_provider(MeterBuilder::new(), meter_steps, &cx)?)
        } else {
            None
        };

        // Last fallible step; globals are only touched once nothing can fail.
        if install_subscriber {
            init_subscriber(tracer.as_ref(), log_writer.as_deref())?;
        }

        if register_globals {
            if let Some(tracer) = &tracer {
                opentelemetry::global::set_tracer_provider(tracer.provider().clone());
            }
            if let Some(meter) = &meter {
                opentelemetry::global::set_meter_provider(meter.provider().clone());
            }

            let propagator = TextMapCompositePropagator::new(vec![
                Box::new(TraceContextPropagator::new()),
                Box::new(BaggagePropagator::new()),
            ]);
            opentelemetry::global::set_text_map_propagator(propagator);
        }

        diagnostics.emit(DiagnosticEvent::AgentBuilt);
        Ok(Agent::new(tracer, meter, log_writer, diagnostics))
    }

    /// Registers the distro into `container` instead of building now.
    ///
    /// A hosted service is placed ahead of every existing one: it builds the
    /// agent when the container starts and disposes it when the container
    /// stops. The running agent is resolved through the [`AgentSlot`]
    /// singleton; [`Diagnostics`] is registered as well.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Registration`] if the distro is already registered
    /// in `container`.
    pub fn register<C: ServiceContainer>(mut self, mut container: C) -> Result<C, AgentError> {
        if container.contains_singleton::<AgentSlot>() {
            return Err(AgentError::Registration(
                "distro services are already registered in this container".to_string(),
            ));
        }

        self.services = None;
        let diagnostics = self.diagnostics.clone();
        let slot = Arc::new(AgentSlot::default());

        container.insert_singleton(slot.clone());
        container.insert_singleton(Arc::new(diagnostics.clone()));
        container.prepend_hosted_service(Arc::new(DistroHostedService::new(self, slot)));

        diagnostics.emit(DiagnosticEvent::ServicesRegistered);
        Ok(container)
    }

    /// Registers into the container given through
    /// [`AgentBuilderOptions::with_services`], or a new [`ServiceHost`].
    pub fn register_services(mut self) -> Result<ServiceHost, AgentError> {
        let host = self.services.take().unwrap_or_default();
        self.register(host)
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("sources", &self.sources)
            .field("tracer_steps", &self.tracer_steps.len())
            .field("meter_steps", &self.meter_steps.len())
            .field("custom_resource", &self.resource.is_some())
            .field("exporter", &self.exporter)
            .field("skip_otlp_exporter", &self.skip_otlp_exporter)
            .field("traces", &self.traces)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

fn validated_sources<I, S>(names: I) -> Result<Vec<String>, AgentError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let names: Vec<String> = names.into_iter().map(Into::into).collect();
    for name in &names {
        ensure_not_blank("source_names", name)?;
    }
    Ok(names)
}

fn init_subscriber(
    tracer: Option<&TracerHandle>,
    log_writer: Option<&LogFileWriter>,
) -> Result<(), AgentError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .without_time()
        .with_filter(filter);

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if let Some(tracer) = tracer {
        layers.push(tracer.tracing_layer::<Registry>().boxed());
    }
    if let Some(writer) = log_writer {
        layers.push(writer.sdk_layer::<Registry>().boxed());
    }
    layers.push(fmt_layer.boxed());

    tracing_subscriber::registry().with(layers).try_init()?;

    Ok(())
}
