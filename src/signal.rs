//! Per-signal provider builders.
//!
//! [`TracerBuilder`] and [`MeterBuilder`] wrap the SDK's provider builders
//! and remember what the distro pipeline fed them (sources, baseline
//! instrumentation, resource) so the built handles can expose it. Both
//! implement [`SignalBuilder`], the seam the build pipeline drives.

use crate::config::OtlpExporterOptions;
use crate::error::AgentError;
use crate::exporter;
use crate::processor::TransactionIdProcessor;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::reader::MetricReader;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::{
    Aggregation, Instrument, MeterProviderBuilder, PeriodicReader, SdkMeterProvider, Stream,
};
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracerProvider, ShouldSample, SpanExporter,
    SpanProcessor, TracerProviderBuilder,
};
use std::fmt;
use std::mem;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::registry::LookupSpan;

/// Instrumentation scope used when no source is registered.
const DEFAULT_SCOPE: &str = "elastic-opentelemetry";

/// Telemetry signal a provider serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Spans.
    Traces,
    /// Instruments.
    Metrics,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Signal::Traces => "traces",
            Signal::Metrics => "metrics",
        })
    }
}

/// Library instrumentation the distro enables by default.
///
/// For traces, enabling an instrumentation opts the `tracing` targets of the
/// corresponding client libraries into export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instrumentation {
    /// Outbound HTTP clients.
    HttpClient,
    /// Outbound gRPC clients.
    GrpcClient,
    /// Database access through ORMs and query builders.
    Orm,
    /// Process-level metrics.
    Process,
    /// Runtime-level metrics.
    Runtime,
}

impl Instrumentation {
    /// Stable name.
    pub fn name(&self) -> &'static str {
        match self {
            Instrumentation::HttpClient => "HttpClient",
            Instrumentation::GrpcClient => "GrpcClient",
            Instrumentation::Orm => "Orm",
            Instrumentation::Process => "Process",
            Instrumentation::Runtime => "Runtime",
        }
    }

    /// `tracing` targets emitted by the instrumented libraries.
    pub fn tracing_targets(&self) -> &'static [&'static str] {
        match self {
            Instrumentation::HttpClient => &["reqwest", "reqwest_tracing", "hyper_util::client"],
            Instrumentation::GrpcClient => &["tonic"],
            Instrumentation::Orm => &["sqlx", "sea_orm", "diesel"],
            Instrumentation::Process | Instrumentation::Runtime => &[],
        }
    }

    /// Meter names (instrumentation scopes) the instrumented libraries record under.
    pub fn meter_scopes(&self) -> &'static [&'static str] {
        match self {
            Instrumentation::HttpClient => &["reqwest", "hyper_util::client"],
            Instrumentation::GrpcClient => &["tonic"],
            Instrumentation::Orm => &["sqlx", "sea_orm", "diesel"],
            Instrumentation::Process => &["process"],
            Instrumentation::Runtime => &["tokio"],
        }
    }

    /// Baseline set enabled for `signal`, in registration order.
    pub fn baseline(signal: Signal) -> &'static [Instrumentation] {
        match signal {
            Signal::Traces => &[
                Instrumentation::HttpClient,
                Instrumentation::GrpcClient,
                Instrumentation::Orm,
            ],
            Signal::Metrics => &[
                Instrumentation::Process,
                Instrumentation::Runtime,
                Instrumentation::HttpClient,
            ],
        }
    }
}

impl fmt::Display for Instrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A provider builder the distro pipeline can drive.
///
/// Each method corresponds to one built-in phase of a provider build; the
/// pipeline decides the order.
pub trait SignalBuilder {
    /// What [`build`](Self::build) produces.
    type Provider;

    /// Signal served by the built provider.
    const SIGNAL: Signal;

    /// Opts a source name into collection.
    fn add_source(&mut self, name: &str);

    /// Enables a baseline instrumentation.
    fn add_instrumentation(&mut self, instrumentation: Instrumentation);

    /// Registers the distro processors and returns their names.
    fn add_distro_processors(&mut self) -> &'static [&'static str];

    /// Sets the provider resource.
    fn set_resource(&mut self, resource: Resource);

    /// Registers the OTLP exporter.
    fn add_otlp_exporter(&mut self, options: &OtlpExporterOptions) -> Result<(), AgentError>;

    /// Builds the provider.
    fn build(self) -> Self::Provider;
}

/// Tracer provider builder handed to `configure_tracer` steps.
#[derive(Default)]
pub struct TracerBuilder {
    inner: TracerProviderBuilder,
    sources: Vec<String>,
    instrumentations: Vec<Instrumentation>,
    resource: Option<Resource>,
}

impl TracerBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a span processor. Processors run in registration order.
    pub fn with_span_processor<P: SpanProcessor + 'static>(&mut self, processor: P) -> &mut Self {
        self.inner = mem::take(&mut self.inner).with_span_processor(processor);
        self
    }

    /// Exports spans synchronously as they end.
    pub fn with_simple_exporter<E: SpanExporter + 'static>(&mut self, exporter: E) -> &mut Self {
        self.inner = mem::take(&mut self.inner).with_simple_exporter(exporter);
        self
    }

    /// Exports spans in batches on a background thread.
    pub fn with_batch_exporter<E: SpanExporter + 'static>(&mut self, exporter: E) -> &mut Self {
        self.inner = mem::take(&mut self.inner).with_batch_exporter(exporter);
        self
    }

    /// Replaces the sampler.
    pub fn with_sampler<S: ShouldSample + 'static>(&mut self, sampler: S) -> &mut Self {
        self.inner = mem::take(&mut self.inner).with_sampler(sampler);
        self
    }

    /// Replaces the resource set by the distro.
    pub fn with_resource(&mut self, resource: Resource) -> &mut Self {
        self.set_resource(resource);
        self
    }

    /// Opts a `tracing` target into export.
    pub fn add_source(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        if !self.sources.contains(&name) {
            self.sources.push(name);
        }
        self
    }

    /// Turns off a baseline instrumentation enabled earlier in the build.
    pub fn disable_instrumentation(&mut self, instrumentation: Instrumentation) -> &mut Self {
        self.instrumentations.retain(|i| *i != instrumentation);
        self
    }

    /// Registered sources.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Enabled instrumentations.
    pub fn instrumentations(&self) -> &[Instrumentation] {
        &self.instrumentations
    }
}

impl fmt::Debug for TracerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracerBuilder")
            .field("sources", &self.sources)
            .field("instrumentations", &self.instrumentations)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

impl SignalBuilder for TracerBuilder {
    type Provider = TracerHandle;
    const SIGNAL: Signal = Signal::Traces;

    fn add_source(&mut self, name: &str) {
        TracerBuilder::add_source(self, name);
    }

    fn add_instrumentation(&mut self, instrumentation: Instrumentation) {
        if !self.instrumentations.contains(&instrumentation) {
            self.instrumentations.push(instrumentation);
        }
    }

    fn add_distro_processors(&mut self) -> &'static [&'static str] {
        self.with_span_processor(TransactionIdProcessor::new());
        &[TransactionIdProcessor::NAME]
    }

    fn set_resource(&mut self, resource: Resource) {
        self.inner = mem::take(&mut self.inner).with_resource(resource.clone());
        self.resource = Some(resource);
    }

    fn add_otlp_exporter(&mut self, options: &OtlpExporterOptions) -> Result<(), AgentError> {
        let exporter = exporter::span_exporter(options)?;

        let batch_config = BatchConfigBuilder::default()
            .with_max_queue_size(options.batch.max_queue_size)
            .with_max_export_batch_size(options.batch.max_export_batch_size)
            .with_scheduled_delay(options.batch.scheduled_delay)
            .build();

        let processor = BatchSpanProcessor::builder(exporter)
            .with_batch_config(batch_config)
            .build();

        self.with_span_processor(processor);
        Ok(())
    }

    fn build(self) -> TracerHandle {
        TracerHandle {
            provider: self.inner.build(),
            sources: self.sources,
            instrumentations: self.instrumentations,
            resource: self.resource,
        }
    }
}

/// A built tracer provider and what it was built from.
#[derive(Debug, Clone)]
pub struct TracerHandle {
    provider: SdkTracerProvider,
    sources: Vec<String>,
    instrumentations: Vec<Instrumentation>,
    resource: Option<Resource>,
}

impl TracerHandle {
    /// The SDK provider.
    pub fn provider(&self) -> &SdkTracerProvider {
        &self.provider
    }

    /// Resource the provider was built with, if any phase set one.
    pub fn resource(&self) -> Option<&Resource> {
        self.resource.as_ref()
    }

    /// Registered sources.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Enabled instrumentations.
    pub fn instrumentations(&self) -> &[Instrumentation] {
        &self.instrumentations
    }

    /// `tracing` targets exported by this provider: every registered source
    /// plus the targets of each enabled instrumentation.
    pub fn targets(&self) -> Targets {
        let instrumented = self
            .instrumentations
            .iter()
            .flat_map(|i| i.tracing_targets().iter().copied());

        self.sources
            .iter()
            .map(String::as_str)
            .chain(instrumented)
            .fold(Targets::new(), |targets, target| {
                targets.with_target(target.to_string(), LevelFilter::TRACE)
            })
    }

    /// A `tracing-opentelemetry` layer bound to this provider and filtered to
    /// [`targets`](Self::targets).
    pub fn tracing_layer<S>(&self) -> impl Layer<S> + use<S>
    where
        S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    {
        let scope = self
            .sources
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_SCOPE.to_string());
        tracing_opentelemetry::layer()
            .with_tracer(self.provider.tracer(scope))
            .with_filter(self.targets())
    }

    pub(crate) fn into_provider(self) -> SdkTracerProvider {
        self.provider
    }
}

/// Meter provider builder handed to `configure_meter` steps.
#[derive(Default)]
pub struct MeterBuilder {
    inner: MeterProviderBuilder,
    sources: Vec<String>,
    instrumentations: Vec<Instrumentation>,
    resource: Option<Resource>,
}

impl MeterBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a metric reader.
    pub fn with_reader<R: MetricReader>(&mut self, reader: R) -> &mut Self {
        self.inner = mem::take(&mut self.inner).with_reader(reader);
        self
    }

    /// Exports through a periodic reader with the SDK's default interval.
    pub fn with_periodic_exporter<E: PushMetricExporter>(&mut self, exporter: E) -> &mut Self {
        self.inner = mem::take(&mut self.inner).with_periodic_exporter(exporter);
        self
    }

    /// Replaces the resource set by the distro.
    pub fn with_resource(&mut self, resource: Resource) -> &mut Self {
        self.set_resource(resource);
        self
    }

    /// Opts a meter name into export.
    pub fn add_source(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        if !self.sources.contains(&name) {
            self.sources.push(name);
        }
        self
    }

    /// Turns off a baseline instrumentation enabled earlier in the build.
    pub fn disable_instrumentation(&mut self, instrumentation: Instrumentation) -> &mut Self {
        self.instrumentations.retain(|i| *i != instrumentation);
        self
    }

    /// Registered meter names.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Enabled instrumentations.
    pub fn instrumentations(&self) -> &[Instrumentation] {
        &self.instrumentations
    }

    /// Every meter name whose instruments are exported: registered sources
    /// plus the scopes of enabled instrumentations.
    pub fn meter_scopes(&self) -> Vec<String> {
        let mut scopes = self.sources.clone();
        for scope in self
            .instrumentations
            .iter()
            .flat_map(|i| i.meter_scopes().iter().copied())
        {
            if !scopes.iter().any(|s| s == scope) {
                scopes.push(scope.to_string());
            }
        }
        scopes
    }
}

/// View dropping every instrument recorded under a meter that was not opted in.
///
/// Returning `None` leaves opted-in instruments to the SDK's default view.
fn registered_meters_only(
    scopes: Vec<String>,
) -> impl Fn(&Instrument) -> Option<Stream> + Send + Sync + 'static {
    move |instrument: &Instrument| {
        if scopes.iter().any(|s| s == instrument.scope().name()) {
            None
        } else {
            Stream::builder()
                .with_aggregation(Aggregation::Drop)
                .build()
                .ok()
        }
    }
}

impl fmt::Debug for MeterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterBuilder")
            .field("sources", &self.sources)
            .field("instrumentations", &self.instrumentations)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

impl SignalBuilder for MeterBuilder {
    type Provider = MeterHandle;
    const SIGNAL: Signal = Signal::Metrics;

    fn add_source(&mut self, name: &str) {
        MeterBuilder::add_source(self, name);
    }

    fn add_instrumentation(&mut self, instrumentation: Instrumentation) {
        if !self.instrumentations.contains(&instrumentation) {
            self.instrumentations.push(instrumentation);
        }
    }

    fn add_distro_processors(&mut self) -> &'static [&'static str] {
        &[]
    }

    fn set_resource(&mut self, resource: Resource) {
        self.inner = mem::take(&mut self.inner).with_resource(resource.clone());
        self.resource = Some(resource);
    }

    fn add_otlp_exporter(&mut self, options: &OtlpExporterOptions) -> Result<(), AgentError> {
        let exporter = exporter::metric_exporter(options)?;
        let reader = PeriodicReader::builder(exporter)
            .with_interval(options.metrics_interval)
            .build();
        self.with_reader(reader);
        Ok(())
    }

    fn build(self) -> MeterHandle {
        let scopes = self.meter_scopes();
        let provider = self.inner.with_view(registered_meters_only(scopes)).build();
        MeterHandle {
            provider,
            sources: self.sources,
            instrumentations: self.instrumentations,
            resource: self.resource,
        }
    }
}

/// A built meter provider and what it was built from.
#[derive(Debug, Clone)]
pub struct MeterHandle {
    provider: SdkMeterProvider,
    sources: Vec<String>,
    instrumentations: Vec<Instrumentation>,
    resource: Option<Resource>,
}

impl MeterHandle {
    /// The SDK provider.
    pub fn provider(&self) -> &SdkMeterProvider {
        &self.provider
    }

    /// Resource the provider was built with, if any phase set one.
    pub fn resource(&self) -> Option<&Resource> {
        self.resource.as_ref()
    }

    /// Registered meter names.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Enabled instrumentations.
    pub fn instrumentations(&self) -> &[Instrumentation] {
        &self.instrumentations
    }

    pub(crate) fn into_provider(self) -> SdkMeterProvider {
        self.provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry_sdk::metrics::InMemoryMetricExporter;

    #[test]
    fn baseline_instrumentation_differs_per_signal() {
        assert_eq!(
            Instrumentation::baseline(Signal::Traces),
            &[
                Instrumentation::HttpClient,
                Instrumentation::GrpcClient,
                Instrumentation::Orm
            ]
        );
        assert_eq!(
            Instrumentation::baseline(Signal::Metrics),
            &[
                Instrumentation::Process,
                Instrumentation::Runtime,
                Instrumentation::HttpClient
            ]
        );
    }

    #[test]
    fn sources_are_deduplicated_in_registration_order() {
        let mut builder = TracerBuilder::new();
        builder.add_source("b").add_source("a").add_source("b");
        assert_eq!(builder.sources(), &["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn disabled_instrumentation_is_not_built() {
        let mut builder = TracerBuilder::new();
        for instrumentation in Instrumentation::baseline(Signal::Traces) {
            SignalBuilder::add_instrumentation(&mut builder, *instrumentation);
        }
        builder.disable_instrumentation(Instrumentation::Orm);

        let handle = SignalBuilder::build(builder);
        assert_eq!(
            handle.instrumentations(),
            &[Instrumentation::HttpClient, Instrumentation::GrpcClient]
        );
    }

    #[test]
    fn targets_cover_sources_and_instrumented_libraries() {
        let mut builder = TracerBuilder::new();
        builder.add_source("my_app");
        SignalBuilder::add_instrumentation(&mut builder, Instrumentation::GrpcClient);

        let targets = SignalBuilder::build(builder).targets();
        assert!(targets.would_enable("my_app::handlers", &tracing::Level::INFO));
        assert!(targets.would_enable("tonic::transport", &tracing::Level::DEBUG));
        assert!(!targets.would_enable("sqlx::query", &tracing::Level::INFO));
    }

    fn exported_scopes(exporter: &InMemoryMetricExporter) -> Vec<String> {
        exporter
            .get_finished_metrics()
            .unwrap()
            .iter()
            .flat_map(|rm| rm.scope_metrics().map(|sm| sm.scope().name().to_string()))
            .collect()
    }

    #[test]
    fn only_opted_in_meters_are_exported() {
        let exporter = InMemoryMetricExporter::default();
        let mut builder = MeterBuilder::new();
        builder
            .add_source("registered")
            .with_reader(PeriodicReader::builder(exporter.clone()).build());
        SignalBuilder::add_instrumentation(&mut builder, Instrumentation::Runtime);

        let handle = SignalBuilder::build(builder);
        let provider = handle.provider();
        provider.meter("registered").u64_counter("requests").build().add(1, &[]);
        provider.meter("tokio").u64_counter("tasks").build().add(1, &[]);
        provider.meter("not-registered").u64_counter("ignored").build().add(1, &[]);
        provider.force_flush().unwrap();

        let scopes = exported_scopes(&exporter);
        assert!(scopes.iter().any(|s| s == "registered"));
        assert!(scopes.iter().any(|s| s == "tokio"));
        assert!(!scopes.iter().any(|s| s == "not-registered"));
    }

    #[test]
    fn disabled_instrumentation_meters_are_dropped() {
        let exporter = InMemoryMetricExporter::default();
        let mut builder = MeterBuilder::new();
        builder
            .add_source("app")
            .with_reader(PeriodicReader::builder(exporter.clone()).build());
        for instrumentation in Instrumentation::baseline(Signal::Metrics) {
            SignalBuilder::add_instrumentation(&mut builder, *instrumentation);
        }
        builder.disable_instrumentation(Instrumentation::Process);

        let handle = SignalBuilder::build(builder);
        let provider = handle.provider();
        provider.meter("app").u64_counter("requests").build().add(1, &[]);
        provider.meter("process").u64_counter("cpu").build().add(1, &[]);
        provider.force_flush().unwrap();

        assert_eq!(exported_scopes(&exporter), vec!["app".to_string()]);
    }

    #[test]
    fn resource_is_recorded_on_the_handle() {
        let mut builder = MeterBuilder::new();
        builder.with_resource(
            Resource::builder_empty()
                .with_service_name("svc-a")
                .build(),
        );

        let handle = SignalBuilder::build(builder);
        let service = handle
            .resource()
            .and_then(|r| r.get(&opentelemetry::Key::from_static_str("service.name")));
        assert_eq!(service.map(|v| v.to_string()).as_deref(), Some("svc-a"));
    }
}
