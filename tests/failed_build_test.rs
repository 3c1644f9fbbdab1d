//! A build that fails while installing the `tracing` subscriber leaves no global state behind.

use elastic_opentelemetry::opentelemetry::global;
use elastic_opentelemetry::opentelemetry::trace::Tracer;
use elastic_opentelemetry::opentelemetry_sdk::trace::InMemorySpanExporterBuilder;
use elastic_opentelemetry::{AgentBuilder, AgentBuilderOptions, AgentError};

#[test]
fn failed_subscriber_install_does_not_replace_global_provider() {
    // Occupy the global subscriber slot so the build's install fails.
    tracing::subscriber::set_global_default(tracing_subscriber::registry())
        .expect("first global subscriber in this test binary");

    let exporter = InMemorySpanExporterBuilder::new().build();
    let sink = exporter.clone();

    let mut builder = AgentBuilder::with_options(
        AgentBuilderOptions::new()
            .with_sources(["failed_build_test"])
            .skip_otlp_exporter(true),
    )
    .unwrap();
    builder
        .with_tracing_subscriber()
        .metrics(false)
        .configure_tracer(move |tracer| {
            tracer.with_simple_exporter(sink);
        });

    let err = builder.build().unwrap_err();
    assert!(matches!(err, AgentError::TracingSubscriber(_)));

    global::tracer("after_failed_build").in_span("global-span", |_| {});

    let spans = exporter.get_finished_spans().unwrap();
    assert!(
        spans.is_empty(),
        "failed build exported through the global provider: {spans:?}"
    );
}
