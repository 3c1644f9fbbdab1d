//! Integration tests verifying the agent wires `tracing` spans through to its exporter.
//!
//! Note: Since the tracing subscriber can only be initialised once per process,
//! we use a single comprehensive test that exercises all the key functionality.

use elastic_opentelemetry::opentelemetry_sdk::trace::{InMemorySpanExporterBuilder, SpanData};
use elastic_opentelemetry::{AgentBuilder, AgentBuilderOptions, AgentError, TRANSACTION_ID};
use tracing::instrument;

#[test]
fn test_tracing_spans_exported_through_agent() -> Result<(), AgentError> {
    let exporter = InMemorySpanExporterBuilder::new().build();
    let sink = exporter.clone();

    let mut builder = AgentBuilder::with_options(
        AgentBuilderOptions::new()
            .with_sources(["integration_test"])
            .skip_otlp_exporter(true),
    )?;
    builder
        .with_tracing_subscriber()
        .without_global_providers()
        .metrics(false)
        .configure_resource(|r| r.with_service_name("integration-test-service"))
        .configure_tracer(move |tracer| {
            tracer.with_simple_exporter(sink);
        });
    let agent = builder.build()?;

    // Test 1: Simple instrumented function creates a span
    do_traced_work();

    // Test 2: Nested spans maintain parent-child relationship
    outer_work();

    // Test 3: Span attributes are captured
    do_work_with_attributes("test-user", 42);

    // Test 4: Targets that were never registered are not exported
    tracing::info_span!(target: "unregistered", "ignored").in_scope(|| {});

    agent.flush();

    let spans = exporter.get_finished_spans().expect("in-memory exporter");
    let names: Vec<_> = spans.iter().map(|s| s.name.to_string()).collect();
    for expected in [
        "do_traced_work",
        "outer_work",
        "inner_work",
        "do_work_with_attributes",
    ] {
        assert!(names.iter().any(|n| n == expected), "missing span {expected}");
    }
    assert!(!names.iter().any(|n| n == "ignored"));

    let attributed = find(&spans, "do_work_with_attributes");
    assert!(
        attributed
            .attributes
            .iter()
            .any(|kv| kv.key.as_str() == "user_id" && kv.value.to_string() == "test-user")
    );

    let outer = find(&spans, "outer_work");
    let inner = find(&spans, "inner_work");
    assert_eq!(inner.parent_span_id, outer.span_context.span_id());

    let root_id = outer.span_context.span_id().to_string();
    assert_eq!(transaction_id(outer).as_deref(), Some(root_id.as_str()));
    assert_eq!(transaction_id(inner).as_deref(), Some(root_id.as_str()));

    agent.shutdown()?;
    Ok(())
}

fn find<'a>(spans: &'a [SpanData], name: &str) -> &'a SpanData {
    spans
        .iter()
        .find(|s| s.name == name)
        .unwrap_or_else(|| panic!("span {name} not exported"))
}

fn transaction_id(span: &SpanData) -> Option<String> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == TRANSACTION_ID)
        .map(|kv| kv.value.to_string())
}

#[instrument]
fn do_traced_work() {
    tracing::info!("Doing some traced work");
}

#[instrument]
fn outer_work() {
    tracing::info!("Starting outer work");
    inner_work();
    tracing::info!("Finished outer work");
}

#[instrument]
fn inner_work() {
    tracing::info!("Doing inner work");
}

#[instrument(fields(user_id = %user_id, count = %count))]
fn do_work_with_attributes(user_id: &str, count: i32) {
    tracing::info!("Processing for user {} with count {}", user_id, count);
}
