//! Basic example demonstrating a distro agent with Elastic defaults.
//!
//! Run with: cargo run --example basic

use elastic_opentelemetry::{AgentBuilder, AgentError};
use tracing::instrument;

fn main() -> Result<(), AgentError> {
    // Collect spans from this binary's own `tracing` target.
    let mut builder = AgentBuilder::with_sources(["basic"])?;
    builder
        .with_tracing_subscriber()
        .configure_resource(|r| r.with_service_name("basic-example"))
        .configure_otlp_exporter(
            |options| options.endpoint = Some("http://localhost:4318".to_string()),
            None,
        )?;

    let agent = builder.build()?;

    tracing::info!("Application started");
    handle_request(42);

    // Flushes pending spans and shuts the providers down.
    agent.dispose();
    Ok(())
}

#[instrument]
fn handle_request(user_id: u64) {
    tracing::info!(user_id, "Processing request");
}
