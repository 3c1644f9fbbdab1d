//! Example registering the distro into a service host.
//!
//! The distro's hosted service starts first and stops last, so the worker
//! below runs with telemetry available for its whole lifetime.
//!
//! Run with: cargo run --example hosted

use async_trait::async_trait;
use elastic_opentelemetry::{
    AgentBuilder, AgentBuilderOptions, AgentError, AgentSlot, HostedService, ServiceContainer,
    ServiceHost,
};
use std::sync::Arc;

struct Worker {
    slot: Arc<AgentSlot>,
}

#[async_trait]
impl HostedService for Worker {
    fn name(&self) -> &str {
        "worker"
    }

    async fn start(&self) -> Result<(), AgentError> {
        let running = self.slot.get().is_some();
        tracing::info!(target: "hosted", running, "Worker started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), AgentError> {
        tracing::info!(target: "hosted", "Worker stopping");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), AgentError> {
    let mut builder = AgentBuilder::with_options(
        AgentBuilderOptions::new()
            .with_sources(["hosted"])
            .with_otlp_exporter_name("primary"),
    )?;
    builder
        .with_config_file("otel.toml")
        .configure_resource(|r| r.with_service_name("hosted-example"));

    let mut host = builder.register_services()?;
    let slot = host
        .get::<AgentSlot>()
        .ok_or_else(|| AgentError::Registration("agent slot missing".to_string()))?;
    host.add_hosted_service(Arc::new(Worker { slot }));

    host.start().await?;
    tracing::info_span!(target: "hosted", "work").in_scope(|| {
        tracing::info!(target: "hosted", "Doing work");
    });
    host.stop().await
}
