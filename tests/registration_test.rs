//! Container lifecycle: the distro starts before and stops after every other hosted service.

use async_trait::async_trait;
use elastic_opentelemetry::{
    AgentBuilder, AgentBuilderOptions, AgentError, AgentSlot, DiagnosticEvent, DiagnosticSink,
    HostedService, ServiceContainer, ServiceHost,
};
use std::sync::{Arc, Mutex};

type Timeline = Arc<Mutex<Vec<String>>>;

struct TimelineSink(Timeline);

impl DiagnosticSink for TimelineSink {
    fn on_event(&self, event: &DiagnosticEvent<'_>) {
        match event {
            DiagnosticEvent::AgentBuilt | DiagnosticEvent::AgentDisposed => {
                self.0.lock().unwrap().push(event.name().to_string());
            }
            _ => {}
        }
    }
}

struct Worker {
    timeline: Timeline,
    slot: Arc<AgentSlot>,
}

#[async_trait]
impl HostedService for Worker {
    fn name(&self) -> &str {
        "worker"
    }

    async fn start(&self) -> Result<(), AgentError> {
        let running = self.slot.get().is_some_and(|agent| !agent.is_disposed());
        self.timeline
            .lock()
            .unwrap()
            .push(format!("worker:start agent={running}"));
        Ok(())
    }

    async fn stop(&self) -> Result<(), AgentError> {
        let running = self.slot.get().is_some_and(|agent| !agent.is_disposed());
        self.timeline
            .lock()
            .unwrap()
            .push(format!("worker:stop agent={running}"));
        Ok(())
    }
}

fn position(timeline: &[String], entry: &str) -> usize {
    timeline
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("{entry} missing from {timeline:?}"))
}

#[tokio::test]
async fn distro_wraps_other_hosted_services() {
    let timeline = Timeline::default();

    let mut builder = AgentBuilder::with_options(
        AgentBuilderOptions::new()
            .with_sources(["MyApp.Activity"])
            .with_logger(Arc::new(TimelineSink(timeline.clone())))
            .skip_otlp_exporter(true),
    )
    .unwrap();
    builder.without_global_providers();

    let mut host = builder.register(ServiceHost::new()).unwrap();
    let slot = host.get::<AgentSlot>().unwrap();
    host.add_hosted_service(Arc::new(Worker {
        timeline: timeline.clone(),
        slot: slot.clone(),
    }));

    host.start().await.unwrap();
    let agent = slot.get().expect("agent built on start");
    assert!(agent.tracer_provider().is_some());

    host.stop().await.unwrap();
    assert!(agent.is_disposed());

    let timeline = timeline.lock().unwrap();
    let built = position(&timeline, "AgentBuilt");
    let started = position(&timeline, "worker:start agent=true");
    let stopped = position(&timeline, "worker:stop agent=true");
    let disposed = position(&timeline, "AgentDisposed");

    assert!(built < started);
    assert!(started < stopped);
    assert!(stopped < disposed);
    assert_eq!(
        timeline.iter().filter(|e| *e == "AgentDisposed").count(),
        1
    );
}

#[tokio::test]
async fn failed_build_prevents_later_services_from_starting() {
    let timeline = Timeline::default();

    let mut builder = AgentBuilder::with_options(AgentBuilderOptions::new().skip_otlp_exporter(true))
        .unwrap();
    builder
        .without_global_providers()
        .try_configure_tracer(|_| Err(AgentError::Registration("bad step".to_string())));

    let mut host = builder.register(ServiceHost::new()).unwrap();
    let slot = host.get::<AgentSlot>().unwrap();
    host.add_hosted_service(Arc::new(Worker {
        timeline: timeline.clone(),
        slot: slot.clone(),
    }));

    let err = host.start().await.unwrap_err();

    assert!(matches!(err, AgentError::HostedService { .. }));
    assert!(slot.get().is_none());
    assert!(timeline.lock().unwrap().is_empty());
}
