//! Diagnostic lifecycle events.
//!
//! The builder and agent report what they do (sources added, exporter
//! registered, agent disposed, ...) as [`DiagnosticEvent`]s. Every event is
//! logged through `tracing` at debug level under the `elastic_otel` target and
//! forwarded to any attached [`DiagnosticSink`]. With no sink attached,
//! emitting is a plain function call: events borrow their data and nothing is
//! allocated.

use crate::signal::{Instrumentation, Signal};
use std::fmt;
use std::sync::Arc;

/// A named lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DiagnosticEvent<'a> {
    /// An [`AgentBuilder`](crate::AgentBuilder) was created.
    BuilderInitialized,
    /// A source name was registered with a provider builder.
    SourceAdded {
        /// Signal the source belongs to.
        signal: Signal,
        /// The source name.
        name: &'a str,
    },
    /// A baseline instrumentation was enabled.
    InstrumentationAdded {
        /// Signal the instrumentation belongs to.
        signal: Signal,
        /// The instrumentation.
        instrumentation: Instrumentation,
    },
    /// A distro processor was registered.
    ProcessorAdded {
        /// Signal the processor belongs to.
        signal: Signal,
        /// Processor name.
        processor: &'a str,
    },
    /// The provider resource was configured.
    ResourceConfigured {
        /// Signal the resource belongs to.
        signal: Signal,
        /// Whether a caller-supplied resource action was used.
        custom: bool,
    },
    /// The OTLP exporter was registered.
    ExporterAdded {
        /// Signal the exporter belongs to.
        signal: Signal,
        /// Named option set the exporter was configured from.
        name: Option<&'a str>,
    },
    /// The OTLP exporter was skipped on request.
    ExporterSkipped {
        /// Signal the exporter would have belonged to.
        signal: Signal,
    },
    /// A provider finished building.
    ProviderBuilt {
        /// Signal of the built provider.
        signal: Signal,
    },
    /// An [`Agent`](crate::Agent) was built.
    AgentBuilt,
    /// Distro services were registered into a container.
    ServicesRegistered,
    /// An [`Agent`](crate::Agent) released its resources.
    AgentDisposed,
}

impl DiagnosticEvent<'_> {
    /// Stable event name, suitable for filtering.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BuilderInitialized => "BuilderInitialized",
            Self::SourceAdded { .. } => "SourceAdded",
            Self::InstrumentationAdded { .. } => "InstrumentationAdded",
            Self::ProcessorAdded { .. } => "ProcessorAdded",
            Self::ResourceConfigured { .. } => "ResourceConfigured",
            Self::ExporterAdded { .. } => "ExporterAdded",
            Self::ExporterSkipped { .. } => "ExporterSkipped",
            Self::ProviderBuilt { .. } => "ProviderBuilt",
            Self::AgentBuilt => "AgentBuilt",
            Self::ServicesRegistered => "ServicesRegistered",
            Self::AgentDisposed => "AgentDisposed",
        }
    }
}

impl fmt::Display for DiagnosticEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceAdded { signal, name } => write!(f, "SourceAdded {signal} {name}"),
            Self::InstrumentationAdded {
                signal,
                instrumentation,
            } => write!(f, "InstrumentationAdded {signal} {instrumentation}"),
            Self::ProcessorAdded { signal, processor } => {
                write!(f, "ProcessorAdded {signal} {processor}")
            }
            Self::ResourceConfigured { signal, custom } => {
                write!(f, "ResourceConfigured {signal} custom={custom}")
            }
            Self::ExporterAdded { signal, name } => {
                write!(f, "ExporterAdded {signal} {}", name.unwrap_or("<default>"))
            }
            Self::ExporterSkipped { signal } => write!(f, "ExporterSkipped {signal}"),
            Self::ProviderBuilt { signal } => write!(f, "ProviderBuilt {signal}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Observer of diagnostic events.
pub trait DiagnosticSink: Send + Sync {
    /// Called synchronously for every emitted event.
    fn on_event(&self, event: &DiagnosticEvent<'_>);
}

/// Fan-out handle over zero or more sinks.
#[derive(Clone, Default)]
pub struct Diagnostics {
    sinks: Vec<Arc<dyn DiagnosticSink>>,
}

impl Diagnostics {
    /// A handle with no sinks attached.
    pub fn none() -> Self {
        Self::default()
    }

    /// Attaches another sink.
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub(crate) fn attach(&mut self, sink: Arc<dyn DiagnosticSink>) {
        self.sinks.push(sink);
    }

    /// Whether any sink is attached.
    pub fn is_observed(&self) -> bool {
        !self.sinks.is_empty()
    }

    /// Logs the event and forwards it to every sink.
    pub fn emit(&self, event: DiagnosticEvent<'_>) {
        tracing::debug!(target: "elastic_otel", event = event.name(), "{event}");
        for sink in &self.sinks {
            sink.on_event(&event);
        }
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl DiagnosticSink for Recorder {
        fn on_event(&self, event: &DiagnosticEvent<'_>) {
            self.0.lock().unwrap().push(event.to_string());
        }
    }

    #[test]
    fn emit_without_sinks_is_unobserved() {
        let diagnostics = Diagnostics::none();
        assert!(!diagnostics.is_observed());
        diagnostics.emit(DiagnosticEvent::AgentBuilt);
    }

    #[test]
    fn every_sink_receives_each_event_in_order() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let diagnostics = Diagnostics::none()
            .with_sink(first.clone())
            .with_sink(second.clone());

        diagnostics.emit(DiagnosticEvent::BuilderInitialized);
        diagnostics.emit(DiagnosticEvent::SourceAdded {
            signal: Signal::Traces,
            name: "MyApp.Activity",
        });

        let expected = vec![
            "BuilderInitialized".to_string(),
            "SourceAdded traces MyApp.Activity".to_string(),
        ];
        assert_eq!(*first.0.lock().unwrap(), expected);
        assert_eq!(*second.0.lock().unwrap(), expected);
    }

    #[test]
    fn exporter_event_renders_default_name() {
        let event = DiagnosticEvent::ExporterAdded {
            signal: Signal::Metrics,
            name: None,
        };
        assert_eq!(event.to_string(), "ExporterAdded metrics <default>");
        assert_eq!(event.name(), "ExporterAdded");
    }
}
