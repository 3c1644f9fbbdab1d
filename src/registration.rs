//! Registration of the distro into a service container.
//!
//! [`AgentBuilder::register`](crate::AgentBuilder::register) defers building
//! the agent to the container's lifecycle: a [`HostedService`] placed ahead of
//! every other service builds the agent on start and disposes it on stop.
//! [`ServiceHost`] is a minimal container that starts services in order and
//! stops them in reverse, so telemetry is up before any other start hook runs
//! and stays up until every other stop hook has finished.

use crate::agent::Agent;
use crate::builder::AgentBuilder;
use crate::error::AgentError;
use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A service with managed start and stop hooks.
#[async_trait]
pub trait HostedService: Send + Sync {
    /// Name used in errors and logs.
    fn name(&self) -> &str;

    /// Called once when the host starts.
    async fn start(&self) -> Result<(), AgentError>;

    /// Called once when the host stops.
    async fn stop(&self) -> Result<(), AgentError>;
}

/// What the distro needs from a service container.
pub trait ServiceContainer {
    /// Registers a singleton, replacing any previous value of the same type.
    fn insert_singleton<T: Any + Send + Sync>(&mut self, value: Arc<T>);

    /// Whether a singleton of type `T` is registered.
    fn contains_singleton<T: Any + Send + Sync>(&self) -> bool;

    /// Registers a hosted service ahead of all existing ones.
    fn prepend_hosted_service(&mut self, service: Arc<dyn HostedService>);

    /// Registers a hosted service after all existing ones.
    fn add_hosted_service(&mut self, service: Arc<dyn HostedService>);
}

/// A small service container with ordered hosted services.
#[derive(Clone, Default)]
pub struct ServiceHost {
    singletons: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    services: Vec<Arc<dyn HostedService>>,
}

impl ServiceHost {
    /// Creates an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a singleton.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.singletons
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Names of the hosted services, in start order.
    pub fn hosted_services(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|s| s.name())
    }

    /// Starts every hosted service in registration order.
    ///
    /// If one fails, the services already started are stopped in reverse
    /// order and the failure is returned.
    pub async fn start(&self) -> Result<(), AgentError> {
        for (index, service) in self.services.iter().enumerate() {
            tracing::debug!(target: "elastic_otel", service = service.name(), "Starting hosted service");
            if let Err(e) = service.start().await {
                for started in self.services[..index].iter().rev() {
                    if let Err(stop_error) = started.stop().await {
                        tracing::error!(
                            target: "elastic_otel",
                            service = started.name(),
                            error = %stop_error,
                            "Failed to stop hosted service during rollback"
                        );
                    }
                }
                return Err(AgentError::HostedService {
                    service: service.name().to_string(),
                    source: Box::new(e),
                });
            }
        }
        Ok(())
    }

    /// Stops every hosted service in reverse registration order.
    ///
    /// All services are stopped even if some fail; the first failure is
    /// returned.
    pub async fn stop(&self) -> Result<(), AgentError> {
        let mut first_error = None;
        for service in self.services.iter().rev() {
            tracing::debug!(target: "elastic_otel", service = service.name(), "Stopping hosted service");
            if let Err(e) = service.stop().await {
                tracing::error!(target: "elastic_otel", service = service.name(), error = %e, "Failed to stop hosted service");
                first_error.get_or_insert(AgentError::HostedService {
                    service: service.name().to_string(),
                    source: Box::new(e),
                });
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl ServiceContainer for ServiceHost {
    fn insert_singleton<T: Any + Send + Sync>(&mut self, value: Arc<T>) {
        self.singletons.insert(TypeId::of::<T>(), value);
    }

    fn contains_singleton<T: Any + Send + Sync>(&self) -> bool {
        self.singletons.contains_key(&TypeId::of::<T>())
    }

    fn prepend_hosted_service(&mut self, service: Arc<dyn HostedService>) {
        self.services.insert(0, service);
    }

    fn add_hosted_service(&mut self, service: Arc<dyn HostedService>) {
        self.services.push(service);
    }
}

impl fmt::Debug for ServiceHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHost")
            .field("singletons", &self.singletons.len())
            .field("services", &self.hosted_services().collect::<Vec<_>>())
            .finish()
    }
}

/// Resolves the agent built by the distro's hosted service.
#[derive(Debug, Default)]
pub struct AgentSlot {
    agent: Mutex<Option<Arc<Agent>>>,
}

impl AgentSlot {
    /// The running agent. `None` before the host starts and after it stops.
    pub fn get(&self) -> Option<Arc<Agent>> {
        self.agent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set(&self, agent: Arc<Agent>) {
        *self
            .agent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(agent);
    }

    fn take(&self) -> Option<Arc<Agent>> {
        self.agent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

/// Builds the agent when the host starts and disposes it when the host stops.
pub(crate) struct DistroHostedService {
    pending: Mutex<Option<AgentBuilder>>,
    slot: Arc<AgentSlot>,
}

impl DistroHostedService {
    pub(crate) const NAME: &'static str = "elastic-otel-distro";

    pub(crate) fn new(builder: AgentBuilder, slot: Arc<AgentSlot>) -> Self {
        Self {
            pending: Mutex::new(Some(builder)),
            slot,
        }
    }
}

#[async_trait]
impl HostedService for DistroHostedService {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self) -> Result<(), AgentError> {
        let builder = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        let Some(builder) = builder else {
            return Err(AgentError::Registration(
                "the distro hosted service can only be started once".to_string(),
            ));
        };

        let agent = builder.build()?;
        self.slot.set(Arc::new(agent));
        Ok(())
    }

    async fn stop(&self) -> Result<(), AgentError> {
        if let Some(agent) = self.slot.take() {
            agent.dispose_async().await;
        }
        Ok(())
    }
}
