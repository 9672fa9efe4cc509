//! Component directory used by the process manager to route commands.

use std::collections::HashMap;
use std::sync::Arc;

use domain::{Command, Event};
use tokio::sync::oneshot;

use crate::error::{Result, SagaError};

/// Components that accept commands from the process manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentId {
    Inventory,
    Payment,
}

impl ComponentId {
    /// Returns the component name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentId::Inventory => "inventory",
            ComponentId::Payment => "payment",
        }
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolves once the component has handled the command.
pub type CommandReply = oneshot::Receiver<Result<Event>>;

/// Anything that can accept a command into its mailbox.
///
/// `submit` only enqueues; commands submitted from one task are handled in
/// submission order.
pub trait CommandSink: Send + Sync {
    fn submit(&self, command: Command) -> Result<CommandReply>;
}

/// Routing table from component ID to command sink.
///
/// Built once by the supervisor and handed to the process manager.
#[derive(Clone, Default)]
pub struct Directory {
    routes: HashMap<ComponentId, Arc<dyn CommandSink>>,
}

impl Directory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the sink for a component, returning the one it replaces.
    pub fn register(
        &mut self,
        component: ComponentId,
        sink: Arc<dyn CommandSink>,
    ) -> Option<Arc<dyn CommandSink>> {
        self.routes.insert(component, sink)
    }

    /// Returns the sink for a component.
    pub fn route(&self, component: ComponentId) -> Result<Arc<dyn CommandSink>> {
        self.routes
            .get(&component)
            .cloned()
            .ok_or(SagaError::NoRoute(component))
    }
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Closed;

    impl CommandSink for Closed {
        fn submit(&self, _command: Command) -> Result<CommandReply> {
            Err(SagaError::ComponentStopped("closed".to_string()))
        }
    }

    #[test]
    fn missing_route_is_an_error() {
        let directory = Directory::new();
        assert!(matches!(
            directory.route(ComponentId::Payment),
            Err(SagaError::NoRoute(ComponentId::Payment))
        ));
    }

    #[test]
    fn register_replaces_previous_sink() {
        let mut directory = Directory::new();
        assert!(directory.register(ComponentId::Inventory, Arc::new(Closed)).is_none());
        assert!(directory.register(ComponentId::Inventory, Arc::new(Closed)).is_some());
        assert!(directory.route(ComponentId::Inventory).is_ok());
        assert!(directory.route(ComponentId::Payment).is_err());
    }

    #[test]
    fn component_display() {
        assert_eq!(ComponentId::Inventory.to_string(), "inventory");
        assert_eq!(ComponentId::Payment.to_string(), "payment");
    }
}
