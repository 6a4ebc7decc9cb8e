//! Shared handler state

use relay_agent::Agent;
use relay_dispatch::Coordinator;
use relay_events::EventBus;
use relay_store::{EventStore, StateStore};
use std::sync::Arc;

/// Dependencies shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StateStore>,
    pub events: Arc<dyn EventStore>,
    pub coordinator: Arc<Coordinator>,
    pub bus: Arc<EventBus>,
    /// Agent for the synchronous playground endpoint; absent when no
    /// provider is configured
    pub playground: Option<Arc<Agent>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn StateStore>,
        events: Arc<dyn EventStore>,
        coordinator: Arc<Coordinator>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            events,
            coordinator,
            bus,
            playground: None,
        }
    }

    pub fn with_playground(mut self, agent: Arc<Agent>) -> Self {
        self.playground = Some(agent);
        self
    }
}
