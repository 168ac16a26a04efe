//! StateContext - state machine が使う ports の束

use std::sync::Arc;

use crate::domain::DomainEvent;
use crate::impls::NoopEventSink;
use crate::ports::{Clock, EventSink, SystemClock, WorkflowStore};

/// Shared handles for `WorkflowState` / `JobState`.
///
/// Cheap to clone; every state object carries one.
#[derive(Clone)]
pub struct StateContext {
    pub store: Arc<dyn WorkflowStore>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventSink>,
}

impl StateContext {
    /// System clock, no event delivery.
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            events: Arc::new(NoopEventSink),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Emit after commit. A sink failure never undoes a committed transition.
    pub(crate) async fn emit(&self, event: DomainEvent) {
        let name = event.name();
        if let Err(err) = self.events.emit(event).await {
            tracing::warn!(event = name, error = %err, "failed to emit workflow event");
        }
    }
}
