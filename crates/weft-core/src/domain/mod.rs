//! Domain model (ids, records, state, specs, errors, events).

pub mod dependency;
pub mod errors;
pub mod events;
pub mod ids;
pub mod job;
pub mod spec;
pub mod state;
pub mod workflow;

pub use dependency::DependencyGraph;
pub use errors::{ErrorKind, WorkflowError};
pub use events::DomainEvent;
pub use ids::{JobId, WorkflowId};
pub use job::JobRecord;
pub use spec::{DefinitionError, StepSpec, WorkflowSpec};
pub use state::JobStatus;
pub use workflow::{WorkflowPatch, WorkflowRecord};
