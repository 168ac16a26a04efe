//! Events - ドメインイベント
//!
//! 状態遷移が commit された後に EventSink へ送られます。
//! 通知の配送（webhook, queue など）はこの crate の範囲外です。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, WorkflowId};

/// DomainEvent はドメインで発生したイベント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    JobFinished {
        workflow_id: WorkflowId,
        job_id: JobId,
        at: DateTime<Utc>,
    },
    JobFailed {
        workflow_id: WorkflowId,
        job_id: JobId,
        exception: String,
        at: DateTime<Utc>,
    },
    JobGated {
        workflow_id: WorkflowId,
        job_id: JobId,
        at: DateTime<Utc>,
    },
    WorkflowFinished {
        workflow_id: WorkflowId,
        at: DateTime<Utc>,
    },
    WorkflowCancelled {
        workflow_id: WorkflowId,
        at: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn workflow_id(&self) -> WorkflowId {
        match self {
            DomainEvent::JobFinished { workflow_id, .. }
            | DomainEvent::JobFailed { workflow_id, .. }
            | DomainEvent::JobGated { workflow_id, .. }
            | DomainEvent::WorkflowFinished { workflow_id, .. }
            | DomainEvent::WorkflowCancelled { workflow_id, .. } => *workflow_id,
        }
    }

    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            DomainEvent::JobFinished { job_id, .. }
            | DomainEvent::JobFailed { job_id, .. }
            | DomainEvent::JobGated { job_id, .. } => Some(job_id),
            DomainEvent::WorkflowFinished { .. } | DomainEvent::WorkflowCancelled { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::JobFinished { .. } => "job_finished",
            DomainEvent::JobFailed { .. } => "job_failed",
            DomainEvent::JobGated { .. } => "job_gated",
            DomainEvent::WorkflowFinished { .. } => "workflow_finished",
            DomainEvent::WorkflowCancelled { .. } => "workflow_cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn event_is_tagged_with_its_name() {
        let event = DomainEvent::JobFailed {
            workflow_id: WorkflowId::from_ulid(Ulid::new()),
            job_id: JobId::new("e"),
            exception: "boom".into(),
            at: Utc::now(),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.name());
        assert_eq!(value["job_id"], "e");
        assert_eq!(event.job_id(), Some(&JobId::new("e")));
    }
}
