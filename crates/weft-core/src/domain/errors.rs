//! Errors - エラー型と分類

use thiserror::Error;

use super::ids::{JobId, WorkflowId};
use super::spec::DefinitionError;
use crate::ports::StoreError;

/// ErrorKind は実行エラーの運用分類
///
/// - Permanent: 呼び出し側のバグ（リトライ無意味）
/// - Retryable: lock 競合など（queue 側の通常リトライで回復する）
/// - Infrastructure: store backend の障害
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Permanent,
    Retryable,
    Infrastructure,
}

/// WorkflowError はドメインエラー
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The operation is structurally forbidden in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The workflow row lock could not be obtained in time.
    #[error("transaction conflict on workflow {workflow_id}: {reason}")]
    TransactionConflict {
        workflow_id: WorkflowId,
        reason: String,
    },

    #[error("workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("job {job_id} not found in workflow {workflow_id}")]
    JobNotFound {
        workflow_id: WorkflowId,
        job_id: JobId,
    },

    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(#[from] DefinitionError),

    #[error("store error: {0}")]
    Store(String),
}

impl WorkflowError {
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::TransactionConflict { .. } => ErrorKind::Retryable,
            WorkflowError::Store(_) => ErrorKind::Infrastructure,
            WorkflowError::InvalidOperation(_)
            | WorkflowError::WorkflowNotFound(_)
            | WorkflowError::JobNotFound { .. }
            | WorkflowError::InvalidDefinition(_) => ErrorKind::Permanent,
        }
    }

    /// Should the queue substrate retry the call that produced this error?
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout {
                workflow_id,
                waited,
            } => WorkflowError::TransactionConflict {
                workflow_id,
                reason: format!("lock not acquired within {waited:?}"),
            },
            StoreError::Conflict {
                workflow_id,
                reason,
            } => WorkflowError::TransactionConflict {
                workflow_id,
                reason,
            },
            StoreError::AlreadyExists(id) => {
                WorkflowError::InvalidOperation(format!("workflow {id} already exists"))
            }
            StoreError::InvalidRecord(msg) => WorkflowError::InvalidOperation(msg),
            StoreError::WorkflowNotFound(id) => WorkflowError::WorkflowNotFound(id),
            StoreError::JobNotFound {
                workflow_id,
                job_id,
            } => WorkflowError::JobNotFound {
                workflow_id,
                job_id,
            },
            StoreError::Backend(msg) => WorkflowError::Store(msg),
        }
    }
}
