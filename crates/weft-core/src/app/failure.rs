//! FailedJobHandler - job 失敗時のフック
//!
//! worker は job 本体がエラーを返したらこの handler を呼びます。
//! 差し替えれば、失敗の記録に加えて通知やキャンセルなどを行えます。

use async_trait::async_trait;
use tracing::warn;

use super::job_state::JobState;
use super::workflow_state::WorkflowState;
use crate::domain::WorkflowError;

/// Invoked once per failed attempt of a job.
#[async_trait]
pub trait FailedJobHandler: Send + Sync {
    async fn handle(
        &self,
        workflow: &mut WorkflowState,
        job: &mut JobState,
        exception: &str,
    ) -> Result<(), WorkflowError>;
}

/// Records the failure on the workflow and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFailedJobHandler;

#[async_trait]
impl FailedJobHandler for DefaultFailedJobHandler {
    async fn handle(
        &self,
        workflow: &mut WorkflowState,
        job: &mut JobState,
        exception: &str,
    ) -> Result<(), WorkflowError> {
        warn!(
            workflow_id = %workflow.id(),
            job_id = %job.id(),
            exception,
            "job failed"
        );
        workflow.mark_job_as_failed(job, exception).await
    }
}

/// Records the failure, then cancels the whole workflow.
#[derive(Debug, Clone, Copy, Default)]
pub struct CancelOnFailure;

#[async_trait]
impl FailedJobHandler for CancelOnFailure {
    async fn handle(
        &self,
        workflow: &mut WorkflowState,
        job: &mut JobState,
        exception: &str,
    ) -> Result<(), WorkflowError> {
        DefaultFailedJobHandler.handle(workflow, job, exception).await?;
        workflow.mark_as_cancelled().await
    }
}
