//! JobState - 1 つの job の状態機械（永続化つき）
//!
//! 述語は `JobRecord` にそのまま委譲します。
//! 遷移は clone に対して行い、store への書き込みが成功してから反映します。
//! job ローカルな遷移は、その job を処理している 1 worker だけが行う前提なのでロックは取りません。

use tracing::debug;

use super::context::StateContext;
use crate::domain::{DomainEvent, JobId, JobRecord, WorkflowError, WorkflowId};

pub struct JobState {
    record: JobRecord,
    ctx: StateContext,
}

impl JobState {
    pub fn new(record: JobRecord, ctx: StateContext) -> Self {
        Self { record, ctx }
    }

    pub async fn load(
        ctx: StateContext,
        workflow_id: WorkflowId,
        job_id: &JobId,
    ) -> Result<Self, WorkflowError> {
        let record = ctx.store.load_job(workflow_id, job_id).await?;
        Ok(Self::new(record, ctx))
    }

    pub fn id(&self) -> &JobId {
        &self.record.id
    }

    pub fn workflow_id(&self) -> WorkflowId {
        self.record.workflow_id
    }

    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    /// Re-read the job row.
    pub async fn refresh(&mut self) -> Result<(), WorkflowError> {
        self.record = self
            .ctx
            .store
            .load_job(self.record.workflow_id, &self.record.id)
            .await?;
        Ok(())
    }

    pub fn has_finished(&self) -> bool {
        self.record.has_finished()
    }

    pub fn has_failed(&self) -> bool {
        self.record.has_failed()
    }

    pub fn is_processing(&self) -> bool {
        self.record.is_processing()
    }

    pub fn is_pending(&self) -> bool {
        self.record.is_pending()
    }

    pub fn is_gated(&self) -> bool {
        self.record.is_gated()
    }

    pub fn can_run(&self, finished_jobs: &[JobId]) -> bool {
        self.record.can_run(finished_jobs)
    }

    /// Mark the job itself as finished. Does not touch workflow counters;
    /// workers report through `WorkflowState::mark_job_as_finished`.
    pub async fn mark_as_finished(&mut self) -> Result<(), WorkflowError> {
        let now = self.ctx.clock.now();
        self.transition(|job| {
            job.mark_as_finished(now);
            Ok(())
        })
        .await
    }

    /// Mark the job itself as failed. See `WorkflowState::mark_job_as_failed`.
    pub async fn mark_as_failed(
        &mut self,
        exception: impl Into<String>,
    ) -> Result<(), WorkflowError> {
        let now = self.ctx.clock.now();
        let exception = exception.into();
        self.transition(|job| {
            job.mark_as_failed(now, exception);
            Ok(())
        })
        .await
    }

    /// Called by the queue substrate before the job body runs, on retry, and
    /// by the gate-release action.
    pub async fn mark_as_processing(&mut self) -> Result<(), WorkflowError> {
        let now = self.ctx.clock.now();
        self.transition(|job| {
            job.mark_as_processing(now);
            Ok(())
        })
        .await
    }

    /// Hold a manual job for release. `InvalidOperation` for non-manual jobs.
    pub async fn mark_as_gated(&mut self) -> Result<(), WorkflowError> {
        let now = self.ctx.clock.now();
        self.transition(|job| job.mark_as_gated(now)).await?;
        self.ctx
            .emit(DomainEvent::JobGated {
                workflow_id: self.record.workflow_id,
                job_id: self.record.id.clone(),
                at: now,
            })
            .await;
        Ok(())
    }

    async fn transition(
        &mut self,
        apply: impl FnOnce(&mut JobRecord) -> Result<(), WorkflowError>,
    ) -> Result<(), WorkflowError> {
        let mut next = self.record.clone();
        apply(&mut next)?;
        self.ctx.store.save_job(&next).await?;
        debug!(
            workflow_id = %next.workflow_id,
            job_id = %next.id,
            from = %self.record.status,
            to = %next.status,
            gated = next.gated,
            "job transition"
        );
        self.record = next;
        Ok(())
    }

    /// Adopt a record that was committed by a workflow transaction.
    pub(crate) fn replace(&mut self, record: JobRecord) {
        self.record = record;
    }
}

impl std::fmt::Debug for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobState")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}
