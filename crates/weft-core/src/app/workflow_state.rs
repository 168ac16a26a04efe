//! WorkflowState - workflow 集約の状態機械
//!
//! # 並行性
//! 複数の worker が同じ workflow の job 完了/失敗を同時に報告します。
//! workflow 行への書き込みは必ず次の手順で行います（lost update 防止）：
//! 1. `WorkflowStore::lock_workflow` で workflow 行の排他ロックを取る
//! 2. ロック下で永続化済みの値を読み直す（手元のコピーは使わない）
//! 3. 新しい値と job 行を stage して commit
//! 4. commit 後に手元のコピーを更新し、イベントを送る
//!
//! カウンタだけでなく `finished_at` / `cancelled_at` もこの手順で書きます。
//! 途中でエラーになったらトランザクションは drop され、何も書かれません。
//!
//! # 再実行された job
//! finished の job が `mark_as_processing` で再実行された場合、`finished_jobs`
//! に残ったままです。再び finished ならカウンタはそのまま、failed なら
//! processed から failed へ付け替えます。

use tracing::{debug, warn};

use super::context::StateContext;
use super::job_state::JobState;
use crate::domain::{
    DomainEvent, JobId, WorkflowError, WorkflowId, WorkflowPatch, WorkflowRecord,
};

pub struct WorkflowState {
    workflow: WorkflowRecord,
    ctx: StateContext,
}

impl WorkflowState {
    pub fn new(workflow: WorkflowRecord, ctx: StateContext) -> Self {
        Self { workflow, ctx }
    }

    pub async fn load(ctx: StateContext, id: WorkflowId) -> Result<Self, WorkflowError> {
        let workflow = ctx.store.load_workflow(id).await?;
        Ok(Self::new(workflow, ctx))
    }

    pub fn id(&self) -> WorkflowId {
        self.workflow.id
    }

    /// Last known copy of the row. May be stale; see `refresh`.
    pub fn record(&self) -> &WorkflowRecord {
        &self.workflow
    }

    pub fn context(&self) -> &StateContext {
        &self.ctx
    }

    pub fn finished_jobs(&self) -> &[JobId] {
        &self.workflow.finished_jobs
    }

    /// Re-read the workflow row.
    pub async fn refresh(&mut self) -> Result<(), WorkflowError> {
        self.workflow = self.ctx.store.load_workflow(self.workflow.id).await?;
        Ok(())
    }

    /// Load every job of this workflow.
    pub async fn jobs(&self) -> Result<Vec<JobState>, WorkflowError> {
        let records = self.ctx.store.load_jobs(self.workflow.id).await?;
        Ok(records
            .into_iter()
            .map(|record| JobState::new(record, self.ctx.clone()))
            .collect())
    }

    /// Dependency check against this copy's finished-job set.
    pub fn can_run(&self, job: &JobState) -> bool {
        job.can_run(&self.workflow.finished_jobs)
    }

    /// Record that `job` finished: append it to `finished_jobs`, bump
    /// `jobs_processed` and mark the job finished, all in one locked transaction.
    ///
    /// A job previously counted as failed (and since retried) moves from the
    /// failed count to the processed count. A finished job that was retried
    /// and finishes again is already counted; only the job row changes.
    /// Reporting a job that is still finished is `InvalidOperation`.
    pub async fn mark_job_as_finished(&mut self, job: &mut JobState) -> Result<(), WorkflowError> {
        self.ensure_owns(job)?;

        let mut tx = self.ctx.store.lock_workflow(self.workflow.id).await?;
        let current = tx.workflow().clone();

        if current.has_finished_job(job.id()) {
            if job.has_finished() {
                return Err(WorkflowError::invalid_operation(format!(
                    "job {} already counted as finished in workflow {}",
                    job.id(),
                    current.id
                )));
            }
        } else {
            let mut patch = WorkflowPatch::default();
            let mut jobs_failed = current.jobs_failed;
            if current.has_failed_job(job.id()) {
                jobs_failed = jobs_failed.saturating_sub(1);
                patch.failed_jobs = Some(without(&current.failed_jobs, job.id()));
                patch.jobs_failed = Some(jobs_failed);
            }
            let jobs_processed = current.jobs_processed + 1;
            ensure_within_job_count(&current, jobs_processed, jobs_failed)?;

            patch.finished_jobs = Some(with(&current.finished_jobs, job.id()));
            patch.jobs_processed = Some(jobs_processed);
            tx.update_workflow(patch);
        }

        let now = self.ctx.clock.now();
        let mut record = job.record().clone();
        record.mark_as_finished(now);
        tx.save_job(record.clone());

        let committed = tx.commit().await?;
        debug!(
            workflow_id = %committed.id,
            job_id = %record.id,
            jobs_processed = committed.jobs_processed,
            jobs_failed = committed.jobs_failed,
            job_count = committed.job_count,
            "job finished"
        );
        self.workflow = committed;
        job.replace(record);

        self.ctx
            .emit(DomainEvent::JobFinished {
                workflow_id: self.workflow.id,
                job_id: job.id().clone(),
                at: now,
            })
            .await;
        Ok(())
    }

    /// Record that `job` failed with `exception`: bump `jobs_failed` and mark
    /// the job failed, in one locked transaction.
    ///
    /// A job is counted once: repeated failures only refresh the failure
    /// detail. Failing a job that is still finished records the detail on the
    /// job and leaves the counters alone. A finished job that was retried and
    /// then fails moves from the processed count to the failed count.
    pub async fn mark_job_as_failed(
        &mut self,
        job: &mut JobState,
        exception: impl Into<String>,
    ) -> Result<(), WorkflowError> {
        self.ensure_owns(job)?;
        let exception = exception.into();

        let mut tx = self.ctx.store.lock_workflow(self.workflow.id).await?;
        let current = tx.workflow().clone();

        if current.has_finished_job(job.id()) {
            if job.has_finished() {
                warn!(
                    workflow_id = %current.id,
                    job_id = %job.id(),
                    "failure reported for a job already counted as finished"
                );
            } else {
                let jobs_processed = current.jobs_processed.saturating_sub(1);
                let jobs_failed = current.jobs_failed + 1;
                ensure_within_job_count(&current, jobs_processed, jobs_failed)?;
                tx.update_workflow(WorkflowPatch {
                    finished_jobs: Some(without(&current.finished_jobs, job.id())),
                    jobs_processed: Some(jobs_processed),
                    failed_jobs: Some(with(&current.failed_jobs, job.id())),
                    jobs_failed: Some(jobs_failed),
                    ..Default::default()
                });
            }
        } else if !current.has_failed_job(job.id()) {
            let jobs_failed = current.jobs_failed + 1;
            ensure_within_job_count(&current, current.jobs_processed, jobs_failed)?;
            tx.update_workflow(WorkflowPatch {
                failed_jobs: Some(with(&current.failed_jobs, job.id())),
                jobs_failed: Some(jobs_failed),
                ..Default::default()
            });
        }

        let now = self.ctx.clock.now();
        let mut record = job.record().clone();
        record.mark_as_failed(now, exception.clone());
        tx.save_job(record.clone());

        let committed = tx.commit().await?;
        debug!(
            workflow_id = %committed.id,
            job_id = %record.id,
            jobs_processed = committed.jobs_processed,
            jobs_failed = committed.jobs_failed,
            job_count = committed.job_count,
            "job failed"
        );
        self.workflow = committed;
        job.replace(record);

        self.ctx
            .emit(DomainEvent::JobFailed {
                workflow_id: self.workflow.id,
                job_id: job.id().clone(),
                exception,
                at: now,
            })
            .await;
        Ok(())
    }

    pub fn all_jobs_have_finished(&self) -> bool {
        self.workflow.all_jobs_have_finished()
    }

    pub fn is_finished(&self) -> bool {
        self.workflow.is_finished()
    }

    /// Set `finished_at`. Only allowed once every job has finished; a second
    /// call is a no-op.
    pub async fn mark_as_finished(&mut self) -> Result<(), WorkflowError> {
        let mut tx = self.ctx.store.lock_workflow(self.workflow.id).await?;
        let current = tx.workflow().clone();
        if current.is_finished() {
            self.workflow = current;
            return Ok(());
        }
        if !current.all_jobs_have_finished() {
            return Err(WorkflowError::invalid_operation(format!(
                "workflow {} still has {} of {} jobs to finish",
                current.id,
                current.remaining_jobs(),
                current.job_count
            )));
        }

        let now = self.ctx.clock.now();
        tx.update_workflow(WorkflowPatch {
            finished_at: Some(now),
            ..Default::default()
        });
        self.workflow = tx.commit().await?;
        debug!(workflow_id = %self.workflow.id, "workflow finished");

        self.ctx
            .emit(DomainEvent::WorkflowFinished {
                workflow_id: self.workflow.id,
                at: now,
            })
            .await;
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.workflow.is_cancelled()
    }

    /// Set `cancelled_at`. Terminal and idempotent: an already cancelled
    /// workflow keeps its original timestamp and no second event is sent.
    pub async fn mark_as_cancelled(&mut self) -> Result<(), WorkflowError> {
        if self.is_cancelled() {
            return Ok(());
        }

        let mut tx = self.ctx.store.lock_workflow(self.workflow.id).await?;
        let current = tx.workflow().clone();
        if current.is_cancelled() {
            self.workflow = current;
            return Ok(());
        }

        let now = self.ctx.clock.now();
        tx.update_workflow(WorkflowPatch {
            cancelled_at: Some(now),
            ..Default::default()
        });
        self.workflow = tx.commit().await?;
        debug!(workflow_id = %self.workflow.id, "workflow cancelled");

        self.ctx
            .emit(DomainEvent::WorkflowCancelled {
                workflow_id: self.workflow.id,
                at: now,
            })
            .await;
        Ok(())
    }

    pub fn remaining_jobs(&self) -> u32 {
        self.workflow.remaining_jobs()
    }

    pub fn has_ran(&self) -> bool {
        self.workflow.has_ran()
    }

    fn ensure_owns(&self, job: &JobState) -> Result<(), WorkflowError> {
        if job.workflow_id() != self.workflow.id {
            return Err(WorkflowError::invalid_operation(format!(
                "job {} belongs to workflow {}, not {}",
                job.id(),
                job.workflow_id(),
                self.workflow.id
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowState")
            .field("workflow", &self.workflow)
            .finish_non_exhaustive()
    }
}

/// `jobs_processed + jobs_failed <= job_count`
fn ensure_within_job_count(
    current: &WorkflowRecord,
    jobs_processed: u32,
    jobs_failed: u32,
) -> Result<(), WorkflowError> {
    if jobs_processed + jobs_failed > current.job_count {
        return Err(WorkflowError::invalid_operation(format!(
            "workflow {} would count {} processed and {} failed of {} jobs",
            current.id, jobs_processed, jobs_failed, current.job_count
        )));
    }
    Ok(())
}

fn with(ids: &[JobId], id: &JobId) -> Vec<JobId> {
    let mut ids = ids.to_vec();
    ids.push(id.clone());
    ids
}

fn without(ids: &[JobId], id: &JobId) -> Vec<JobId> {
    ids.iter().filter(|other| *other != id).cloned().collect()
}
