//! WorkflowStore port - workflow / job の正本（source of truth）
//!
//! WorkflowStore は以下を提供します：
//! - workflow 行と job 行の読み書き（部分更新を含む）
//! - workflow 行の排他ロック付きトランザクション（`SELECT ... FOR UPDATE` 相当）
//!
//! # 設計原則
//! - カウンタ（jobs_processed / jobs_failed / finished_jobs）の更新は必ず
//!   `lock_workflow` のトランザクション内で、ロック取得後に読み直した値を元に行う
//! - トランザクションは commit されずに drop されたら rollback（ロックも解放）
//! - ロック取得のタイムアウトは store 側の設定に従う

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{JobId, JobRecord, WorkflowId, WorkflowPatch, WorkflowRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lock on workflow {workflow_id} not acquired within {waited:?}")]
    LockTimeout {
        workflow_id: WorkflowId,
        waited: Duration,
    },

    #[error("conflicting write on workflow {workflow_id}: {reason}")]
    Conflict {
        workflow_id: WorkflowId,
        reason: String,
    },

    #[error("workflow already exists: {0}")]
    AlreadyExists(WorkflowId),

    /// The rows handed to the store are inconsistent with each other.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("job {job_id} not found in workflow {workflow_id}")]
    JobNotFound {
        workflow_id: WorkflowId,
        job_id: JobId,
    },

    #[error("{0}")]
    Backend(String),
}

/// WorkflowStore は状態の正本
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Create a workflow and all of its jobs in one write.
    ///
    /// `workflow.job_count` must equal `jobs.len()` and every job must belong
    /// to `workflow` (`StoreError::InvalidRecord`).
    async fn insert_workflow(
        &self,
        workflow: WorkflowRecord,
        jobs: Vec<JobRecord>,
    ) -> Result<(), StoreError>;

    /// Unlocked read of the workflow row.
    async fn load_workflow(&self, id: WorkflowId) -> Result<WorkflowRecord, StoreError>;

    /// Unlocked partial update. Returns the row after the update.
    ///
    /// Must not be used for counters or for the terminal timestamps; see
    /// `lock_workflow`.
    async fn update_workflow(
        &self,
        id: WorkflowId,
        patch: WorkflowPatch,
    ) -> Result<WorkflowRecord, StoreError>;

    async fn load_job(&self, workflow_id: WorkflowId, job_id: &JobId)
    -> Result<JobRecord, StoreError>;

    async fn load_jobs(&self, workflow_id: WorkflowId) -> Result<Vec<JobRecord>, StoreError>;

    /// Write a job row. Job-local transitions have a single writer and take no lock.
    async fn save_job(&self, job: &JobRecord) -> Result<(), StoreError>;

    /// Begin a transaction holding the exclusive lock on one workflow row.
    ///
    /// Blocks until the lock is free, up to the store's lock timeout
    /// (`StoreError::LockTimeout`).
    async fn lock_workflow(
        &self,
        id: WorkflowId,
    ) -> Result<Box<dyn WorkflowTransaction>, StoreError>;
}

/// A transaction that owns the workflow row lock.
///
/// The holder must either `commit` or drop it (rollback).
/// Nothing staged here is visible to other readers before `commit`.
#[async_trait]
pub trait WorkflowTransaction: Send {
    /// The row as read under the lock, with staged updates applied.
    fn workflow(&self) -> &WorkflowRecord;

    /// Stage a partial update of the locked row.
    fn update_workflow(&mut self, patch: WorkflowPatch);

    /// Stage a job write to be committed together with the row.
    fn save_job(&mut self, job: JobRecord);

    /// Apply everything staged atomically and release the lock.
    async fn commit(self: Box<Self>) -> Result<WorkflowRecord, StoreError>;

    /// Discard everything staged and release the lock.
    fn rollback(self: Box<Self>) {}
}
