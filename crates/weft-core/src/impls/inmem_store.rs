//! InMemoryWorkflowStore - 開発用・テスト用の正本
//!
//! # 実装詳細
//! - テーブル（workflow 行, job 行）は 1 つの tokio Mutex で保護
//! - workflow ごとに行ロック（`Arc<Mutex<()>>`）を持ち、`lock_owned` で
//!   トランザクションがロックを所有する
//! - ロック取得は `tokio::time::timeout` で StoreConfig::lock_timeout まで待つ
//! - commit までの変更はトランザクション内に stage され、drop されたら捨てられる

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::StoreConfig;
use crate::domain::{JobId, JobRecord, WorkflowId, WorkflowPatch, WorkflowRecord};
use crate::ports::{StoreError, WorkflowStore, WorkflowTransaction};

#[derive(Default)]
struct Tables {
    workflows: HashMap<WorkflowId, WorkflowRecord>,
    jobs: HashMap<WorkflowId, BTreeMap<JobId, JobRecord>>,
}

impl Tables {
    fn workflow(&self, id: WorkflowId) -> Result<&WorkflowRecord, StoreError> {
        self.workflows
            .get(&id)
            .ok_or(StoreError::WorkflowNotFound(id))
    }

    fn has_job(&self, workflow_id: WorkflowId, job_id: &JobId) -> bool {
        self.jobs
            .get(&workflow_id)
            .is_some_and(|jobs| jobs.contains_key(job_id))
    }
}

/// In-memory `WorkflowStore` with per-workflow row locks.
pub struct InMemoryWorkflowStore {
    tables: Arc<Mutex<Tables>>,
    row_locks: Mutex<HashMap<WorkflowId, Arc<Mutex<()>>>>,
    config: StoreConfig,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default_v1())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            row_locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Wait for the row lock of `id`, bounded by the configured timeout.
    async fn acquire_row_lock(&self, id: WorkflowId) -> Result<OwnedMutexGuard<()>, StoreError> {
        let row_lock = {
            let locks = self.row_locks.lock().await;
            locks
                .get(&id)
                .cloned()
                .ok_or(StoreError::WorkflowNotFound(id))?
        };

        let waited = self.config.lock_timeout;
        tokio::time::timeout(waited, row_lock.lock_owned())
            .await
            .map_err(|_| {
                tracing::warn!(workflow_id = %id, ?waited, "workflow lock wait timed out");
                StoreError::LockTimeout {
                    workflow_id: id,
                    waited,
                }
            })
    }
}

impl Default for InMemoryWorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn insert_workflow(
        &self,
        workflow: WorkflowRecord,
        jobs: Vec<JobRecord>,
    ) -> Result<(), StoreError> {
        let id = workflow.id;
        let mut tables = self.tables.lock().await;
        if tables.workflows.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        if workflow.job_count as usize != jobs.len() {
            return Err(StoreError::InvalidRecord(format!(
                "workflow {id} declares {} jobs but {} were given",
                workflow.job_count,
                jobs.len()
            )));
        }
        if let Some(stray) = jobs.iter().find(|job| job.workflow_id != id) {
            return Err(StoreError::InvalidRecord(format!(
                "job {} belongs to workflow {}, not {id}",
                stray.id, stray.workflow_id
            )));
        }

        let rows = jobs.into_iter().map(|job| (job.id.clone(), job)).collect();
        tables.workflows.insert(id, workflow);
        tables.jobs.insert(id, rows);
        drop(tables);

        self.row_locks
            .lock()
            .await
            .insert(id, Arc::new(Mutex::new(())));
        Ok(())
    }

    async fn load_workflow(&self, id: WorkflowId) -> Result<WorkflowRecord, StoreError> {
        let tables = self.tables.lock().await;
        tables.workflow(id).cloned()
    }

    async fn update_workflow(
        &self,
        id: WorkflowId,
        patch: WorkflowPatch,
    ) -> Result<WorkflowRecord, StoreError> {
        // A plain UPDATE still waits for a row held FOR UPDATE.
        let _row = self.acquire_row_lock(id).await?;
        let mut tables = self.tables.lock().await;
        let row = tables
            .workflows
            .get_mut(&id)
            .ok_or(StoreError::WorkflowNotFound(id))?;
        row.apply(&patch);
        Ok(row.clone())
    }

    async fn load_job(
        &self,
        workflow_id: WorkflowId,
        job_id: &JobId,
    ) -> Result<JobRecord, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .jobs
            .get(&workflow_id)
            .and_then(|jobs| jobs.get(job_id))
            .cloned()
            .ok_or_else(|| StoreError::JobNotFound {
                workflow_id,
                job_id: job_id.clone(),
            })
    }

    async fn load_jobs(&self, workflow_id: WorkflowId) -> Result<Vec<JobRecord>, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .jobs
            .get(&workflow_id)
            .map(|jobs| jobs.values().cloned().collect())
            .ok_or(StoreError::WorkflowNotFound(workflow_id))
    }

    async fn save_job(&self, job: &JobRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .jobs
            .get_mut(&job.workflow_id)
            .and_then(|jobs| jobs.get_mut(&job.id))
            .ok_or_else(|| StoreError::JobNotFound {
                workflow_id: job.workflow_id,
                job_id: job.id.clone(),
            })?;
        *row = job.clone();
        Ok(())
    }

    async fn lock_workflow(
        &self,
        id: WorkflowId,
    ) -> Result<Box<dyn WorkflowTransaction>, StoreError> {
        let guard = self.acquire_row_lock(id).await?;

        // Re-read under the lock: this is the base for every staged update.
        let workflow = {
            let tables = self.tables.lock().await;
            tables.workflow(id)?.clone()
        };

        Ok(Box::new(InMemoryTransaction {
            _guard: guard,
            tables: Arc::clone(&self.tables),
            workflow,
            patch: WorkflowPatch::default(),
            jobs: Vec::new(),
        }))
    }
}

/// Transaction implementation for InMemoryWorkflowStore.
struct InMemoryTransaction {
    /// Row lock; released when the transaction is committed or dropped.
    _guard: OwnedMutexGuard<()>,
    tables: Arc<Mutex<Tables>>,
    workflow: WorkflowRecord,
    patch: WorkflowPatch,
    jobs: Vec<JobRecord>,
}

#[async_trait]
impl WorkflowTransaction for InMemoryTransaction {
    fn workflow(&self) -> &WorkflowRecord {
        &self.workflow
    }

    fn update_workflow(&mut self, patch: WorkflowPatch) {
        self.workflow.apply(&patch);
        self.patch.merge(patch);
    }

    fn save_job(&mut self, job: JobRecord) {
        self.jobs.push(job);
    }

    async fn commit(self: Box<Self>) -> Result<WorkflowRecord, StoreError> {
        let InMemoryTransaction {
            _guard,
            tables,
            workflow,
            patch,
            jobs,
        } = *self;
        let id = workflow.id;

        let mut tables = tables.lock().await;

        // Check everything first so a failed commit writes nothing.
        tables.workflow(id)?;
        if let Some(missing) = jobs.iter().find(|job| !tables.has_job(job.workflow_id, &job.id)) {
            return Err(StoreError::JobNotFound {
                workflow_id: missing.workflow_id,
                job_id: missing.id.clone(),
            });
        }

        let row = tables
            .workflows
            .get_mut(&id)
            .ok_or(StoreError::WorkflowNotFound(id))?;
        row.apply(&patch);
        let committed = row.clone();

        for job in jobs {
            if let Some(rows) = tables.jobs.get_mut(&job.workflow_id) {
                rows.insert(job.id.clone(), job);
            }
        }

        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use ulid::Ulid;

    fn fixture(job_ids: &[&str]) -> (WorkflowRecord, Vec<JobRecord>) {
        let id = WorkflowId::from_ulid(Ulid::new());
        let workflow = WorkflowRecord::new(id, "test", job_ids.len() as u32, Utc::now());
        let jobs = job_ids
            .iter()
            .map(|job| JobRecord::new(id, JobId::new(*job), Default::default(), false))
            .collect();
        (workflow, jobs)
    }

    fn short_timeout_store() -> InMemoryWorkflowStore {
        InMemoryWorkflowStore::with_config(
            StoreConfig::default_v1().with_lock_timeout(Duration::from_millis(50)),
        )
    }

    #[tokio::test]
    async fn insert_and_load() {
        let store = InMemoryWorkflowStore::new();
        let (workflow, jobs) = fixture(&["a", "b"]);
        let id = workflow.id;
        store.insert_workflow(workflow.clone(), jobs).await.unwrap();

        assert_eq!(store.load_workflow(id).await.unwrap(), workflow);
        assert_eq!(store.load_jobs(id).await.unwrap().len(), 2);
        let b = store.load_job(id, &JobId::new("b")).await.unwrap();
        assert_eq!(b.id, JobId::new("b"));
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = InMemoryWorkflowStore::new();
        let (workflow, jobs) = fixture(&["a"]);
        store.insert_workflow(workflow.clone(), jobs.clone()).await.unwrap();

        let err = store.insert_workflow(workflow, jobs).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn insert_requires_job_count_to_match_rows() {
        let store = InMemoryWorkflowStore::new();
        let (mut workflow, jobs) = fixture(&["a", "b"]);
        let id = workflow.id;
        workflow.job_count = 1;

        let err = store.insert_workflow(workflow, jobs).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));
        assert!(matches!(
            store.load_workflow(id).await,
            Err(StoreError::WorkflowNotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_workflow_is_not_found() {
        let store = InMemoryWorkflowStore::new();
        let id = WorkflowId::from_ulid(Ulid::new());

        assert!(matches!(
            store.load_workflow(id).await,
            Err(StoreError::WorkflowNotFound(_))
        ));
        assert!(matches!(
            store.lock_workflow(id).await.err(),
            Some(StoreError::WorkflowNotFound(_))
        ));
    }

    #[tokio::test]
    async fn commit_applies_staged_changes() {
        let store = InMemoryWorkflowStore::new();
        let (workflow, jobs) = fixture(&["a"]);
        let id = workflow.id;
        store.insert_workflow(workflow, jobs).await.unwrap();

        let mut tx = store.lock_workflow(id).await.unwrap();
        tx.update_workflow(WorkflowPatch {
            jobs_processed: Some(1),
            finished_jobs: Some(vec![JobId::new("a")]),
            ..Default::default()
        });
        let mut job = store.load_job(id, &JobId::new("a")).await.unwrap();
        job.mark_as_finished(Utc::now());
        tx.save_job(job);

        // Staged, not yet visible.
        assert_eq!(tx.workflow().jobs_processed, 1);
        assert_eq!(store.load_workflow(id).await.unwrap().jobs_processed, 0);

        let committed = tx.commit().await.unwrap();
        assert_eq!(committed.jobs_processed, 1);
        assert_eq!(store.load_workflow(id).await.unwrap(), committed);
        assert!(store.load_job(id, &JobId::new("a")).await.unwrap().has_finished());
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back_and_releases_lock() {
        let store = short_timeout_store();
        let (workflow, jobs) = fixture(&["a"]);
        let id = workflow.id;
        store.insert_workflow(workflow, jobs).await.unwrap();

        let mut tx = store.lock_workflow(id).await.unwrap();
        tx.update_workflow(WorkflowPatch {
            jobs_failed: Some(1),
            ..Default::default()
        });
        tx.rollback();

        assert_eq!(store.load_workflow(id).await.unwrap().jobs_failed, 0);
        assert!(store.lock_workflow(id).await.is_ok());
    }

    #[tokio::test]
    async fn second_lock_times_out_while_first_is_held() {
        let store = short_timeout_store();
        let (workflow, jobs) = fixture(&["a"]);
        let id = workflow.id;
        store.insert_workflow(workflow, jobs).await.unwrap();

        let held = store.lock_workflow(id).await.unwrap();
        let err = store.lock_workflow(id).await.err().unwrap();
        assert!(matches!(err, StoreError::LockTimeout { .. }));

        // Plain updates wait on the row lock as well.
        let err = store
            .update_workflow(id, WorkflowPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));

        drop(held);
        assert!(store.lock_workflow(id).await.is_ok());
    }

    #[tokio::test]
    async fn commit_with_unknown_job_writes_nothing() {
        let store = InMemoryWorkflowStore::new();
        let (workflow, jobs) = fixture(&["a"]);
        let id = workflow.id;
        store.insert_workflow(workflow, jobs).await.unwrap();

        let mut tx = store.lock_workflow(id).await.unwrap();
        tx.update_workflow(WorkflowPatch {
            jobs_processed: Some(1),
            ..Default::default()
        });
        tx.save_job(JobRecord::new(id, JobId::new("ghost"), Default::default(), false));

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::JobNotFound { .. }));
        assert_eq!(store.load_workflow(id).await.unwrap().jobs_processed, 0);
    }

    #[tokio::test]
    async fn save_job_requires_existing_row() {
        let store = InMemoryWorkflowStore::new();
        let (workflow, _) = fixture(&[]);
        let id = workflow.id;
        store.insert_workflow(workflow, vec![]).await.unwrap();

        let ghost = JobRecord::new(id, JobId::new("ghost"), Default::default(), false);
        assert!(matches!(
            store.save_job(&ghost).await,
            Err(StoreError::JobNotFound { .. })
        ));
    }
}
