//! WorkflowRegistrar - workflow 定義の登録
//!
//! # Fail-fast 設計
//! - register() の時点で定義を検証（空, ID 重複, 未知の依存, 循環）
//! - 不正な定義は store に一切書き込まない
//! - workflow 行と全 job 行は 1 回の store 呼び出しで作成する

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::context::StateContext;
use super::job_state::JobState;
use super::workflow_state::WorkflowState;
use crate::domain::{
    DefinitionError, JobId, JobRecord, StepSpec, WorkflowError, WorkflowId, WorkflowRecord,
    WorkflowSpec,
};
use crate::ports::IdGenerator;

/// Creates workflows from validated `WorkflowSpec`s.
///
/// # 使用例
/// ```ignore
/// let registrar = WorkflowRegistrar::new(ctx, Arc::new(UlidGenerator::new(SystemClock)));
/// let (workflow, jobs) = registrar
///     .register(
///         WorkflowSpec::new("deploy")
///             .step(StepSpec::new("a"))
///             .step(StepSpec::new("b").depends_on("a")),
///     )
///     .await?;
/// ```
pub struct WorkflowRegistrar {
    ctx: StateContext,
    ids: Arc<dyn IdGenerator>,
}

impl WorkflowRegistrar {
    pub fn new(ctx: StateContext, ids: Arc<dyn IdGenerator>) -> Self {
        Self { ctx, ids }
    }

    /// Validate `spec` and persist it.
    ///
    /// Jobs come back in dependency order. Every job starts pending and
    /// ungated; manual jobs are gated later by whoever schedules them.
    pub async fn register(
        &self,
        spec: WorkflowSpec,
    ) -> Result<(WorkflowState, Vec<JobState>), WorkflowError> {
        let graph = spec.validate()?;
        let order = graph.topological_order().map_err(DefinitionError::Cycle)?;
        let job_count = u32::try_from(spec.job_count()).map_err(|_| {
            WorkflowError::invalid_operation(format!(
                "workflow {} has too many steps ({})",
                spec.name,
                spec.job_count()
            ))
        })?;

        let workflow_id = self.ids.generate_workflow_id();
        let now = self.ctx.clock.now();
        let workflow = WorkflowRecord::new(workflow_id, spec.name.clone(), job_count, now);

        let records = job_records(workflow_id, spec, &order)?;

        self.ctx
            .store
            .insert_workflow(workflow.clone(), records.clone())
            .await?;
        info!(
            workflow_id = %workflow_id,
            name = %workflow.name,
            job_count,
            "workflow registered"
        );

        let jobs = records
            .into_iter()
            .map(|record| JobState::new(record, self.ctx.clone()))
            .collect();
        Ok((WorkflowState::new(workflow, self.ctx.clone()), jobs))
    }
}

/// One `JobRecord` per step, in `order`. Every step must appear in `order`
/// exactly once.
fn job_records(
    workflow_id: WorkflowId,
    spec: WorkflowSpec,
    order: &[JobId],
) -> Result<Vec<JobRecord>, WorkflowError> {
    let name = spec.name;
    let mut steps: HashMap<JobId, StepSpec> = spec
        .steps
        .into_iter()
        .map(|step| (step.id.clone(), step))
        .collect();

    let mut records = Vec::with_capacity(order.len());
    for id in order {
        let step = steps.remove(id).ok_or_else(|| {
            WorkflowError::invalid_operation(format!(
                "step {id} of workflow {name} is missing or listed twice"
            ))
        })?;
        let mut record = JobRecord::new(workflow_id, step.id, step.dependencies, step.manual);
        if let Some(step_name) = step.name {
            record = record.with_name(step_name);
        }
        records.push(record);
    }

    if let Some(left_out) = steps.keys().next() {
        return Err(WorkflowError::invalid_operation(format!(
            "step {left_out} of workflow {name} has no place in the dependency order"
        )));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;
    use crate::impls::InMemoryWorkflowStore;
    use crate::ports::{FixedClock, SystemClock, UlidGenerator, WorkflowStore};
    use chrono::{TimeZone, Utc};

    fn registrar() -> (WorkflowRegistrar, Arc<InMemoryWorkflowStore>) {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let store = Arc::new(InMemoryWorkflowStore::new());
        let ctx = StateContext::new(store.clone()).with_clock(Arc::new(clock));
        (
            WorkflowRegistrar::new(ctx, Arc::new(UlidGenerator::new(SystemClock))),
            store,
        )
    }

    fn abcd() -> WorkflowSpec {
        WorkflowSpec::new("abcd")
            .step(StepSpec::new("c").depends_on("a").depends_on("b"))
            .step(StepSpec::new("b").depends_on("a"))
            .step(StepSpec::new("a").named("first"))
            .step(StepSpec::new("d").manual())
    }

    #[tokio::test]
    async fn register_persists_workflow_and_jobs() {
        let (registrar, store) = registrar();

        let (workflow, jobs) = registrar.register(abcd()).await.unwrap();

        assert_eq!(workflow.record().job_count, 4);
        assert_eq!(workflow.record().jobs_processed, 0);
        assert!(!workflow.is_finished());

        let stored = store.load_jobs(workflow.id()).await.unwrap();
        assert_eq!(stored.len(), 4);
        assert_eq!(stored.len() as u32, workflow.record().job_count);
        assert!(jobs.iter().all(|job| job.is_pending() && !job.is_gated()));

        let a = jobs.iter().find(|job| job.id().as_str() == "a").unwrap();
        assert_eq!(a.record().name, "first");
        let d = jobs.iter().find(|job| job.id().as_str() == "d").unwrap();
        assert!(d.record().manual);
    }

    #[tokio::test]
    async fn jobs_come_back_in_dependency_order() {
        let (registrar, _) = registrar();

        let (_, jobs) = registrar.register(abcd()).await.unwrap();
        let order: Vec<&JobId> = jobs.iter().map(|job| job.id()).collect();

        let pos = |id: &str| order.iter().position(|j| j.as_str() == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[tokio::test]
    async fn cyclic_definition_is_rejected() {
        let (registrar, _) = registrar();
        let spec = WorkflowSpec::new("loop")
            .step(StepSpec::new("a").depends_on("b"))
            .step(StepSpec::new("b").depends_on("a"));

        let err = registrar.register(spec).await.unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::InvalidDefinition(DefinitionError::Cycle(_))
        ));
    }

    #[test]
    fn every_step_needs_exactly_one_place_in_the_order() {
        let workflow_id = WorkflowId::from_ulid(Ulid::new());
        let spec = || {
            WorkflowSpec::new("ab")
                .step(StepSpec::new("a"))
                .step(StepSpec::new("b").depends_on("a"))
        };

        let records = job_records(workflow_id, spec(), &[JobId::new("a"), JobId::new("b")]).unwrap();
        assert_eq!(records.len(), 2);

        let left_out = job_records(workflow_id, spec(), &[JobId::new("a")]).unwrap_err();
        assert!(matches!(left_out, WorkflowError::InvalidOperation(_)));

        let unknown = job_records(workflow_id, spec(), &[JobId::new("a"), JobId::new("x")]).unwrap_err();
        assert!(matches!(unknown, WorkflowError::InvalidOperation(_)));

        let twice = job_records(
            workflow_id,
            spec(),
            &[JobId::new("a"), JobId::new("a"), JobId::new("b")],
        )
        .unwrap_err();
        assert!(matches!(twice, WorkflowError::InvalidOperation(_)));
    }
}
