//! Job record: one step of a workflow DAG and its state transitions.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::WorkflowError;
use super::ids::{JobId, WorkflowId};
use super::state::JobStatus;

/// Job record: the persisted state of a single step.
///
/// Design:
/// - `status` is the single source of truth for the state machine.
/// - Timestamps are observability metadata and never decide a predicate.
/// - Transitions are pure: the caller supplies `now` and persists the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub workflow_id: WorkflowId,

    /// Human-readable name (defaults to the id).
    pub name: String,

    /// Jobs that must finish before this one may run. Immutable after creation.
    pub dependencies: BTreeSet<JobId>,

    /// Requires an explicit external release before it may run.
    pub manual: bool,

    pub status: JobStatus,

    /// Gate hold; only meaningful for manual jobs in `Pending`.
    pub gated: bool,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub gated_at: Option<DateTime<Utc>>,

    /// Last failure detail. Present iff `failed_at` is set.
    pub exception: Option<String>,
}

impl JobRecord {
    pub fn new(
        workflow_id: WorkflowId,
        id: JobId,
        dependencies: BTreeSet<JobId>,
        manual: bool,
    ) -> Self {
        Self {
            name: id.to_string(),
            id,
            workflow_id,
            dependencies,
            manual,
            status: JobStatus::Pending,
            gated: false,
            started_at: None,
            finished_at: None,
            failed_at: None,
            gated_at: None,
            exception: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn has_finished(&self) -> bool {
        self.status == JobStatus::Finished
    }

    /// Mark as finished. Clears any recorded failure.
    pub fn mark_as_finished(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Finished;
        self.finished_at = Some(now);
        self.failed_at = None;
        self.exception = None;
    }

    pub fn has_failed(&self) -> bool {
        !self.has_finished() && self.status == JobStatus::Failed
    }

    /// Mark as failed with the given failure detail.
    ///
    /// A finished job stays finished: the failure detail is recorded but
    /// `has_failed()` keeps returning false.
    pub fn mark_as_failed(&mut self, now: DateTime<Utc>, exception: impl Into<String>) {
        if !self.has_finished() {
            self.status = JobStatus::Failed;
        }
        self.failed_at = Some(now);
        self.exception = Some(exception.into());
    }

    pub fn is_processing(&self) -> bool {
        self.status == JobStatus::Processing
    }

    /// Start (or restart) the job. Resets any terminal markers and releases the gate.
    pub fn mark_as_processing(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.finished_at = None;
        self.failed_at = None;
        self.exception = None;
        self.started_at = Some(now);
        self.gated = false;
    }

    pub fn is_pending(&self) -> bool {
        !self.is_processing() && !self.has_failed() && !self.has_finished()
    }

    pub fn is_gated(&self) -> bool {
        self.manual && self.is_pending() && self.gated
    }

    /// Hold a manual job until it is released.
    pub fn mark_as_gated(&mut self, now: DateTime<Utc>) -> Result<(), WorkflowError> {
        if !self.manual {
            return Err(WorkflowError::invalid_operation(format!(
                "only manual jobs can be marked as gated (job={})",
                self.id
            )));
        }
        self.gated = true;
        self.gated_at = Some(now);
        Ok(())
    }

    /// Can this job run given the workflow's finished-job set?
    ///
    /// All dependencies must be finished; a gated job never runs.
    pub fn can_run(&self, finished_jobs: &[JobId]) -> bool {
        if self.is_gated() {
            return false;
        }
        self.dependencies
            .iter()
            .all(|dependency| finished_jobs.contains(dependency))
    }

    /// Dependencies that are not yet in `finished_jobs`.
    pub fn unmet_dependencies<'a>(&'a self, finished_jobs: &[JobId]) -> Vec<&'a JobId> {
        self.dependencies
            .iter()
            .filter(|dependency| !finished_jobs.contains(dependency))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rstest::rstest;
    use ulid::Ulid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn job(id: &str, deps: &[&str], manual: bool) -> JobRecord {
        JobRecord::new(
            WorkflowId::from_ulid(Ulid::new()),
            JobId::new(id),
            deps.iter().map(|d| JobId::new(*d)).collect(),
            manual,
        )
    }

    fn ids(items: &[&str]) -> Vec<JobId> {
        items.iter().map(|s| JobId::new(*s)).collect()
    }

    #[test]
    fn new_job_is_pending() {
        let job = job("a", &[], false);
        assert!(job.is_pending());
        assert!(!job.is_processing());
        assert!(!job.has_finished());
        assert!(!job.has_failed());
        assert!(!job.is_gated());
        assert_eq!(job.name, "a");
    }

    #[test]
    fn mark_as_finished_clears_failure() {
        let mut job = job("a", &[], false);
        job.mark_as_processing(t0());
        job.mark_as_failed(t0(), "boom");
        job.mark_as_finished(t0() + Duration::seconds(1));

        assert!(job.has_finished());
        assert!(!job.has_failed());
        assert_eq!(job.failed_at, None);
        assert_eq!(job.exception, None);
        assert_eq!(job.finished_at, Some(t0() + Duration::seconds(1)));
    }

    #[test]
    fn mark_as_finished_twice_keeps_state() {
        let mut job = job("a", &[], false);
        job.mark_as_finished(t0());
        let once = job.clone();
        job.mark_as_finished(t0());
        assert_eq!(job, once);
    }

    #[test]
    fn mark_as_failed_records_exception() {
        let mut job = job("e", &[], false);
        job.mark_as_processing(t0());
        job.mark_as_failed(t0(), "boom");

        assert!(job.has_failed());
        assert!(!job.is_processing());
        assert!(!job.is_pending());
        assert_eq!(job.exception.as_deref(), Some("boom"));
        assert_eq!(job.failed_at, Some(t0()));
    }

    #[test]
    fn failing_a_finished_job_keeps_it_finished() {
        let mut job = job("a", &[], false);
        job.mark_as_finished(t0());
        job.mark_as_failed(t0(), "late failure");

        assert!(job.has_finished());
        assert!(!job.has_failed());
        assert_eq!(job.finished_at, Some(t0()));
        assert_eq!(job.exception.as_deref(), Some("late failure"));
        assert!(job.failed_at.is_some());
    }

    #[test]
    fn mark_as_processing_resets_terminal_markers() {
        let mut job = job("e", &[], false);
        job.mark_as_processing(t0());
        job.mark_as_failed(t0(), "boom");

        let retry_at = t0() + Duration::minutes(1);
        job.mark_as_processing(retry_at);

        assert!(job.is_processing());
        assert!(!job.has_failed());
        assert_eq!(job.exception, None);
        assert_eq!(job.failed_at, None);
        assert_eq!(job.started_at, Some(retry_at));
    }

    #[test]
    fn gating_non_manual_job_is_rejected() {
        let mut job = job("a", &[], false);
        let err = job.mark_as_gated(t0()).unwrap_err();

        assert!(matches!(err, WorkflowError::InvalidOperation(_)));
        assert!(!job.gated);
        assert_eq!(job.gated_at, None);
    }

    #[test]
    fn gated_until_processing() {
        let mut job = job("d", &[], true);
        job.mark_as_gated(t0()).unwrap();
        assert!(job.is_gated());
        assert!(job.is_pending());

        job.mark_as_processing(t0());
        assert!(!job.is_gated());
        assert_eq!(job.gated_at, Some(t0()));
    }

    #[rstest]
    #[case::finished(JobStatus::Finished)]
    #[case::failed(JobStatus::Failed)]
    #[case::processing(JobStatus::Processing)]
    fn not_gated_outside_pending(#[case] status: JobStatus) {
        let mut job = job("d", &[], true);
        job.mark_as_gated(t0()).unwrap();
        job.status = status;
        assert!(!job.is_gated());
    }

    #[rstest]
    #[case::no_deps(&[], &[], true)]
    #[case::missing(&["a"], &[], false)]
    #[case::satisfied(&["a"], &["a"], true)]
    #[case::partial(&["a", "b"], &["a"], false)]
    #[case::superset(&["a", "b"], &["b", "x", "a"], true)]
    fn can_run_requires_all_dependencies(
        #[case] deps: &[&str],
        #[case] finished: &[&str],
        #[case] expected: bool,
    ) {
        let job = job("j", deps, false);
        assert_eq!(job.can_run(&ids(finished)), expected);
    }

    #[test]
    fn gated_job_cannot_run_even_when_dependencies_are_met() {
        let mut job = job("d", &["a"], true);
        job.mark_as_gated(t0()).unwrap();
        assert!(!job.can_run(&ids(&["a"])));
    }

    #[test]
    fn unmet_dependencies_lists_missing_ids() {
        let job = job("c", &["a", "b"], false);
        let unmet = job.unmet_dependencies(&ids(&["a"]));
        assert_eq!(unmet, vec![&JobId::new("b")]);
    }
}
