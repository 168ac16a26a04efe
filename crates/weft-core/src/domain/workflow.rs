//! Workflow record: the DAG aggregate and its counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, WorkflowId};

/// Workflow record: counters and the finished-job set for one DAG run.
///
/// Design: this is a plain row. Counter mutations must go through a locked
/// transaction (`ports::WorkflowTransaction`); an in-memory copy of this
/// record may be stale and is never used as the base of an increment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: WorkflowId,
    pub name: String,

    /// Total number of jobs at creation time. Immutable.
    pub job_count: u32,

    /// Jobs that reached `finished`.
    pub jobs_processed: u32,

    /// Jobs that reached `failed`.
    pub jobs_failed: u32,

    /// Finished job ids in commit order. Readers only rely on membership.
    pub finished_jobs: Vec<JobId>,

    /// Job ids currently counted in `jobs_failed`. Disjoint from `finished_jobs`.
    #[serde(default)]
    pub failed_jobs: Vec<JobId>,

    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl WorkflowRecord {
    pub fn new(
        id: WorkflowId,
        name: impl Into<String>,
        job_count: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            job_count,
            jobs_processed: 0,
            jobs_failed: 0,
            finished_jobs: Vec::new(),
            failed_jobs: Vec::new(),
            created_at,
            finished_at: None,
            cancelled_at: None,
        }
    }

    pub fn all_jobs_have_finished(&self) -> bool {
        self.job_count == self.jobs_processed
    }

    pub fn has_ran(&self) -> bool {
        self.jobs_processed + self.jobs_failed == self.job_count
    }

    pub fn remaining_jobs(&self) -> u32 {
        self.job_count.saturating_sub(self.jobs_processed)
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    /// Jobs that have not reached a terminal outcome yet.
    pub fn outstanding_jobs(&self) -> u32 {
        self.job_count
            .saturating_sub(self.jobs_processed + self.jobs_failed)
    }

    pub fn has_finished_job(&self, job_id: &JobId) -> bool {
        self.finished_jobs.contains(job_id)
    }

    pub fn has_failed_job(&self, job_id: &JobId) -> bool {
        self.failed_jobs.contains(job_id)
    }

    /// Apply a partial update in place. `finished_at` and `cancelled_at` are
    /// write-once: a patch never replaces a timestamp that is already set.
    pub fn apply(&mut self, patch: &WorkflowPatch) {
        if let Some(finished_jobs) = &patch.finished_jobs {
            self.finished_jobs = finished_jobs.clone();
        }
        if let Some(failed_jobs) = &patch.failed_jobs {
            self.failed_jobs = failed_jobs.clone();
        }
        if let Some(jobs_processed) = patch.jobs_processed {
            self.jobs_processed = jobs_processed;
        }
        if let Some(jobs_failed) = patch.jobs_failed {
            self.jobs_failed = jobs_failed;
        }
        if self.finished_at.is_none() {
            self.finished_at = patch.finished_at;
        }
        if self.cancelled_at.is_none() {
            self.cancelled_at = patch.cancelled_at;
        }
    }
}

/// Partial field update of a workflow row. `None` leaves the field untouched.
///
/// Timestamps can only be set, never cleared: cancellation and completion are
/// terminal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPatch {
    pub finished_jobs: Option<Vec<JobId>>,
    pub failed_jobs: Option<Vec<JobId>>,
    pub jobs_processed: Option<u32>,
    pub jobs_failed: Option<u32>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl WorkflowPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Merge `other` on top of `self` (later writes win).
    pub fn merge(&mut self, other: WorkflowPatch) {
        if other.finished_jobs.is_some() {
            self.finished_jobs = other.finished_jobs;
        }
        if other.failed_jobs.is_some() {
            self.failed_jobs = other.failed_jobs;
        }
        if other.jobs_processed.is_some() {
            self.jobs_processed = other.jobs_processed;
        }
        if other.jobs_failed.is_some() {
            self.jobs_failed = other.jobs_failed;
        }
        if other.finished_at.is_some() {
            self.finished_at = other.finished_at;
        }
        if other.cancelled_at.is_some() {
            self.cancelled_at = other.cancelled_at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use ulid::Ulid;

    fn workflow(job_count: u32, processed: u32, failed: u32) -> WorkflowRecord {
        let mut wf = WorkflowRecord::new(
            WorkflowId::from_ulid(Ulid::new()),
            "test",
            job_count,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        wf.jobs_processed = processed;
        wf.jobs_failed = failed;
        wf
    }

    #[rstest]
    #[case(3, 3, 0, true)]
    #[case(3, 2, 1, false)]
    #[case(3, 0, 3, false)]
    #[case(0, 0, 0, true)]
    fn all_jobs_have_finished_ignores_failures(
        #[case] job_count: u32,
        #[case] processed: u32,
        #[case] failed: u32,
        #[case] expected: bool,
    ) {
        assert_eq!(
            workflow(job_count, processed, failed).all_jobs_have_finished(),
            expected
        );
    }

    #[rstest]
    #[case(3, 3, 0, true)]
    #[case(3, 2, 1, true)]
    #[case(3, 0, 3, true)]
    #[case(3, 1, 1, false)]
    fn has_ran_counts_failures(
        #[case] job_count: u32,
        #[case] processed: u32,
        #[case] failed: u32,
        #[case] expected: bool,
    ) {
        assert_eq!(workflow(job_count, processed, failed).has_ran(), expected);
    }

    #[test]
    fn remaining_jobs_ignores_failures() {
        let wf = workflow(5, 2, 1);
        assert_eq!(wf.remaining_jobs(), 3);
        assert_eq!(wf.outstanding_jobs(), 2);
    }

    #[test]
    fn patch_only_touches_given_fields() {
        let mut wf = workflow(3, 1, 0);
        wf.finished_jobs = vec![JobId::new("a")];

        wf.apply(&WorkflowPatch {
            jobs_failed: Some(1),
            ..Default::default()
        });

        assert_eq!(wf.jobs_processed, 1);
        assert_eq!(wf.jobs_failed, 1);
        assert_eq!(wf.finished_jobs, vec![JobId::new("a")]);
        assert!(!wf.is_cancelled());
    }

    #[test]
    fn terminal_timestamps_are_write_once() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
        let mut wf = workflow(1, 1, 0);

        wf.apply(&WorkflowPatch {
            finished_at: Some(t0),
            cancelled_at: Some(t0),
            ..Default::default()
        });
        wf.apply(&WorkflowPatch {
            finished_at: Some(t1),
            cancelled_at: Some(t1),
            ..Default::default()
        });

        assert_eq!(wf.finished_at, Some(t0));
        assert_eq!(wf.cancelled_at, Some(t0));
    }

    #[test]
    fn merged_patch_keeps_latest_values() {
        let mut patch = WorkflowPatch {
            jobs_processed: Some(1),
            ..Default::default()
        };
        patch.merge(WorkflowPatch {
            jobs_processed: Some(2),
            jobs_failed: Some(1),
            ..Default::default()
        });

        assert_eq!(patch.jobs_processed, Some(2));
        assert_eq!(patch.jobs_failed, Some(1));
        assert!(WorkflowPatch::default().is_empty());
        assert!(!patch.is_empty());
    }
}
