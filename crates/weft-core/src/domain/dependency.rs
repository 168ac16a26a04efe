//! Dependency graph between the steps of a workflow.
//!
//! Design:
//! - Forward edges: job -> jobs it depends on (waits for)
//! - Reverse edges: job -> jobs that depend on it (waiting jobs)
//! - Invariant: edges and reverse_edges must be kept in sync
//!
//! The state machine itself never walks this graph (`JobRecord::can_run` only
//! needs the finished-job set). It is used to validate a definition at
//! registration time and by orchestrators that want dependents / an order.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::domain::JobId;

/// Dependency graph for a single workflow.
///
/// Every registered job is a node, even when it has no edges.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<JobId>,

    /// Forward edges: job -> jobs it depends on
    edges: BTreeMap<JobId, BTreeSet<JobId>>,

    /// Reverse edges: job -> jobs that depend on it
    reverse_edges: BTreeMap<JobId, BTreeSet<JobId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_job(&mut self, job: JobId) {
        self.nodes.insert(job);
    }

    /// Add a dependency: `job` depends on `depends_on` ("job waits for depends_on").
    pub fn add_dependency(&mut self, job: JobId, depends_on: JobId) {
        self.nodes.insert(job.clone());
        self.nodes.insert(depends_on.clone());
        self.edges
            .entry(job.clone())
            .or_default()
            .insert(depends_on.clone());
        self.reverse_edges.entry(depends_on).or_default().insert(job);
    }

    pub fn contains(&self, job: &JobId) -> bool {
        self.nodes.contains(job)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dependencies_of(&self, job: &JobId) -> Vec<&JobId> {
        self.edges
            .get(job)
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// Jobs waiting for `job`.
    ///
    /// Note: returns ALL waiting jobs, even if they have other unmet
    /// dependencies. The caller must check `can_run`.
    pub fn dependents_of(&self, job: &JobId) -> Vec<&JobId> {
        self.reverse_edges
            .get(job)
            .map(|waiting| waiting.iter().collect())
            .unwrap_or_default()
    }

    /// Jobs without dependencies.
    pub fn roots(&self) -> Vec<&JobId> {
        self.nodes
            .iter()
            .filter(|job| self.edges.get(*job).is_none_or(|deps| deps.is_empty()))
            .collect()
    }

    /// Topological order (Kahn's algorithm), dependencies first.
    ///
    /// Returns `Err` with the jobs that are part of (or behind) a cycle.
    pub fn topological_order(&self) -> Result<Vec<JobId>, Vec<JobId>> {
        let mut in_degree: BTreeMap<&JobId, usize> = self
            .nodes
            .iter()
            .map(|job| (job, self.edges.get(job).map_or(0, BTreeSet::len)))
            .collect();

        let mut ready: VecDeque<&JobId> = in_degree
            .iter()
            .filter(|&(_, degree)| *degree == 0)
            .map(|(job, _)| *job)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(job) = ready.pop_front() {
            order.push(job.clone());
            for dependent in self.dependents_of(job) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            let blocked = in_degree
                .into_iter()
                .filter(|&(_, degree)| degree > 0)
                .map(|(job, _)| job.clone())
                .collect();
            Err(blocked)
        }
    }

    pub fn has_cycle(&self) -> bool {
        self.topological_order().is_err()
    }
}
