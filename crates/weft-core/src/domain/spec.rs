//! Input specs for a workflow (Workflow / Step).
//!
//! A spec is what an orchestrator registers; it is validated once and then
//! turned into a `WorkflowRecord` plus one `JobRecord` per step.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::dependency::DependencyGraph;
use super::ids::JobId;

/// DefinitionError はワークフロー定義の検証エラー
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("workflow has no steps")]
    Empty,

    #[error("duplicate step id: {0}")]
    DuplicateStep(JobId),

    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: JobId, dependency: JobId },

    #[error("dependency cycle between steps: {0:?}")]
    Cycle(Vec<JobId>),

    #[error("could not parse workflow spec: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A workflow is the unit of registration / cancellation / status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    pub steps: Vec<StepSpec>,
}

/// One node in the DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: JobId,

    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub dependencies: BTreeSet<JobId>,

    /// Requires explicit release before it may run.
    #[serde(default)]
    pub manual: bool,
}

impl WorkflowSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    pub fn job_count(&self) -> usize {
        self.steps.len()
    }

    /// Fail-fast validation: ids unique, dependencies known, graph acyclic.
    pub fn validate(&self) -> Result<DependencyGraph, DefinitionError> {
        if self.steps.is_empty() {
            return Err(DefinitionError::Empty);
        }

        let mut seen = HashSet::with_capacity(self.steps.len());
        for step in &self.steps {
            if !seen.insert(&step.id) {
                return Err(DefinitionError::DuplicateStep(step.id.clone()));
            }
        }

        let mut graph = DependencyGraph::new();
        for step in &self.steps {
            graph.add_job(step.id.clone());
            for dependency in &step.dependencies {
                if !seen.contains(dependency) {
                    return Err(DefinitionError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
                graph.add_dependency(step.id.clone(), dependency.clone());
            }
        }

        graph.topological_order().map_err(DefinitionError::Cycle)?;
        Ok(graph)
    }
}

impl StepSpec {
    pub fn new(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            dependencies: BTreeSet::new(),
            manual: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<JobId>) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }

    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> WorkflowSpec {
        WorkflowSpec::new("abc")
            .step(StepSpec::new("a"))
            .step(StepSpec::new("b").depends_on("a"))
            .step(StepSpec::new("c").depends_on("a").depends_on("b"))
    }

    #[test]
    fn valid_spec_builds_graph() {
        let graph = abc().validate().unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.dependents_of(&JobId::new("a")).len(), 2);
    }

    #[test]
    fn empty_spec_is_rejected() {
        let err = WorkflowSpec::new("empty").validate().unwrap_err();
        assert!(matches!(err, DefinitionError::Empty));
    }

    #[test]
    fn duplicate_step_is_rejected() {
        let spec = abc().step(StepSpec::new("a"));
        let err = spec.validate().unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateStep(id) if id.as_str() == "a"));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let spec = abc().step(StepSpec::new("d").depends_on("missing"));
        let err = spec.validate().unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::UnknownDependency { dependency, .. } if dependency.as_str() == "missing"
        ));
    }

    #[test]
    fn cycle_is_rejected() {
        let spec = WorkflowSpec::new("loop")
            .step(StepSpec::new("a").depends_on("b"))
            .step(StepSpec::new("b").depends_on("a"));
        assert!(matches!(spec.validate(), Err(DefinitionError::Cycle(_))));
    }

    #[test]
    fn spec_from_json_uses_defaults() {
        let json = r#"
        {
          "name": "release",
          "steps": [
            { "id": "build" },
            { "id": "approve", "dependencies": ["build"], "manual": true }
          ]
        }"#;
        let spec = WorkflowSpec::from_json(json).unwrap();

        assert_eq!(spec.job_count(), 2);
        assert!(!spec.steps[0].manual);
        assert!(spec.steps[1].manual);
        assert!(spec.steps[1].dependencies.contains("build"));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = WorkflowSpec::from_json("{").unwrap_err();
        assert!(matches!(err, DefinitionError::Parse(_)));
    }
}
