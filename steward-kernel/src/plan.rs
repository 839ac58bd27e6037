use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::autonomy::{AutonomyLevel, OperationClass};

pub const MAX_PLAN_STEPS: usize = 20;

/// What a dynamic-workflow step does. The closed set keeps host-supplied
/// plans inside the same permission envelope as the fixed workflows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    AiAnalysis,
    GitRead,
    FileRead,
    ParallelGroup,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::AiAnalysis => "ai_analysis",
            StepKind::GitRead => "git_read",
            StepKind::FileRead => "file_read",
            StepKind::ParallelGroup => "parallel_group",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    #[default]
    Fail,
    Continue,
    Retry,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub kind: StepKind,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub required_operation: OperationClass,
    #[serde(default)]
    pub on_error: OnError,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlanError {
    Empty,
    TooManySteps(usize),
    DuplicateStep(String),
    UnknownDependency { step: String, dependency: String },
    Cycle(Vec<String>),
    OperationNotPermitted { step: String, operation: OperationClass, required: AutonomyLevel },
    RetryWithoutBudget(String),
}

impl std::fmt::Display for PlanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanError::Empty => write!(f, "plan has no steps"),
            PlanError::TooManySteps(count) => {
                write!(f, "plan has {count} steps; the limit is {MAX_PLAN_STEPS}")
            }
            PlanError::DuplicateStep(id) => write!(f, "duplicate step id `{id}`"),
            PlanError::UnknownDependency { step, dependency } => {
                write!(f, "step `{step}` depends on unknown step `{dependency}`")
            }
            PlanError::Cycle(ids) => {
                write!(f, "plan contains a dependency cycle through: {}", ids.join(" -> "))
            }
            PlanError::OperationNotPermitted {
                step,
                operation,
                required,
            } => write!(
                f,
                "step `{step}` requires `{operation}` which needs autonomy `{required}`"
            ),
            PlanError::RetryWithoutBudget(id) => {
                write!(f, "step `{id}` declares on_error=retry without max_retries")
            }
        }
    }
}

impl std::error::Error for PlanError {}

impl ExecutionPlan {
    /// Validate the DAG shape and the permission envelope for a run at
    /// `level`. Returns step ids in a valid execution order.
    pub fn validate(&self, level: AutonomyLevel) -> Result<Vec<String>, PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }
        if self.steps.len() > MAX_PLAN_STEPS {
            return Err(PlanError::TooManySteps(self.steps.len()));
        }

        let mut ids = BTreeSet::new();
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(PlanError::DuplicateStep(step.id.clone()));
            }
        }

        for step in &self.steps {
            for dependency in &step.depends_on {
                if !ids.contains(dependency.as_str()) {
                    return Err(PlanError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }

            if matches!(step.on_error, OnError::Retry) && step.max_retries.is_none() {
                return Err(PlanError::RetryWithoutBudget(step.id.clone()));
            }

            if !level.permits(step.required_operation.required_level()) {
                return Err(PlanError::OperationNotPermitted {
                    step: step.id.clone(),
                    operation: step.required_operation,
                    required: step.required_operation.required_level(),
                });
            }
        }

        self.topological_order()
    }

    // Kahn's algorithm; leftover nodes after the queue drains are the cycle.
    fn topological_order(&self) -> Result<Vec<String>, PlanError> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .steps
            .iter()
            .map(|step| (step.id.as_str(), step.depends_on.len()))
            .collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for step in &self.steps {
            for dependency in &step.depends_on {
                dependents
                    .entry(dependency.as_str())
                    .or_default()
                    .push(step.id.as_str());
            }
        }

        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());

        while let Some(id) = ready.pop() {
            order.push(id.to_string());
            for dependent in dependents.get(id).into_iter().flatten() {
                let degree = in_degree
                    .get_mut(dependent)
                    .expect("dependent ids were collected from the same step set");
                *degree -= 1;
                if *degree == 0 {
                    ready.push(dependent);
                }
            }
        }

        if order.len() == self.steps.len() {
            Ok(order)
        } else {
            let stuck = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            Err(PlanError::Cycle(stuck))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, deps: &[&str]) -> PlanStep {
        PlanStep {
            id: id.to_string(),
            kind: StepKind::GitRead,
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            required_operation: OperationClass::GitRead,
            on_error: OnError::Fail,
            max_retries: None,
            params: BTreeMap::new(),
        }
    }

    fn plan(steps: Vec<PlanStep>) -> ExecutionPlan {
        ExecutionPlan {
            name: "custom".to_string(),
            steps,
        }
    }

    #[test]
    fn valid_dag_orders_dependencies_first() {
        let plan = plan(vec![
            step("synthesize", &["scan", "diff"]),
            step("diff", &[]),
            step("scan", &["diff"]),
        ]);
        let order = plan.validate(AutonomyLevel::ReadOnly).unwrap();
        let position = |id: &str| order.iter().position(|entry| entry == id).unwrap();
        assert!(position("diff") < position("scan"));
        assert!(position("scan") < position("synthesize"));
    }

    #[test]
    fn cycles_are_rejected() {
        let plan = plan(vec![step("a", &["b"]), step("b", &["a"])]);
        assert!(matches!(
            plan.validate(AutonomyLevel::High),
            Err(PlanError::Cycle(_))
        ));
    }

    #[test]
    fn unknown_dependency_and_duplicates_are_rejected() {
        let plan_dup = plan(vec![step("a", &[]), step("a", &[])]);
        assert_eq!(
            plan_dup.validate(AutonomyLevel::High),
            Err(PlanError::DuplicateStep("a".to_string()))
        );

        let plan_missing = plan(vec![step("a", &["ghost"])]);
        assert!(matches!(
            plan_missing.validate(AutonomyLevel::High),
            Err(PlanError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn step_count_is_bounded() {
        let steps = (0..=MAX_PLAN_STEPS)
            .map(|i| step(&format!("s{i}"), &[]))
            .collect();
        assert!(matches!(
            plan(steps).validate(AutonomyLevel::High),
            Err(PlanError::TooManySteps(_))
        ));
    }

    #[test]
    fn every_step_must_fit_the_autonomy_envelope() {
        let mut write = step("write", &[]);
        write.required_operation = OperationClass::WriteFile;
        let plan = plan(vec![write]);
        assert!(matches!(
            plan.validate(AutonomyLevel::ReadOnly),
            Err(PlanError::OperationNotPermitted { .. })
        ));
        assert!(plan.validate(AutonomyLevel::Low).is_ok());
    }

    #[test]
    fn retry_steps_need_a_budget() {
        let mut retry = step("flaky", &[]);
        retry.on_error = OnError::Retry;
        assert_eq!(
            plan(vec![retry.clone()]).validate(AutonomyLevel::High),
            Err(PlanError::RetryWithoutBudget("flaky".to_string()))
        );

        retry.max_retries = Some(2);
        assert!(plan(vec![retry]).validate(AutonomyLevel::High).is_ok());
    }
}
