pub mod cache;

mod bughunt;
mod custom;
mod feature;
mod precommit;
mod review;
mod session;
mod validate;

use std::future::Future;
use std::time::Instant;

use serde_json::json;

use steward_kernel::autonomy::AutonomySelector;
use steward_kernel::{AutonomyLevel, DispatchError, WorkflowContext};

use crate::deps::Dependencies;
use crate::logging::{self, LogCategory};
use crate::permissions::PermissionScope;
use crate::process::ProgressHook;
use crate::store::{ActivityEvent, ActivityType};

/// The authoritative workflow set, plus the plan-driven escape hatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkflowKind {
    ParallelReview,
    ValidateLastCommit,
    PreCommitValidate,
    BugHunt,
    FeatureDesign,
    InitSession,
    Custom,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::ParallelReview => "parallel-review",
            WorkflowKind::ValidateLastCommit => "validate-last-commit",
            WorkflowKind::PreCommitValidate => "pre-commit-validate",
            WorkflowKind::BugHunt => "bug-hunt",
            WorkflowKind::FeatureDesign => "feature-design",
            WorkflowKind::InitSession => "init-session",
            WorkflowKind::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "parallel-review" => Some(Self::ParallelReview),
            "validate-last-commit" => Some(Self::ValidateLastCommit),
            "pre-commit-validate" => Some(Self::PreCommitValidate),
            "bug-hunt" => Some(Self::BugHunt),
            "feature-design" => Some(Self::FeatureDesign),
            "init-session" => Some(Self::InitSession),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn all() -> &'static [WorkflowKind] {
        &[
            WorkflowKind::ParallelReview,
            WorkflowKind::ValidateLastCommit,
            WorkflowKind::PreCommitValidate,
            WorkflowKind::BugHunt,
            WorkflowKind::FeatureDesign,
            WorkflowKind::InitSession,
            WorkflowKind::Custom,
        ]
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct WorkflowOutcome {
    pub workflow: String,
    pub text: String,
    pub metadata: serde_json::Value,
    pub duration_ms: u128,
}

/// Contextual executor: build a fresh context, hand it to the body, and
/// clear it on the way out whether the body succeeded or not. The body
/// receives the context by value and must hand it back alongside its
/// result so nothing escapes the executor's frame.
pub async fn run_scoped<T, F, Fut>(workflow_name: &str, body: F) -> Result<T, DispatchError>
where
    F: FnOnce(WorkflowContext) -> Fut,
    Fut: Future<Output = (WorkflowContext, Result<T, DispatchError>)>,
{
    let workflow_id = uuid::Uuid::new_v4().to_string();
    let context = WorkflowContext::new(workflow_id.clone(), workflow_name);

    let (mut context, result) = body(context).await;

    let summary = context.summary();
    let status = if result.is_ok() { "ok" } else { "failed" };
    logging::info(
        LogCategory::Workflow,
        format!(
            "workflow {workflow_name} ({workflow_id}) {status}: {} data keys, {} arrays, {} counters",
            summary.data_keys, summary.array_keys, summary.counter_keys
        ),
    );
    context.clear();

    result
}

/// Entry point used by the tool surface: resolve autonomy, run the named
/// workflow inside a scoped context, and record the activity event.
pub async fn run_workflow(
    name: &str,
    params: serde_json::Value,
    autonomy: AutonomySelector,
    progress: Option<ProgressHook>,
    deps: &Dependencies,
) -> Result<WorkflowOutcome, DispatchError> {
    let kind = WorkflowKind::parse(name).ok_or_else(|| {
        DispatchError::validation(format!(
            "unknown workflow `{name}`; expected one of: {}",
            WorkflowKind::all()
                .iter()
                .map(|kind| kind.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })?;
    let level = steward_kernel::autonomy::resolve_autonomy(autonomy, kind.as_str());

    let start = Instant::now();
    let result = run_scoped(kind.as_str(), |mut ctx| async move {
        let scope =
            PermissionScope::system(kind.as_str()).with_workflow_id(ctx.workflow_id.clone());
        let result =
            dispatch(kind, params, level, &scope, progress.as_ref(), deps, &mut ctx).await;
        (ctx, result)
    })
    .await;
    let duration_ms = start.elapsed().as_millis();

    let mut event = ActivityEvent::new(
        ActivityType::WorkflowExecution,
        kind.as_str(),
        result.is_ok(),
    );
    event.duration_ms = duration_ms as u64;
    event.metadata = json!({ "autonomy": level.as_str() });
    if let Err(error) = &result {
        event.error_message = Some(error.to_string());
    }
    if let Err(err) = deps.activity.record(event).await {
        logging::debug(
            LogCategory::Workflow,
            format!("failed recording workflow activity: {err}"),
        );
    }

    result.map(|(text, metadata)| WorkflowOutcome {
        workflow: kind.as_str().to_string(),
        text,
        metadata,
        duration_ms,
    })
}

async fn dispatch(
    kind: WorkflowKind,
    params: serde_json::Value,
    level: AutonomyLevel,
    scope: &PermissionScope,
    progress: Option<&ProgressHook>,
    deps: &Dependencies,
    ctx: &mut WorkflowContext,
) -> Result<(String, serde_json::Value), DispatchError> {
    match kind {
        WorkflowKind::ParallelReview => {
            review::run(params, level, scope, progress, deps, ctx).await
        }
        WorkflowKind::ValidateLastCommit => {
            validate::run(params, level, scope, progress, deps, ctx).await
        }
        WorkflowKind::PreCommitValidate => {
            precommit::run(params, level, scope, progress, deps, ctx).await
        }
        WorkflowKind::BugHunt => bughunt::run(params, level, scope, progress, deps, ctx).await,
        WorkflowKind::FeatureDesign => {
            feature::run(params, level, scope, progress, deps, ctx).await
        }
        WorkflowKind::InitSession => {
            session::run(params, level, scope, progress, deps, ctx).await
        }
        WorkflowKind::Custom => custom::run(params, level, scope, progress, deps, ctx).await,
    }
}

/// Parse a workflow's params bag into its typed form.
pub(crate) fn parse_params<T: serde::de::DeserializeOwned>(
    params: serde_json::Value,
) -> Result<T, DispatchError> {
    let params = if params.is_null() {
        json!({})
    } else {
        params
    };
    serde_json::from_value(params)
        .map_err(|err| DispatchError::validation(format!("invalid workflow params: {err}")))
}

pub(crate) use parse_params as parse_workflow_params;
