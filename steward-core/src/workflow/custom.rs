use serde::Deserialize;
use serde_json::{Value, json};

use steward_kernel::plan::{ExecutionPlan, OnError, PlanStep, StepKind};
use steward_kernel::{AutonomyLevel, DispatchError, WorkflowContext};

use crate::backends::{BackendId, InvokeOptions};
use crate::config;
use crate::deps::Dependencies;
use crate::executor;
use crate::logging::{self, LogCategory};
use crate::paths;
use crate::permissions::PermissionScope;
use crate::process::ProgressHook;
use crate::vcs::GitReader;

const MAX_FILE_CHARS: usize = 24_000;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CustomParams {
    plan: ExecutionPlan,
}

/// custom: validate a host-supplied execution plan (acyclic, bounded,
/// inside the autonomy envelope) and run its steps in dependency order.
pub(super) async fn run(
    params: Value,
    level: AutonomyLevel,
    scope: &PermissionScope,
    progress: Option<&ProgressHook>,
    deps: &Dependencies,
    ctx: &mut WorkflowContext,
) -> Result<(String, Value), DispatchError> {
    let params: CustomParams = super::parse_workflow_params(params)?;
    let order = params
        .plan
        .validate(level)
        .map_err(|err| DispatchError::validation(err.to_string()))?;

    ctx.set("plan", json!(params.plan.name));
    let mut sections = Vec::new();
    let mut failed_steps: Vec<String> = Vec::new();

    for step_id in &order {
        let step = params
            .plan
            .steps
            .iter()
            .find(|step| &step.id == step_id)
            .expect("validate returned only known step ids");

        deps.permissions
            .assert(scope, level, step.required_operation, &step.id)
            .await?;

        if let Some(hook) = progress {
            hook.send("custom", &format!("step {}", step.id)).await;
        }

        let budget = match step.on_error {
            OnError::Retry => step.max_retries.unwrap_or(0),
            _ => 0,
        };

        let mut outcome = run_step(step, level, scope, progress, deps).await;
        let mut attempts_left = budget;
        while outcome.is_err() && attempts_left > 0 {
            attempts_left -= 1;
            outcome = run_step(step, level, scope, progress, deps).await;
        }

        match outcome {
            Ok(text) => {
                ctx.append("steps", json!({ "step": step.id, "text": text }));
                sections.push(format!("## {}\n\n{}", step.id, text));
            }
            Err(error) => match step.on_error {
                OnError::Continue => {
                    logging::warn(
                        LogCategory::Workflow,
                        format!("step {} failed, continuing: {error}", step.id),
                    );
                    failed_steps.push(step.id.clone());
                    ctx.append(
                        "steps",
                        json!({ "step": step.id, "error": error.message }),
                    );
                    sections.push(format!("## {}\n\n(step failed: {})", step.id, error.message));
                }
                _ => return Err(error),
            },
        }
    }

    let text = format!("# Plan: {}\n\n{}\n", params.plan.name, sections.join("\n\n"));
    let metadata = json!({
        "plan": params.plan.name,
        "steps": order,
        "failed_steps": failed_steps,
    });
    Ok((text, metadata))
}

async fn run_step(
    step: &PlanStep,
    level: AutonomyLevel,
    scope: &PermissionScope,
    progress: Option<&ProgressHook>,
    deps: &Dependencies,
) -> Result<String, DispatchError> {
    match step.kind {
        StepKind::GitRead => {
            let root = config::get_config().project_root;
            let info = GitReader::open(&root)
                .and_then(|reader| reader.info(10))
                .map_err(|err| DispatchError::validation(err.to_string()))?;
            Ok(format!(
                "branch {}; {} staged, {} modified, {} recent commits",
                info.branch,
                info.staged.len(),
                info.modified.len(),
                info.recent_commits.len()
            ))
        }
        StepKind::FileRead => {
            let path = step
                .params
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    DispatchError::validation(format!("step `{}` needs a `path` param", step.id))
                })?;
            let root = config::get_config().project_root;
            let resolved = paths::validate(&root, std::path::Path::new(path))
                .map_err(|err| DispatchError::validation(err.to_string()))?;
            let contents = std::fs::read_to_string(&resolved).map_err(|err| {
                DispatchError::validation(format!("cannot read {}: {err}", resolved.display()))
            })?;
            Ok(contents.chars().take(MAX_FILE_CHARS).collect())
        }
        StepKind::AiAnalysis => {
            let prompt = step
                .params
                .get("prompt")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    DispatchError::validation(format!("step `{}` needs a `prompt` param", step.id))
                })?;
            let backend = step
                .params
                .get("backend")
                .and_then(Value::as_str)
                .and_then(BackendId::parse)
                .unwrap_or_else(|| config::get_config().default_backend);

            let mut options = InvokeOptions::new(backend, prompt.to_string());
            options.autonomy = level;
            let outcome = executor::execute(options, scope, progress.cloned(), deps).await?;
            Ok(outcome.text)
        }
        StepKind::ParallelGroup => {
            let prompts: Vec<String> = step
                .params
                .get("prompts")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            if prompts.is_empty() {
                return Err(DispatchError::validation(format!(
                    "step `{}` needs a non-empty `prompts` array",
                    step.id
                )));
            }

            let backends =
                executor::select_parallel_backends(deps, BackendId::all(), prompts.len().min(3))
                    .await;
            if backends.is_empty() {
                return Err(DispatchError::transient(
                    "no backends available for the parallel group",
                ));
            }

            let mut slots: [Option<InvokeOptions>; 3] = [None, None, None];
            for (index, prompt) in prompts.iter().take(3).enumerate() {
                let mut options =
                    InvokeOptions::new(backends[index % backends.len()], prompt.clone());
                options.autonomy = level;
                slots[index] = Some(options);
            }
            let run_slot = |slot: Option<InvokeOptions>| async move {
                match slot {
                    Some(options) => {
                        Some(executor::execute(options, scope, progress.cloned(), deps).await)
                    }
                    None => None,
                }
            };
            let [slot0, slot1, slot2] = slots;
            let (first, second, third) =
                tokio::join!(run_slot(slot0), run_slot(slot1), run_slot(slot2));

            let mut parts = Vec::new();
            for outcome in [first, second, third].into_iter().flatten() {
                match outcome {
                    Ok(result) => parts.push(result.text),
                    Err(error) => parts.push(format!("(leg failed: {})", error.message)),
                }
            }
            if parts.iter().all(|part| part.starts_with("(leg failed")) {
                return Err(DispatchError::transient(
                    "every leg of the parallel group failed",
                ));
            }
            Ok(parts.join("\n\n"))
        }
    }
}
