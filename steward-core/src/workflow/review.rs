use std::path::PathBuf;

use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use steward_kernel::{AutonomyLevel, DispatchError, ErrorKind, WorkflowContext};

use crate::backends::{BackendId, InvokeOptions};
use crate::config;
use crate::deps::Dependencies;
use crate::executor::{self, ExecutionOutcome};
use crate::logging::{self, LogCategory};
use crate::paths;
use crate::permissions::PermissionScope;
use crate::process::ProgressHook;
use crate::workflow::cache::{CachedOutcome, WorkflowCache};
use crate::{
    REVIEW_FOCUS_ALL_PROMPT, REVIEW_FOCUS_ARCHITECTURE_PROMPT, REVIEW_FOCUS_PERFORMANCE_PROMPT,
    REVIEW_FOCUS_SECURITY_PROMPT, REVIEW_SYNTHESIS_PROMPT,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Focus {
    #[default]
    All,
    Security,
    Performance,
    Architecture,
}

impl Focus {
    fn as_str(&self) -> &'static str {
        match self {
            Focus::All => "all",
            Focus::Security => "security",
            Focus::Performance => "performance",
            Focus::Architecture => "architecture",
        }
    }

    fn prompt(&self) -> &'static str {
        match self {
            Focus::All => REVIEW_FOCUS_ALL_PROMPT,
            Focus::Security => REVIEW_FOCUS_SECURITY_PROMPT,
            Focus::Performance => REVIEW_FOCUS_PERFORMANCE_PROMPT,
            Focus::Architecture => REVIEW_FOCUS_ARCHITECTURE_PROMPT,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReviewParams {
    files: Vec<String>,
    #[serde(default)]
    focus: Focus,
}

/// parallel-review: fan the files out to two complementary backends and
/// synthesize their reviews into one. One failing leg degrades to a stub;
/// both failing is fatal with the most severe leg error.
pub(super) async fn run(
    params: serde_json::Value,
    level: AutonomyLevel,
    scope: &PermissionScope,
    progress: Option<&ProgressHook>,
    deps: &Dependencies,
    ctx: &mut WorkflowContext,
) -> Result<(String, serde_json::Value), DispatchError> {
    let params: ReviewParams = super::parse_workflow_params(params)?;
    if params.files.is_empty() {
        return Err(DispatchError::validation(
            "parallel-review requires at least one file",
        ));
    }

    let root = config::get_config().project_root;
    let candidates: Vec<PathBuf> = params.files.iter().map(PathBuf::from).collect();
    let resolved = paths::validate_all(&root, &candidates)
        .map_err(|err| DispatchError::validation(err.to_string()))?;

    for path in &resolved {
        deps.permissions
            .files(scope)
            .assert_read(level, &path.to_string_lossy())
            .await?;
    }

    // Content fingerprint keys the cache so edits invalidate it.
    let mut hasher = Sha256::new();
    for path in &resolved {
        let contents = std::fs::read(path)
            .map_err(|err| DispatchError::validation(format!("cannot read {}: {err}", path.display())))?;
        hasher.update(&contents);
    }
    let fingerprint = format!("{:x}", hasher.finalize());

    let params_key = json!({
        "files": params.files,
        "focus": params.focus.as_str(),
    });
    let cache_key = WorkflowCache::key("parallel-review", &params_key, &fingerprint);
    if config::get_config().cache_enabled
        && let Some(hit) = deps.cache.get(&cache_key)
    {
        let mut metadata = hit.metadata.clone();
        if let Some(object) = metadata.as_object_mut() {
            object.insert("cache_hit".to_string(), json!(true));
        }
        return Ok((hit.text, metadata));
    }

    if let Some(hook) = progress {
        hook.send("review", "selecting backends").await;
    }
    let backends =
        executor::select_parallel_backends(deps, &[BackendId::Claude, BackendId::Codex], 2).await;
    if backends.is_empty() {
        return Err(DispatchError::transient(
            "no review backends are currently available",
        ));
    }

    ctx.set("focus", json!(params.focus.as_str()));
    for path in &resolved {
        ctx.append("files", json!(path.to_string_lossy()));
    }

    let build_options = |backend: BackendId| {
        let mut options = InvokeOptions::new(backend, params.focus.prompt().trim().to_string());
        options.attachments = resolved.clone();
        options.autonomy = level;
        options
    };

    if let Some(hook) = progress {
        hook.send(
            "review",
            &format!(
                "reviewing {} files on {}",
                resolved.len(),
                backends
                    .iter()
                    .map(BackendId::as_str)
                    .collect::<Vec<_>>()
                    .join(" + ")
            ),
        )
        .await;
    }

    let legs: Vec<(BackendId, Result<ExecutionOutcome, DispatchError>)> = match backends.as_slice()
    {
        [only] => {
            let outcome =
                executor::execute(build_options(*only), scope, progress.cloned(), deps).await;
            vec![(*only, outcome)]
        }
        [first, second, ..] => {
            let (left, right) = tokio::join!(
                executor::execute(build_options(*first), scope, progress.cloned(), deps),
                executor::execute(build_options(*second), scope, progress.cloned(), deps),
            );
            vec![(*first, left), (*second, right)]
        }
        [] => unreachable!("empty backend set handled above"),
    };

    let mut inputs = Vec::new();
    let mut failed_legs = Vec::new();
    let mut leg_errors = Vec::new();
    for (backend, outcome) in &legs {
        match outcome {
            Ok(result) => {
                ctx.append("reviews", json!({ "backend": backend.as_str(), "text": result.text }));
                inputs.push(format!("## Review from {backend}\n\n{}", result.text));
            }
            Err(error) => {
                logging::warn(
                    LogCategory::Workflow,
                    format!("review leg {backend} failed: {error}"),
                );
                failed_legs.push(backend.as_str().to_string());
                leg_errors.push(error.kind);
                inputs.push(format!(
                    "## Review from {backend}\n\n(review unavailable: {})",
                    error.message
                ));
            }
        }
    }

    if failed_legs.len() == legs.len() {
        let kind = ErrorKind::most_severe(leg_errors).unwrap_or(ErrorKind::Transient);
        return Err(DispatchError::new(
            kind,
            "all review backends failed".to_string(),
        ));
    }

    if let Some(hook) = progress {
        hook.send("review", "synthesizing").await;
    }
    let synthesis_input = format!(
        "{}\n\n{}",
        REVIEW_SYNTHESIS_PROMPT.trim(),
        inputs.join("\n\n")
    );
    let synth_backend = legs
        .iter()
        .find(|(_, outcome)| outcome.is_ok())
        .map(|(backend, _)| *backend)
        .unwrap_or(BackendId::Claude);
    let mut synth_options = InvokeOptions::new(synth_backend, synthesis_input);
    synth_options.autonomy = level;

    let (text, synthesized) =
        match executor::execute(synth_options, scope, progress.cloned(), deps).await {
            Ok(outcome) => (outcome.text, true),
            Err(error) => {
                // Degrade to the raw legs rather than failing a review we
                // already paid for.
                logging::warn(
                    LogCategory::Workflow,
                    format!("review synthesis failed: {error}"),
                );
                (inputs.join("\n\n"), false)
            }
        };

    let metadata = json!({
        "cache_hit": false,
        "focus": params.focus.as_str(),
        "backends": legs.iter().map(|(backend, _)| backend.as_str()).collect::<Vec<_>>(),
        "failed_legs": failed_legs,
        "synthesized": synthesized,
        "files": resolved.len(),
    });

    if config::get_config().cache_enabled {
        deps.cache.put(
            cache_key,
            CachedOutcome {
                text: text.clone(),
                metadata: metadata.clone(),
            },
        );
    }

    Ok((text, metadata))
}
