use serde::Deserialize;
use serde_json::json;

use steward_kernel::{AutonomyLevel, DispatchError, ErrorKind, WorkflowContext};

use crate::SESSION_CONTEXT_PROMPT;
use crate::backends::{BackendId, InvokeOptions};
use crate::config;
use crate::deps::Dependencies;
use crate::executor;
use crate::logging::{self, LogCategory};
use crate::permissions::PermissionScope;
use crate::process::ProgressHook;
use crate::vcs::GitReader;

const COMMIT_HISTORY_DEPTH: usize = 10;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionParams {}

/// init-session: gather repository state and synthesize a short context
/// report. Read-only; falls back to a second backend when the first
/// synthesis fails.
pub(super) async fn run(
    params: serde_json::Value,
    level: AutonomyLevel,
    scope: &PermissionScope,
    progress: Option<&ProgressHook>,
    deps: &Dependencies,
    ctx: &mut WorkflowContext,
) -> Result<(String, serde_json::Value), DispatchError> {
    let _params: SessionParams = super::parse_workflow_params(params)?;

    deps.permissions
        .git(scope)
        .assert_read(level, "repository")
        .await?;

    if let Some(hook) = progress {
        hook.send("init-session", "gathering repository state").await;
    }

    let root = config::get_config().project_root;
    let info = GitReader::open(&root)
        .and_then(|reader| reader.info(COMMIT_HISTORY_DEPTH))
        .map_err(|err| DispatchError::validation(err.to_string()))?;

    ctx.set("branch", json!(info.branch));
    ctx.set("staged_count", json!(info.staged.len()));
    ctx.set("modified_count", json!(info.modified.len()));

    let mut state = format!("Branch: {}\n", info.branch);
    state.push_str(&format!(
        "Staged files ({}): {}\n",
        info.staged.len(),
        join_or_none(&info.staged)
    ));
    state.push_str(&format!(
        "Modified files ({}): {}\n",
        info.modified.len(),
        join_or_none(&info.modified)
    ));
    state.push_str("Recent commits:\n");
    if info.recent_commits.is_empty() {
        state.push_str("  (none)\n");
    }
    for commit in &info.recent_commits {
        state.push_str(&format!(
            "  {} {} ({})\n",
            &commit.id[..12.min(commit.id.len())],
            commit.summary,
            commit.author
        ));
    }

    if let Some(hook) = progress {
        hook.send("init-session", "synthesizing context report").await;
    }

    let prompt = format!("{}\n\n{state}", SESSION_CONTEXT_PROMPT.trim());
    let primary = config::get_config().default_backend;
    let secondary = BackendId::all()
        .iter()
        .copied()
        .find(|backend| *backend != primary)
        .unwrap_or(primary);

    let build = |backend: BackendId| {
        let mut options = InvokeOptions::new(backend, prompt.clone());
        options.autonomy = level;
        options
    };

    let (text, backend) =
        match executor::execute(build(primary), scope, progress.cloned(), deps).await {
            Ok(outcome) => (outcome.text, outcome.backend),
            Err(first_error) => {
                logging::warn(
                    LogCategory::Workflow,
                    format!("session synthesis on {primary} failed: {first_error}"),
                );
                match executor::execute(build(secondary), scope, progress.cloned(), deps).await {
                    Ok(outcome) => (outcome.text, outcome.backend),
                    Err(second_error) => {
                        let kind = ErrorKind::most_severe([first_error.kind, second_error.kind])
                            .unwrap_or(ErrorKind::Transient);
                        return Err(DispatchError::new(
                            kind,
                            format!(
                                "session synthesis failed on {primary} ({}) and {secondary} ({})",
                                first_error.message, second_error.message
                            ),
                        ));
                    }
                }
            }
        };

    let metadata = json!({
        "branch": info.branch,
        "staged": info.staged.len(),
        "modified": info.modified.len(),
        "commits": info.recent_commits.len(),
        "backend": backend.as_str(),
    });

    Ok((format!("{text}\n\n---\n{state}"), metadata))
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}
