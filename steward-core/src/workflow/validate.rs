use serde::Deserialize;
use serde_json::json;

use steward_kernel::{AutonomyLevel, DispatchError, WorkflowContext};

use crate::backends::{BackendId, InvokeOptions};
use crate::config;
use crate::deps::Dependencies;
use crate::executor;
use crate::logging::{self, LogCategory};
use crate::permissions::PermissionScope;
use crate::process::ProgressHook;
use crate::vcs::GitReader;
use crate::{COMMIT_QUALITY_PROMPT, COMMIT_QUICK_SCAN_PROMPT};

const MAX_DIFF_CHARS: usize = 20_000;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ValidateParams {
    #[serde(default = "default_commit")]
    commit: String,
}

fn default_commit() -> String {
    "HEAD".to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Verdict {
    Pass,
    Warn,
    Fail,
}

impl Verdict {
    fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Warn => "warn",
            Verdict::Fail => "fail",
        }
    }
}

/// validate-last-commit: fan the commit out to a quality analyzer and a
/// quick scanner, then fold both into a verdict. Analyzer failures
/// degrade to empty findings; the workflow always returns a verdict.
pub(super) async fn run(
    params: serde_json::Value,
    level: AutonomyLevel,
    scope: &PermissionScope,
    progress: Option<&ProgressHook>,
    deps: &Dependencies,
    ctx: &mut WorkflowContext,
) -> Result<(String, serde_json::Value), DispatchError> {
    let params: ValidateParams = super::parse_workflow_params(params)?;

    deps.permissions
        .git(scope)
        .assert_read(level, &params.commit)
        .await?;

    let root = config::get_config().project_root;
    let reader = GitReader::open(&root)
        .map_err(|err| DispatchError::validation(err.to_string()))?;
    let (info, mut diff) = reader
        .commit_details(&params.commit)
        .map_err(|err| DispatchError::validation(err.to_string()))?;
    if diff.chars().count() > MAX_DIFF_CHARS {
        diff = diff.chars().take(MAX_DIFF_CHARS).collect();
        diff.push_str("\n[diff truncated]\n");
    }

    ctx.set("commit", json!(info.id));
    ctx.set("summary", json!(info.summary));

    if let Some(hook) = progress {
        hook.send("validate", &format!("analyzing commit {}", &info.id[..12.min(info.id.len())]))
            .await;
    }

    let commit_block = format!(
        "Commit {} by {}\nSubject: {}\n\n```diff\n{}\n```",
        info.id, info.author, info.summary, diff
    );

    let backends =
        executor::select_parallel_backends(deps, &[BackendId::Claude, BackendId::Gemini], 2).await;
    let quality_backend = backends.first().copied().unwrap_or(BackendId::Claude);
    let scan_backend = backends.get(1).copied().unwrap_or(BackendId::Gemini);

    let build = |backend: BackendId, prompt: &str| {
        let mut options = InvokeOptions::new(
            backend,
            format!("{}\n\n{commit_block}", prompt.trim()),
        );
        options.autonomy = level;
        options
    };

    let (quality, scan) = tokio::join!(
        executor::execute(
            build(quality_backend, COMMIT_QUALITY_PROMPT),
            scope,
            progress.cloned(),
            deps
        ),
        executor::execute(
            build(scan_backend, COMMIT_QUICK_SCAN_PROMPT),
            scope,
            progress.cloned(),
            deps
        ),
    );

    let mut warnings: Vec<String> = Vec::new();
    let mut errors: Vec<String> = Vec::new();
    let mut analyzer_failures = 0usize;

    for (label, outcome) in [("quality", &quality), ("quick-scan", &scan)] {
        match outcome {
            Ok(result) => {
                ctx.append("analyses", json!({ "analyzer": label, "text": result.text }));
                collect_findings(&result.text, &mut warnings, &mut errors);
            }
            Err(error) => {
                // A missing analysis degrades to an empty list, never a
                // failed verdict.
                analyzer_failures += 1;
                logging::warn(
                    LogCategory::Workflow,
                    format!("{label} analyzer failed: {error}"),
                );
            }
        }
    }

    let verdict = if !errors.is_empty() {
        Verdict::Fail
    } else if !warnings.is_empty() || analyzer_failures > 0 {
        Verdict::Warn
    } else {
        Verdict::Pass
    };

    let mut text = format!(
        "# Commit validation: {}\n\nCommit: {} — {}\nVerdict: **{}**\n",
        verdict.as_str().to_uppercase(),
        info.id,
        info.summary,
        verdict.as_str()
    );
    if !errors.is_empty() {
        text.push_str("\n## Errors\n");
        for error in &errors {
            text.push_str(&format!("- {error}\n"));
        }
    }
    if !warnings.is_empty() {
        text.push_str("\n## Warnings\n");
        for warning in &warnings {
            text.push_str(&format!("- {warning}\n"));
        }
    }
    if analyzer_failures > 0 {
        text.push_str(&format!(
            "\n{analyzer_failures} analyzer(s) were unavailable; coverage is partial.\n"
        ));
    }

    let metadata = json!({
        "verdict": verdict.as_str(),
        "commit": info.id,
        "warnings": warnings,
        "errors": errors,
        "analyzer_failures": analyzer_failures,
    });

    Ok((text, metadata))
}

/// Split an analyzer's output into warnings and errors. PASS lines and
/// empty lines carry no findings.
fn collect_findings(output: &str, warnings: &mut Vec<String>, errors: &mut Vec<String>) {
    for line in output.lines() {
        let line = line.trim().trim_start_matches(['-', '*', ' ']);
        if line.is_empty() || line.eq_ignore_ascii_case("pass") {
            continue;
        }
        let lowered = line.to_ascii_lowercase();
        if lowered.starts_with("error") || lowered.contains("[error]") {
            errors.push(line.to_string());
        } else if lowered.starts_with("warning") || lowered.contains("[warn") {
            warnings.push(line.to_string());
        }
    }
}
