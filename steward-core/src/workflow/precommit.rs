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
use crate::{
    BREAKING_CHANGE_PROMPT, COMMIT_QUALITY_PROMPT, EXTENDED_AUDIT_PROMPT, SECRETS_SCAN_PROMPT,
};

const MAX_DIFF_CHARS: usize = 30_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Depth {
    #[default]
    Quick,
    Thorough,
    Paranoid,
}

impl Depth {
    fn as_str(&self) -> &'static str {
        match self {
            Depth::Quick => "quick",
            Depth::Thorough => "thorough",
            Depth::Paranoid => "paranoid",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PreCommitParams {
    #[serde(default)]
    depth: Depth,
}

#[derive(Clone, Copy)]
struct Check {
    label: &'static str,
    prompt: &'static str,
    /// Findings from blocking checks fail the validation; the rest warn.
    blocking: bool,
}

const SECRETS_CHECK: Check = Check {
    label: "secrets",
    prompt: SECRETS_SCAN_PROMPT,
    blocking: true,
};
const QUALITY_CHECK: Check = Check {
    label: "quality",
    prompt: COMMIT_QUALITY_PROMPT,
    blocking: false,
};
const BREAKING_CHECK: Check = Check {
    label: "breaking",
    prompt: BREAKING_CHANGE_PROMPT,
    blocking: true,
};
const EXTENDED_CHECK: Check = Check {
    label: "extended",
    prompt: EXTENDED_AUDIT_PROMPT,
    blocking: false,
};

/// pre-commit-validate: scan the staged diff at the requested depth.
/// Empty staging passes immediately without touching a backend.
pub(super) async fn run(
    params: serde_json::Value,
    level: AutonomyLevel,
    scope: &PermissionScope,
    progress: Option<&ProgressHook>,
    deps: &Dependencies,
    ctx: &mut WorkflowContext,
) -> Result<(String, serde_json::Value), DispatchError> {
    let params: PreCommitParams = super::parse_workflow_params(params)?;

    deps.permissions
        .git(scope)
        .assert_read(level, "staged")
        .await?;

    let root = config::get_config().project_root;
    let reader = GitReader::open(&root)
        .map_err(|err| DispatchError::validation(err.to_string()))?;
    let mut diff = reader
        .staged_diff()
        .map_err(|err| DispatchError::validation(err.to_string()))?;

    if diff.trim().is_empty() {
        return Ok((
            "# Pre-commit validation: PASS\n\nNothing is staged.\n".to_string(),
            json!({ "verdict": "pass", "depth": params.depth.as_str(), "checks": 0 }),
        ));
    }
    if diff.chars().count() > MAX_DIFF_CHARS {
        diff = diff.chars().take(MAX_DIFF_CHARS).collect();
        diff.push_str("\n[diff truncated]\n");
    }

    ctx.set("depth", json!(params.depth.as_str()));

    let checks: Vec<Check> = match params.depth {
        Depth::Quick => vec![SECRETS_CHECK],
        Depth::Thorough => vec![SECRETS_CHECK, QUALITY_CHECK, BREAKING_CHECK],
        Depth::Paranoid => vec![SECRETS_CHECK, QUALITY_CHECK, BREAKING_CHECK, EXTENDED_CHECK],
    };

    if let Some(hook) = progress {
        hook.send(
            "pre-commit",
            &format!("{} checks at depth {}", checks.len(), params.depth.as_str()),
        )
        .await;
    }

    let backends = executor::select_parallel_backends(
        deps,
        &[BackendId::Gemini, BackendId::Claude, BackendId::Codex],
        checks.len().min(3),
    )
    .await;
    if backends.is_empty() {
        return Err(DispatchError::transient(
            "no backends are available for pre-commit validation",
        ));
    }

    let build = |backend: BackendId, check: &Check| {
        let mut options = InvokeOptions::new(
            backend,
            format!("{}\n\n```diff\n{diff}\n```", check.prompt.trim()),
        );
        options.autonomy = level;
        options
    };

    // Round-robin the checks over however many distinct backends were
    // available; at thorough depth that is one backend per check.
    let mut slots: [Option<(Check, InvokeOptions)>; 4] = [None, None, None, None];
    for (index, check) in checks.iter().enumerate() {
        let backend = backends[index % backends.len()];
        slots[index] = Some((*check, build(backend, check)));
    }

    let run_slot = |slot: Option<(Check, InvokeOptions)>| async move {
        match slot {
            Some((check, options)) => Some((
                check,
                executor::execute(options, scope, progress.cloned(), deps).await,
            )),
            None => None,
        }
    };
    let [slot0, slot1, slot2, slot3] = slots;
    let (first, second, third, fourth) = tokio::join!(
        run_slot(slot0),
        run_slot(slot1),
        run_slot(slot2),
        run_slot(slot3)
    );

    let mut blocking_findings: Vec<String> = Vec::new();
    let mut advisory_findings: Vec<String> = Vec::new();
    let mut unavailable: Vec<&'static str> = Vec::new();

    for (check, outcome) in [first, second, third, fourth].into_iter().flatten() {
        match outcome {
            Ok(result) => {
                ctx.append(
                    "checks",
                    json!({ "check": check.label, "text": result.text }),
                );
                for finding in findings(&result.text) {
                    let tagged = format!("[{}] {finding}", check.label);
                    if check.blocking {
                        blocking_findings.push(tagged);
                    } else {
                        advisory_findings.push(tagged);
                    }
                }
            }
            Err(error) => {
                logging::warn(
                    LogCategory::Workflow,
                    format!("pre-commit check {} failed: {error}", check.label),
                );
                unavailable.push(check.label);
            }
        }
    }

    let verdict = if !blocking_findings.is_empty() {
        "fail"
    } else if !advisory_findings.is_empty() || !unavailable.is_empty() {
        "warn"
    } else {
        "pass"
    };

    let mut text = format!(
        "# Pre-commit validation: {}\n\nDepth: {}\n",
        verdict.to_uppercase(),
        params.depth.as_str()
    );
    if !blocking_findings.is_empty() {
        text.push_str("\n## Blocking findings\n");
        for finding in &blocking_findings {
            text.push_str(&format!("- {finding}\n"));
        }
    }
    if !advisory_findings.is_empty() {
        text.push_str("\n## Advisory findings\n");
        for finding in &advisory_findings {
            text.push_str(&format!("- {finding}\n"));
        }
    }
    if !unavailable.is_empty() {
        text.push_str(&format!(
            "\nChecks skipped (backend unavailable): {}\n",
            unavailable.join(", ")
        ));
    }

    let metadata = json!({
        "verdict": verdict,
        "depth": params.depth.as_str(),
        "checks": checks.len(),
        "blocking": blocking_findings,
        "advisory": advisory_findings,
        "unavailable": unavailable,
    });

    Ok((text, metadata))
}

/// Non-PASS lines of a check's output are its findings.
fn findings(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim().trim_start_matches(['-', '*', ' ']))
        .filter(|line| !line.is_empty() && !line.eq_ignore_ascii_case("pass"))
        .map(str::to_string)
        .collect()
}
