use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::json;

use steward_kernel::{AutonomyLevel, DispatchError, WorkflowContext};

use crate::backends::{BackendId, InvokeOptions};
use crate::config;
use crate::deps::Dependencies;
use crate::executor;
use crate::logging::{self, LogCategory};
use crate::paths;
use crate::permissions::PermissionScope;
use crate::process::ProgressHook;
use crate::{BUG_ANALYSIS_PROMPT, BUG_DISCOVERY_PROMPT, BUG_SYNTHESIS_PROMPT};

const MAX_SUSPECTS: usize = 8;
const MAX_LISTING: usize = 200;
const MAX_FILE_CHARS: usize = 24_000;

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "py", "go", "java", "rb", "c", "h", "cpp", "cs", "toml",
    "json", "yaml", "yml",
];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BugHuntParams {
    symptom: String,
    #[serde(default)]
    files: Vec<String>,
}

/// bug-hunt: discover suspect files when none are given, analyze each
/// with a deep backend, re-analyze problematic files together with their
/// referencers, and synthesize a root-cause report.
pub(super) async fn run(
    params: serde_json::Value,
    level: AutonomyLevel,
    scope: &PermissionScope,
    progress: Option<&ProgressHook>,
    deps: &Dependencies,
    ctx: &mut WorkflowContext,
) -> Result<(String, serde_json::Value), DispatchError> {
    let params: BugHuntParams = super::parse_workflow_params(params)?;
    if params.symptom.trim().is_empty() {
        return Err(DispatchError::validation(
            "bug-hunt requires a symptom description",
        ));
    }

    let root = config::get_config().project_root;
    ctx.set("symptom", json!(params.symptom));

    let suspects: Vec<PathBuf> = if params.files.is_empty() {
        discover_suspects(&params.symptom, &root, level, scope, progress, deps).await?
    } else {
        let candidates: Vec<PathBuf> = params.files.iter().map(PathBuf::from).collect();
        paths::validate_all(&root, &candidates)
            .map_err(|err| DispatchError::validation(err.to_string()))?
    };

    if suspects.is_empty() {
        return Ok((
            format!(
                "# Bug hunt\n\nSymptom: {}\n\nNo suspect files could be identified.\n",
                params.symptom
            ),
            json!({ "suspects": 0, "problematic": 0 }),
        ));
    }

    // First pass: per-file deep analysis.
    let mut problematic: Vec<PathBuf> = Vec::new();
    for suspect in &suspects {
        deps.permissions
            .files(scope)
            .assert_read(level, &suspect.to_string_lossy())
            .await?;

        if let Some(hook) = progress {
            hook.send("bug-hunt", &format!("analyzing {}", suspect.display()))
                .await;
        }

        let contents = read_capped(suspect)
            .map_err(|err| DispatchError::validation(err))?;
        let prompt = format!(
            "{}\n\nSymptom: {}\n\nFile `{}`:\n```\n{}\n```",
            BUG_ANALYSIS_PROMPT.trim(),
            params.symptom,
            suspect.display(),
            contents
        );
        let mut options = InvokeOptions::new(BackendId::Claude, prompt);
        options.autonomy = level;

        match executor::execute(options, scope, progress.cloned(), deps).await {
            Ok(outcome) => {
                let is_clear = outcome.text.trim_start().starts_with("CLEAR");
                if !is_clear {
                    problematic.push(suspect.clone());
                }
                ctx.append(
                    "analyses",
                    json!({
                        "file": suspect.to_string_lossy(),
                        "clear": is_clear,
                        "text": outcome.text,
                    }),
                );
            }
            Err(error) => {
                logging::warn(
                    LogCategory::Workflow,
                    format!("analysis of {} failed: {error}", suspect.display()),
                );
                ctx.append(
                    "analyses",
                    json!({
                        "file": suspect.to_string_lossy(),
                        "clear": false,
                        "text": format!("(analysis unavailable: {})", error.message),
                    }),
                );
            }
        }
    }

    // Second pass folds referencers in; if it collapses entirely we fall
    // back to the first-pass picture.
    ctx.checkpoint("first-pass");
    let mut second_pass_attempts = 0usize;
    let mut second_pass_failures = 0usize;

    for file in &problematic {
        let references = find_references(file, &suspects);
        if references.is_empty() {
            continue;
        }
        second_pass_attempts += 1;
        if let Some(hook) = progress {
            hook.send(
                "bug-hunt",
                &format!("re-checking {} with {} referencers", file.display(), references.len()),
            )
            .await;
        }

        let mut sections = Vec::new();
        for reference in &references {
            if let Ok(contents) = read_capped(reference) {
                sections.push(format!("File `{}`:\n```\n{}\n```", reference.display(), contents));
            }
        }
        let prompt = format!(
            "{}\n\nSymptom: {}\n\nThe fault likely involves `{}`. Re-analyze it together with the files that reference it.\n\n{}",
            BUG_ANALYSIS_PROMPT.trim(),
            params.symptom,
            file.display(),
            sections.join("\n\n")
        );
        let mut options = InvokeOptions::new(BackendId::Claude, prompt);
        options.autonomy = level;

        match executor::execute(options, scope, progress.cloned(), deps).await {
            Ok(outcome) => {
                ctx.append(
                    "analyses",
                    json!({
                        "file": file.to_string_lossy(),
                        "pass": "second",
                        "text": outcome.text,
                    }),
                );
            }
            Err(error) => {
                second_pass_failures += 1;
                logging::warn(
                    LogCategory::Workflow,
                    format!("second pass on {} failed: {error}", file.display()),
                );
            }
        }
    }

    // Every second-pass leg failed: discard the partial appends so the
    // synthesis sees a coherent first-pass picture.
    if second_pass_attempts > 0 && second_pass_failures == second_pass_attempts {
        ctx.rollback("first-pass");
    }

    if let Some(hook) = progress {
        hook.send("bug-hunt", "synthesizing root-cause report").await;
    }
    let analyses_block = ctx
        .get_all("analyses")
        .iter()
        .map(|analysis| analysis.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    let synthesis_prompt = format!(
        "{}\n\nSymptom: {}\n\nAnalyses:\n{}",
        BUG_SYNTHESIS_PROMPT.trim(),
        params.symptom,
        analyses_block
    );
    let mut options = InvokeOptions::new(BackendId::Claude, synthesis_prompt);
    options.autonomy = level;
    let report = executor::execute(options, scope, progress.cloned(), deps).await?;

    let metadata = json!({
        "suspects": suspects.len(),
        "problematic": problematic.len(),
        "second_pass_failures": second_pass_failures,
    });
    Ok((report.text, metadata))
}

async fn discover_suspects(
    symptom: &str,
    root: &Path,
    level: AutonomyLevel,
    scope: &PermissionScope,
    progress: Option<&ProgressHook>,
    deps: &Dependencies,
) -> Result<Vec<PathBuf>, DispatchError> {
    if let Some(hook) = progress {
        hook.send("bug-hunt", "discovering suspect files").await;
    }

    let listing = source_listing(root);
    if listing.is_empty() {
        return Ok(Vec::new());
    }

    let prompt = format!(
        "{}\n\nSymptom: {}\n\nRepository files:\n{}",
        BUG_DISCOVERY_PROMPT.trim(),
        symptom,
        listing.join("\n")
    );
    let mut options = InvokeOptions::new(BackendId::Gemini, prompt);
    options.autonomy = level;
    let outcome = executor::execute(options, scope, progress.cloned(), deps).await?;

    let mut suspects = Vec::new();
    for line in outcome.text.lines().take(MAX_SUSPECTS * 2) {
        let candidate = line.trim().trim_start_matches(['-', '*', ' ']);
        if candidate.is_empty() {
            continue;
        }
        if let Ok(resolved) = paths::validate(root, Path::new(candidate)) {
            if !suspects.contains(&resolved) {
                suspects.push(resolved);
            }
        }
        if suspects.len() >= MAX_SUSPECTS {
            break;
        }
    }
    Ok(suspects)
}

/// Shallow repository listing of source files, bounded so the discovery
/// prompt stays small.
fn source_listing(root: &Path) -> Vec<String> {
    let mut listing = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        if listing.len() >= MAX_LISTING {
            break;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || name == "target" || name == "node_modules" {
                continue;
            }
            if path.is_dir() {
                stack.push(path);
            } else if path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| SOURCE_EXTENSIONS.contains(&ext))
                .unwrap_or(false)
                && let Ok(relative) = path.strip_prefix(root)
            {
                listing.push(relative.to_string_lossy().to_string());
                if listing.len() >= MAX_LISTING {
                    break;
                }
            }
        }
    }
    listing.sort();
    listing
}

/// Other suspects that mention this file's stem; a cheap referencer scan
/// that keeps the second pass grounded without a full index.
fn find_references(file: &Path, suspects: &[PathBuf]) -> Vec<PathBuf> {
    let Some(stem) = file.file_stem().and_then(|stem| stem.to_str()) else {
        return Vec::new();
    };
    suspects
        .iter()
        .filter(|candidate| *candidate != file)
        .filter(|candidate| {
            std::fs::read_to_string(candidate)
                .map(|contents| contents.contains(stem))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

fn read_capped(path: &Path) -> Result<String, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|err| format!("cannot read {}: {err}", path.display()))?;
    if contents.chars().count() > MAX_FILE_CHARS {
        let mut capped: String = contents.chars().take(MAX_FILE_CHARS).collect();
        capped.push_str("\n[file truncated]\n");
        Ok(capped)
    } else {
        Ok(contents)
    }
}
