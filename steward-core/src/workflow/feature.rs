use serde::Deserialize;
use serde_json::json;

use steward_kernel::{AutonomyLevel, DispatchError, WorkflowContext};

use crate::backends::{BackendId, InvokeOptions};
use crate::deps::Dependencies;
use crate::executor;
use crate::permissions::PermissionScope;
use crate::process::ProgressHook;
use crate::{ARCHITECT_ROLE_PROMPT, IMPLEMENTER_ROLE_PROMPT, TESTER_ROLE_PROMPT};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FeatureParams {
    description: String,
    #[serde(default)]
    target_files: Vec<String>,
    #[serde(default = "default_true")]
    include_tests: bool,
    #[serde(default)]
    include_api: bool,
    #[serde(default)]
    include_db: bool,
    #[serde(default)]
    include_ui: bool,
}

fn default_true() -> bool {
    true
}

impl FeatureParams {
    fn scope_line(&self) -> String {
        let mut areas = Vec::new();
        if self.include_api {
            areas.push("API surface");
        }
        if self.include_db {
            areas.push("database schema");
        }
        if self.include_ui {
            areas.push("user interface");
        }
        if self.include_tests {
            areas.push("tests");
        }
        if areas.is_empty() {
            "Scope: core logic only.".to_string()
        } else {
            format!("Scope includes: {}.", areas.join(", "))
        }
    }
}

/// feature-design: run Architect, Implementer, and Tester roles in
/// sequence, each seeing the accumulated output of the previous steps.
pub(super) async fn run(
    params: serde_json::Value,
    level: AutonomyLevel,
    scope: &PermissionScope,
    progress: Option<&ProgressHook>,
    deps: &Dependencies,
    ctx: &mut WorkflowContext,
) -> Result<(String, serde_json::Value), DispatchError> {
    let params: FeatureParams = super::parse_workflow_params(params)?;
    if params.description.trim().is_empty() {
        return Err(DispatchError::validation(
            "feature-design requires a description",
        ));
    }

    let mut brief = format!(
        "Feature request:\n{}\n\n{}",
        params.description.trim(),
        params.scope_line()
    );
    if !params.target_files.is_empty() {
        brief.push_str(&format!(
            "\nFiles expected to change: {}",
            params.target_files.join(", ")
        ));
    }
    ctx.set("brief", json!(brief));

    let roles: &[(&str, &str, BackendId)] = if params.include_tests {
        &[
            ("architect", ARCHITECT_ROLE_PROMPT, BackendId::Claude),
            ("implementer", IMPLEMENTER_ROLE_PROMPT, BackendId::Codex),
            ("tester", TESTER_ROLE_PROMPT, BackendId::Claude),
        ]
    } else {
        &[
            ("architect", ARCHITECT_ROLE_PROMPT, BackendId::Claude),
            ("implementer", IMPLEMENTER_ROLE_PROMPT, BackendId::Codex),
        ]
    };

    let mut sections = Vec::new();
    for (role, role_prompt, backend) in roles {
        if let Some(hook) = progress {
            hook.send("feature-design", &format!("running {role} role")).await;
        }

        // Each role sees the brief plus everything produced so far.
        let mut prompt = format!("{}\n\n{brief}", role_prompt.trim());
        for prior in ctx.get_all("stages") {
            if let (Some(name), Some(text)) = (
                prior.get("role").and_then(serde_json::Value::as_str),
                prior.get("text").and_then(serde_json::Value::as_str),
            ) {
                prompt.push_str(&format!("\n\n## Output of the {name} step\n\n{text}"));
            }
        }

        let mut options = InvokeOptions::new(*backend, prompt);
        options.autonomy = level;
        let outcome = executor::execute(options, scope, progress.cloned(), deps).await?;

        ctx.append(
            "stages",
            json!({ "role": role, "backend": outcome.backend.as_str(), "text": outcome.text }),
        );
        sections.push(format!(
            "## {} ({})\n\n{}",
            capitalize(role),
            outcome.backend,
            outcome.text
        ));
    }

    let text = format!(
        "# Feature design: {}\n\n{}\n",
        first_line(&params.description),
        sections.join("\n\n")
    );
    let metadata = json!({
        "roles": roles.iter().map(|(role, _, _)| *role).collect::<Vec<_>>(),
        "include_tests": params.include_tests,
        "target_files": params.target_files,
    });

    Ok((text, metadata))
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn first_line(value: &str) -> &str {
    value.lines().next().unwrap_or(value).trim()
}
