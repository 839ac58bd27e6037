use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde_json::{Value, json};

use steward_core::backends::{BackendId, InvokeOptions, OutputFormat};
use steward_core::deps::Dependencies;
use steward_core::executor;
use steward_core::logging::{self, LogCategory};
use steward_core::permissions::PermissionScope;
use steward_core::process::ProgressHook;
use steward_core::store::{ActivityEvent, ActivityType, FileBucket, SavingsMetric};
use steward_core::workflow;
use steward_kernel::DispatchError;
use steward_kernel::autonomy::AutonomySelector;

/// Host-facing tool registry. Direct-ask tools map one-to-one onto a
/// backend; the workflow tool dispatches into the workflow library.
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
}

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "ask_claude",
        description: "Send a prompt (and optional files) to the claude CLI",
    },
    ToolSpec {
        name: "ask_codex",
        description: "Send a prompt (and optional files) to the codex CLI",
    },
    ToolSpec {
        name: "ask_gemini",
        description: "Send a prompt (and optional files) to the gemini CLI",
    },
    ToolSpec {
        name: "workflow",
        description: "Run a named multi-stage workflow",
    },
];

#[derive(Debug)]
pub struct ToolOutput {
    pub text: String,
    pub metadata: Value,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AskParams {
    prompt: String,
    #[serde(default)]
    files: Vec<String>,
    /// `read-only | low | medium | high | auto`.
    #[serde(default)]
    autonomy: Option<String>,
    /// `text | json`.
    #[serde(default)]
    output_format: Option<String>,
    #[serde(default)]
    sandbox: bool,
    #[serde(default)]
    auto_approve: bool,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkflowParams {
    workflow: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    autonomy: Option<String>,
}

pub async fn handle(
    tool: &str,
    params: Value,
    progress: Option<ProgressHook>,
    deps: &Arc<Dependencies>,
) -> Result<ToolOutput, DispatchError> {
    let start = Instant::now();
    let result = match tool {
        "ask_claude" => ask(BackendId::Claude, params, progress, deps).await,
        "ask_codex" => ask(BackendId::Codex, params, progress, deps).await,
        "ask_gemini" => ask(BackendId::Gemini, params, progress, deps).await,
        "workflow" => run_workflow_tool(params, progress, deps).await,
        unknown => Err(DispatchError::validation(format!(
            "unknown tool `{unknown}`; expected one of: {}",
            TOOLS
                .iter()
                .map(|spec| spec.name)
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    };

    // Workflow runs record their own activity; direct asks are recorded
    // here, post-hoc, failures included.
    if tool != "workflow" {
        let mut event =
            ActivityEvent::new(ActivityType::ToolInvocation, tool, result.is_ok());
        event.duration_ms = start.elapsed().as_millis() as u64;
        if let Err(error) = &result {
            event.error_message = Some(error.to_string());
        }
        if let Err(err) = deps.activity.record(event).await {
            logging::debug(
                LogCategory::Debug,
                format!("failed recording tool activity: {err}"),
            );
        }
    }

    result
}

fn parse_autonomy(raw: Option<&str>) -> Result<AutonomySelector, DispatchError> {
    match raw {
        None => Ok(AutonomySelector::Level(
            steward_kernel::AutonomyLevel::ReadOnly,
        )),
        Some(value) => AutonomySelector::parse(value).ok_or_else(|| {
            DispatchError::validation(format!(
                "unknown autonomy level `{value}`; expected read-only | low | medium | high | auto"
            ))
        }),
    }
}

fn parse_output_format(raw: Option<&str>) -> Result<OutputFormat, DispatchError> {
    match raw {
        None | Some("text") => Ok(OutputFormat::Text),
        Some("json") => Ok(OutputFormat::Json),
        Some(other) => Err(DispatchError::validation(format!(
            "unknown output format `{other}`; expected text | json"
        ))),
    }
}

async fn ask(
    backend: BackendId,
    params: Value,
    progress: Option<ProgressHook>,
    deps: &Arc<Dependencies>,
) -> Result<ToolOutput, DispatchError> {
    let params: AskParams = serde_json::from_value(params)
        .map_err(|err| DispatchError::validation(format!("invalid params: {err}")))?;

    let tool_name = format!("ask_{backend}");
    let selector = parse_autonomy(params.autonomy.as_deref())?;
    let level = match selector {
        AutonomySelector::Level(level) => level,
        // `auto` on a direct ask means the conservative default.
        AutonomySelector::Auto => steward_kernel::AutonomyLevel::ReadOnly,
    };

    suggest_workflow_if_large(&tool_name, &params.files, deps).await;

    let mut options = InvokeOptions::new(backend, params.prompt);
    options.attachments = params.files.iter().map(PathBuf::from).collect();
    options.output_format = parse_output_format(params.output_format.as_deref())?;
    options.sandbox = params.sandbox;
    options.auto_approve = params.auto_approve;
    options.session_id = params.session_id;
    options.autonomy = level;

    let scope = PermissionScope::system(&tool_name);
    let outcome = executor::execute(options, &scope, progress, deps).await?;

    Ok(ToolOutput {
        text: outcome.text,
        metadata: json!({
            "backend": outcome.backend.as_str(),
            "duration_ms": outcome.duration_ms as u64,
            "attempts": outcome.attempts,
            "fell_back": outcome.fell_back,
            "warnings": outcome.warnings,
        }),
    })
}

async fn run_workflow_tool(
    params: Value,
    progress: Option<ProgressHook>,
    deps: &Arc<Dependencies>,
) -> Result<ToolOutput, DispatchError> {
    let params: WorkflowParams = serde_json::from_value(params)
        .map_err(|err| DispatchError::validation(format!("invalid params: {err}")))?;
    let selector = match params.autonomy.as_deref() {
        None => AutonomySelector::Auto,
        Some(value) => AutonomySelector::parse(value).ok_or_else(|| {
            DispatchError::validation(format!("unknown autonomy level `{value}`"))
        })?,
    };

    let outcome =
        workflow::run_workflow(&params.workflow, params.params, selector, progress, deps).await?;

    Ok(ToolOutput {
        text: outcome.text,
        metadata: json!({
            "workflow": outcome.workflow,
            "duration_ms": outcome.duration_ms as u64,
            "details": outcome.metadata,
        }),
    })
}

/// When a direct ask drags in a large file set, record that routing the
/// request through a review workflow would have been cheaper.
async fn suggest_workflow_if_large(tool: &str, files: &[String], deps: &Arc<Dependencies>) {
    if files.is_empty() {
        return;
    }
    let root = steward_core::config::get_config().project_root;
    let total_lines: usize = files
        .iter()
        .filter_map(|file| std::fs::read_to_string(root.join(file)).ok())
        .map(|contents| contents.lines().count())
        .sum();
    let bucket = FileBucket::from_line_count(total_lines);
    if bucket < FileBucket::Large {
        return;
    }

    // Rough provider-token estimate: a workflow fans out once instead of
    // re-sending the files per follow-up ask.
    let estimated_savings = (total_lines as i64) * 3;
    let metric = SavingsMetric::new("workflow:parallel-review", estimated_savings, bucket);
    if let Err(err) = deps.tokens.record(metric).await {
        logging::debug(
            LogCategory::Debug,
            format!("failed recording savings metric for {tool}: {err}"),
        );
    }
}
