use serde_json::Value;

use steward_kernel::DispatchError;

use crate::config;

use super::{
    BackendAdapter, BackendCapabilities, BackendId, FileMode, InvokeOptions, OutputFormat,
    Specialization,
};

const CAPABILITIES: BackendCapabilities = BackendCapabilities {
    supports_files: false,
    supports_streaming: true,
    supports_sandbox: true,
    supports_json_output: true,
    file_mode: FileMode::EmbedInPrompt,
    specialization: Specialization::CodeGeneration,
};

/// Adapter for the `codex` CLI. The prompt travels on stdin (`exec -`),
/// files are embedded into the prompt body, and structured output arrives
/// as JSONL events on stdout.
pub struct CodexAdapter;

impl BackendAdapter for CodexAdapter {
    fn id(&self) -> BackendId {
        BackendId::Codex
    }

    fn capabilities(&self) -> &BackendCapabilities {
        &CAPABILITIES
    }

    fn build_argv(&self, options: &InvokeOptions) -> Vec<String> {
        let binary = config::get_config().backend_binary(BackendId::Codex);
        let mut argv = vec![binary.to_string_lossy().to_string(), "exec".to_string()];

        if options.auto_approve {
            // Only reaches argv when the executor's production gate let it
            // through.
            argv.push("--dangerously-bypass-approvals-and-sandbox".to_string());
        } else if options.sandbox {
            argv.push("--sandbox".to_string());
            argv.push("workspace-write".to_string());
        }

        if matches!(options.output_format, OutputFormat::Json) {
            argv.push("--json".to_string());
        }

        argv.push("-".to_string());
        argv
    }

    fn prompt_via_stdin(&self) -> bool {
        true
    }

    fn parse_output(&self, raw: &str) -> Result<String, DispatchError> {
        // JSONL stream: keep the last agent message; fall back to treating
        // the output as plain text when no event parses.
        let mut last_message: Option<String> = None;
        let mut saw_event = false;

        for line in raw.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(event) = serde_json::from_str::<Value>(trimmed) else {
                continue;
            };
            saw_event = true;
            if event.get("type").and_then(Value::as_str) == Some("item.completed")
                && let Some(item) = event.get("item")
                && item.get("type").and_then(Value::as_str) == Some("agent_message")
                && let Some(text) = item.get("text").and_then(Value::as_str)
            {
                last_message = Some(text.to_string());
            }
        }

        if let Some(message) = last_message {
            return Ok(message);
        }
        if saw_event {
            return Err(DispatchError::permanent(
                "codex completed without producing an agent message",
            ));
        }
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DispatchError::permanent(
                "codex completed without producing output",
            ));
        }
        Ok(trimmed.to_string())
    }
}
