use serde_json::Value;

use steward_kernel::DispatchError;

use crate::config;

use super::{
    BackendAdapter, BackendCapabilities, BackendId, FileMode, InvokeOptions, OperationKind,
    OutputFormat, Specialization,
};

const CAPABILITIES: BackendCapabilities = BackendCapabilities {
    supports_files: true,
    supports_streaming: true,
    supports_sandbox: true,
    supports_json_output: true,
    file_mode: FileMode::CliFlag,
    specialization: Specialization::DeepAnalysis,
};

/// Adapter for the `claude` CLI. Files travel as repeated `--file` flags;
/// the autonomy level maps directly onto `--permission-mode`.
pub struct ClaudeAdapter;

impl BackendAdapter for ClaudeAdapter {
    fn id(&self) -> BackendId {
        BackendId::Claude
    }

    fn capabilities(&self) -> &BackendCapabilities {
        &CAPABILITIES
    }

    fn build_argv(&self, options: &InvokeOptions) -> Vec<String> {
        let binary = config::get_config().backend_binary(BackendId::Claude);
        let mut argv = vec![binary.to_string_lossy().to_string(), "--print".to_string()];

        match options.output_format {
            OutputFormat::Json => {
                argv.push("--output-format".to_string());
                argv.push("json".to_string());
            }
            OutputFormat::Text => {}
        }

        argv.push("--permission-mode".to_string());
        argv.push(permission_mode(options).to_string());

        if options.sandbox {
            argv.push("--sandbox".to_string());
        }

        if let Some(session) = &options.session_id {
            argv.push("--resume".to_string());
            argv.push(session.clone());
        }

        for path in &options.attachments {
            argv.push("--file".to_string());
            argv.push(path.to_string_lossy().to_string());
        }

        argv
    }

    fn prompt_via_stdin(&self) -> bool {
        true
    }

    fn parse_output(&self, raw: &str) -> Result<String, DispatchError> {
        let trimmed = raw.trim();
        // JSON output wraps the text in a result envelope; plain output is
        // passed through as-is.
        if trimmed.starts_with('{')
            && let Ok(value) = serde_json::from_str::<Value>(trimmed)
            && let Some(result) = value.get("result").and_then(Value::as_str)
        {
            return Ok(result.to_string());
        }
        if trimmed.is_empty() {
            return Err(DispatchError::permanent(
                "claude completed without producing output",
            ));
        }
        Ok(trimmed.to_string())
    }

    fn supports_operation(&self, operation: OperationKind) -> bool {
        match operation {
            OperationKind::SessionRestore => true,
            OperationKind::Sandbox => CAPABILITIES.supports_sandbox,
            OperationKind::JsonOutput => CAPABILITIES.supports_json_output,
            OperationKind::Streaming => CAPABILITIES.supports_streaming,
        }
    }
}

fn permission_mode(options: &InvokeOptions) -> &'static str {
    use steward_kernel::AutonomyLevel;
    match options.autonomy {
        AutonomyLevel::ReadOnly | AutonomyLevel::Low => "low",
        AutonomyLevel::Medium => "medium",
        AutonomyLevel::High => "high",
    }
}
