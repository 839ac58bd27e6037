use serde_json::Value;

use steward_kernel::DispatchError;

use crate::config;

use super::{
    BackendAdapter, BackendCapabilities, BackendId, FileMode, InvokeOptions, OutputFormat,
    Specialization,
};

const CAPABILITIES: BackendCapabilities = BackendCapabilities {
    supports_files: false,
    supports_streaming: false,
    supports_sandbox: false,
    supports_json_output: true,
    file_mode: FileMode::Unsupported,
    specialization: Specialization::FastScan,
};

/// Adapter for the `gemini` CLI. No native file support; the executor
/// downgrades attachments to prompt embedding with a warning. Auto-approve
/// maps onto `--yolo` (production-gated upstream).
pub struct GeminiAdapter;

impl BackendAdapter for GeminiAdapter {
    fn id(&self) -> BackendId {
        BackendId::Gemini
    }

    fn capabilities(&self) -> &BackendCapabilities {
        &CAPABILITIES
    }

    fn build_argv(&self, options: &InvokeOptions) -> Vec<String> {
        let binary = config::get_config().backend_binary(BackendId::Gemini);
        let mut argv = vec![binary.to_string_lossy().to_string()];

        if options.auto_approve {
            argv.push("--yolo".to_string());
        }
        if matches!(options.output_format, OutputFormat::Json) {
            argv.push("--output-format".to_string());
            argv.push("json".to_string());
        }

        argv.push("--prompt".to_string());
        argv.push(options.prompt.clone());
        argv
    }

    fn prompt_via_stdin(&self) -> bool {
        false
    }

    fn parse_output(&self, raw: &str) -> Result<String, DispatchError> {
        let trimmed = raw.trim();
        if trimmed.starts_with('{')
            && let Ok(value) = serde_json::from_str::<Value>(trimmed)
            && let Some(response) = value.get("response").and_then(Value::as_str)
        {
            return Ok(response.to_string());
        }
        if trimmed.is_empty() {
            return Err(DispatchError::permanent(
                "gemini completed without producing output",
            ));
        }
        Ok(trimmed.to_string())
    }
}
