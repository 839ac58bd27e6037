pub mod claude;
pub mod codex;
pub mod gemini;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use steward_kernel::{AutonomyLevel, DispatchError};

pub use claude::ClaudeAdapter;
pub use codex::CodexAdapter;
pub use gemini::GeminiAdapter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendId {
    Claude,
    Codex,
    Gemini,
}

impl BackendId {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendId::Claude => "claude",
            BackendId::Codex => "codex",
            BackendId::Gemini => "gemini",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "claude" => Some(Self::Claude),
            "codex" => Some(Self::Codex),
            "gemini" => Some(Self::Gemini),
            _ => None,
        }
    }

    pub fn all() -> &'static [BackendId] {
        &[BackendId::Claude, BackendId::Codex, BackendId::Gemini]
    }

    pub fn default_binary(&self) -> &'static str {
        self.as_str()
    }
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BackendId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| format!("unknown backend `{value}`"))
    }
}

/// What a provider is best at; parallel fan-out picks sets with distinct
/// specializations so the legs complement rather than duplicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Specialization {
    DeepAnalysis,
    CodeGeneration,
    FastScan,
}

/// How a backend accepts files alongside the prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileMode {
    CliFlag,
    EmbedInPrompt,
    Unsupported,
}

impl FileMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileMode::CliFlag => "cli-flag",
            FileMode::EmbedInPrompt => "embed-in-prompt",
            FileMode::Unsupported => "none",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BackendCapabilities {
    pub supports_files: bool,
    pub supports_streaming: bool,
    pub supports_sandbox: bool,
    pub supports_json_output: bool,
    pub file_mode: FileMode,
    pub specialization: Specialization,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    SessionRestore,
    Sandbox,
    JsonOutput,
    Streaming,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Everything the executor needs to run one provider call. The transform
/// step may rewrite `prompt`/`attachments` before argv construction.
#[derive(Clone, Debug)]
pub struct InvokeOptions {
    pub backend: BackendId,
    pub prompt: String,
    pub attachments: Vec<PathBuf>,
    pub output_format: OutputFormat,
    pub sandbox: bool,
    pub autonomy: AutonomyLevel,
    pub auto_approve: bool,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
    /// Set by the transform once attachments have been folded into the
    /// prompt; makes the transform idempotent without string sniffing.
    pub files_embedded: bool,
    pub sanitize: crate::sanitize::SanitizeOptions,
}

impl InvokeOptions {
    pub fn new(backend: BackendId, prompt: impl Into<String>) -> Self {
        Self {
            backend,
            prompt: prompt.into(),
            attachments: Vec::new(),
            output_format: OutputFormat::Text,
            sandbox: false,
            autonomy: AutonomyLevel::ReadOnly,
            auto_approve: false,
            session_id: None,
            request_id: None,
            files_embedded: false,
            sanitize: crate::sanitize::SanitizeOptions::default(),
        }
    }
}

/// A provider adapter: pins the binary, builds argv, and parses stdout.
/// Registered once at startup; lookup is lock-free afterwards.
pub trait BackendAdapter: Send + Sync {
    fn id(&self) -> BackendId;

    fn capabilities(&self) -> &BackendCapabilities;

    /// Full argv including the binary name at position zero.
    fn build_argv(&self, options: &InvokeOptions) -> Vec<String>;

    /// Whether the prompt travels on stdin rather than in argv.
    fn prompt_via_stdin(&self) -> bool;

    fn parse_output(&self, raw: &str) -> Result<String, DispatchError>;

    fn supports_operation(&self, operation: OperationKind) -> bool {
        match operation {
            OperationKind::SessionRestore => false,
            OperationKind::Sandbox => self.capabilities().supports_sandbox,
            OperationKind::JsonOutput => self.capabilities().supports_json_output,
            OperationKind::Streaming => self.capabilities().supports_streaming,
        }
    }
}

static REGISTRY: OnceCell<BTreeMap<BackendId, Arc<dyn BackendAdapter>>> = OnceCell::new();

fn build_registry() -> BTreeMap<BackendId, Arc<dyn BackendAdapter>> {
    let adapters: [Arc<dyn BackendAdapter>; 3] = [
        Arc::new(ClaudeAdapter),
        Arc::new(CodexAdapter),
        Arc::new(GeminiAdapter),
    ];
    adapters
        .into_iter()
        .map(|adapter| (adapter.id(), adapter))
        .collect()
}

pub fn registry() -> &'static BTreeMap<BackendId, Arc<dyn BackendAdapter>> {
    REGISTRY.get_or_init(build_registry)
}

pub fn adapter(backend: BackendId) -> Arc<dyn BackendAdapter> {
    registry()
        .get(&backend)
        .expect("every BackendId variant is registered at startup")
        .clone()
}
