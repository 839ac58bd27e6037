use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::Command,
    sync::mpsc,
    time,
};

use crate::config;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Binaries the runner will execute besides the configured providers.
const BASE_WHITELIST: &[&str] = &["git", "npm", "which"];

/// Argument tokens that fail the shape check for non-provider binaries.
/// Pipes and redirection are harmless without a shell; terminators and
/// traversal segments are not.
const DANGEROUS_TOKENS: &[&str] = &[";", "&", "`"];

#[derive(Clone, Debug)]
pub struct ProgressUpdate {
    pub stage: String,
    pub message: String,
}

/// Streaming hook handed down from the tool surface. Sends are best-effort;
/// a host that stopped listening never blocks the child.
#[derive(Clone)]
pub struct ProgressHook {
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressHook {
    pub fn new(tx: mpsc::Sender<ProgressUpdate>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, stage: &str, message: &str) {
        let _ = self
            .tx
            .send(ProgressUpdate {
                stage: stage.to_string(),
                message: message.to_string(),
            })
            .await;
    }
}

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub program: String,
    pub args: Vec<String>,
    pub project_root: PathBuf,
    pub cwd: PathBuf,
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
    /// Providers get a pass on the argument shape check; their prompts
    /// legitimately contain shell-looking text.
    pub is_provider: bool,
}

impl CommandRequest {
    pub fn new(program: impl Into<String>, args: Vec<String>, project_root: PathBuf) -> Self {
        let cwd = project_root.clone();
        Self {
            program: program.into(),
            args,
            project_root,
            cwd,
            stdin: None,
            timeout: None,
            is_provider: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: Vec<String>,
    pub exit_code: i32,
    pub duration_ms: u128,
}

#[derive(Debug)]
pub enum CommandError {
    NotAllowed(String),
    UnsafeArgument(String, &'static str),
    CwdOutsideRoot(PathBuf),
    BinaryNotFound(PathBuf),
    Spawn(std::io::Error),
    Io(std::io::Error),
    NonZeroExit(i32, Vec<String>),
    Timeout(u64),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::NotAllowed(program) => {
                write!(f, "binary `{program}` is not on the execution whitelist")
            }
            CommandError::UnsafeArgument(arg, token) => {
                write!(f, "argument `{arg}` contains disallowed token `{token}`")
            }
            CommandError::CwdOutsideRoot(path) => {
                write!(
                    f,
                    "working directory `{}` resolves outside the project root",
                    path.display()
                )
            }
            CommandError::BinaryNotFound(path) => {
                write!(f, "command not found: {}", path.display())
            }
            CommandError::Spawn(err) => write!(f, "failed spawning command: {err}"),
            CommandError::Io(err) => write!(f, "I/O error: {err}"),
            CommandError::NonZeroExit(code, lines) => {
                write!(
                    f,
                    "command exited with status {code}; stderr: {}",
                    lines.join("; ")
                )
            }
            CommandError::Timeout(secs) => {
                write!(f, "command exceeded timeout after {secs}s")
            }
        }
    }
}

impl std::error::Error for CommandError {}

impl From<std::io::Error> for CommandError {
    fn from(value: std::io::Error) -> Self {
        CommandError::Io(value)
    }
}

fn program_stem(program: &str) -> String {
    Path::new(program)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| program.to_string())
}

/// Whether `program` may be executed at all. The set is the three provider
/// binaries (after config override) plus the base whitelist.
pub fn is_whitelisted(program: &str) -> bool {
    let stem = program_stem(program);
    if BASE_WHITELIST.contains(&stem.as_str()) {
        return true;
    }

    let config = config::get_config();
    crate::backends::BackendId::all().iter().any(|backend| {
        program_stem(&config.backend_binary(*backend).to_string_lossy()) == stem
    })
}

fn check_argument_shape(args: &[String]) -> Result<(), CommandError> {
    for arg in args {
        for token in DANGEROUS_TOKENS {
            if arg.contains(token) {
                return Err(CommandError::UnsafeArgument(arg.clone(), token));
            }
        }
        if Path::new(arg)
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            return Err(CommandError::UnsafeArgument(arg.clone(), ".."));
        }
    }
    Ok(())
}

fn check_cwd(root: &Path, cwd: &Path) -> Result<PathBuf, CommandError> {
    let canonical_root = root
        .canonicalize()
        .map_err(|_| CommandError::CwdOutsideRoot(root.to_path_buf()))?;
    let resolved = cwd
        .canonicalize()
        .map_err(|_| CommandError::CwdOutsideRoot(cwd.to_path_buf()))?;
    if !resolved.starts_with(&canonical_root) {
        return Err(CommandError::CwdOutsideRoot(cwd.to_path_buf()));
    }
    Ok(resolved)
}

/// Spawn the command without a shell, stream stdout, capture stderr, and
/// enforce the timeout. Resolves with the captured stdout on exit 0.
pub async fn run(
    request: CommandRequest,
    progress: Option<ProgressHook>,
) -> Result<CommandOutput, CommandError> {
    if !is_whitelisted(&request.program) {
        return Err(CommandError::NotAllowed(request.program.clone()));
    }
    if !request.is_provider {
        check_argument_shape(&request.args)?;
    }
    let cwd = check_cwd(&request.project_root, &request.cwd)?;

    let mut command = Command::new(&request.program);
    command.args(&request.args);
    command.current_dir(&cwd);
    command.stdin(Stdio::piped());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            if err.kind() == std::io::ErrorKind::NotFound {
                return Err(CommandError::BinaryNotFound(PathBuf::from(
                    &request.program,
                )));
            }
            return Err(CommandError::Spawn(err));
        }
    };

    let start = Instant::now();
    let stage = program_stem(&request.program);

    // Write the prompt (if any) and close stdin right away so children
    // that read to EOF can make progress.
    if let Some(mut stdin) = child.stdin.take() {
        if let Some(input) = &request.stdin {
            stdin.write_all(input.as_bytes()).await?;
        }
        stdin.shutdown().await?;
    }

    let stdout_handle = child.stdout.take().map(|stdout| {
        let hook = progress.clone();
        let stage = stage.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut buffer = String::new();
            while let Some(line) = lines.next_line().await? {
                if let Some(ref hook) = hook {
                    hook.send(&stage, line.trim()).await;
                }
                buffer.push_str(&line);
                buffer.push('\n');
            }
            Ok::<String, std::io::Error>(buffer)
        })
    });

    let stderr_handle = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Some(line) = lines.next_line().await? {
                let trimmed = line.trim().to_string();
                if !trimmed.is_empty() {
                    collected.push(trimmed);
                }
            }
            Ok::<Vec<String>, std::io::Error>(collected)
        })
    });

    let timeout = request.timeout.unwrap_or(DEFAULT_TIMEOUT);
    let status = match time::timeout(timeout, child.wait()).await {
        Ok(result) => result?,
        Err(_) => {
            let _ = child.kill().await;
            return Err(CommandError::Timeout(timeout.as_secs()));
        }
    };

    let duration_ms = start.elapsed().as_millis();

    let stdout = match stdout_handle {
        Some(handle) => handle.await.unwrap_or_else(|_| Ok(String::new()))?,
        None => String::new(),
    };
    let stderr = match stderr_handle {
        Some(handle) => handle.await.unwrap_or_else(|_| Ok(Vec::new()))?,
        None => Vec::new(),
    };

    if !status.success() {
        return Err(CommandError::NonZeroExit(
            status.code().unwrap_or(-1),
            stderr,
        ));
    }

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code: status.code().unwrap_or(0),
        duration_ms,
    })
}
