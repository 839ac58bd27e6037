use std::path::PathBuf;

use serde_json::json;

use steward_kernel::{DispatchError, ErrorKind};

#[cfg(not(feature = "mock_llm"))]
use steward_kernel::classify_provider_failure;

use crate::backends::{
    self, BackendId, FileMode, InvokeOptions, OperationKind, Specialization,
};
use crate::config;
use crate::deps::Dependencies;
use crate::logging::{self, LogCategory};
use crate::paths;
use crate::permissions::PermissionScope;
use crate::process::ProgressHook;
#[cfg(not(feature = "mock_llm"))]
use crate::process::{self, CommandError, CommandRequest};
use crate::retry;
use crate::sanitize;
use crate::store::{ActivityEvent, ActivityType};

pub const FILES_HEADER_PREFIX: &str = "[Files to analyze: ";

#[derive(Clone, Debug)]
pub struct ExecutionOutcome {
    pub text: String,
    pub backend: BackendId,
    pub duration_ms: u128,
    pub attempts: u32,
    pub fell_back: bool,
    pub warnings: Vec<String>,
}

/// Rewrite `options` for `target`: validate attachments against the
/// project root and, when the target cannot take files natively, fold them
/// into the prompt under a bracketed header. Idempotent: options whose
/// files were already embedded are returned unchanged apart from the
/// backend tag.
pub fn transform(
    mut options: InvokeOptions,
    target: BackendId,
) -> Result<InvokeOptions, DispatchError> {
    options.backend = target;

    if options.files_embedded {
        return Ok(options);
    }
    if options.attachments.is_empty() {
        // A prompt arriving pre-embedded from the host counts as
        // transformed; never rewrite it.
        if options.prompt.starts_with(FILES_HEADER_PREFIX) {
            options.files_embedded = true;
        }
        return Ok(options);
    }

    let root = config::get_config().project_root;
    let resolved = paths::validate_all(&root, &options.attachments)
        .map_err(|err| DispatchError::validation(err.to_string()))?;

    let adapter = backends::adapter(target);
    let capabilities = adapter.capabilities();
    match capabilities.file_mode {
        FileMode::CliFlag => {
            options.attachments = resolved;
        }
        FileMode::EmbedInPrompt | FileMode::Unsupported => {
            if capabilities.file_mode == FileMode::Unsupported {
                logging::warn(
                    LogCategory::AiBackend,
                    format!("{target} does not support files; embedding them into the prompt"),
                );
            }
            let listing = resolved
                .iter()
                .map(|path| path.to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            options.prompt = format!("{FILES_HEADER_PREFIX}{listing}]\n\n{}", options.prompt);
            options.attachments.clear();
            options.files_embedded = true;
        }
    }

    Ok(options)
}

/// Drop request knobs the target backend cannot honor, with a warning per
/// dropped knob, instead of passing flags the binary would reject.
fn apply_capability_gate(options: &mut InvokeOptions) -> Vec<String> {
    let adapter = backends::adapter(options.backend);
    let mut warnings = Vec::new();

    if options.session_id.is_some() && !adapter.supports_operation(OperationKind::SessionRestore) {
        options.session_id = None;
        let warning = format!("{} cannot restore sessions; starting fresh", options.backend);
        logging::warn(LogCategory::AiBackend, &warning);
        warnings.push(warning);
    }
    if options.sandbox && !adapter.supports_operation(OperationKind::Sandbox) {
        options.sandbox = false;
        let warning = format!(
            "{} has no sandbox; running without one",
            options.backend
        );
        logging::warn(LogCategory::AiBackend, &warning);
        warnings.push(warning);
    }

    warnings
}

/// Enforce the production auto-approve invariant: unless the config flag
/// explicitly permits it, the knob is dropped with a warning, never passed.
fn apply_production_gate(options: &mut InvokeOptions) -> Option<String> {
    let config = config::get_config();
    if options.auto_approve && config.production && !config.allow_auto_approve_in_production {
        options.auto_approve = false;
        let warning = format!(
            "auto-approve for {} suppressed in production; set allow_auto_approve_in_production to permit it",
            options.backend
        );
        logging::warn(LogCategory::Permission, &warning);
        return Some(warning);
    }
    None
}

#[cfg(not(feature = "mock_llm"))]
fn command_error_to_dispatch(error: CommandError) -> DispatchError {
    match error {
        CommandError::NotAllowed(_)
        | CommandError::UnsafeArgument(_, _)
        | CommandError::CwdOutsideRoot(_) => DispatchError::validation(error.to_string()),
        CommandError::BinaryNotFound(_) => DispatchError::permanent(error.to_string()),
        CommandError::Timeout(_) | CommandError::Spawn(_) | CommandError::Io(_) => {
            DispatchError::transient(error.to_string())
        }
        CommandError::NonZeroExit(code, stderr) => {
            let kind = classify_provider_failure(code, &stderr);
            DispatchError::new(
                kind,
                format!("provider exited with status {code}: {}", stderr.join("; ")),
            )
        }
    }
}

#[cfg(feature = "mock_llm")]
fn forced_error(backend: BackendId) -> Option<DispatchError> {
    let spec = std::env::var("STEWARD_FORCE_BACKEND_ERROR").ok()?;
    for clause in spec.split(',') {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        let (scope, kind) = match clause.split_once('=') {
            Some((backend_name, kind)) => (BackendId::parse(backend_name), kind),
            None => (None, clause),
        };
        if let Some(scoped) = scope
            && scoped != backend
        {
            continue;
        }
        let kind = match kind {
            "transient" => ErrorKind::Transient,
            "quota" => ErrorKind::Quota,
            "permanent" => ErrorKind::Permanent,
            _ => continue,
        };
        return Some(DispatchError::new(
            kind,
            format!("forced mock failure for {backend}"),
        ));
    }
    None
}

async fn invoke_once(
    options: &InvokeOptions,
    progress: Option<&ProgressHook>,
) -> Result<(String, u128), DispatchError> {
    #[cfg(feature = "mock_llm")]
    {
        if let Some(error) = forced_error(options.backend) {
            return Err(error);
        }
        if let Some(hook) = progress {
            hook.send(options.backend.as_str(), "mock backend running")
                .await;
        }
        return Ok((format!("mock response from {}", options.backend), 5));
    }

    #[cfg(not(feature = "mock_llm"))]
    {
        let adapter = backends::adapter(options.backend);
        let argv = adapter.build_argv(options);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| DispatchError::validation("adapter produced an empty argv"))?;

        let config = config::get_config();
        let mut request = CommandRequest::new(
            program.clone(),
            args.to_vec(),
            config.project_root.clone(),
        );
        request.is_provider = true;
        request.timeout = Some(config.command_timeout);
        if adapter.prompt_via_stdin() {
            request.stdin = Some(options.prompt.clone());
        }

        let output = process::run(request, progress.cloned())
            .await
            .map_err(command_error_to_dispatch)?;
        let text = adapter.parse_output(&output.stdout)?;
        Ok((text, output.duration_ms))
    }
}

/// Dispatch one provider call end to end: transform, gate, sanitize,
/// permission-check, breaker, spawn, classify, retry, fall back.
pub async fn execute(
    options: InvokeOptions,
    scope: &PermissionScope,
    progress: Option<ProgressHook>,
    deps: &Dependencies,
) -> Result<ExecutionOutcome, DispatchError> {
    let mut warnings = Vec::new();
    let original_attachments: Vec<PathBuf> = options.attachments.clone();
    let target = options.backend;
    let mut options = transform(options, target)?;

    warnings.extend(apply_capability_gate(&mut options));
    if let Some(warning) = apply_production_gate(&mut options) {
        warnings.push(warning);
    }

    let sanitized = sanitize::sanitize(&options.prompt, options.sanitize).map_err(|err| match err
    {
        sanitize::SanitizeError::Empty => {
            DispatchError::validation("prompt must be non-empty after sanitization")
        }
        blocked @ sanitize::SanitizeError::Blocked(_) => {
            logging::warn(LogCategory::AiBackend, blocked.to_string());
            DispatchError::sanitization(blocked.to_string())
        }
    })?;
    for warning in &sanitized.warnings {
        logging::warn(LogCategory::AiBackend, warning);
    }
    warnings.extend(sanitized.warnings.clone());
    options.prompt = sanitized.text;

    for attachment in &original_attachments {
        deps.permissions
            .files(scope)
            .assert_read(options.autonomy, &attachment.to_string_lossy())
            .await?;
    }

    let fallback = config::get_config().fallback_backend;
    let mut fell_back = false;

    if !deps.breaker.is_available(options.backend).await {
        let switched = match fallback {
            Some(candidate)
                if candidate != options.backend
                    && deps.breaker.is_available(candidate).await =>
            {
                Some(candidate)
            }
            _ => None,
        };
        match switched {
            Some(candidate) => {
                let warning = format!(
                    "{} unavailable (circuit open); falling back to {candidate}",
                    options.backend
                );
                logging::warn(LogCategory::AiBackend, &warning);
                warnings.push(warning);
                options = transform(options, candidate)?;
                fell_back = true;
            }
            None => {
                return Err(DispatchError::transient(format!(
                    "backend {} is unavailable (circuit open) and no fallback is configured",
                    options.backend
                )));
            }
        }
    }

    let mut attempts = 0u32;
    let mut retries = 0u32;

    loop {
        attempts += 1;
        match invoke_once(&options, progress.as_ref()).await {
            Ok((text, duration_ms)) => {
                deps.breaker.on_success(options.backend).await;
                record_usage(deps, options.backend, duration_ms, attempts, true).await;
                return Ok(ExecutionOutcome {
                    text,
                    backend: options.backend,
                    duration_ms,
                    attempts,
                    fell_back,
                    warnings,
                });
            }
            Err(error) => {
                logging::warn(
                    LogCategory::AiBackend,
                    format!("{} attempt {attempts} failed: {error}", options.backend),
                );
                if error.kind.affects_breaker() {
                    deps.breaker.on_failure(options.backend).await;
                }

                if error.kind == ErrorKind::Quota
                    && !fell_back
                    && let Some(candidate) = fallback
                    && candidate != options.backend
                    && deps.breaker.is_available(candidate).await
                {
                    let warning = format!(
                        "{} reported quota exhaustion; falling back to {candidate}",
                        options.backend
                    );
                    logging::warn(LogCategory::AiBackend, &warning);
                    warnings.push(warning);
                    options = transform(options, candidate)?;
                    fell_back = true;
                    retries = 0;
                    continue;
                }

                if let Some(delay) = retry::backoff_delay(error.kind, retries) {
                    retries += 1;
                    tokio::time::sleep(delay).await;
                    continue;
                }

                record_usage(deps, options.backend, 0, attempts, false).await;
                return Err(error);
            }
        }
    }
}

async fn record_usage(
    deps: &Dependencies,
    backend: BackendId,
    duration_ms: u128,
    attempts: u32,
    success: bool,
) {
    let mut event = ActivityEvent::new(
        ActivityType::ToolInvocation,
        format!("ai:{backend}"),
        success,
    );
    event.duration_ms = duration_ms as u64;
    event.metadata = json!({ "backend": backend.as_str(), "attempts": attempts });
    if let Err(err) = deps.activity.record(event).await {
        logging::debug(
            LogCategory::AiBackend,
            format!("failed recording usage metric: {err}"),
        );
    }
}

/// Pick up to `k` available backends with pairwise-distinct
/// specializations, honoring the preference order.
pub async fn select_parallel_backends(
    deps: &Dependencies,
    preferred: &[BackendId],
    k: usize,
) -> Vec<BackendId> {
    let mut selected: Vec<BackendId> = Vec::new();
    let mut specializations: Vec<Specialization> = Vec::new();

    let default_order = BackendId::all();
    let candidates = preferred.iter().chain(default_order.iter());

    for candidate in candidates {
        if selected.len() >= k {
            break;
        }
        if selected.contains(candidate) {
            continue;
        }
        let specialization = backends::adapter(*candidate).capabilities().specialization;
        if specializations.contains(&specialization) {
            continue;
        }
        if deps.breaker.is_available(*candidate).await {
            selected.push(*candidate);
            specializations.push(specialization);
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_kernel::AutonomyLevel;

    fn options_with_files(backend: BackendId, root: &std::path::Path) -> InvokeOptions {
        let mut options = InvokeOptions::new(backend, "Analyze");
        options.attachments = vec![root.join("a.ts"), root.join("b.ts")];
        options.autonomy = AutonomyLevel::ReadOnly;
        options
    }

    fn project_fixture() -> (tempfile::TempDir, std::sync::MutexGuard<'static, ()>) {
        let guard = crate::config::test_lock();
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.ts"), "export const a = 1;\n").unwrap();
        std::fs::write(tmp.path().join("b.ts"), "export const b = 2;\n").unwrap();
        let mut config = crate::config::Config::default();
        config.project_root = tmp.path().to_path_buf();
        config.data_dir = tmp.path().join(".steward");
        crate::config::set_config(config);
        (tmp, guard)
    }

    #[test]
    fn embed_targets_get_the_bracketed_header() {
        let (tmp, _guard) = project_fixture();
        let options = options_with_files(BackendId::Claude, tmp.path());
        let transformed = transform(options, BackendId::Codex).unwrap();

        let root = tmp.path().canonicalize().unwrap();
        let expected_prefix = format!(
            "[Files to analyze: {}, {}]\n\nAnalyze",
            root.join("a.ts").display(),
            root.join("b.ts").display()
        );
        assert_eq!(transformed.prompt, expected_prefix);
        assert!(transformed.attachments.is_empty());
        assert!(transformed.files_embedded);
    }

    #[test]
    fn transform_is_idempotent() {
        let (tmp, _guard) = project_fixture();
        let options = options_with_files(BackendId::Claude, tmp.path());
        let once = transform(options, BackendId::Codex).unwrap();
        let twice = transform(once.clone(), BackendId::Codex).unwrap();
        assert_eq!(once.prompt, twice.prompt);
        assert_eq!(once.attachments, twice.attachments);
    }

    #[test]
    fn cli_flag_targets_keep_attachments() {
        let (tmp, _guard) = project_fixture();
        let options = options_with_files(BackendId::Claude, tmp.path());
        let transformed = transform(options, BackendId::Claude).unwrap();
        assert_eq!(transformed.attachments.len(), 2);
        assert!(!transformed.files_embedded);
        assert_eq!(transformed.prompt, "Analyze");
    }

    #[test]
    fn traversal_attachments_fail_validation() {
        let (_tmp, _guard) = project_fixture();
        let mut options = InvokeOptions::new(BackendId::Claude, "Analyze");
        options.attachments = vec![PathBuf::from("../escape.ts")];
        let err = transform(options, BackendId::Codex).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn pre_embedded_prompts_are_not_rewritten() {
        let (_tmp, _guard) = project_fixture();
        let mut options = InvokeOptions::new(
            BackendId::Codex,
            "[Files to analyze: /p/a.ts]\n\nAnalyze",
        );
        options.attachments.clear();
        let transformed = transform(options, BackendId::Codex).unwrap();
        assert!(transformed.files_embedded);
        assert_eq!(
            transformed.prompt,
            "[Files to analyze: /p/a.ts]\n\nAnalyze"
        );
    }
}
