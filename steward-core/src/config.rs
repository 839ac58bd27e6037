use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use lazy_static::lazy_static;
use serde::Deserialize;

use crate::backends::BackendId;

lazy_static! {
    static ref CONFIG: RwLock<Config> = RwLock::new(Config::default());
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Process-wide runtime configuration. Loaded once from the environment
/// with an optional `.steward/config.toml` overlay; read everywhere via
/// `get_config()`.
#[derive(Clone, Debug)]
pub struct Config {
    pub project_root: PathBuf,
    pub data_dir: PathBuf,
    pub production: bool,
    pub allow_auto_approve_in_production: bool,
    pub default_backend: BackendId,
    pub fallback_backend: Option<BackendId>,
    pub backend_binaries: HashMap<BackendId, PathBuf>,
    pub log_level: LogLevel,
    pub echo_logs_to_stderr: bool,
    pub cache_enabled: bool,
    pub command_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let project_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let data_dir = project_root.join(".steward");
        Self {
            project_root,
            data_dir,
            production: false,
            allow_auto_approve_in_production: false,
            default_backend: BackendId::Claude,
            fallback_backend: Some(BackendId::Gemini),
            backend_binaries: HashMap::new(),
            log_level: LogLevel::Info,
            echo_logs_to_stderr: false,
            cache_enabled: true,
            command_timeout: Duration::from_secs(600),
        }
    }
}

impl Config {
    /// Binary name for a backend, honoring the per-backend override.
    pub fn backend_binary(&self, backend: BackendId) -> PathBuf {
        self.backend_binaries
            .get(&backend)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(backend.default_binary()))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// File-level overlay; every field is optional so a partial config.toml
/// only overrides what it names.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    production: Option<bool>,
    allow_auto_approve_in_production: Option<bool>,
    default_backend: Option<String>,
    fallback_backend: Option<String>,
    log_level: Option<String>,
    echo_logs_to_stderr: Option<bool>,
    cache_enabled: Option<bool>,
    command_timeout_secs: Option<u64>,
    #[serde(default)]
    backends: HashMap<String, PathBuf>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    UnknownBackend(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, err) => {
                write!(f, "failed reading config at {}: {}", path.display(), err)
            }
            ConfigError::Parse(path, err) => {
                write!(f, "failed parsing config at {}: {}", path.display(), err)
            }
            ConfigError::UnknownBackend(name) => write!(f, "unknown backend `{name}` in config"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

/// Build a config for `project_root` from the environment, then overlay
/// `.steward/config.toml` when present. Does not install it; callers pass
/// the result to `set_config`.
pub fn load(project_root: &Path) -> Result<Config, ConfigError> {
    let mut config = Config {
        project_root: project_root.to_path_buf(),
        data_dir: std::env::var("STEWARD_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| project_root.join(".steward")),
        ..Config::default()
    };

    if let Some(production) = env_flag("STEWARD_PRODUCTION") {
        config.production = production;
    }
    if let Some(allow) = env_flag("STEWARD_ALLOW_AUTO_APPROVE") {
        config.allow_auto_approve_in_production = allow;
    }
    if let Some(echo) = env_flag("STEWARD_ECHO_LOGS") {
        config.echo_logs_to_stderr = echo;
    }
    if let Ok(level) = std::env::var("STEWARD_LOG")
        && let Some(parsed) = LogLevel::parse(&level)
    {
        config.log_level = parsed;
    }
    for backend in BackendId::all() {
        let var = format!("STEWARD_{}_BIN", backend.as_str().to_ascii_uppercase());
        if let Ok(bin) = std::env::var(&var) {
            config.backend_binaries.insert(*backend, PathBuf::from(bin));
        }
    }

    let file_path = config.data_dir.join("config.toml");
    if file_path.is_file() {
        let contents = std::fs::read_to_string(&file_path)
            .map_err(|err| ConfigError::Io(file_path.clone(), err))?;
        let overlay: ConfigFile = toml::from_str(&contents)
            .map_err(|err| ConfigError::Parse(file_path.clone(), err))?;
        apply_overlay(&mut config, overlay)?;
    }

    Ok(config)
}

fn apply_overlay(config: &mut Config, overlay: ConfigFile) -> Result<(), ConfigError> {
    if let Some(production) = overlay.production {
        config.production = production;
    }
    if let Some(allow) = overlay.allow_auto_approve_in_production {
        config.allow_auto_approve_in_production = allow;
    }
    if let Some(name) = overlay.default_backend {
        config.default_backend =
            BackendId::parse(&name).ok_or(ConfigError::UnknownBackend(name))?;
    }
    if let Some(name) = overlay.fallback_backend {
        if name.eq_ignore_ascii_case("none") {
            config.fallback_backend = None;
        } else {
            config.fallback_backend =
                Some(BackendId::parse(&name).ok_or(ConfigError::UnknownBackend(name))?);
        }
    }
    if let Some(level) = overlay.log_level
        && let Some(parsed) = LogLevel::parse(&level)
    {
        config.log_level = parsed;
    }
    if let Some(echo) = overlay.echo_logs_to_stderr {
        config.echo_logs_to_stderr = echo;
    }
    if let Some(enabled) = overlay.cache_enabled {
        config.cache_enabled = enabled;
    }
    if let Some(secs) = overlay.command_timeout_secs {
        config.command_timeout = Duration::from_secs(secs);
    }
    for (name, bin) in overlay.backends {
        let backend = BackendId::parse(&name).ok_or(ConfigError::UnknownBackend(name))?;
        config.backend_binaries.insert(backend, bin);
    }
    Ok(())
}

pub fn get_config() -> Config {
    CONFIG.read().expect("config lock poisoned").clone()
}

pub fn set_config(config: Config) {
    *CONFIG.write().expect("config lock poisoned") = config;
}

/// Tests that install a process-wide config take this lock so they do not
/// trample each other under the parallel test runner.
#[cfg(test)]
pub(crate) fn test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
