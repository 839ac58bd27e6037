use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::config::{self, LogLevel};

const MAX_LOG_BYTES: u64 = 5 * 1024 * 1024;
const MAX_ROTATED_FILES: usize = 3;

/// One log file per category under `<data_dir>/logs/`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogCategory {
    Workflow,
    AiBackend,
    Permission,
    Git,
    Errors,
    Debug,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Workflow => "workflow",
            LogCategory::AiBackend => "ai-backend",
            LogCategory::Permission => "permission",
            LogCategory::Git => "git",
            LogCategory::Errors => "errors",
            LogCategory::Debug => "debug",
        }
    }

    pub fn all() -> &'static [LogCategory] {
        &[
            LogCategory::Workflow,
            LogCategory::AiBackend,
            LogCategory::Permission,
            LogCategory::Git,
            LogCategory::Errors,
            LogCategory::Debug,
        ]
    }
}

struct Logger {
    logs_dir: Option<PathBuf>,
}

lazy_static! {
    static ref LOGGER: Mutex<Logger> = Mutex::new(Logger { logs_dir: None });
}

/// Point the logger at the configured logs directory. Safe to call more
/// than once; the last call wins.
pub fn init() {
    let dir = config::get_config().logs_dir();
    let _ = fs::create_dir_all(&dir);
    LOGGER.lock().logs_dir = Some(dir);
}

pub fn shutdown() {
    LOGGER.lock().logs_dir = None;
}

fn rotate(path: &PathBuf) {
    // workflow.log -> workflow.log.1 -> workflow.log.2, dropping the tail.
    let oldest = path.with_extension(format!("log.{MAX_ROTATED_FILES}"));
    let _ = fs::remove_file(&oldest);
    for index in (1..MAX_ROTATED_FILES).rev() {
        let from = path.with_extension(format!("log.{index}"));
        let to = path.with_extension(format!("log.{}", index + 1));
        if from.exists() {
            let _ = fs::rename(&from, &to);
        }
    }
    let _ = fs::rename(path, path.with_extension("log.1"));
}

fn open_for_append(path: &PathBuf) -> Option<File> {
    if let Ok(meta) = fs::metadata(path)
        && meta.len() >= MAX_LOG_BYTES
    {
        rotate(path);
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}

pub fn log(category: LogCategory, level: LogLevel, message: &str) {
    let config = config::get_config();
    if level < config.log_level {
        return;
    }

    let line = format!(
        "{} [{}] {}",
        Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        level,
        message
    );

    if config.echo_logs_to_stderr {
        eprintln!("[{}] {}", category.as_str(), line);
    }

    let logger = LOGGER.lock();
    let Some(dir) = logger.logs_dir.as_ref() else {
        return;
    };
    let path = dir.join(format!("{}.log", category.as_str()));
    if let Some(mut file) = open_for_append(&path) {
        let _ = writeln!(file, "{line}");
    }
}

pub fn debug(category: LogCategory, message: impl AsRef<str>) {
    log(category, LogLevel::Debug, message.as_ref());
}

pub fn info(category: LogCategory, message: impl AsRef<str>) {
    log(category, LogLevel::Info, message.as_ref());
}

pub fn warn(category: LogCategory, message: impl AsRef<str>) {
    log(category, LogLevel::Warn, message.as_ref());
}

pub fn error(category: LogCategory, message: impl AsRef<str>) {
    log(category, LogLevel::Error, message.as_ref());
    // Errors are mirrored into the shared errors log so one file tells the
    // whole failure story.
    if category != LogCategory::Errors {
        log(LogCategory::Errors, LogLevel::Error, message.as_ref());
    }
}
