use std::path::PathBuf;

use clap::{Parser, Subcommand};

use steward_core::store::{AuditFilter, ExportFormat};
use steward_core::{config, deps, logging};

#[derive(Parser)]
#[command(
    name = "steward",
    about = "Local dispatch server between a coding assistant host and AI provider CLIs"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the length-framed tool RPC over stdin/stdout.
    Serve,
    /// Inspect or prune the audit trail.
    Audit {
        #[command(subcommand)]
        command: AuditCommand,
    },
}

#[derive(Subcommand)]
enum AuditCommand {
    /// Export audit entries to stdout or a file.
    Export {
        #[arg(long, default_value = "json", value_parser = parse_format)]
        format: ExportFormat,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Only include entries from the last N days.
        #[arg(long)]
        days: Option<u32>,
    },
    /// Delete entries older than N days.
    Cleanup {
        #[arg(long)]
        days: u32,
    },
}

fn parse_format(value: &str) -> Result<ExportFormat, String> {
    match value.to_ascii_lowercase().as_str() {
        "json" => Ok(ExportFormat::Json),
        "csv" => Ok(ExportFormat::Csv),
        "html" => Ok(ExportFormat::Html),
        other => Err(format!("unknown export format `{other}`")),
    }
}

/// Walk up from the current directory to the enclosing git repository;
/// the server is always rooted at a project.
fn find_project_root() -> std::io::Result<PathBuf> {
    let mut current = std::env::current_dir()?;
    loop {
        if current.join(".git").exists() {
            return Ok(current);
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return std::env::current_dir(),
        }
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let project_root = find_project_root()?;
    let loaded = config::load(&project_root)?;
    let data_dir = loaded.data_dir.clone();
    config::set_config(loaded);
    logging::init();

    let deps = deps::init(data_dir).await?;

    let result: Result<(), Box<dyn std::error::Error>> = match cli.command {
        Command::Serve => rpc_serve(&deps).await,
        Command::Audit { command } => audit_command(&deps, command).await,
    };

    deps::close_global().await;
    result
}

async fn rpc_serve(
    deps: &std::sync::Arc<steward_core::deps::Dependencies>,
) -> Result<(), Box<dyn std::error::Error>> {
    crate::rpc::serve(deps.clone()).await?;
    Ok(())
}

async fn audit_command(
    deps: &std::sync::Arc<steward_core::deps::Dependencies>,
    command: AuditCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        AuditCommand::Export {
            format,
            output,
            days,
        } => {
            let filter = AuditFilter {
                since_ms: days.map(|days| {
                    chrono_now_ms() - i64::from(days) * 24 * 60 * 60 * 1000
                }),
                ..Default::default()
            };
            let rendered = deps.audit.export(filter, format).await?;
            match output {
                Some(path) => std::fs::write(path, rendered)?,
                None => println!("{rendered}"),
            }
        }
        AuditCommand::Cleanup { days } => {
            let deleted = deps.audit.cleanup(days).await?;
            println!("deleted {deleted} audit entries older than {days} days");
        }
    }
    Ok(())
}

fn chrono_now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}
