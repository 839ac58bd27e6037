use std::collections::{BTreeMap, VecDeque};

use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use steward_kernel::{AutonomyLevel, OperationClass};

use crate::logging::{self, LogCategory};

use super::{SqliteHandle, StoreError, now_ms};

/// In-flight queue bound; pushes past this apply the drop policy.
const QUEUE_WATERMARK: usize = 1024;
/// Hard channel bound; senders of droppable entries never block on it.
const CHANNEL_CAPACITY: usize = 4096;

static MIGRATIONS: &[&str] = &[
    "CREATE TABLE audit_entries (
        id TEXT PRIMARY KEY,
        timestamp INTEGER NOT NULL,
        workflow_name TEXT NOT NULL,
        workflow_id TEXT,
        autonomy_level TEXT NOT NULL,
        operation TEXT NOT NULL,
        target TEXT NOT NULL,
        approved INTEGER NOT NULL,
        executed_by TEXT NOT NULL,
        outcome TEXT NOT NULL,
        error_message TEXT,
        metadata TEXT NOT NULL
    );
    CREATE INDEX idx_audit_timestamp ON audit_entries (timestamp);
    CREATE INDEX idx_audit_workflow ON audit_entries (workflow_name);
    CREATE INDEX idx_audit_autonomy ON audit_entries (autonomy_level);
    CREATE INDEX idx_audit_operation ON audit_entries (operation);
    CREATE INDEX idx_audit_outcome ON audit_entries (outcome);",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutedBy {
    System,
    User,
}

impl ExecutedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutedBy::System => "system",
            ExecutedBy::User => "user",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
    Pending,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::Pending => "pending",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }
}

/// One permission decision. Immutable once recorded; only retention
/// cleanup ever deletes rows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp_ms: i64,
    pub workflow_name: String,
    pub workflow_id: Option<String>,
    pub autonomy_level: AutonomyLevel,
    pub operation: OperationClass,
    pub target: String,
    pub approved: bool,
    pub executed_by: ExecutedBy,
    pub outcome: AuditOutcome,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
}

impl AuditEntry {
    pub fn new(
        workflow_name: impl Into<String>,
        autonomy_level: AutonomyLevel,
        operation: OperationClass,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp_ms: now_ms(),
            workflow_name: workflow_name.into(),
            workflow_id: None,
            autonomy_level,
            operation,
            target: target.into(),
            approved: true,
            executed_by: ExecutedBy::System,
            outcome: AuditOutcome::Success,
            error_message: None,
            metadata: json!({}),
        }
    }

    /// Denials and failures are never dropped under backpressure.
    fn droppable(&self) -> bool {
        self.approved && self.outcome != AuditOutcome::Failure && self.error_message.is_none()
    }
}

#[derive(Clone, Debug, Default)]
pub struct AuditFilter {
    pub workflow_name: Option<String>,
    pub autonomy_level: Option<AutonomyLevel>,
    pub operation: Option<OperationClass>,
    pub outcome: Option<AuditOutcome>,
    pub approved: Option<bool>,
    pub since_ms: Option<i64>,
    pub until_ms: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Html,
}

enum WriterMessage {
    Entry(AuditEntry),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Append-only audit trail with a single writer task. `record` enqueues
/// and returns; `flush` waits for the queue to drain.
pub struct AuditStore {
    handle: SqliteHandle,
    tx: mpsc::Sender<WriterMessage>,
    writer: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AuditStore {
    pub async fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        let handle = SqliteHandle::open(path, MIGRATIONS).await?;
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let writer = tokio::spawn(writer_loop(handle.clone(), rx));
        Ok(Self {
            handle,
            tx,
            writer: parking_lot::Mutex::new(Some(writer)),
        })
    }

    /// Enqueue one entry. Denials and failures apply backpressure rather
    /// than being dropped; routine entries are shed with a warning when
    /// the queue is saturated.
    pub async fn record(&self, entry: AuditEntry) {
        if entry.droppable() {
            if self.tx.try_send(WriterMessage::Entry(entry)).is_err() {
                logging::warn(
                    LogCategory::Permission,
                    "audit queue saturated; dropping a routine entry",
                );
            }
        } else if self.tx.send(WriterMessage::Entry(entry)).await.is_err() {
            logging::error(
                LogCategory::Permission,
                "audit writer is gone; a non-droppable entry was lost",
            );
        }
    }

    /// Wait until every entry enqueued before this call is durable.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WriterMessage::Flush(tx))
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)
    }

    pub async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>, StoreError> {
        self.handle
            .call(move |conn| query_entries(conn, &filter))
            .await
    }

    pub async fn export(
        &self,
        filter: AuditFilter,
        format: ExportFormat,
    ) -> Result<String, StoreError> {
        let entries = self.query(filter).await?;
        Ok(match format {
            ExportFormat::Json => {
                serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string())
            }
            ExportFormat::Csv => render_csv(&entries),
            ExportFormat::Html => render_html(&entries),
        })
    }

    /// Delete entries older than `days`; returns the deletion count.
    pub async fn cleanup(&self, days: u32) -> Result<usize, StoreError> {
        self.flush().await?;
        let cutoff = now_ms() - i64::from(days) * 24 * 60 * 60 * 1000;
        self.handle
            .call(move |conn| {
                conn.execute("DELETE FROM audit_entries WHERE timestamp < ?1", [cutoff])
            })
            .await
    }

    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(WriterMessage::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
        if let Some(handle) = self.writer.lock().take() {
            let _ = handle.await;
        }
    }
}

async fn writer_loop(handle: SqliteHandle, mut rx: mpsc::Receiver<WriterMessage>) {
    let mut buffer: VecDeque<AuditEntry> = VecDeque::new();

    while let Some(message) = rx.recv().await {
        let mut shutdown_ack = None;
        let mut flush_acks = Vec::new();

        match message {
            WriterMessage::Entry(entry) => buffer.push_back(entry),
            WriterMessage::Flush(ack) => flush_acks.push(ack),
            WriterMessage::Shutdown(ack) => shutdown_ack = Some(ack),
        }

        // Drain whatever else is queued before touching the database so
        // bursts from parallel fan-outs become one transaction.
        while let Ok(message) = rx.try_recv() {
            match message {
                WriterMessage::Entry(entry) => buffer.push_back(entry),
                WriterMessage::Flush(ack) => flush_acks.push(ack),
                WriterMessage::Shutdown(ack) => shutdown_ack = Some(ack),
            }
        }

        while buffer.len() > QUEUE_WATERMARK {
            match buffer.iter().position(AuditEntry::droppable) {
                Some(index) => {
                    let _ = buffer.remove(index);
                    logging::warn(
                        LogCategory::Permission,
                        "audit queue past watermark; dropped oldest routine entry",
                    );
                }
                None => break,
            }
        }

        if !buffer.is_empty() {
            let batch: Vec<AuditEntry> = buffer.drain(..).collect();
            let result = handle
                .call_mut(move |conn| insert_batch(conn, &batch))
                .await;
            if let Err(err) = result {
                logging::error(
                    LogCategory::Permission,
                    format!("audit batch insert failed: {err}"),
                );
            }
        }

        for ack in flush_acks {
            let _ = ack.send(());
        }
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
            break;
        }
    }
}

fn insert_batch(conn: &mut Connection, entries: &[AuditEntry]) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    {
        let mut statement = tx.prepare_cached(
            "INSERT INTO audit_entries (
                id, timestamp, workflow_name, workflow_id, autonomy_level,
                operation, target, approved, executed_by, outcome,
                error_message, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        for entry in entries {
            statement.execute(params![
                entry.id,
                entry.timestamp_ms,
                entry.workflow_name,
                entry.workflow_id,
                entry.autonomy_level.as_str(),
                entry.operation.as_str(),
                entry.target,
                entry.approved as i64,
                entry.executed_by.as_str(),
                entry.outcome.as_str(),
                entry.error_message,
                entry.metadata.to_string(),
            ])?;
        }
    }
    tx.commit()
}

fn query_entries(conn: &Connection, filter: &AuditFilter) -> rusqlite::Result<Vec<AuditEntry>> {
    let mut sql = String::from(
        "SELECT id, timestamp, workflow_name, workflow_id, autonomy_level,
                operation, target, approved, executed_by, outcome,
                error_message, metadata
         FROM audit_entries WHERE 1=1",
    );
    let mut values: Vec<rusqlite::types::Value> = Vec::new();

    if let Some(workflow) = &filter.workflow_name {
        sql.push_str(&format!(" AND workflow_name = ?{}", values.len() + 1));
        values.push(workflow.clone().into());
    }
    if let Some(level) = filter.autonomy_level {
        sql.push_str(&format!(" AND autonomy_level = ?{}", values.len() + 1));
        values.push(level.as_str().to_string().into());
    }
    if let Some(operation) = filter.operation {
        sql.push_str(&format!(" AND operation = ?{}", values.len() + 1));
        values.push(operation.as_str().to_string().into());
    }
    if let Some(outcome) = filter.outcome {
        sql.push_str(&format!(" AND outcome = ?{}", values.len() + 1));
        values.push(outcome.as_str().to_string().into());
    }
    if let Some(approved) = filter.approved {
        sql.push_str(&format!(" AND approved = ?{}", values.len() + 1));
        values.push((approved as i64).into());
    }
    if let Some(since) = filter.since_ms {
        sql.push_str(&format!(" AND timestamp >= ?{}", values.len() + 1));
        values.push(since.into());
    }
    if let Some(until) = filter.until_ms {
        sql.push_str(&format!(" AND timestamp <= ?{}", values.len() + 1));
        values.push(until.into());
    }

    sql.push_str(" ORDER BY timestamp DESC");
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let mut statement = conn.prepare(&sql)?;
    let rows = statement.query_map(rusqlite::params_from_iter(values), row_to_entry)?;
    rows.collect()
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let autonomy: String = row.get(4)?;
    let operation: String = row.get(5)?;
    let executed_by: String = row.get(8)?;
    let outcome: String = row.get(9)?;
    let metadata: String = row.get(11)?;

    Ok(AuditEntry {
        id: row.get(0)?,
        timestamp_ms: row.get(1)?,
        workflow_name: row.get(2)?,
        workflow_id: row.get(3)?,
        autonomy_level: AutonomyLevel::parse(&autonomy).unwrap_or(AutonomyLevel::ReadOnly),
        operation: OperationClass::parse(&operation).unwrap_or(OperationClass::ReadFile),
        target: row.get(6)?,
        approved: row.get::<_, i64>(7)? != 0,
        executed_by: ExecutedBy::parse(&executed_by).unwrap_or(ExecutedBy::System),
        outcome: AuditOutcome::parse(&outcome).unwrap_or(AuditOutcome::Pending),
        error_message: row.get(10)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
    })
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn render_csv(entries: &[AuditEntry]) -> String {
    let mut out = String::from(
        "id,timestamp,workflow_name,workflow_id,autonomy_level,operation,target,approved,executed_by,outcome,error_message\n",
    );
    for entry in entries {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{},{}\n",
            entry.id,
            entry.timestamp_ms,
            csv_escape(&entry.workflow_name),
            entry.workflow_id.as_deref().unwrap_or(""),
            entry.autonomy_level.as_str(),
            entry.operation.as_str(),
            csv_escape(&entry.target),
            entry.approved,
            entry.executed_by.as_str(),
            entry.outcome.as_str(),
            csv_escape(entry.error_message.as_deref().unwrap_or("")),
        ));
    }
    out
}

fn render_html(entries: &[AuditEntry]) -> String {
    let mut by_outcome: BTreeMap<&str, usize> = BTreeMap::new();
    let mut by_operation: BTreeMap<&str, usize> = BTreeMap::new();
    let mut denials = 0usize;
    for entry in entries {
        *by_outcome.entry(entry.outcome.as_str()).or_default() += 1;
        *by_operation.entry(entry.operation.as_str()).or_default() += 1;
        if !entry.approved {
            denials += 1;
        }
    }

    let mut html = String::from(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Audit report</title>\
         <style>body{font-family:sans-serif}table{border-collapse:collapse}\
         td,th{border:1px solid #ccc;padding:4px 8px}</style></head><body>\n",
    );
    html.push_str(&format!(
        "<h1>Audit report</h1><p>{} entries, {} denials</p>\n",
        entries.len(),
        denials
    ));

    html.push_str("<h2>By outcome</h2><ul>");
    for (outcome, count) in &by_outcome {
        html.push_str(&format!("<li>{outcome}: {count}</li>"));
    }
    html.push_str("</ul>\n<h2>By operation</h2><ul>");
    for (operation, count) in &by_operation {
        html.push_str(&format!("<li>{operation}: {count}</li>"));
    }
    html.push_str("</ul>\n<h2>Entries</h2>\n<table><tr><th>Time</th><th>Workflow</th><th>Level</th><th>Operation</th><th>Target</th><th>Approved</th><th>Outcome</th><th>Error</th></tr>\n");

    for entry in entries {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            entry.timestamp_ms,
            html_escape(&entry.workflow_name),
            entry.autonomy_level.as_str(),
            entry.operation.as_str(),
            html_escape(&entry.target),
            entry.approved,
            entry.outcome.as_str(),
            html_escape(entry.error_message.as_deref().unwrap_or("")),
        ));
    }
    html.push_str("</table></body></html>\n");
    html
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
