use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{SqliteHandle, StoreError, now_ms};

static MIGRATIONS: &[&str] = &[
    "CREATE TABLE activity_events (
        id TEXT PRIMARY KEY,
        timestamp INTEGER NOT NULL,
        event_type TEXT NOT NULL,
        name TEXT NOT NULL,
        success INTEGER NOT NULL,
        duration_ms INTEGER NOT NULL,
        error_message TEXT,
        metadata TEXT NOT NULL
    );
    CREATE INDEX idx_activity_timestamp ON activity_events (timestamp);
    CREATE INDEX idx_activity_type ON activity_events (event_type);",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    ToolInvocation,
    WorkflowExecution,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::ToolInvocation => "tool_invocation",
            ActivityType::WorkflowExecution => "workflow_execution",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "tool_invocation" => Some(Self::ToolInvocation),
            "workflow_execution" => Some(Self::WorkflowExecution),
            _ => None,
        }
    }
}

/// Analytics record of one tool or workflow invocation, written post-hoc.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: String,
    pub timestamp_ms: i64,
    pub event_type: ActivityType,
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
}

impl ActivityEvent {
    pub fn new(event_type: ActivityType, name: impl Into<String>, success: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp_ms: now_ms(),
            event_type,
            name: name.into(),
            success,
            duration_ms: 0,
            error_message: None,
            metadata: json!({}),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ActivityFilter {
    pub event_type: Option<ActivityType>,
    pub success: Option<bool>,
    pub since_ms: Option<i64>,
    pub until_ms: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActivitySummary {
    pub total: usize,
    pub successes: usize,
    pub success_rate: f64,
    pub p50_duration_ms: u64,
    pub p95_duration_ms: u64,
}

pub struct ActivityStore {
    handle: SqliteHandle,
}

impl ActivityStore {
    pub async fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        Ok(Self {
            handle: SqliteHandle::open(path, MIGRATIONS).await?,
        })
    }

    pub async fn record(&self, event: ActivityEvent) -> Result<(), StoreError> {
        self.handle
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO activity_events (
                        id, timestamp, event_type, name, success, duration_ms,
                        error_message, metadata
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        event.id,
                        event.timestamp_ms,
                        event.event_type.as_str(),
                        event.name,
                        event.success as i64,
                        event.duration_ms as i64,
                        event.error_message,
                        event.metadata.to_string(),
                    ],
                )
                .map(|_| ())
            })
            .await
    }

    pub async fn query(&self, filter: ActivityFilter) -> Result<Vec<ActivityEvent>, StoreError> {
        self.handle
            .call(move |conn| query_events(conn, &filter))
            .await
    }

    pub async fn summary(&self, filter: ActivityFilter) -> Result<ActivitySummary, StoreError> {
        let mut events = self.query(filter).await?;
        let total = events.len();
        let successes = events.iter().filter(|event| event.success).count();
        events.sort_by_key(|event| event.duration_ms);

        let percentile = |fraction: f64| -> u64 {
            if events.is_empty() {
                return 0;
            }
            let index = ((events.len() - 1) as f64 * fraction).round() as usize;
            events[index].duration_ms
        };

        Ok(ActivitySummary {
            total,
            successes,
            success_rate: if total == 0 {
                0.0
            } else {
                successes as f64 / total as f64
            },
            p50_duration_ms: percentile(0.50),
            p95_duration_ms: percentile(0.95),
        })
    }
}

fn query_events(conn: &Connection, filter: &ActivityFilter) -> rusqlite::Result<Vec<ActivityEvent>> {
    let mut sql = String::from(
        "SELECT id, timestamp, event_type, name, success, duration_ms,
                error_message, metadata
         FROM activity_events WHERE 1=1",
    );
    let mut values: Vec<rusqlite::types::Value> = Vec::new();

    if let Some(event_type) = filter.event_type {
        sql.push_str(&format!(" AND event_type = ?{}", values.len() + 1));
        values.push(event_type.as_str().to_string().into());
    }
    if let Some(success) = filter.success {
        sql.push_str(&format!(" AND success = ?{}", values.len() + 1));
        values.push((success as i64).into());
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
    let rows = statement.query_map(rusqlite::params_from_iter(values), |row| {
        let event_type: String = row.get(2)?;
        let metadata: String = row.get(7)?;
        Ok(ActivityEvent {
            id: row.get(0)?,
            timestamp_ms: row.get(1)?,
            event_type: ActivityType::parse(&event_type)
                .unwrap_or(ActivityType::ToolInvocation),
            name: row.get(3)?,
            success: row.get::<_, i64>(4)? != 0,
            duration_ms: row.get::<_, i64>(5)? as u64,
            error_message: row.get(6)?,
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        })
    })?;
    rows.collect()
}
