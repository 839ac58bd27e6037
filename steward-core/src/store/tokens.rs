use std::collections::BTreeMap;

use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::{SqliteHandle, StoreError, now_ms};

static MIGRATIONS: &[&str] = &[
    "CREATE TABLE token_savings (
        id TEXT PRIMARY KEY,
        timestamp INTEGER NOT NULL,
        suggested_tool TEXT NOT NULL,
        estimated_savings INTEGER NOT NULL,
        file_bucket TEXT NOT NULL
    );
    CREATE INDEX idx_tokens_timestamp ON token_savings (timestamp);",
];

/// Size classification of the file that prompted a suggestion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileBucket {
    Small,
    Medium,
    Large,
    Xlarge,
}

impl FileBucket {
    pub fn from_line_count(lines: usize) -> Self {
        match lines {
            0..300 => FileBucket::Small,
            300..=600 => FileBucket::Medium,
            601..=1000 => FileBucket::Large,
            _ => FileBucket::Xlarge,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileBucket::Small => "small",
            FileBucket::Medium => "medium",
            FileBucket::Large => "large",
            FileBucket::Xlarge => "xlarge",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "small" => Some(Self::Small),
            "medium" => Some(Self::Medium),
            "large" => Some(Self::Large),
            "xlarge" => Some(Self::Xlarge),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SavingsMetric {
    pub id: String,
    pub timestamp_ms: i64,
    pub suggested_tool: String,
    pub estimated_savings: i64,
    pub file_bucket: FileBucket,
}

impl SavingsMetric {
    pub fn new(
        suggested_tool: impl Into<String>,
        estimated_savings: i64,
        file_bucket: FileBucket,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp_ms: now_ms(),
            suggested_tool: suggested_tool.into(),
            estimated_savings,
            file_bucket,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SavingsReport {
    pub total_savings: i64,
    pub suggestion_count: usize,
    pub by_bucket: BTreeMap<String, i64>,
}

/// Reporting-only store of per-suggestion token savings estimates.
pub struct TokenMetricsStore {
    handle: SqliteHandle,
}

impl TokenMetricsStore {
    pub async fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        Ok(Self {
            handle: SqliteHandle::open(path, MIGRATIONS).await?,
        })
    }

    pub async fn record(&self, metric: SavingsMetric) -> Result<(), StoreError> {
        self.handle
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO token_savings (
                        id, timestamp, suggested_tool, estimated_savings, file_bucket
                    ) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        metric.id,
                        metric.timestamp_ms,
                        metric.suggested_tool,
                        metric.estimated_savings,
                        metric.file_bucket.as_str(),
                    ],
                )
                .map(|_| ())
            })
            .await
    }

    pub async fn report(&self) -> Result<SavingsReport, StoreError> {
        self.handle
            .call(|conn| {
                let mut statement = conn.prepare(
                    "SELECT file_bucket, COUNT(*), SUM(estimated_savings)
                     FROM token_savings GROUP BY file_bucket",
                )?;
                let mut report = SavingsReport::default();
                let rows = statement.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })?;
                for row in rows {
                    let (bucket, count, savings) = row?;
                    report.suggestion_count += count as usize;
                    report.total_savings += savings;
                    report.by_bucket.insert(bucket, savings);
                }
                Ok(report)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_follow_the_line_count_boundaries() {
        assert_eq!(FileBucket::from_line_count(0), FileBucket::Small);
        assert_eq!(FileBucket::from_line_count(299), FileBucket::Small);
        assert_eq!(FileBucket::from_line_count(300), FileBucket::Medium);
        assert_eq!(FileBucket::from_line_count(600), FileBucket::Medium);
        assert_eq!(FileBucket::from_line_count(601), FileBucket::Large);
        assert_eq!(FileBucket::from_line_count(1000), FileBucket::Large);
        assert_eq!(FileBucket::from_line_count(1001), FileBucket::Xlarge);
    }

    #[tokio::test]
    async fn report_aggregates_by_bucket() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TokenMetricsStore::open(&tmp.path().join("token-metrics.sqlite"))
            .await
            .unwrap();

        store
            .record(SavingsMetric::new("workflow", 1200, FileBucket::Large))
            .await
            .unwrap();
        store
            .record(SavingsMetric::new("workflow", 800, FileBucket::Large))
            .await
            .unwrap();
        store
            .record(SavingsMetric::new("ask_gemini", 50, FileBucket::Small))
            .await
            .unwrap();

        let report = store.report().await.unwrap();
        assert_eq!(report.suggestion_count, 3);
        assert_eq!(report.total_savings, 2050);
        assert_eq!(report.by_bucket.get("large"), Some(&2000));
        assert_eq!(report.by_bucket.get("small"), Some(&50));
    }
}
