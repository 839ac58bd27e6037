use rusqlite::params;

use super::{SqliteHandle, StoreError};

static MIGRATIONS: &[&str] = &[
    "CREATE TABLE breaker_state (
        backend TEXT PRIMARY KEY,
        state INTEGER NOT NULL,
        failures INTEGER NOT NULL,
        last_failure_time INTEGER
    );",
];

/// Wire form of one breaker row. `state` is 0 closed, 1 open, 2 half-open;
/// for open breakers `last_failure_time` doubles as `opened_at`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedBreaker {
    pub backend: String,
    pub state: i64,
    pub failures: i64,
    pub last_failure_time: Option<i64>,
}

pub struct BreakerStore {
    handle: SqliteHandle,
}

impl BreakerStore {
    pub async fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        Ok(Self {
            handle: SqliteHandle::open(path, MIGRATIONS).await?,
        })
    }

    pub async fn load_all(&self) -> Result<Vec<PersistedBreaker>, StoreError> {
        self.handle
            .call(|conn| {
                let mut statement = conn.prepare(
                    "SELECT backend, state, failures, last_failure_time FROM breaker_state",
                )?;
                let rows = statement.query_map([], |row| {
                    Ok(PersistedBreaker {
                        backend: row.get(0)?,
                        state: row.get(1)?,
                        failures: row.get(2)?,
                        last_failure_time: row.get(3)?,
                    })
                })?;
                rows.collect()
            })
            .await
    }

    pub async fn save(&self, row: PersistedBreaker) -> Result<(), StoreError> {
        self.handle
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO breaker_state (backend, state, failures, last_failure_time)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(backend) DO UPDATE SET
                        state = excluded.state,
                        failures = excluded.failures,
                        last_failure_time = excluded.last_failure_time",
                    params![row.backend, row.state, row.failures, row.last_failure_time],
                )
                .map(|_| ())
            })
            .await
    }

    pub async fn clear(&self, backend: Option<String>) -> Result<(), StoreError> {
        self.handle
            .call(move |conn| {
                match backend {
                    Some(backend) => {
                        conn.execute("DELETE FROM breaker_state WHERE backend = ?1", [backend])?
                    }
                    None => conn.execute("DELETE FROM breaker_state", [])?,
                };
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_is_an_upsert() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BreakerStore::open(&tmp.path().join("red-metrics.sqlite"))
            .await
            .unwrap();

        store
            .save(PersistedBreaker {
                backend: "claude".to_string(),
                state: 0,
                failures: 1,
                last_failure_time: Some(10),
            })
            .await
            .unwrap();
        store
            .save(PersistedBreaker {
                backend: "claude".to_string(),
                state: 1,
                failures: 3,
                last_failure_time: Some(30),
            })
            .await
            .unwrap();

        let rows = store.load_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state, 1);
        assert_eq!(rows[0].failures, 3);

        store.clear(Some("claude".to_string())).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
