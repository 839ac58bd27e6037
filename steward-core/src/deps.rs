use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::breaker::{CircuitBreakerRegistry, SystemClock};
use crate::logging::{self, LogCategory};
use crate::permissions::PermissionManager;
use crate::store::{ActivityStore, AuditStore, BreakerStore, StoreError, TokenMetricsStore};
use crate::workflow::cache::WorkflowCache;

static SINGLETON: Lazy<RwLock<Option<Arc<Dependencies>>>> = Lazy::new(|| RwLock::new(None));

#[derive(Debug)]
pub enum DepsError {
    NotInitialized,
    AlreadyInitialized,
    DataDir(PathBuf, std::io::Error),
    Store(StoreError),
}

impl std::fmt::Display for DepsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DepsError::NotInitialized => {
                write!(f, "dependencies accessed before initialization")
            }
            DepsError::AlreadyInitialized => {
                write!(f, "dependencies are already initialized")
            }
            DepsError::DataDir(path, err) => {
                write!(f, "failed creating data dir {}: {}", path.display(), err)
            }
            DepsError::Store(err) => write!(f, "store initialization failed: {err}"),
        }
    }
}

impl std::error::Error for DepsError {}

impl From<StoreError> for DepsError {
    fn from(value: StoreError) -> Self {
        DepsError::Store(value)
    }
}

/// Exclusive owner of every store and the breaker registry. Components
/// receive it by reference; nothing else holds store connections.
pub struct Dependencies {
    pub audit: Arc<AuditStore>,
    pub activity: Arc<ActivityStore>,
    pub tokens: Arc<TokenMetricsStore>,
    pub breaker: Arc<CircuitBreakerRegistry>,
    pub permissions: PermissionManager,
    pub cache: WorkflowCache,
    pub data_dir: PathBuf,
}

impl Dependencies {
    /// Open every store under `data_dir`, apply migrations, and seed the
    /// breaker registry from persisted state.
    pub async fn open(data_dir: PathBuf) -> Result<Arc<Self>, DepsError> {
        std::fs::create_dir_all(&data_dir)
            .map_err(|err| DepsError::DataDir(data_dir.clone(), err))?;

        let audit = Arc::new(AuditStore::open(&data_dir.join("audit.sqlite")).await?);
        let activity = Arc::new(ActivityStore::open(&data_dir.join("activity.sqlite")).await?);
        let tokens =
            Arc::new(TokenMetricsStore::open(&data_dir.join("token-metrics.sqlite")).await?);
        let breaker_store =
            Arc::new(BreakerStore::open(&data_dir.join("red-metrics.sqlite")).await?);

        let breaker = Arc::new(CircuitBreakerRegistry::new(
            breaker_store,
            Arc::new(SystemClock),
        ));
        breaker.load().await?;

        let permissions = PermissionManager::new(audit.clone());

        Ok(Arc::new(Self {
            audit,
            activity,
            tokens,
            breaker,
            permissions,
            cache: WorkflowCache::new(),
            data_dir,
        }))
    }

    /// Persist breaker state and close the stores. Shutdown errors are
    /// logged and swallowed so repeated close calls stay safe.
    pub async fn close(&self) {
        self.breaker.shutdown().await;
        self.audit.close().await;
        logging::info(LogCategory::Debug, "dependencies closed");
    }
}

/// Initialize the process singleton. Errors if already initialized;
/// `close_global` releases the slot so a later `init` yields fresh
/// instances.
pub async fn init(data_dir: PathBuf) -> Result<Arc<Dependencies>, DepsError> {
    if SINGLETON.read().is_some() {
        return Err(DepsError::AlreadyInitialized);
    }
    let deps = Dependencies::open(data_dir).await?;
    *SINGLETON.write() = Some(deps.clone());
    Ok(deps)
}

/// The singleton accessor; calling before `init` is a precondition error.
pub fn get() -> Result<Arc<Dependencies>, DepsError> {
    SINGLETON.read().clone().ok_or(DepsError::NotInitialized)
}

pub async fn close_global() {
    let deps = SINGLETON.write().take();
    if let Some(deps) = deps {
        deps.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_close_reopen_yields_fresh_instances() {
        let tmp = tempfile::tempdir().unwrap();
        let deps = Dependencies::open(tmp.path().join("data")).await.unwrap();
        deps.close().await;
        // Closing twice is safe.
        deps.close().await;

        let again = Dependencies::open(tmp.path().join("data")).await.unwrap();
        assert!(tmp.path().join("data/audit.sqlite").exists());
        assert!(tmp.path().join("data/red-metrics.sqlite").exists());
        again.close().await;
    }
}
