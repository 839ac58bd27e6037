use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use git2::{Repository, Signature};
use tempfile::TempDir;

use steward_core::config::{self, Config};
use steward_core::deps::Dependencies;

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Tests that install process-wide state (the config singleton, env vars)
/// run serially behind this guard.
pub fn serial() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A throwaway project rooted in a temp dir with its own dependency
/// container, installed as the process config for the duration.
pub struct TestEnv {
    pub tmp: TempDir,
    pub deps: Arc<Dependencies>,
    _guard: MutexGuard<'static, ()>,
}

impl TestEnv {
    pub async fn new() -> TestResult<Self> {
        let guard = serial();
        clear_forced_errors();

        let tmp = tempfile::tempdir()?;
        let mut config = Config::default();
        config.project_root = tmp.path().to_path_buf();
        config.data_dir = tmp.path().join(".steward");
        config::set_config(config);

        let deps = Dependencies::open(tmp.path().join(".steward")).await?;
        Ok(Self {
            tmp,
            deps,
            _guard: guard,
        })
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    pub fn write(&self, relative: &str, contents: &str) -> TestResult {
        let path = self.tmp.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Initialize a git repository at the project root with one commit
    /// covering every file written so far.
    pub fn init_git(&self) -> TestResult<Repository> {
        let repo = Repository::init(self.tmp.path())?;
        {
            let sig = Signature::now("tester", "tester@example.com")?;
            let mut index = repo.index()?;
            index.add_all(["*"], git2::IndexAddOption::DEFAULT, None)?;
            index.write()?;
            let tree_id = index.write_tree()?;
            let tree = repo.find_tree(tree_id)?;
            repo.commit(Some("HEAD"), &sig, &sig, "initial commit", &tree, &[])?;
        }
        Ok(repo)
    }

    pub fn stage(&self, repo: &Repository, relative: &str) -> TestResult {
        let mut index = repo.index()?;
        index.add_path(Path::new(relative))?;
        index.write()?;
        Ok(())
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        clear_forced_errors();
    }
}

pub fn force_backend_error(spec: &str) {
    // Safety: every caller holds the serial guard, so no other thread is
    // reading the environment concurrently.
    unsafe { std::env::set_var("STEWARD_FORCE_BACKEND_ERROR", spec) };
}

pub fn clear_forced_errors() {
    unsafe { std::env::remove_var("STEWARD_FORCE_BACKEND_ERROR") };
}
