use std::sync::Arc;

use steward_kernel::autonomy::{self, AutonomySelector};
use steward_kernel::{AutonomyLevel, DispatchError, OperationClass};

use crate::logging::{self, LogCategory};
use crate::store::{AuditEntry, AuditOutcome, AuditStore, ExecutedBy};

/// Who is asking, for the audit trail.
#[derive(Clone, Debug)]
pub struct PermissionScope {
    pub workflow_name: String,
    pub workflow_id: Option<String>,
    pub executed_by: ExecutedBy,
}

impl PermissionScope {
    pub fn system(workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            workflow_id: None,
            executed_by: ExecutedBy::System,
        }
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }
}

/// Effectful wrapper around the kernel's pure permission check. Every
/// `assert` records exactly one audit row, allowed or not.
pub struct PermissionManager {
    audit: Arc<AuditStore>,
}

impl PermissionManager {
    pub fn new(audit: Arc<AuditStore>) -> Self {
        Self { audit }
    }

    pub fn check(
        level: AutonomyLevel,
        operation: OperationClass,
    ) -> steward_kernel::PermissionCheck {
        autonomy::check(level, operation)
    }

    pub fn resolve_autonomy(selector: AutonomySelector, workflow: &str) -> AutonomyLevel {
        autonomy::resolve_autonomy(selector, workflow)
    }

    pub async fn assert(
        &self,
        scope: &PermissionScope,
        level: AutonomyLevel,
        operation: OperationClass,
        target: &str,
    ) -> Result<(), DispatchError> {
        let result = autonomy::check(level, operation);

        let mut entry = AuditEntry::new(&scope.workflow_name, level, operation, target);
        entry.workflow_id = scope.workflow_id.clone();
        entry.executed_by = scope.executed_by;
        entry.approved = result.allowed;
        entry.outcome = if result.allowed {
            AuditOutcome::Success
        } else {
            AuditOutcome::Failure
        };
        entry.error_message = result.reason.clone();
        self.audit.record(entry).await;

        if result.allowed {
            Ok(())
        } else {
            let reason = result
                .reason
                .unwrap_or_else(|| format!("operation `{operation}` denied at `{level}`"));
            logging::warn(
                LogCategory::Permission,
                format!("{}: {}", scope.workflow_name, reason),
            );
            Err(DispatchError::permission(reason))
        }
    }

    pub fn git<'a>(&'a self, scope: &'a PermissionScope) -> GitPermissions<'a> {
        GitPermissions {
            manager: self,
            scope,
        }
    }

    pub fn files<'a>(&'a self, scope: &'a PermissionScope) -> FilePermissions<'a> {
        FilePermissions {
            manager: self,
            scope,
        }
    }
}

/// Thin git-flavored façade over the manager.
pub struct GitPermissions<'a> {
    manager: &'a PermissionManager,
    scope: &'a PermissionScope,
}

impl GitPermissions<'_> {
    pub fn can_read(level: AutonomyLevel) -> bool {
        autonomy::check(level, OperationClass::GitRead).allowed
    }

    pub fn can_commit(level: AutonomyLevel) -> bool {
        autonomy::check(level, OperationClass::GitCommit).allowed
    }

    pub fn can_branch(level: AutonomyLevel) -> bool {
        autonomy::check(level, OperationClass::GitBranch).allowed
    }

    pub fn can_push(level: AutonomyLevel) -> bool {
        autonomy::check(level, OperationClass::GitPush).allowed
    }

    pub async fn assert_read(
        &self,
        level: AutonomyLevel,
        target: &str,
    ) -> Result<(), DispatchError> {
        self.manager
            .assert(self.scope, level, OperationClass::GitRead, target)
            .await
    }

    pub async fn assert_commit(
        &self,
        level: AutonomyLevel,
        target: &str,
    ) -> Result<(), DispatchError> {
        self.manager
            .assert(self.scope, level, OperationClass::GitCommit, target)
            .await
    }

    pub async fn assert_branch(
        &self,
        level: AutonomyLevel,
        target: &str,
    ) -> Result<(), DispatchError> {
        self.manager
            .assert(self.scope, level, OperationClass::GitBranch, target)
            .await
    }

    pub async fn assert_push(
        &self,
        level: AutonomyLevel,
        target: &str,
    ) -> Result<(), DispatchError> {
        self.manager
            .assert(self.scope, level, OperationClass::GitPush, target)
            .await
    }
}

/// Thin file-flavored façade over the manager.
pub struct FilePermissions<'a> {
    manager: &'a PermissionManager,
    scope: &'a PermissionScope,
}

impl FilePermissions<'_> {
    pub fn can_read(level: AutonomyLevel) -> bool {
        autonomy::check(level, OperationClass::ReadFile).allowed
    }

    pub fn can_write(level: AutonomyLevel) -> bool {
        autonomy::check(level, OperationClass::WriteFile).allowed
    }

    pub async fn assert_read(
        &self,
        level: AutonomyLevel,
        target: &str,
    ) -> Result<(), DispatchError> {
        self.manager
            .assert(self.scope, level, OperationClass::ReadFile, target)
            .await
    }

    pub async fn assert_write(
        &self,
        level: AutonomyLevel,
        target: &str,
    ) -> Result<(), DispatchError> {
        self.manager
            .assert(self.scope, level, OperationClass::WriteFile, target)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AuditFilter;
    use steward_kernel::ErrorKind;

    async fn manager() -> (tempfile::TempDir, Arc<AuditStore>, PermissionManager) {
        let tmp = tempfile::tempdir().unwrap();
        let audit = Arc::new(
            AuditStore::open(&tmp.path().join("audit.sqlite"))
                .await
                .unwrap(),
        );
        let manager = PermissionManager::new(audit.clone());
        (tmp, audit, manager)
    }

    #[tokio::test]
    async fn denial_throws_and_is_audited() {
        let (_tmp, audit, manager) = manager().await;
        let scope = PermissionScope::system("manual");

        let err = manager
            .assert(
                &scope,
                AutonomyLevel::ReadOnly,
                OperationClass::WriteFile,
                "notes.md",
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Permission);
        assert!(err.message.contains("low"));

        audit.flush().await.unwrap();
        let entries = audit.query(AuditFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert!(!entry.approved);
        assert_eq!(entry.outcome, AuditOutcome::Failure);
        assert_eq!(entry.operation, OperationClass::WriteFile);
        assert_eq!(entry.target, "notes.md");
        assert_eq!(entry.autonomy_level, AutonomyLevel::ReadOnly);
    }

    #[tokio::test]
    async fn approval_is_audited_too() {
        let (_tmp, audit, manager) = manager().await;
        let scope = PermissionScope::system("parallel-review").with_workflow_id("wf-7");

        manager
            .assert(
                &scope,
                AutonomyLevel::ReadOnly,
                OperationClass::ReadFile,
                "src/main.rs",
            )
            .await
            .unwrap();

        audit.flush().await.unwrap();
        let entries = audit.query(AuditFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].approved);
        assert_eq!(entries[0].workflow_id.as_deref(), Some("wf-7"));
    }

    #[test]
    fn facade_predicates_mirror_the_lattice() {
        assert!(GitPermissions::can_read(AutonomyLevel::ReadOnly));
        assert!(!GitPermissions::can_commit(AutonomyLevel::Low));
        assert!(GitPermissions::can_commit(AutonomyLevel::Medium));
        assert!(!GitPermissions::can_push(AutonomyLevel::Medium));
        assert!(GitPermissions::can_push(AutonomyLevel::High));
        assert!(FilePermissions::can_read(AutonomyLevel::ReadOnly));
        assert!(!FilePermissions::can_write(AutonomyLevel::ReadOnly));
        assert!(FilePermissions::can_write(AutonomyLevel::Low));
    }
}
