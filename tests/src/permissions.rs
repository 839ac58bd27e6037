use steward_core::permissions::PermissionScope;
use steward_core::store::{AuditFilter, AuditOutcome};
use steward_kernel::{AutonomyLevel, ErrorKind, OperationClass, autonomy};

use crate::fixtures::{TestEnv, TestResult};

#[tokio::test]
async fn denied_write_is_audited_with_the_required_level() -> TestResult {
    let env = TestEnv::new().await?;
    let scope = PermissionScope::system("manual");

    let err = env
        .deps
        .permissions
        .assert(
            &scope,
            AutonomyLevel::ReadOnly,
            OperationClass::WriteFile,
            "notes.md",
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Permission);
    assert!(err.message.contains("low"), "message was: {}", err.message);

    env.deps.audit.flush().await?;
    let entries = env.deps.audit.query(AuditFilter::default()).await?;
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert!(!entry.approved);
    assert_eq!(entry.outcome, AuditOutcome::Failure);
    assert_eq!(entry.operation, OperationClass::WriteFile);
    assert_eq!(entry.target, "notes.md");
    assert_eq!(entry.autonomy_level, AutonomyLevel::ReadOnly);
    Ok(())
}

#[tokio::test]
async fn every_assert_writes_exactly_one_row() -> TestResult {
    let env = TestEnv::new().await?;
    let scope = PermissionScope::system("wf");

    for level in AutonomyLevel::all() {
        for operation in OperationClass::all() {
            let _ = env
                .deps
                .permissions
                .assert(&scope, *level, *operation, "target")
                .await;
        }
    }

    env.deps.audit.flush().await?;
    let entries = env.deps.audit.query(AuditFilter::default()).await?;
    assert_eq!(
        entries.len(),
        AutonomyLevel::all().len() * OperationClass::all().len()
    );
    Ok(())
}

#[test]
fn lattice_is_monotone_over_the_level_order() {
    for operation in OperationClass::all() {
        let required = operation.required_level();
        for level in AutonomyLevel::all() {
            let check = autonomy::check(*level, *operation);
            assert_eq!(check.allowed, *level >= required);
            assert_eq!(check.required_level, required);
        }
    }
}
