use serde_json::json;

use steward_core::store::{
    ActivityEvent, ActivityFilter, ActivityType, AuditEntry, AuditFilter, AuditOutcome,
    ExportFormat, FileBucket, SavingsMetric,
};
use steward_kernel::{AutonomyLevel, OperationClass};

use crate::fixtures::{TestEnv, TestResult};

#[tokio::test]
async fn audit_export_includes_aggregates() -> TestResult {
    let env = TestEnv::new().await?;

    let mut denied = AuditEntry::new(
        "parallel-review",
        AutonomyLevel::ReadOnly,
        OperationClass::GitPush,
        "origin/main",
    );
    denied.approved = false;
    denied.outcome = AuditOutcome::Failure;
    denied.metadata = json!({ "requested_by": "workflow" });
    env.deps.audit.record(denied).await;
    env.deps
        .audit
        .record(AuditEntry::new(
            "parallel-review",
            AutonomyLevel::ReadOnly,
            OperationClass::ReadFile,
            "src/lib.rs",
        ))
        .await;
    env.deps.audit.flush().await?;

    let html = env
        .deps
        .audit
        .export(AuditFilter::default(), ExportFormat::Html)
        .await?;
    assert!(html.contains("2 entries, 1 denials"));
    assert!(html.contains("git_push"));

    let csv = env
        .deps
        .audit
        .export(AuditFilter::default(), ExportFormat::Csv)
        .await?;
    assert_eq!(csv.lines().count(), 3);
    Ok(())
}

#[tokio::test]
async fn audit_time_window_filters() -> TestResult {
    let env = TestEnv::new().await?;

    let mut old = AuditEntry::new(
        "wf",
        AutonomyLevel::Low,
        OperationClass::WriteFile,
        "a.rs",
    );
    old.timestamp_ms = 1_000;
    env.deps.audit.record(old).await;
    env.deps
        .audit
        .record(AuditEntry::new(
            "wf",
            AutonomyLevel::Low,
            OperationClass::WriteFile,
            "b.rs",
        ))
        .await;
    env.deps.audit.flush().await?;

    let recent = env
        .deps
        .audit
        .query(AuditFilter {
            since_ms: Some(10_000),
            ..Default::default()
        })
        .await?;
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].target, "b.rs");

    let limited = env
        .deps
        .audit
        .query(AuditFilter {
            limit: Some(1),
            ..Default::default()
        })
        .await?;
    assert_eq!(limited.len(), 1);
    Ok(())
}

#[tokio::test]
async fn activity_summary_tracks_success_rate() -> TestResult {
    let env = TestEnv::new().await?;

    for success in [true, true, false] {
        let mut event = ActivityEvent::new(ActivityType::ToolInvocation, "ask_claude", success);
        event.duration_ms = 100;
        env.deps.activity.record(event).await?;
    }

    let summary = env.deps.activity.summary(ActivityFilter::default()).await?;
    assert_eq!(summary.total, 3);
    assert_eq!(summary.successes, 2);
    Ok(())
}

#[tokio::test]
async fn token_savings_report_groups_by_bucket() -> TestResult {
    let env = TestEnv::new().await?;
    env.deps
        .tokens
        .record(SavingsMetric::new(
            "workflow:parallel-review",
            4500,
            FileBucket::Xlarge,
        ))
        .await?;
    env.deps
        .tokens
        .record(SavingsMetric::new(
            "workflow:parallel-review",
            900,
            FileBucket::Medium,
        ))
        .await?;

    let report = env.deps.tokens.report().await?;
    assert_eq!(report.suggestion_count, 2);
    assert_eq!(report.total_savings, 5400);
    assert_eq!(report.by_bucket.get("xlarge"), Some(&4500));
    Ok(())
}

#[tokio::test]
async fn workflow_runs_are_recorded_as_activity() -> TestResult {
    let env = TestEnv::new().await?;
    env.write("src/lib.rs", "pub fn a() {}\n")?;

    steward_core::workflow::run_workflow(
        "parallel-review",
        json!({ "files": ["src/lib.rs"] }),
        steward_kernel::autonomy::AutonomySelector::Auto,
        None,
        &env.deps,
    )
    .await?;

    let events = env
        .deps
        .activity
        .query(ActivityFilter {
            event_type: Some(ActivityType::WorkflowExecution),
            ..Default::default()
        })
        .await?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "parallel-review");
    assert!(events[0].success);
    Ok(())
}
