use serde_json::json;

use steward_core::backends::BackendId;
use steward_core::workflow;
use steward_kernel::ErrorKind;
use steward_kernel::autonomy::AutonomySelector;

use crate::fixtures::{self, TestEnv, TestResult};

#[tokio::test]
async fn unknown_workflows_are_a_validation_error() -> TestResult {
    let env = TestEnv::new().await?;
    let err = workflow::run_workflow(
        "release-notes",
        json!({}),
        AutonomySelector::Auto,
        None,
        &env.deps,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(err.message.contains("parallel-review"));
    Ok(())
}

#[tokio::test]
async fn parallel_review_synthesizes_both_legs() -> TestResult {
    let env = TestEnv::new().await?;
    env.write("src/lib.rs", "pub fn add(a: i32, b: i32) -> i32 { a + b }\n")?;

    let outcome = workflow::run_workflow(
        "parallel-review",
        json!({ "files": ["src/lib.rs"], "focus": "security" }),
        AutonomySelector::Auto,
        None,
        &env.deps,
    )
    .await?;

    assert_eq!(outcome.workflow, "parallel-review");
    assert_eq!(outcome.metadata["cache_hit"], json!(false));
    assert_eq!(outcome.metadata["failed_legs"], json!([]));
    assert!(!outcome.text.is_empty());

    // Identical inputs hit the cache the second time.
    let again = workflow::run_workflow(
        "parallel-review",
        json!({ "files": ["src/lib.rs"], "focus": "security" }),
        AutonomySelector::Auto,
        None,
        &env.deps,
    )
    .await?;
    assert_eq!(again.metadata["cache_hit"], json!(true));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn parallel_review_tolerates_one_failing_leg() -> TestResult {
    let env = TestEnv::new().await?;
    env.write("src/lib.rs", "pub fn add(a: i32, b: i32) -> i32 { a + b }\n")?;
    fixtures::force_backend_error("codex=transient");

    let outcome = workflow::run_workflow(
        "parallel-review",
        json!({ "files": ["src/lib.rs"] }),
        AutonomySelector::Auto,
        None,
        &env.deps,
    )
    .await?;

    assert_eq!(outcome.metadata["cache_hit"], json!(false));
    assert_eq!(outcome.metadata["failed_legs"], json!(["codex"]));

    // The failed leg's retries pushed the codex breaker over threshold.
    assert!(!env.deps.breaker.is_available(BackendId::Codex).await);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn parallel_review_with_every_leg_down_is_fatal() -> TestResult {
    let env = TestEnv::new().await?;
    env.write("src/lib.rs", "pub fn add() {}\n")?;
    fixtures::force_backend_error("transient");

    let err = workflow::run_workflow(
        "parallel-review",
        json!({ "files": ["src/lib.rs"] }),
        AutonomySelector::Auto,
        None,
        &env.deps,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Transient);
    Ok(())
}

#[tokio::test]
async fn parallel_review_requires_files() -> TestResult {
    let env = TestEnv::new().await?;
    let err = workflow::run_workflow(
        "parallel-review",
        json!({ "files": [] }),
        AutonomySelector::Auto,
        None,
        &env.deps,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    Ok(())
}

#[tokio::test]
async fn pre_commit_with_empty_staging_passes_immediately() -> TestResult {
    let env = TestEnv::new().await?;
    env.write("src/lib.rs", "pub fn a() {}\n")?;
    env.init_git()?;

    let outcome = workflow::run_workflow(
        "pre-commit-validate",
        json!({ "depth": "quick" }),
        AutonomySelector::Auto,
        None,
        &env.deps,
    )
    .await?;

    assert_eq!(outcome.metadata["verdict"], json!("pass"));
    assert_eq!(outcome.metadata["checks"], json!(0));
    assert!(outcome.text.contains("Nothing is staged"));
    Ok(())
}

#[tokio::test]
async fn pre_commit_thorough_runs_three_checks() -> TestResult {
    let env = TestEnv::new().await?;
    env.write("src/lib.rs", "pub fn a() {}\n")?;
    let repo = env.init_git()?;
    env.write("src/lib.rs", "pub fn a() {}\npub fn b() {}\n")?;
    env.stage(&repo, "src/lib.rs")?;

    let outcome = workflow::run_workflow(
        "pre-commit-validate",
        json!({ "depth": "thorough" }),
        AutonomySelector::Auto,
        None,
        &env.deps,
    )
    .await?;

    assert_eq!(outcome.metadata["checks"], json!(3));
    assert_eq!(outcome.metadata["depth"], json!("thorough"));
    Ok(())
}

#[tokio::test]
async fn validate_last_commit_always_returns_a_verdict() -> TestResult {
    let env = TestEnv::new().await?;
    env.write("src/lib.rs", "pub fn a() {}\n")?;
    env.init_git()?;

    let outcome = workflow::run_workflow(
        "validate-last-commit",
        json!({}),
        AutonomySelector::Auto,
        None,
        &env.deps,
    )
    .await?;

    let verdict = outcome.metadata["verdict"].as_str().unwrap();
    assert!(["pass", "warn", "fail"].contains(&verdict));
    assert!(outcome.metadata["commit"].as_str().is_some());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn validate_last_commit_degrades_when_an_analyzer_dies() -> TestResult {
    let env = TestEnv::new().await?;
    env.write("src/lib.rs", "pub fn a() {}\n")?;
    env.init_git()?;
    fixtures::force_backend_error("gemini=transient");

    let outcome = workflow::run_workflow(
        "validate-last-commit",
        json!({}),
        AutonomySelector::Auto,
        None,
        &env.deps,
    )
    .await?;

    // Still a verdict; the missing analyzer downgraded it to warn.
    assert_eq!(outcome.metadata["verdict"], json!("warn"));
    assert_eq!(outcome.metadata["analyzer_failures"], json!(1));
    Ok(())
}

#[tokio::test]
async fn feature_design_runs_roles_in_order() -> TestResult {
    let env = TestEnv::new().await?;
    let outcome = workflow::run_workflow(
        "feature-design",
        json!({ "description": "Add rate limiting to the API" }),
        AutonomySelector::Auto,
        None,
        &env.deps,
    )
    .await?;

    assert_eq!(
        outcome.metadata["roles"],
        json!(["architect", "implementer", "tester"])
    );
    assert!(outcome.text.contains("## Architect"));
    assert!(outcome.text.contains("## Implementer"));
    assert!(outcome.text.contains("## Tester"));
    Ok(())
}

#[tokio::test]
async fn init_session_reports_repository_state() -> TestResult {
    let env = TestEnv::new().await?;
    env.write("src/lib.rs", "pub fn a() {}\n")?;
    env.init_git()?;

    let outcome = workflow::run_workflow(
        "init-session",
        json!(null),
        AutonomySelector::Auto,
        None,
        &env.deps,
    )
    .await?;

    assert!(outcome.metadata["branch"].as_str().is_some());
    assert_eq!(outcome.metadata["commits"], json!(1));
    assert!(outcome.text.contains("Recent commits"));
    Ok(())
}

#[tokio::test]
async fn init_session_falls_back_to_the_secondary_synthesizer() -> TestResult {
    let env = TestEnv::new().await?;
    env.write("src/lib.rs", "pub fn a() {}\n")?;
    env.init_git()?;
    // Primary (claude) errors permanently; the explicit fallback leg runs
    // on the next backend.
    fixtures::force_backend_error("claude=permanent,gemini=permanent");

    let outcome = workflow::run_workflow(
        "init-session",
        json!({}),
        AutonomySelector::Auto,
        None,
        &env.deps,
    )
    .await?;
    assert_eq!(outcome.metadata["backend"], json!("codex"));
    Ok(())
}

#[tokio::test]
async fn bug_hunt_analyzes_given_suspects() -> TestResult {
    let env = TestEnv::new().await?;
    env.write("src/parser.rs", "pub fn parse(s: &str) -> i32 { s.len() as i32 }\n")?;
    env.write("src/caller.rs", "use crate::parser;\n")?;

    let outcome = workflow::run_workflow(
        "bug-hunt",
        json!({
            "symptom": "parse returns the wrong number for unicode input",
            "files": ["src/parser.rs", "src/caller.rs"],
        }),
        AutonomySelector::Auto,
        None,
        &env.deps,
    )
    .await?;

    assert_eq!(outcome.metadata["suspects"], json!(2));
    assert!(!outcome.text.is_empty());
    Ok(())
}

#[tokio::test]
async fn custom_plan_runs_steps_in_dependency_order() -> TestResult {
    let env = TestEnv::new().await?;
    env.write("src/lib.rs", "pub fn a() {}\n")?;
    env.init_git()?;

    let outcome = workflow::run_workflow(
        "custom",
        json!({
            "plan": {
                "name": "inspect",
                "steps": [
                    {
                        "id": "summarize",
                        "kind": "ai_analysis",
                        "depends_on": ["repo", "read-lib"],
                        "required_operation": "mcp_call",
                        "params": { "prompt": "Summarize the gathered context" },
                    },
                    {
                        "id": "repo",
                        "kind": "git_read",
                        "required_operation": "git_read",
                    },
                    {
                        "id": "read-lib",
                        "kind": "file_read",
                        "required_operation": "read_file",
                        "params": { "path": "src/lib.rs" },
                    },
                ],
            }
        }),
        AutonomySelector::Level(steward_kernel::AutonomyLevel::Medium),
        None,
        &env.deps,
    )
    .await?;

    let steps: Vec<&str> = outcome.metadata["steps"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|step| step.as_str())
        .collect();
    let position = |id: &str| steps.iter().position(|step| *step == id).unwrap();
    assert!(position("repo") < position("summarize"));
    assert!(position("read-lib") < position("summarize"));
    assert!(outcome.text.contains("## summarize"));
    Ok(())
}

#[tokio::test]
async fn custom_plan_rejects_cycles_and_over_privileged_steps() -> TestResult {
    let env = TestEnv::new().await?;

    let cyclic = workflow::run_workflow(
        "custom",
        json!({
            "plan": {
                "name": "loop",
                "steps": [
                    { "id": "a", "kind": "git_read", "depends_on": ["b"], "required_operation": "git_read" },
                    { "id": "b", "kind": "git_read", "depends_on": ["a"], "required_operation": "git_read" },
                ],
            }
        }),
        AutonomySelector::Level(steward_kernel::AutonomyLevel::High),
        None,
        &env.deps,
    )
    .await
    .unwrap_err();
    assert_eq!(cyclic.kind, ErrorKind::Validation);
    assert!(cyclic.message.contains("cycle"));

    let over_privileged = workflow::run_workflow(
        "custom",
        json!({
            "plan": {
                "name": "push",
                "steps": [
                    { "id": "push", "kind": "git_read", "required_operation": "git_push" },
                ],
            }
        }),
        AutonomySelector::Level(steward_kernel::AutonomyLevel::ReadOnly),
        None,
        &env.deps,
    )
    .await
    .unwrap_err();
    assert_eq!(over_privileged.kind, ErrorKind::Validation);
    Ok(())
}

#[tokio::test]
async fn bug_hunt_requires_a_symptom() -> TestResult {
    let env = TestEnv::new().await?;
    let err = workflow::run_workflow(
        "bug-hunt",
        json!({ "symptom": "  " }),
        AutonomySelector::Auto,
        None,
        &env.deps,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    Ok(())
}
