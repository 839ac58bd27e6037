use serde_json::json;

use steward_kernel::WorkflowContext;

#[test]
fn rollback_after_a_partial_pipeline() {
    let mut ctx = WorkflowContext::new("run-1", "refactor");

    ctx.checkpoint("before-extract");
    ctx.append("completed", json!("rename"));
    ctx.append("completed", json!("extract"));

    // Simulated failure between extract and verify.
    assert!(ctx.rollback("before-extract"));
    ctx.append("completed", json!("rename_only"));

    // The rename append predating the rollback is gone too.
    assert_eq!(ctx.get_all("completed"), &[json!("rename_only")]);
}

#[test]
fn rollback_restores_all_three_maps() {
    let mut ctx = WorkflowContext::new("run-2", "refactor");
    ctx.set("phase", json!("setup"));
    ctx.append("log", json!("started"));
    ctx.increment("steps");
    ctx.checkpoint("baseline");

    ctx.set("phase", json!("mutating"));
    ctx.set("extra", json!(true));
    ctx.append("log", json!("mutated"));
    ctx.increment("steps");
    ctx.increment("steps");

    assert!(ctx.rollback("baseline"));
    assert_eq!(ctx.get_string("phase"), Some("setup"));
    assert!(!ctx.has("extra"));
    assert_eq!(ctx.get_all("log"), &[json!("started")]);
    assert_eq!(ctx.get_counter("steps"), 1);

    assert!(!ctx.rollback("never-created"));
    assert_eq!(ctx.get_string("phase"), Some("setup"));
}

#[test]
fn export_import_round_trips_without_checkpoints() {
    let mut ctx = WorkflowContext::new("run-3", "parallel-review");
    ctx.set("focus", json!("security"));
    ctx.append("files", json!("src/lib.rs"));
    ctx.append("files", json!("src/main.rs"));
    ctx.increment("legs");
    ctx.checkpoint("mid");

    let exported = ctx.export();
    let serialized = serde_json::to_string(&exported).unwrap();
    let deserialized: steward_kernel::context::ContextExport =
        serde_json::from_str(&serialized).unwrap();
    let mut restored = WorkflowContext::import(deserialized);

    assert_eq!(restored.workflow_name, "parallel-review");
    assert_eq!(restored.get_string("focus"), Some("security"));
    assert_eq!(
        restored.get_all("files"),
        &[json!("src/lib.rs"), json!("src/main.rs")]
    );
    assert_eq!(restored.get_counter("legs"), 1);
    // Checkpoints are not part of the portable form.
    assert!(!restored.rollback("mid"));
}
