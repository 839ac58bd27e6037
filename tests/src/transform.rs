use std::path::PathBuf;

use steward_core::backends::{BackendId, InvokeOptions};
use steward_core::executor::{FILES_HEADER_PREFIX, transform};
use steward_kernel::ErrorKind;

use crate::fixtures::{TestEnv, TestResult};

#[tokio::test]
async fn cli_flag_source_to_embed_target_prefixes_the_prompt() -> TestResult {
    let env = TestEnv::new().await?;
    env.write("a.ts", "export const a = 1;\n")?;
    env.write("b.ts", "export const b = 2;\n")?;

    let mut options = InvokeOptions::new(BackendId::Claude, "Analyze");
    options.attachments = vec![PathBuf::from("a.ts"), PathBuf::from("b.ts")];

    let transformed = transform(options, BackendId::Codex)?;

    let root = env.root().canonicalize()?;
    let expected = format!(
        "{FILES_HEADER_PREFIX}{}, {}]\n\nAnalyze",
        root.join("a.ts").display(),
        root.join("b.ts").display()
    );
    assert_eq!(transformed.prompt, expected);
    assert!(transformed.attachments.is_empty());
    assert_eq!(transformed.backend, BackendId::Codex);
    Ok(())
}

#[tokio::test]
async fn transform_is_idempotent_for_any_target() -> TestResult {
    let env = TestEnv::new().await?;
    env.write("a.ts", "export const a = 1;\n")?;

    for target in BackendId::all() {
        let mut options = InvokeOptions::new(BackendId::Claude, "Analyze");
        options.attachments = vec![PathBuf::from("a.ts")];

        let once = transform(options, *target)?;
        let twice = transform(once.clone(), *target)?;
        assert_eq!(once.prompt, twice.prompt, "target {target}");
        assert_eq!(once.attachments, twice.attachments, "target {target}");
    }
    Ok(())
}

#[tokio::test]
async fn traversal_attachments_raise_before_any_dispatch() -> TestResult {
    let env = TestEnv::new().await?;
    env.write("real.ts", "export {};\n")?;

    let mut options = InvokeOptions::new(BackendId::Claude, "Analyze");
    options.attachments = vec![PathBuf::from("../outside.ts")];
    let err = transform(options, BackendId::Claude).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(err.message.contains("parent-directory"));
    Ok(())
}

#[tokio::test]
async fn unsupported_file_targets_downgrade_to_embedding() -> TestResult {
    let env = TestEnv::new().await?;
    env.write("scan.ts", "export {};\n")?;

    let mut options = InvokeOptions::new(BackendId::Claude, "Scan");
    options.attachments = vec![PathBuf::from("scan.ts")];
    let transformed = transform(options, BackendId::Gemini)?;
    assert!(transformed.prompt.starts_with(FILES_HEADER_PREFIX));
    assert!(transformed.attachments.is_empty());
    Ok(())
}
