//! Session coordinator contract tests: prepare-time validation, strategy
//! selection and cleanup guarantees.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use xctr::managers::xcode::Xcode;
use xctr::models::{RunnerError, Sdk, TestType};
use xctr::session::{PrepareInputs, XctestSession};
use xctr::utils::command_executor::mock::MockCommandExecutor;
use xctr::utils::command_executor::CommandExecutor;

fn make_bundle(dir: &Path, name: &str) -> PathBuf {
    let bundle = dir.join(name);
    std::fs::create_dir_all(&bundle).unwrap();
    std::fs::write(bundle.join("Info.plist"), "stub").unwrap();
    bundle
}

fn session(mock: &MockCommandExecutor, sdk: Sdk, work_dir: Option<&Path>) -> XctestSession {
    let executor: Arc<dyn CommandExecutor> = Arc::new(mock.clone());
    let xcode = Arc::new(Xcode::new(executor.clone()));
    XctestSession::new(sdk, executor, xcode, work_dir, None).unwrap()
}

/// Hostless logic tests only exist on the simulator; requesting one on a
/// real device must fail in Prepare, before any child is spawned.
#[tokio::test]
async fn logic_test_on_a_real_device_is_rejected_in_prepare() {
    let source = tempfile::tempdir().unwrap();
    let bundle = make_bundle(source.path(), "LogicTests.xctest");

    let mock = MockCommandExecutor::new();
    let mut session = session(&mock, Sdk::Iphoneos, None);
    let result = session
        .prepare(PrepareInputs {
            test_bundle: Some(bundle),
            test_type: Some(TestType::LogicTest),
            ..Default::default()
        })
        .await;

    assert!(matches!(result, Err(RunnerError::IllegalArgument(_))));
    // Nothing was launched on the way to the rejection.
    assert_eq!(mock.calls_matching("xcodebuild"), 0);
    assert_eq!(mock.calls_matching("xcrun simctl spawn"), 0);
}

#[tokio::test]
async fn ui_tests_require_a_modern_toolchain() {
    let source = tempfile::tempdir().unwrap();
    let app = make_bundle(source.path(), "Example.app");
    let bundle = make_bundle(source.path(), "ExampleUITests.xctest");

    let mock =
        MockCommandExecutor::new().with_success("xcodebuild", &["-version"], "Xcode 7.3.1\n");
    let mut session = session(&mock, Sdk::Iphonesimulator, None);
    let result = session
        .prepare(PrepareInputs {
            app_under_test: Some(app),
            test_bundle: Some(bundle),
            test_type: Some(TestType::Xcuitest),
            ..Default::default()
        })
        .await;

    match result {
        Err(RunnerError::IllegalArgument(message)) => {
            assert!(message.contains("Only supports running XCUITest under Xcode 8+"));
        }
        other => panic!("Expected an illegal-argument error, got {other:?}"),
    }
}

#[tokio::test]
async fn xctestrun_files_require_a_modern_toolchain() {
    let source = tempfile::tempdir().unwrap();
    let xctestrun = source.path().join("Example.xctestrun");
    std::fs::write(&xctestrun, "stub").unwrap();

    let mock =
        MockCommandExecutor::new().with_success("xcodebuild", &["-version"], "Xcode 7.3.1\n");
    let mut session = session(&mock, Sdk::Iphonesimulator, None);
    let result = session
        .prepare(PrepareInputs {
            xctestrun_file: Some(xctestrun),
            ..Default::default()
        })
        .await;
    assert!(matches!(result, Err(RunnerError::IllegalArgument(_))));
}

/// A pinned work dir is created on demand and survives Close; staged
/// bundles inside it are the caller's to keep.
#[tokio::test]
async fn pinned_work_dir_survives_close() {
    let scratch = tempfile::tempdir().unwrap();
    let pinned = scratch.path().join("pinned-work");
    let source = tempfile::tempdir().unwrap();
    let bundle = make_bundle(source.path(), "LogicTests.xctest");
    std::fs::write(bundle.join("LogicTests"), "binary").unwrap();

    let mock = MockCommandExecutor::new()
        .with_success("xcodebuild", &["-version"], "Xcode 11.4\n");
    let mut session = session(&mock, Sdk::Iphonesimulator, Some(pinned.as_path()));

    let staged_executable = pinned
        .canonicalize()
        .unwrap()
        .join("LogicTests.xctest/LogicTests")
        .to_string_lossy()
        .to_string();
    let _shared = mock
        .clone()
        .with_success("nm", &[&staged_executable], "0000 T _main\n");

    session
        .prepare(PrepareInputs {
            test_bundle: Some(bundle),
            ..Default::default()
        })
        .await
        .unwrap();
    session.close();
    session.close();

    assert!(pinned.join("LogicTests.xctest").exists());
}
