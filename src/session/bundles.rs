//! Bundle staging and inspection.
//!
//! Bundles arrive as directories (`.app`, `.xctest`) or compressed archives
//! (`.ipa`, `.zip`). Staging copies or extracts them into the session's
//! working directory so later steps can mutate them freely; inspection reads
//! identity and architecture facts out of a staged bundle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

use crate::constants::commands::{LIPO, NM, UNZIP};
use crate::models::{Arch, RunnerError, Sdk, TestType};
use crate::utils::command_executor::CommandExecutor;
use crate::utils::plist::Plist;

/// Stages the app under test and the test bundle into the working
/// directory.
///
/// Compressed bundles are extracted; plain bundles are copied unless they
/// already live inside the working directory. Returns the staged app
/// directory (when an app was given) and the staged test bundle directory.
pub async fn prepare_bundles(
    executor: &Arc<dyn CommandExecutor>,
    working_dir: &Path,
    app_under_test_path: Option<&Path>,
    test_bundle_path: &Path,
) -> Result<(Option<PathBuf>, PathBuf), RunnerError> {
    let mut app_under_test_dir = None;
    if let Some(app_path) = app_under_test_path {
        if !app_path.exists() {
            return Err(RunnerError::illegal_argument(format!(
                "The app under test does not exists: {}",
                app_path.display()
            )));
        }
        if !has_extension(app_path, &["app", "ipa"]) {
            return Err(RunnerError::illegal_argument(format!(
                "The app under test {} should be with .app or .ipa extension.",
                app_path.display()
            )));
        }
        let staged = working_dir.join(format!("{}.app", file_stem(app_path)?));
        if staged.exists() {
            app_under_test_dir = Some(staged);
        } else if has_extension(app_path, &["ipa"]) {
            let extracted = extract_app(executor, app_path, working_dir).await?;
            std::fs::rename(&extracted, &staged)?;
            app_under_test_dir = Some(staged);
        } else if !app_path.starts_with(working_dir) {
            copy_dir_recursive(app_path, &staged)?;
            app_under_test_dir = Some(staged);
        } else {
            app_under_test_dir = Some(app_path.to_path_buf());
        }
    }

    if !test_bundle_path.exists() {
        return Err(RunnerError::illegal_argument(format!(
            "The test bundle does not exists: {}",
            test_bundle_path.display()
        )));
    }
    if !has_extension(test_bundle_path, &["xctest", "ipa", "zip"]) {
        return Err(RunnerError::illegal_argument(format!(
            "The test bundle {} should be with .xctest, .ipa or .zip extension.",
            test_bundle_path.display()
        )));
    }
    let staged = working_dir.join(format!("{}.xctest", file_stem(test_bundle_path)?));
    let test_bundle_dir = if staged.exists() {
        staged
    } else if has_extension(test_bundle_path, &["ipa", "zip"]) {
        let extracted = extract_test_bundle(executor, test_bundle_path, working_dir).await?;
        std::fs::rename(&extracted, &staged)?;
        staged
    } else if !test_bundle_path.starts_with(working_dir) {
        copy_dir_recursive(test_bundle_path, &staged)?;
        staged
    } else {
        test_bundle_path.to_path_buf()
    };

    Ok((app_under_test_dir, test_bundle_dir))
}

/// Extracts a compressed app archive and returns the `.app` inside its
/// Payload directory.
pub async fn extract_app(
    executor: &Arc<dyn CommandExecutor>,
    compressed_app_path: &Path,
    working_dir: &Path,
) -> Result<PathBuf, RunnerError> {
    let unzip_dir = tempfile::Builder::new()
        .prefix("extracted")
        .tempdir_in(working_dir)?
        .keep();
    unzip(executor, compressed_app_path, &unzip_dir).await?;
    extract_bundle_file(&unzip_dir.join("Payload"), "app")
}

/// Extracts a compressed test archive and returns the `.xctest` inside it,
/// looking at the archive root first and the Payload directory second.
pub async fn extract_test_bundle(
    executor: &Arc<dyn CommandExecutor>,
    compressed_test_path: &Path,
    working_dir: &Path,
) -> Result<PathBuf, RunnerError> {
    let unzip_dir = tempfile::Builder::new()
        .prefix("extracted")
        .tempdir_in(working_dir)?
        .keep();
    unzip(executor, compressed_test_path, &unzip_dir).await?;
    match extract_bundle_file(&unzip_dir, "xctest") {
        Ok(bundle) => Ok(bundle),
        Err(RunnerError::Bundle(_)) => extract_bundle_file(&unzip_dir.join("Payload"), "xctest"),
        Err(e) => Err(e),
    }
}

async fn unzip(
    executor: &Arc<dyn CommandExecutor>,
    archive: &Path,
    target_dir: &Path,
) -> Result<(), RunnerError> {
    let archive_arg = archive.to_string_lossy();
    let target_arg = target_dir.to_string_lossy();
    let output = executor
        .output(UNZIP, &["-q", archive_arg.as_ref(), "-d", target_arg.as_ref()])
        .await?;
    if !output.success() {
        return Err(RunnerError::bundle(format!(
            "Failed to extract {}: {}",
            archive.display(),
            output.combined()
        )));
    }
    Ok(())
}

/// Finds exactly one bundle with the given extension in the directory.
fn extract_bundle_file(target_dir: &Path, bundle_extension: &str) -> Result<PathBuf, RunnerError> {
    let mut candidates = Vec::new();
    let entries = std::fs::read_dir(target_dir)
        .map_err(|e| RunnerError::bundle(format!("{}: {e}", target_dir.display())))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(bundle_extension) {
            candidates.push(path);
        }
    }
    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        0 => Err(RunnerError::bundle(format!(
            "No .{bundle_extension} bundle was found in {}",
            target_dir.display()
        ))),
        _ => Err(RunnerError::bundle(format!(
            "Multiple .{bundle_extension} bundles were found in {}: {candidates:?}",
            target_dir.display()
        ))),
    }
}

/// Detects whether the test bundle is a UI test by scanning the compiled
/// binary's symbol table for the UI-application class.
pub async fn detect_test_type(
    executor: &Arc<dyn CommandExecutor>,
    test_bundle_dir: &Path,
) -> Result<TestType, RunnerError> {
    let executable = bundle_executable(test_bundle_dir)?;
    let executable_arg = executable.to_string_lossy();
    let output = executor.output(NM, &[executable_arg.as_ref()]).await?;
    if output.stdout.contains("XCUIApplication") {
        Ok(TestType::Xcuitest)
    } else {
        Ok(TestType::Xctest)
    }
}

/// Applies the test-type defaulting and legality rules.
///
/// Without an explicit type the bundle is inspected; a unit test with no
/// app host on a simulator downgrades to a hostless logic test. Logic tests
/// are simulator-only, and any hosted test type requires an app under test.
pub async fn finalize_test_type(
    executor: &Arc<dyn CommandExecutor>,
    test_bundle_dir: &Path,
    sdk: Sdk,
    app_under_test_dir: Option<&Path>,
    original_test_type: Option<TestType>,
) -> Result<TestType, RunnerError> {
    let test_type = match original_test_type {
        None => {
            let mut detected = detect_test_type(executor, test_bundle_dir).await?;
            if detected == TestType::Xctest
                && app_under_test_dir.is_none()
                && sdk == Sdk::Iphonesimulator
            {
                detected = TestType::LogicTest;
            }
            info!("Will consider the test as test type {detected} to run.");
            detected
        }
        Some(TestType::LogicTest) if sdk != Sdk::Iphonesimulator => {
            if app_under_test_dir.is_some() {
                info!(
                    "Will consider the test as test type xctest to run. Because it is only \
                     support running Logic Test on iOS simulator and the sdk of testing \
                     device is {sdk}."
                );
                TestType::Xctest
            } else {
                return Err(RunnerError::illegal_argument(format!(
                    "It is only support running Logic Test on iOS simulator. The sdk of \
                     testing device is {sdk}."
                )));
            }
        }
        Some(TestType::Xctest)
            if app_under_test_dir.is_none() && sdk == Sdk::Iphonesimulator =>
        {
            info!(
                "Will consider the test as test type Logic Test to run. Because the app \
                 under test is not given."
            );
            TestType::LogicTest
        }
        Some(original) => original,
    };
    if app_under_test_dir.is_none() && test_type != TestType::LogicTest {
        return Err(RunnerError::illegal_argument(format!(
            "The app under test is required in test type {test_type}."
        )));
    }
    Ok(test_type)
}

/// The bundle id declared in the bundle's Info.plist.
pub async fn bundle_id(
    executor: &Arc<dyn CommandExecutor>,
    bundle_path: &Path,
) -> Result<String, RunnerError> {
    let plist = Plist::new(bundle_path.join("Info.plist"), executor.clone());
    let value = plist.get_field("CFBundleIdentifier").await?;
    value
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| RunnerError::plist("CFBundleIdentifier is not a string".to_string()))
}

/// The bundle's minimum deployment OS version.
pub async fn minimum_os_version(
    executor: &Arc<dyn CommandExecutor>,
    bundle_path: &Path,
) -> Result<String, RunnerError> {
    let plist = Plist::new(bundle_path.join("Info.plist"), executor.clone());
    let value = plist.get_field("MinimumOSVersion").await?;
    value
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| RunnerError::plist("MinimumOSVersion is not a string".to_string()))
}

/// Architectures compiled into a Mach-O file.
pub async fn file_arch_types(
    executor: &Arc<dyn CommandExecutor>,
    file_path: &Path,
) -> Result<Vec<Arch>, RunnerError> {
    let path_arg = file_path.to_string_lossy();
    let output = executor.output(LIPO, &[path_arg.as_ref(), "-archs"]).await?;
    if !output.success() {
        return Err(RunnerError::bundle(format!(
            "Failed to read architectures of {}: {}",
            file_path.display(),
            output.combined()
        )));
    }
    Ok(output
        .stdout
        .split_whitespace()
        .filter_map(|arch| arch.parse().ok())
        .collect())
}

/// Thins a fat Mach-O file down to a single architecture in place.
pub async fn leave_only_arch_type(
    executor: &Arc<dyn CommandExecutor>,
    file_path: &Path,
    arch: Arch,
) -> Result<(), RunnerError> {
    let path_arg = file_path.to_string_lossy();
    let output = executor
        .output(
            LIPO,
            &[
                path_arg.as_ref(),
                "-thin",
                arch.short_name(),
                "-output",
                path_arg.as_ref(),
            ],
        )
        .await?;
    if !output.success() {
        return Err(RunnerError::bundle(format!(
            "Failed to thin {} to {arch}: {}",
            file_path.display(),
            output.combined()
        )));
    }
    Ok(())
}

/// Path of the executable inside a bundle directory, named after the
/// bundle.
pub fn bundle_executable(bundle_dir: &Path) -> Result<PathBuf, RunnerError> {
    Ok(bundle_dir.join(file_stem(bundle_dir)?))
}

pub fn file_stem(path: &Path) -> Result<String, RunnerError> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            RunnerError::illegal_argument(format!("Invalid bundle path: {}", path.display()))
        })
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.contains(&e))
}

fn copy_dir_recursive(source: &Path, target: &Path) -> Result<(), RunnerError> {
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target_path = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target_path)?;
        } else {
            std::fs::copy(entry.path(), &target_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::command_executor::mock::MockCommandExecutor;

    fn make_bundle(dir: &Path, name: &str) -> PathBuf {
        let bundle = dir.join(name);
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::write(bundle.join("Info.plist"), "stub").unwrap();
        bundle
    }

    #[tokio::test]
    async fn missing_test_bundle_is_rejected() {
        let work = tempfile::tempdir().unwrap();
        let executor: Arc<dyn CommandExecutor> = Arc::new(MockCommandExecutor::new());
        let result = prepare_bundles(
            &executor,
            work.path(),
            None,
            &work.path().join("Missing.xctest"),
        )
        .await;
        assert!(matches!(result, Err(RunnerError::IllegalArgument(_))));
    }

    #[tokio::test]
    async fn wrong_extension_is_rejected() {
        let work = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        let bundle = make_bundle(source.path(), "Tests.bundle");
        let executor: Arc<dyn CommandExecutor> = Arc::new(MockCommandExecutor::new());
        let result = prepare_bundles(&executor, work.path(), None, &bundle).await;
        assert!(matches!(result, Err(RunnerError::IllegalArgument(_))));
    }

    #[tokio::test]
    async fn plain_bundles_are_copied_into_the_workspace() {
        let work = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        let app = make_bundle(source.path(), "Example.app");
        let tests = make_bundle(source.path(), "ExampleTests.xctest");

        let executor: Arc<dyn CommandExecutor> = Arc::new(MockCommandExecutor::new());
        let (staged_app, staged_tests) =
            prepare_bundles(&executor, work.path(), Some(app.as_path()), &tests)
                .await
                .unwrap();

        let staged_app = staged_app.unwrap();
        assert!(staged_app.starts_with(work.path()));
        assert!(staged_app.join("Info.plist").exists());
        assert!(staged_tests.starts_with(work.path()));
        assert!(staged_tests.join("Info.plist").exists());
    }

    #[test]
    fn extract_bundle_file_requires_exactly_one_candidate() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            extract_bundle_file(dir.path(), "xctest"),
            Err(RunnerError::Bundle(_))
        ));

        make_bundle(dir.path(), "One.xctest");
        assert!(extract_bundle_file(dir.path(), "xctest").is_ok());

        make_bundle(dir.path(), "Two.xctest");
        assert!(matches!(
            extract_bundle_file(dir.path(), "xctest"),
            Err(RunnerError::Bundle(_))
        ));
    }

    #[tokio::test]
    async fn ui_test_symbol_marks_the_bundle_as_xcuitest() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = make_bundle(dir.path(), "UiTests.xctest");
        let executable = bundle.join("UiTests");
        std::fs::write(&executable, "binary").unwrap();

        let executable_arg = executable.to_string_lossy().to_string();
        let executor: Arc<dyn CommandExecutor> = Arc::new(
            MockCommandExecutor::new().with_success(
                "nm",
                &[&executable_arg],
                "0000 S _OBJC_CLASS_$_XCUIApplication\n",
            ),
        );
        assert_eq!(
            detect_test_type(&executor, &bundle).await.unwrap(),
            TestType::Xcuitest
        );
    }

    #[tokio::test]
    async fn logic_test_on_device_is_rejected_without_app() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = make_bundle(dir.path(), "LogicTests.xctest");
        let executor: Arc<dyn CommandExecutor> = Arc::new(MockCommandExecutor::new());
        let result = finalize_test_type(
            &executor,
            &bundle,
            Sdk::Iphoneos,
            None,
            Some(TestType::LogicTest),
        )
        .await;
        assert!(matches!(result, Err(RunnerError::IllegalArgument(_))));
    }

    #[tokio::test]
    async fn hosted_xctest_without_app_downgrades_on_simulator() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = make_bundle(dir.path(), "LogicTests.xctest");
        let executor: Arc<dyn CommandExecutor> = Arc::new(MockCommandExecutor::new());
        let test_type = finalize_test_type(
            &executor,
            &bundle,
            Sdk::Iphonesimulator,
            None,
            Some(TestType::Xctest),
        )
        .await
        .unwrap();
        assert_eq!(test_type, TestType::LogicTest);
    }
}
