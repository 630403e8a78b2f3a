//! The xctestrun document.
//!
//! An xctestrun file tells `xcodebuild test-without-building` where the test
//! host, the test bundle and the app under test live, and which environment
//! and test selections apply. One can be supplied by the caller or generated
//! here for staged bundles. The document is held in memory as a plist value
//! tree; launch options mutate the tree, and the file is rewritten once just
//! before the run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::constants::commands::{xcodebuild, XCODEBUILD};
use crate::constants::signals::{TEST_EXECUTE_FAILED_SIGNAL, TEST_EXECUTE_SUCCEEDED_SIGNAL};
use crate::executor::XcodebuildTestExecutor;
use crate::managers::xcode::Xcode;
use crate::models::{ExitCode, RunnerError, Sdk, SigningOptions, TestType};
use crate::session::bundles;
use crate::utils::command_executor::CommandExecutor;
use crate::utils::plist::{self, Plist, PlistValue};

const METADATA_KEY: &str = "__xctestrun_metadata__";

/// A loaded or generated xctestrun document bound to its on-disk path.
pub struct XctestRun {
    plist_path: PathBuf,
    root: PlistValue,
    root_key: String,
    test_type: TestType,
    app_bundle_id: Option<String>,
    executor: Arc<dyn CommandExecutor>,
    xcode: Arc<Xcode>,
}

impl XctestRun {
    /// Loads a caller-supplied xctestrun file.
    ///
    /// The test entry is the first non-metadata key. When no test type is
    /// given, the entry's `IsUITestBundle` flag decides it.
    pub async fn load(
        path: &Path,
        test_type: Option<TestType>,
        executor: Arc<dyn CommandExecutor>,
        xcode: Arc<Xcode>,
    ) -> Result<Self, RunnerError> {
        let root = Plist::new(path, executor.clone()).read_root().await?;
        let root_key = root
            .as_dict()
            .and_then(|entries| {
                entries
                    .keys()
                    .find(|key| key.as_str() != METADATA_KEY)
                    .cloned()
            })
            .ok_or_else(|| {
                RunnerError::illegal_argument(format!(
                    "The xctestrun file {} contains no test entry.",
                    path.display()
                ))
            })?;
        let test_type = match test_type {
            Some(test_type) => test_type,
            None => {
                let is_ui_test = plist::get_field(&root, &format!("{root_key}:IsUITestBundle"))
                    .ok()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if is_ui_test {
                    TestType::Xcuitest
                } else {
                    TestType::Xctest
                }
            }
        };
        Ok(Self {
            plist_path: path.to_path_buf(),
            root,
            root_key,
            test_type,
            app_bundle_id: None,
            executor,
            xcode,
        })
    }

    pub fn test_type(&self) -> TestType {
        self.test_type
    }

    /// Merges environment variables into the test process's environment.
    pub fn set_test_env_vars(&mut self, env_vars: &HashMap<String, String>) {
        self.merge_env_field("EnvironmentVariables", env_vars);
    }

    /// Replaces the test process's extra command-line arguments.
    pub fn set_test_args(&mut self, args: &[String]) {
        self.set_entry_field("CommandLineArguments", string_array(args));
    }

    pub fn set_tests_to_run(&mut self, tests: &[String]) {
        self.set_entry_field("OnlyTestIdentifiers", string_array(tests));
    }

    pub fn set_skip_tests(&mut self, tests: &[String]) {
        self.set_entry_field("SkipTestIdentifiers", string_array(tests));
    }

    /// Environment for the app under test. A UI test's target app is a
    /// separate process; for plain unit tests the app under test hosts the
    /// tests, so the variables merge into the test environment.
    pub fn set_app_under_test_env_vars(&mut self, env_vars: &HashMap<String, String>) {
        if self.test_type == TestType::Xcuitest {
            self.merge_env_field("UITargetAppEnvironmentVariables", env_vars);
        } else {
            self.set_test_env_vars(env_vars);
        }
    }

    pub fn set_app_under_test_args(&mut self, args: &[String]) {
        if self.test_type == TestType::Xcuitest {
            self.set_entry_field("UITargetAppCommandLineArguments", string_array(args));
        } else {
            self.set_test_args(args);
        }
    }

    /// Removes the attachment-lifetime override so the runner keeps every
    /// automatic screenshot. Absence of the field is not an error.
    pub fn enable_auto_screenshots(&mut self) {
        let field = format!("{}:SystemAttachmentLifetime", self.root_key);
        if let Err(RunnerError::Plist(_)) = plist::delete_field(&mut self.root, &field) {
            // Nothing to delete; generated documents always carry it but a
            // caller-supplied file may not.
        }
    }

    fn merge_env_field(&mut self, field_name: &str, env_vars: &HashMap<String, String>) {
        let field = format!("{}:{field_name}", self.root_key);
        let mut merged = plist::get_field(&self.root, &field)
            .ok()
            .and_then(|v| v.as_dict().cloned())
            .unwrap_or_default();
        for (key, value) in env_vars {
            merged.insert(key.clone(), PlistValue::String(value.clone()));
        }
        self.set_entry_field(field_name, PlistValue::Dict(merged));
    }

    fn set_entry_field(&mut self, field_name: &str, value: PlistValue) {
        let field = format!("{}:{field_name}", self.root_key);
        // The entry dict always exists; inserting a new key can not fail.
        let _ = plist::set_field(&mut self.root, &field, value);
    }

    /// Writes the document and drives `xcodebuild test-without-building`
    /// against the given device under the process supervisor.
    pub async fn run(
        &self,
        device_id: &str,
        sdk: Sdk,
        output_dir: &Path,
        startup_timeout: Option<Duration>,
        destination_timeout: Option<Duration>,
    ) -> Result<ExitCode, RunnerError> {
        Plist::new(&self.plist_path, self.executor.clone()).write_root(&self.root)?;

        let mut command = vec![
            XCODEBUILD.to_string(),
            xcodebuild::TEST_WITHOUT_BUILDING.to_string(),
            xcodebuild::XCTESTRUN_ARG.to_string(),
            self.plist_path.to_string_lossy().into_owned(),
            xcodebuild::DESTINATION_ARG.to_string(),
            format!("id={device_id}"),
            xcodebuild::DERIVED_DATA_PATH_ARG.to_string(),
            output_dir.to_string_lossy().into_owned(),
        ];
        if let Some(timeout) = destination_timeout {
            command.push(xcodebuild::DESTINATION_TIMEOUT_ARG.to_string());
            command.push(timeout.as_secs().to_string());
        }

        let mut executor = XcodebuildTestExecutor::new(
            command,
            self.executor.clone(),
            self.xcode.clone(),
        )
        .sdk(sdk)
        .test_type(self.test_type)
        .device_id(device_id)
        .result_signals(TEST_EXECUTE_SUCCEEDED_SIGNAL, TEST_EXECUTE_FAILED_SIGNAL);
        if let Some(app_bundle_id) = &self.app_bundle_id {
            executor = executor.app_bundle_id(app_bundle_id.clone());
        }
        if let Some(timeout) = startup_timeout {
            executor = executor.startup_timeout(timeout);
        }
        let result = executor.execute(false).await?;
        Ok(result.exit_code)
    }
}

/// Generates an xctestrun document for staged bundles.
///
/// The heavy lifting (building the app, compiling tests) already happened;
/// this only wires the staged artifacts together the way `xcodebuild
/// build-for-testing` would have.
pub async fn generate_xctestrun(
    executor: &Arc<dyn CommandExecutor>,
    xcode: &Arc<Xcode>,
    work_dir: &Path,
    app_under_test_dir: &Path,
    test_bundle_dir: &Path,
    sdk: Sdk,
    test_type: TestType,
    signing_options: &SigningOptions,
) -> Result<XctestRun, RunnerError> {
    let test_name = bundles::file_stem(test_bundle_dir)?;
    let app_bundle_id = bundles::bundle_id(executor, app_under_test_dir).await?;
    let platform_name = match sdk {
        Sdk::Iphoneos => "iPhoneOS",
        Sdk::Iphonesimulator => "iPhoneSimulator",
    };

    let mut entry = std::collections::BTreeMap::new();
    match test_type {
        TestType::Xcuitest => {
            let runner_dir =
                prepare_xctrunner_app(executor, xcode, work_dir, &test_name, sdk, signing_options)
                    .await?;
            embed_test_bundle(test_bundle_dir, &runner_dir, &test_name)?;
            entry.insert(
                "TestHostPath".to_string(),
                PlistValue::String(runner_dir.to_string_lossy().into_owned()),
            );
            entry.insert(
                "UITargetAppPath".to_string(),
                PlistValue::String(app_under_test_dir.to_string_lossy().into_owned()),
            );
            entry.insert("IsUITestBundle".to_string(), PlistValue::Bool(true));
            entry.insert(
                "TestingEnvironmentVariables".to_string(),
                PlistValue::Dict(
                    [
                        (
                            "DYLD_FRAMEWORK_PATH".to_string(),
                            PlistValue::String(format!(
                                "__PLATFORMS__/{platform_name}.platform/Developer/Library/Frameworks"
                            )),
                        ),
                        (
                            "DYLD_LIBRARY_PATH".to_string(),
                            PlistValue::String(format!(
                                "__PLATFORMS__/{platform_name}.platform/Developer/Library/Frameworks"
                            )),
                        ),
                    ]
                    .into(),
                ),
            );
        }
        TestType::Xctest => {
            embed_test_bundle(test_bundle_dir, app_under_test_dir, &test_name)?;
            let app_executable = bundles::file_stem(app_under_test_dir)?;
            entry.insert(
                "TestHostPath".to_string(),
                PlistValue::String(app_under_test_dir.to_string_lossy().into_owned()),
            );
            entry.insert(
                "TestHostBundleIdentifier".to_string(),
                PlistValue::String(app_bundle_id.clone()),
            );
            entry.insert("IsAppHostedTestBundle".to_string(), PlistValue::Bool(true));
            entry.insert(
                "TestingEnvironmentVariables".to_string(),
                PlistValue::Dict(
                    [
                        (
                            "DYLD_INSERT_LIBRARIES".to_string(),
                            PlistValue::String(format!(
                                "__PLATFORMS__/{platform_name}.platform/Developer/usr/lib/libXCTestBundleInject.dylib"
                            )),
                        ),
                        (
                            "DYLD_FRAMEWORK_PATH".to_string(),
                            PlistValue::String(format!(
                                "__PLATFORMS__/{platform_name}.platform/Developer/Library/Frameworks"
                            )),
                        ),
                        (
                            "XCInjectBundleInto".to_string(),
                            PlistValue::String(format!("__TESTHOST__/{app_executable}")),
                        ),
                    ]
                    .into(),
                ),
            );
        }
        TestType::LogicTest => {
            return Err(RunnerError::illegal_argument(
                "Logic tests run without an xctestrun file.".to_string(),
            ));
        }
    }
    entry.insert(
        "TestBundlePath".to_string(),
        PlistValue::String(format!("__TESTHOST__/PlugIns/{test_name}.xctest")),
    );
    // Attachments from passing tests are noise at CI scale.
    entry.insert(
        "SystemAttachmentLifetime".to_string(),
        PlistValue::String("deleteOnSuccess".to_string()),
    );

    let mut root = std::collections::BTreeMap::new();
    root.insert(
        METADATA_KEY.to_string(),
        PlistValue::Dict([("FormatVersion".to_string(), PlistValue::Integer(1))].into()),
    );
    root.insert(test_name.clone(), PlistValue::Dict(entry));

    let plist_path = work_dir.join(format!("{test_name}.xctestrun"));
    info!("Generated xctestrun file {}.", plist_path.display());
    Ok(XctestRun {
        plist_path,
        root: PlistValue::Dict(root),
        root_key: test_name,
        test_type,
        app_bundle_id: Some(app_bundle_id),
        executor: executor.clone(),
        xcode: xcode.clone(),
    })
}

/// Stages a copy of Xcode's XCTRunner.app for a UI test and stamps it with
/// a test-specific identity.
async fn prepare_xctrunner_app(
    executor: &Arc<dyn CommandExecutor>,
    xcode: &Arc<Xcode>,
    work_dir: &Path,
    test_name: &str,
    sdk: Sdk,
    signing_options: &SigningOptions,
) -> Result<PathBuf, RunnerError> {
    let agents_runner = xcode
        .sdk_platform_path(sdk)
        .await?
        .join("Developer/Library/Xcode/Agents/XCTRunner.app");
    let runner_dir = work_dir.join(format!("{test_name}-Runner.app"));
    copy_tree(&agents_runner, &runner_dir)?;

    let info_plist = Plist::new(runner_dir.join("Info.plist"), executor.clone());
    info_plist
        .set_field(
            "CFBundleName",
            PlistValue::String(format!("{test_name}-Runner")),
        )
        .await?;
    info_plist
        .set_field(
            "CFBundleIdentifier",
            PlistValue::String(format!("com.apple.test.{test_name}-Runner")),
        )
        .await?;
    if signing_options.xctrunner_app_enable_ui_file_sharing {
        info_plist
            .set_field("UIFileSharingEnabled", PlistValue::Bool(true))
            .await?;
    }
    if sdk == Sdk::Iphoneos {
        if let Some(profile) = &signing_options.xctrunner_app_provisioning_profile {
            std::fs::copy(profile, runner_dir.join("embedded.mobileprovision"))?;
        }
        if signing_options.keychain_path.is_some() {
            // Codesigning itself is delegated to the host's signing setup.
            warn!("keychain_path is recorded but codesigning is left to the host configuration.");
        }
    }
    Ok(runner_dir)
}

fn embed_test_bundle(
    test_bundle_dir: &Path,
    host_app_dir: &Path,
    test_name: &str,
) -> Result<(), RunnerError> {
    let plugins_dir = host_app_dir.join("PlugIns");
    std::fs::create_dir_all(&plugins_dir)?;
    copy_tree(test_bundle_dir, &plugins_dir.join(format!("{test_name}.xctest")))
}

fn copy_tree(source: &Path, target: &Path) -> Result<(), RunnerError> {
    if !source.exists() {
        return Err(RunnerError::bundle(format!(
            "{} does not exist.",
            source.display()
        )));
    }
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target_path = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target_path)?;
        } else {
            std::fs::copy(entry.path(), &target_path)?;
        }
    }
    Ok(())
}

fn string_array(items: &[String]) -> PlistValue {
    PlistValue::Array(
        items
            .iter()
            .map(|item| PlistValue::String(item.clone()))
            .collect(),
    )
}
