//! Test-session coordination.
//!
//! [`XctestSession`] drives a single test run: it stages artifacts into a
//! workspace, selects a run strategy (xctestrun document or direct logic-test
//! spawn), applies launch options, runs the test against a device, and
//! guarantees workspace cleanup on every exit path.

pub mod bundles;
pub mod logic_test;
pub mod simulator_run;
pub mod xctestrun;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tempfile::TempDir;

use crate::managers::xcode::Xcode;
use crate::models::{ExitCode, LaunchOptions, RunnerError, Sdk, SigningOptions, TestType};
use crate::utils::command_executor::CommandExecutor;
use xctestrun::XctestRun;

/// The modern-toolchain cutoff: xctestrun documents exist from Xcode 8 on.
const XCTESTRUN_MIN_XCODE_VERSION: u32 = 800;

/// A directory the session works in: either pinned by the caller (created
/// if needed, never deleted) or a temp directory deleted on Close.
enum SessionDir {
    Pinned(PathBuf),
    Temp(Option<TempDir>),
}

impl SessionDir {
    fn create(pinned: Option<&Path>) -> Result<Self, RunnerError> {
        match pinned {
            Some(path) => {
                std::fs::create_dir_all(path)?;
                Ok(SessionDir::Pinned(path.canonicalize()?))
            }
            None => Ok(SessionDir::Temp(Some(tempfile::tempdir()?))),
        }
    }

    fn path(&self) -> Result<&Path, RunnerError> {
        match self {
            SessionDir::Pinned(path) => Ok(path),
            SessionDir::Temp(Some(dir)) => Ok(dir.path()),
            SessionDir::Temp(None) => Err(RunnerError::xcodebuild_test(
                "The session has been closed.",
            )),
        }
    }

    /// Deletes a temp directory; pinned directories are left alone.
    /// Idempotent, and an already-absent directory is not an error.
    fn close(&mut self) {
        if let SessionDir::Temp(dir) = self {
            if let Some(dir) = dir.take() {
                let path = dir.path().to_path_buf();
                if let Err(e) = dir.close() {
                    warn!("Failed to remove {}: {e}", path.display());
                }
            }
        }
    }
}

/// Inputs to [`XctestSession::prepare`].
#[derive(Default)]
pub struct PrepareInputs {
    pub app_under_test: Option<PathBuf>,
    pub test_bundle: Option<PathBuf>,
    pub xctestrun_file: Option<PathBuf>,
    pub test_type: Option<TestType>,
    pub signing_options: SigningOptions,
}

enum RunStrategy {
    Xctestrun(XctestRun),
    LogicTest {
        test_bundle: PathBuf,
        env_vars: HashMap<String, String>,
        args: Vec<String>,
        tests_to_run: Vec<String>,
    },
}

/// Coordinates one test run against one device.
pub struct XctestSession {
    sdk: Sdk,
    executor: Arc<dyn CommandExecutor>,
    xcode: Arc<Xcode>,
    work_dir: SessionDir,
    output_dir: SessionDir,
    strategy: Option<RunStrategy>,
    startup_timeout: Option<Duration>,
    destination_timeout: Option<Duration>,
    keep_xcresult_data: bool,
    prepared: bool,
}

impl XctestSession {
    /// Binds a session to a device kind and its working directories. A
    /// directory given by the caller is pinned: it is created if missing
    /// and survives Close.
    pub fn new(
        sdk: Sdk,
        executor: Arc<dyn CommandExecutor>,
        xcode: Arc<Xcode>,
        work_dir: Option<&Path>,
        output_dir: Option<&Path>,
    ) -> Result<Self, RunnerError> {
        Ok(Self {
            sdk,
            executor,
            xcode,
            work_dir: SessionDir::create(work_dir)?,
            output_dir: SessionDir::create(output_dir)?,
            strategy: None,
            startup_timeout: None,
            destination_timeout: None,
            keep_xcresult_data: false,
            prepared: false,
        })
    }

    pub fn executor(&self) -> &Arc<dyn CommandExecutor> {
        &self.executor
    }

    pub fn xcode(&self) -> &Arc<Xcode> {
        &self.xcode
    }

    /// Stages the test artifacts and selects a run strategy.
    ///
    /// With an xctestrun file the bundles are taken as described there.
    /// Otherwise the test bundle is staged and its type finalized; hosted
    /// tests get a generated xctestrun document, hostless logic tests run
    /// by direct spawn. Idempotent per session.
    pub async fn prepare(&mut self, inputs: PrepareInputs) -> Result<(), RunnerError> {
        if self.prepared {
            return Ok(());
        }

        if let Some(xctestrun_file) = &inputs.xctestrun_file {
            let xcode_version = self.xcode.version_number().await?;
            if xcode_version < XCTESTRUN_MIN_XCODE_VERSION {
                return Err(RunnerError::illegal_argument(format!(
                    "The xctestrun file is only supported in Xcode 8+. But current Xcode \
                     version number is {xcode_version}"
                )));
            }
            let run = XctestRun::load(
                xctestrun_file,
                inputs.test_type,
                self.executor.clone(),
                self.xcode.clone(),
            )
            .await?;
            self.strategy = Some(RunStrategy::Xctestrun(run));
            self.prepared = true;
            return Ok(());
        }

        let Some(test_bundle) = &inputs.test_bundle else {
            return Err(RunnerError::illegal_argument(
                "Without providing xctestrun file, test bundle is required.".to_string(),
            ));
        };
        let work_dir = self.work_dir.path()?.to_path_buf();
        let (app_under_test_dir, test_bundle_dir) = bundles::prepare_bundles(
            &self.executor,
            &work_dir,
            inputs.app_under_test.as_deref(),
            test_bundle,
        )
        .await?;
        let test_type = bundles::finalize_test_type(
            &self.executor,
            &test_bundle_dir,
            self.sdk,
            app_under_test_dir.as_deref(),
            inputs.test_type,
        )
        .await?;

        let xcode_version = self.xcode.version_number().await?;
        match test_type {
            TestType::Xctest | TestType::Xcuitest
                if xcode_version >= XCTESTRUN_MIN_XCODE_VERSION =>
            {
                let app_under_test_dir = app_under_test_dir.ok_or_else(|| {
                    RunnerError::illegal_argument(format!(
                        "The app under test is required in test type {test_type}."
                    ))
                })?;
                let run = xctestrun::generate_xctestrun(
                    &self.executor,
                    &self.xcode,
                    &work_dir,
                    &app_under_test_dir,
                    &test_bundle_dir,
                    self.sdk,
                    test_type,
                    &inputs.signing_options,
                )
                .await?;
                self.strategy = Some(RunStrategy::Xctestrun(run));
            }
            TestType::Xcuitest => {
                return Err(RunnerError::illegal_argument(format!(
                    "Only supports running XCUITest under Xcode 8+. Current xcode version \
                     is {xcode_version}"
                )));
            }
            TestType::Xctest => {
                // The legacy build-project scaffolding for pre-8 toolchains
                // is provided by the surrounding build system, not here.
                return Err(RunnerError::illegal_argument(format!(
                    "Running XCTest requires Xcode 8+. Current xcode version is \
                     {xcode_version}"
                )));
            }
            TestType::LogicTest => {
                self.strategy = Some(RunStrategy::LogicTest {
                    test_bundle: test_bundle_dir,
                    env_vars: HashMap::new(),
                    args: Vec::new(),
                    tests_to_run: Vec::new(),
                });
            }
        }
        self.prepared = true;
        Ok(())
    }

    /// Applies launch options to the prepared session.
    pub fn set_launch_options(&mut self, options: LaunchOptions) -> Result<(), RunnerError> {
        if !self.prepared {
            return Err(RunnerError::xcodebuild_test(
                "The session has not been prepared. Please call XctestSession::prepare first.",
            ));
        }
        self.startup_timeout = options.startup_timeout_seconds.map(Duration::from_secs);
        self.destination_timeout = options.destination_timeout_sec.map(Duration::from_secs);
        self.keep_xcresult_data = options.keep_xcresult_data;

        match self.strategy.as_mut() {
            Some(RunStrategy::Xctestrun(run)) => {
                if !options.env_vars.is_empty() {
                    run.set_test_env_vars(&options.env_vars);
                }
                if !options.args.is_empty() {
                    run.set_test_args(&options.args);
                }
                if !options.tests_to_run.is_empty() {
                    run.set_tests_to_run(&options.tests_to_run);
                }
                if !options.skip_tests.is_empty() {
                    run.set_skip_tests(&options.skip_tests);
                }
                if !options.app_under_test_env_vars.is_empty() {
                    run.set_app_under_test_env_vars(&options.app_under_test_env_vars);
                }
                if !options.app_under_test_args.is_empty() {
                    run.set_app_under_test_args(&options.app_under_test_args);
                }
                if options.uitest_auto_screenshots {
                    run.enable_auto_screenshots();
                }
            }
            Some(RunStrategy::LogicTest {
                env_vars,
                args,
                tests_to_run,
                ..
            }) => {
                *env_vars = options.env_vars;
                *args = options.args;
                *tests_to_run = options.tests_to_run;
                if !options.skip_tests.is_empty() {
                    warn!("Logic tests do not support skip_tests; ignoring.");
                }
            }
            None => {}
        }
        Ok(())
    }

    /// Runs the prepared test on the device with the given id.
    ///
    /// Expected test-level failures come back as exit codes; only
    /// programmer error (run before prepare) is raised.
    pub async fn run_test(&mut self, device_id: &str) -> Result<ExitCode, RunnerError> {
        if !self.prepared {
            return Err(RunnerError::xcodebuild_test(
                "The session has not been prepared. Please call XctestSession::prepare first.",
            ));
        }
        match self.strategy.as_ref() {
            Some(RunStrategy::Xctestrun(run)) => {
                let output_dir = self.output_dir.path()?.to_path_buf();
                let exit_code = run
                    .run(
                        device_id,
                        self.sdk,
                        &output_dir,
                        self.startup_timeout,
                        self.destination_timeout,
                    )
                    .await?;
                if !self.keep_xcresult_data {
                    remove_xcresult_bundles(&output_dir);
                }
                info!("Test session ended: {exit_code}");
                Ok(exit_code)
            }
            Some(RunStrategy::LogicTest {
                test_bundle,
                env_vars,
                args,
                tests_to_run,
            }) => {
                let exit_code = logic_test::run_logic_test_on_sim(
                    &self.executor,
                    &self.xcode,
                    device_id,
                    test_bundle,
                    env_vars,
                    args,
                    tests_to_run,
                    None,
                )
                .await?;
                info!("Test session ended: {exit_code}");
                Ok(exit_code)
            }
            None => Err(RunnerError::xcodebuild_test("Unexpected runtime error.")),
        }
    }

    /// Deletes the session's temp directories. Safe to call any number of
    /// times, on every exit path.
    pub fn close(&mut self) {
        self.work_dir.close();
        self.output_dir.close();
    }
}

impl Drop for XctestSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Strips xcresult bundles out of the derived-data directory.
fn remove_xcresult_bundles(output_dir: &Path) {
    let logs_dir = output_dir.join("Logs/Test");
    let Ok(entries) = std::fs::read_dir(&logs_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("xcresult") {
            info!("Removing xcresult bundle {}.", path.display());
            let _ = std::fs::remove_dir_all(&path);
        }
    }
}
