//! The xcodebuild child-process supervisor.
//!
//! [`XcodebuildTestExecutor`] owns exactly one test child per call: it
//! spawns the command, mirrors every output line to the host's stdout,
//! watches for the test-started signal under a startup watchdog, scans for
//! result signals, and classifies failed starts into recovery actions. The
//! relaunch-style retries (bounded per device kind) happen inside
//! [`execute`](XcodebuildTestExecutor::execute); reboot/recreate recoveries
//! are returned to the caller, which owns the simulator lifecycle.

pub mod classifier;
pub mod watchdog;

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

use crate::constants::commands::TAIL;
use crate::constants::env_vars::{NS_UNBUFFERED_IO, YES};
use crate::constants::limits::{
    DEVICE_TEST_MAX_ATTEMPTS, SIM_TEST_MAX_ATTEMPTS, TAIL_SIM_LOG_LINES,
};
use crate::constants::patterns;
use crate::constants::signals::{TEST_STARTED_SIGNAL, XCTRUNNER_STARTED_SIGNAL};
use crate::constants::timeouts::{
    DEVICE_RELAUNCH_DELAY, INTERRUPTED_BACKOFF_MAX, SIM_LOG_SETTLE_DELAY,
    XCODEBUILD_STARTUP_TIMEOUT,
};
use crate::managers::simulator::Simulator;
use crate::managers::xcode::Xcode;
use crate::models::{ExitCode, RunnerError, Sdk, TestType};
use crate::utils::command_executor::CommandExecutor;
use watchdog::StartupWatchdog;

/// Outcome of one supervised run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub exit_code: ExitCode,
    /// Captured child output, when the caller asked for it.
    pub output: Option<String>,
}

/// Executes one testing command through `xcodebuild` and classifies the
/// outcome.
pub struct XcodebuildTestExecutor {
    command: Vec<String>,
    sdk: Option<Sdk>,
    test_type: Option<TestType>,
    device_id: Option<String>,
    succeeded_signal: Option<String>,
    failed_signal: Option<String>,
    app_bundle_id: Option<String>,
    startup_timeout: Duration,
    executor: Arc<dyn CommandExecutor>,
    xcode: Arc<Xcode>,
}

impl XcodebuildTestExecutor {
    pub fn new(
        command: Vec<String>,
        executor: Arc<dyn CommandExecutor>,
        xcode: Arc<Xcode>,
    ) -> Self {
        Self {
            command,
            sdk: None,
            test_type: None,
            device_id: None,
            succeeded_signal: None,
            failed_signal: None,
            app_bundle_id: None,
            startup_timeout: XCODEBUILD_STARTUP_TIMEOUT,
            executor,
            xcode,
        }
    }

    pub fn sdk(mut self, sdk: Sdk) -> Self {
        self.sdk = Some(sdk);
        self
    }

    pub fn test_type(mut self, test_type: TestType) -> Self {
        self.test_type = Some(test_type);
        self
    }

    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Output substrings marking success and failure once the test started.
    pub fn result_signals(
        mut self,
        succeeded_signal: impl Into<String>,
        failed_signal: impl Into<String>,
    ) -> Self {
        self.succeeded_signal = Some(succeeded_signal.into());
        self.failed_signal = Some(failed_signal.into());
        self
    }

    /// Bundle id of the app under test; enables crash-signature matching
    /// and the post-run install probe.
    pub fn app_bundle_id(mut self, app_bundle_id: impl Into<String>) -> Self {
        self.app_bundle_id = Some(app_bundle_id.into());
        self
    }

    pub fn startup_timeout(mut self, startup_timeout: Duration) -> Self {
        self.startup_timeout = startup_timeout;
        self
    }

    /// Runs the test command.
    ///
    /// Returns the classified exit code plus the captured output when
    /// `return_output` is set. Expected test-level failures are encoded in
    /// the exit code, not raised as errors.
    pub async fn execute(&self, return_output: bool) -> Result<ExecutionResult, RunnerError> {
        let max_attempts = match self.sdk {
            Some(Sdk::Iphonesimulator) => SIM_TEST_MAX_ATTEMPTS,
            Some(Sdk::Iphoneos) => DEVICE_TEST_MAX_ATTEMPTS,
            None => 1,
        };
        let sim_log_path = match (&self.sdk, &self.device_id) {
            (Some(Sdk::Iphonesimulator), Some(device_id)) => {
                Simulator::new(device_id.clone(), self.executor.clone())
                    .system_log_path()
                    .ok()
            }
            _ => None,
        };

        let mut test_started = false;
        let mut test_succeeded = false;
        let mut test_failed = false;

        for attempt in 0..max_attempts {
            let (program, args) = self
                .command
                .split_first()
                .ok_or_else(|| RunnerError::xcodebuild_test("The test command is empty."))?;
            debug!("Launching test command: {}", self.command.join(" "));
            let mut child = tokio::process::Command::new(program)
                .args(args)
                .env(NS_UNBUFFERED_IO, YES)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .spawn()?;

            // Both pipes funnel into one ordered line stream.
            let (line_tx, mut line_rx) = mpsc::channel::<String>(256);
            let stdout = child.stdout.take().expect("stdout was configured");
            let stderr = child.stderr.take().expect("stderr was configured");
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
            tokio::spawn(forward_lines(stderr, line_tx));

            let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
            let watchdog = StartupWatchdog::spawn(self.startup_timeout, kill_tx);

            let mut output = String::new();
            loop {
                tokio::select! {
                    maybe_line = line_rx.recv() => {
                        let Some(line) = maybe_line else { break };
                        if !test_started {
                            if line.contains(TEST_STARTED_SIGNAL) {
                                test_started = true;
                                watchdog.terminate();
                            }
                            // The runner app coming up is progress on a
                            // simulator, but on a real device it does not
                            // guarantee the session will start.
                            if self.test_type == Some(TestType::Xcuitest)
                                && self.sdk == Some(Sdk::Iphonesimulator)
                                && line.contains(XCTRUNNER_STARTED_SIGNAL)
                            {
                                watchdog.terminate();
                            }
                        } else {
                            if let Some(signal) = &self.succeeded_signal {
                                if line.contains(signal) {
                                    test_succeeded = true;
                                }
                            }
                            if let Some(signal) = &self.failed_signal {
                                if line.contains(signal) {
                                    test_failed = true;
                                }
                            }
                        }
                        pass_through(&line);
                        // Without return_output the buffer is still needed
                        // for failure classification and cache cleanup.
                        if return_output || !test_started {
                            output.push_str(&line);
                            output.push('\n');
                        }
                    }
                    Some(()) = kill_rx.recv() => {
                        if !test_started {
                            let _ = child.start_kill();
                        }
                    }
                }
            }
            let _ = child.wait().await;
            self.delete_test_cache_dirs(&output).await;

            if test_started {
                let exit_code = if test_succeeded {
                    ExitCode::Succeeded
                } else if test_failed {
                    ExitCode::TestFailed
                } else {
                    ExitCode::GeneralError
                };
                return Ok(wrap(exit_code, output, return_output));
            }

            watchdog.terminate();
            if watchdog.is_fired() {
                // A stuck start on a simulator is worth relaunching; on a
                // real device it indicates the device itself is wedged.
                if self.sdk == Some(Sdk::Iphonesimulator) && attempt < max_attempts - 1 {
                    warn!("The test has not started before the deadline. Will relaunch again.");
                    continue;
                }
                return Ok(self.result_for_stuck(output, return_output));
            }

            if self.sdk == Some(Sdk::Iphoneos) {
                if classifier::device_needs_relaunch(&output) && attempt < max_attempts - 1 {
                    warn!("Failed to launch test on the device. Will relaunch again after 5s.");
                    tokio::time::sleep(DEVICE_RELAUNCH_DELAY).await;
                    continue;
                }
                if classifier::device_needs_reboot(&output) {
                    return Ok(wrap(ExitCode::NeedRebootDevice, output, return_output));
                }
            }

            if self.sdk == Some(Sdk::Iphonesimulator) {
                if classifier::sim_needs_reboot(self.test_type, &output) {
                    return Ok(wrap(ExitCode::NeedRebootDevice, output, return_output));
                }
                if classifier::sim_needs_recreate(&output) {
                    return Ok(wrap(ExitCode::NeedRecreateSim, output, return_output));
                }
                if attempt < max_attempts - 1
                    && self.is_relaunchable_sim_error(&sim_log_path, &output).await
                {
                    warn!("Failed to launch test on simulator. Will relaunch again.");
                    continue;
                }
            }

            return Ok(wrap(ExitCode::TestNotStart, output, return_output));
        }
        Err(RunnerError::xcodebuild_test("Unexpected runtime error."))
    }

    fn result_for_stuck(&self, mut output: String, return_output: bool) -> ExecutionResult {
        let message = format!(
            "xcodebuild command can not launch test on device/simulator in {}s.",
            self.startup_timeout.as_secs()
        );
        error!("{message}");
        output.push_str(&message);
        let exit_code = if self.sdk == Some(Sdk::Iphoneos) {
            ExitCode::NeedRebootDevice
        } else {
            ExitCode::TestNotStart
        };
        wrap(exit_code, output, return_output)
    }

    /// Checks the signatures that a plain relaunch is known to fix.
    async fn is_relaunchable_sim_error(
        &self,
        sim_log_path: &Option<PathBuf>,
        output: &str,
    ) -> bool {
        if let Some(path) = sim_log_path {
            if path.exists() {
                // A short settle lets the system log catch up with the
                // crash that killed the run.
                tokio::time::sleep(SIM_LOG_SETTLE_DELAY).await;
                if let Ok(tail) = self.tail_file(path).await {
                    if classifier::sim_log_shows_launch_crash(
                        self.test_type,
                        &tail,
                        self.app_bundle_id.as_deref(),
                    ) {
                        return true;
                    }
                }
            }
        }
        if classifier::output_shows_launch_crash(output) {
            return true;
        }
        if classifier::output_shows_interruption(output) {
            let backoff_millis =
                rand::thread_rng().gen_range(0..=INTERRUPTED_BACKOFF_MAX.as_millis() as u64);
            let backoff = Duration::from_millis(backoff_millis);
            debug!("CoreSimulatorService interrupted; backing off {backoff:?} before relaunch.");
            tokio::time::sleep(backoff).await;
            return true;
        }
        if let (Some(app_bundle_id), Some(device_id)) = (&self.app_bundle_id, &self.device_id) {
            let simulator = Simulator::new(device_id.clone(), self.executor.clone());
            if !simulator.is_app_installed(app_bundle_id).await {
                return true;
            }
        }
        false
    }

    async fn tail_file(&self, path: &std::path::Path) -> Result<String, RunnerError> {
        let lines_arg = format!("-{TAIL_SIM_LOG_LINES}");
        let path_arg = path.to_string_lossy();
        let output = self
            .executor
            .output(TAIL, &[&lines_arg, path_arg.as_ref()])
            .await?;
        Ok(output.stdout)
    }

    /// Removes this session's EmbeddedAppDeltas cache directories.
    ///
    /// Real-device installs leave one delta directory per installed app: one
    /// for unit tests, two for UI tests (app under test plus runner app).
    async fn delete_test_cache_dirs(&self, output: &str) {
        if self.sdk != Some(Sdk::Iphoneos) {
            return;
        }
        let max_cache_dirs = if self.test_type == Some(TestType::Xcuitest) {
            2
        } else {
            1
        };
        let cache_root = match self.xcode.embedded_app_deltas_dir().await {
            Ok(dir) => dir,
            Err(e) => {
                debug!("Skipping cache cleanup, no cache root: {e}");
                return;
            }
        };
        let pattern = patterns::embedded_app_deltas_dir(&cache_root.to_string_lossy());
        let mut cache_dirs = HashSet::new();
        for captures in pattern.captures_iter(output) {
            if cache_dirs.len() >= max_cache_dirs {
                break;
            }
            if let Some(dir) = captures.get(1) {
                cache_dirs.insert(dir.as_str().to_string());
            }
        }
        for cache_dir in cache_dirs {
            let path = std::path::Path::new(&cache_dir);
            if path.exists() {
                info!("Removing cache files directory: {cache_dir}");
                let _ = std::fs::remove_dir_all(path);
            }
        }
    }
}

fn wrap(exit_code: ExitCode, output: String, return_output: bool) -> ExecutionResult {
    ExecutionResult {
        exit_code,
        output: return_output.then_some(output),
    }
}

/// Mirrors a child output line to the host's stdout before it is scanned.
fn pass_through(line: &str) {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    let _ = writeln!(lock, "{line}");
    let _ = lock.flush();
}

async fn forward_lines<R>(stream: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}
