//! Simulator lifecycle management.
//!
//! This module owns the full lifecycle of one ephemeral simulator: creation
//! with device-type/OS defaulting, boot, shutdown, deletion and state
//! queries, all driven through `xcrun simctl`. The persisted `device.plist`
//! is the single source of truth for state; every transition re-reads it
//! until the target state appears or a deadline passes.
//!
//! # simctl Command Reference
//!
//! ```bash
//! # Create (returns the new UDID; state goes Creating -> Shutdown)
//! xcrun simctl create "New-iPhone 8-12.2" "iPhone 8" \
//!     com.apple.CoreSimulator.SimRuntime.iOS-12-2
//!
//! # Boot / shutdown / delete
//! xcrun simctl boot {UUID}
//! xcrun simctl shutdown {UUID}   # errors if already Shutdown - tolerated
//! xcrun simctl delete {UUID}     # Xcode 9+: legal from any state
//!
//! # Listings consumed as JSON
//! xcrun simctl list devicetypes -j   # devicetypes[*].name
//! xcrun simctl list runtimes -j      # runtimes[*].{name,bundlePath,isAvailable,availability}
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDateTime;
use log::{debug, info, warn};

use crate::constants::commands::{simctl, KILLALL, SIMCTL, XCRUN};
use crate::constants::limits::{SIMCTL_MAX_ATTEMPTS, SIM_CREATE_MAX_ATTEMPTS};
use crate::constants::patterns;
use crate::constants::signals::{
    ALREADY_SHUTDOWN_ERROR, CORESIMULATOR_CHANGE_ERROR, CORESIMULATOR_INTERRUPTED_ERROR,
};
use crate::constants::timeouts::{
    SIM_BOOT_TIMEOUT, SIM_CREATE_RETRY_DELAY, SIM_CREATE_TIMEOUT, SIM_SHUTDOWN_TIMEOUT,
    SIM_STATE_POLL_INTERVAL,
};
use crate::managers::profile::SimTypeProfile;
use crate::managers::xcode::Xcode;
use crate::models::version::os_version_value;
use crate::models::{Os, RunnerError, SimState};
use crate::utils::command_executor::CommandExecutor;
use crate::utils::plist::Plist;

const RUNTIME_ID_PREFIX: &str = "com.apple.CoreSimulator.SimRuntime.";
const DEFAULT_NAME_PREFIX: &str = "New";

/// Runs a simctl command, retrying once on a transient CoreSimulatorService
/// interruption.
///
/// When simctl reports an Xcode relocation or CoreSimulatorService version
/// change on stderr, only stdout is authoritative; otherwise stdout and
/// stderr are combined. Never loops more than twice.
pub async fn run_simctl(
    executor: &Arc<dyn CommandExecutor>,
    args: &[&str],
) -> Result<String, RunnerError> {
    let mut full_args = vec![SIMCTL];
    full_args.extend_from_slice(args);
    let mut last_output = String::new();
    for attempt in 0..SIMCTL_MAX_ATTEMPTS {
        let output = executor.output(XCRUN, &full_args).await?;
        let text = if output.stderr.contains(CORESIMULATOR_CHANGE_ERROR) {
            output.stdout.trim().to_string()
        } else {
            output.combined()
        };
        if output.success() {
            return Ok(text);
        }
        if attempt < SIMCTL_MAX_ATTEMPTS - 1 && text.contains(CORESIMULATOR_INTERRUPTED_ERROR) {
            debug!("CoreSimulatorService interrupted, retrying: simctl {args:?}");
            last_output = text;
            continue;
        }
        return Err(RunnerError::sim(text));
    }
    Err(RunnerError::sim(last_output))
}

/// Quits the Simulator.app.
pub async fn quit_simulator_app(executor: &Arc<dyn CommandExecutor>) {
    let _ = executor.spawn_detached(KILLALL, &["Simulator"]).await;
}

/// Restarts SpringBoard in all booted simulators.
pub async fn respring_all_simulators(executor: &Arc<dyn CommandExecutor>) {
    let _ = executor.spawn_detached(KILLALL, &["-HUP", "SpringBoard"]).await;
}

/// Checks the simulator system log for a UIKit application crash. An empty
/// bundle id matches any application.
pub fn is_app_failed_to_launch_on_sim(sim_sys_log: &str, app_bundle_id: &str) -> bool {
    patterns::app_crash_on_sim(app_bundle_id).is_match(sim_sys_log)
}

/// Checks the simulator system log for a crashed xctest process.
pub fn is_xctest_failed_to_launch_on_sim(sim_sys_log: &str) -> bool {
    patterns::XCTEST_PROCESS_CRASH_ON_SIM.is_match(sim_sys_log)
}

/// Checks the simulator system log for a CoreSimulator crash.
pub fn is_core_simulator_crash(sim_sys_log: &str) -> bool {
    patterns::CORESIMULATOR_CRASH.is_match(sim_sys_log)
}

/// A simulator instance addressed by its UDID.
///
/// Deletion consumes the identity: any later operation on the same handle
/// reports a simulator error.
pub struct Simulator {
    id: Option<String>,
    executor: Arc<dyn CommandExecutor>,
    devices_root: PathBuf,
    logs_root: PathBuf,
}

impl Simulator {
    pub fn new(id: impl Into<String>, executor: Arc<dyn CommandExecutor>) -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        Self::with_roots(
            id,
            executor,
            home.join("Library/Developer/CoreSimulator/Devices"),
            home.join("Library/Logs/CoreSimulator"),
        )
    }

    /// Overrides the on-disk roots. Production code always uses the home
    /// directory defaults; tests point this at a scratch directory.
    pub fn with_roots(
        id: impl Into<String>,
        executor: Arc<dyn CommandExecutor>,
        devices_root: PathBuf,
        logs_root: PathBuf,
    ) -> Self {
        Self {
            id: Some(id.into()),
            executor,
            devices_root,
            logs_root,
        }
    }

    pub fn id(&self) -> Result<&str, RunnerError> {
        self.id.as_deref().ok_or_else(|| {
            RunnerError::sim("The simulator has not been created or has been deleted.".to_string())
        })
    }

    /// The simulator's root directory under the CoreSimulator devices tree.
    pub fn root_dir(&self) -> Result<PathBuf, RunnerError> {
        Ok(self.devices_root.join(self.id()?))
    }

    /// The root directory of the simulator's logs.
    pub fn log_root_dir(&self) -> Result<PathBuf, RunnerError> {
        Ok(self.logs_root.join(self.id()?))
    }

    pub fn system_log_path(&self) -> Result<PathBuf, RunnerError> {
        Ok(self.log_root_dir()?.join("system.log"))
    }

    fn device_plist(&self) -> Result<Plist, RunnerError> {
        Ok(Plist::new(
            self.root_dir()?.join("device.plist"),
            self.executor.clone(),
        ))
    }

    /// Reads the current state from the persisted `device.plist`.
    ///
    /// A missing plist means provisioning has not finished (Creating); an
    /// unrecognized state code is reported as Unknown.
    pub async fn state(&self) -> Result<SimState, RunnerError> {
        let plist = self.device_plist()?;
        if !plist.path().exists() {
            return Ok(SimState::Creating);
        }
        let state = plist.get_field("state").await?;
        let code = state.as_i64().ok_or_else(|| {
            RunnerError::plist(format!("Unexpected state value in device.plist: {state:?}"))
        })?;
        let state = SimState::from_plist_code(code);
        if state == SimState::Unknown {
            warn!(
                "The state {} of simulator {} can not be recognized.",
                code,
                self.id()?
            );
        }
        Ok(state)
    }

    /// Boots the simulator and blocks until it reports Booted.
    ///
    /// When a language is given, the AppleLanguages preference is written
    /// first and SpringBoard respringed so the new locale takes effect.
    pub async fn boot(&self, language: Option<&str>) -> Result<(), RunnerError> {
        run_simctl(&self.executor, &[simctl::BOOT, self.id()?]).await?;
        if let Some(language) = language {
            run_simctl(
                &self.executor,
                &[
                    simctl::SPAWN,
                    self.id()?,
                    "defaults",
                    "write",
                    "Apple Global Domain",
                    "AppleLanguages",
                    "-array",
                    language,
                ],
            )
            .await?;
            respring_all_simulators(&self.executor).await;
        }
        self.wait_until_booted(SIM_BOOT_TIMEOUT).await?;
        info!("The simulator {} is booted.", self.id()?);
        Ok(())
    }

    /// Shuts down the simulator and blocks until it reports Shutdown.
    /// Idempotent: an already-Shutdown simulator succeeds silently.
    pub async fn shutdown(&self) -> Result<(), RunnerError> {
        match self.state().await? {
            SimState::Shutdown => {
                info!("Simulator {} has already shut down.", self.id()?);
                return Ok(());
            }
            SimState::Creating => {
                return Err(RunnerError::sim(
                    "Can not shut down the simulator in state CREATING.".to_string(),
                ));
            }
            _ => {}
        }
        info!("Shutting down simulator {}.", self.id()?);
        if let Err(e) = run_simctl(&self.executor, &[simctl::SHUTDOWN, self.id()?]).await {
            if e.to_string().contains(ALREADY_SHUTDOWN_ERROR) {
                info!("Simulator {} has already shut down.", self.id()?);
                return Ok(());
            }
            return Err(RunnerError::sim(format!(
                "Failed to shutdown simulator {}: {e}",
                self.id()?
            )));
        }
        self.wait_until_shutdown(SIM_SHUTDOWN_TIMEOUT).await?;
        info!("Shut down simulator {}.", self.id()?);
        Ok(())
    }

    /// Deletes the simulator and removes its log directory.
    ///
    /// The asynchronous variant detaches the delete and does not block on
    /// it; the synchronous variant reports failure. Either way the handle's
    /// identity is consumed.
    pub async fn delete(&mut self, asynchronously: bool) -> Result<(), RunnerError> {
        let id = self.id()?.to_string();
        if asynchronously {
            info!("Deleting simulator {id} asynchronously.");
            self.executor
                .spawn_detached(XCRUN, &[SIMCTL, simctl::DELETE, &id])
                .await
                .map_err(|e| RunnerError::sim(format!("Failed to delete simulator {id}: {e}")))?;
        } else {
            run_simctl(&self.executor, &[simctl::DELETE, &id])
                .await
                .map_err(|e| RunnerError::sim(format!("Failed to delete simulator {id}: {e}")))?;
            info!("Deleted simulator {id}.");
        }
        // The delete command won't delete the simulator log directory.
        let log_dir = self.log_root_dir()?;
        if log_dir.exists() {
            let _ = std::fs::remove_dir_all(&log_dir);
        }
        self.id = None;
        Ok(())
    }

    /// Captures the simulator system log into the given file via the `log`
    /// tool running inside the simulator.
    pub async fn fetch_log_to_file(
        &self,
        output_file_path: &std::path::Path,
        start_time: Option<NaiveDateTime>,
        end_time: Option<NaiveDateTime>,
    ) -> Result<(), RunnerError> {
        let id = self.id()?;
        let mut args: Vec<String> = vec![
            simctl::SPAWN.to_string(),
            id.to_string(),
            "log".to_string(),
            "show".to_string(),
            "--style".to_string(),
            "syslog".to_string(),
        ];
        if let Some(start) = start_time {
            args.push("--start".to_string());
            args.push(start.format("%Y-%m-%d %H:%M:%S").to_string());
        }
        if let Some(end) = end_time {
            args.push("--end".to_string());
            args.push(end.format("%Y-%m-%d %H:%M:%S").to_string());
        }
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let log_text = run_simctl(&self.executor, &arg_refs)
            .await
            .map_err(|e| RunnerError::sim(format!("Failed to get log on simulator {id}: {e}")))?;
        std::fs::write(output_file_path, log_text)?;
        Ok(())
    }

    /// Checks if the app with the given bundle id is installed.
    pub async fn is_app_installed(&self, app_bundle_id: &str) -> bool {
        match self.id() {
            Ok(id) => run_simctl(
                &self.executor,
                &[simctl::GET_APP_CONTAINER, id, app_bundle_id],
            )
            .await
            .is_ok(),
            Err(_) => false,
        }
    }

    /// The Documents directory of the app's data container.
    pub async fn app_documents_path(&self, app_bundle_id: &str) -> Result<PathBuf, RunnerError> {
        let id = self.id()?;
        let container = run_simctl(
            &self.executor,
            &[simctl::GET_APP_CONTAINER, id, app_bundle_id, "data"],
        )
        .await
        .map_err(|e| {
            RunnerError::sim(format!(
                "Failed to get data container of the app {app_bundle_id} in simulator {id}: {e}"
            ))
        })?;
        Ok(PathBuf::from(container.trim()).join("Documents"))
    }

    pub async fn wait_until_booted(
        &self,
        timeout: std::time::Duration,
    ) -> Result<(), RunnerError> {
        self.wait_until_state(SimState::Booted, timeout, "booted")
            .await
    }

    pub async fn wait_until_shutdown(
        &self,
        timeout: std::time::Duration,
    ) -> Result<(), RunnerError> {
        self.wait_until_state(SimState::Shutdown, timeout, "shutdown")
            .await
    }

    async fn wait_until_state(
        &self,
        target: SimState,
        timeout: std::time::Duration,
        verb: &str,
    ) -> Result<(), RunnerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() <= deadline {
            tokio::time::sleep(SIM_STATE_POLL_INTERVAL).await;
            if self.state().await? == target {
                return Ok(());
            }
        }
        Err(RunnerError::sim(format!(
            "Timeout to wait for simulator {verb} in {}s.",
            timeout.as_secs()
        )))
    }
}

/// A freshly provisioned simulator.
#[derive(Debug, Clone)]
pub struct NewSimulator {
    pub id: String,
    pub device_type: String,
    pub os_version: String,
    pub name: String,
}

/// Creates a new simulator, filling in defaults for whatever was not given.
///
/// With neither device type nor OS version, the newest iPhone compatible
/// with the newest runtime is picked. With only an OS version, the newest
/// iPhone whose minimum OS allows it is picked. With only a device type, the
/// newest runtime the device supports is picked.
///
/// A created instance must report Shutdown within a bounded window;
/// otherwise it is rolled back and creation retried.
pub async fn create_new_simulator(
    executor: &Arc<dyn CommandExecutor>,
    xcode: &Xcode,
    device_type: Option<&str>,
    os_version: Option<&str>,
    name_prefix: Option<&str>,
) -> Result<NewSimulator, RunnerError> {
    let os_type = match device_type {
        None => Os::Ios,
        Some(device_type) => {
            validate_device_type(executor, device_type).await?;
            os_type_of_device(device_type)?
        }
    };
    let os_version = match os_version {
        None => last_supported_os_version(executor, xcode, os_type, device_type).await?,
        Some(requested) => {
            let supported = supported_os_versions(executor, xcode, os_type).await?;
            if !supported.iter().any(|v| v == requested) {
                return Err(RunnerError::illegal_argument(format!(
                    "The simulator os version {requested} is not supported. Supported \
                     simulator os versions are {supported:?}."
                )));
            }
            requested.to_string()
        }
    };
    let device_type = match device_type {
        Some(device_type) => {
            validate_device_type_with_os_version(executor, xcode, device_type, &os_version).await?;
            device_type.to_string()
        }
        None => last_supported_iphone_type(executor, xcode, &os_version).await?,
    };
    let name = format!(
        "{}-{}-{}",
        name_prefix.unwrap_or(DEFAULT_NAME_PREFIX),
        device_type,
        os_version
    );

    // Runtime id of iOS 10.2: com.apple.CoreSimulator.SimRuntime.iOS-10-2
    let runtime_id = format!(
        "{RUNTIME_ID_PREFIX}{}-{}",
        os_type,
        os_version.replace('.', "-")
    );
    info!("Creating a new simulator:\nName: {name}\nOS: {os_type} {os_version}\nType: {device_type}");
    for attempt in 0..SIM_CREATE_MAX_ATTEMPTS {
        let new_id = run_simctl(executor, &[simctl::CREATE, &name, &device_type, &runtime_id])
            .await
            .map_err(|e| RunnerError::sim(format!("Failed to create simulator: {e}")))?;
        let mut new_simulator = Simulator::new(new_id.clone(), executor.clone());
        // A new simulator starts in Creating; it is usable once the
        // persisted state reaches Shutdown.
        match new_simulator.wait_until_shutdown(SIM_CREATE_TIMEOUT).await {
            Ok(()) => {
                info!("Created new simulator {new_id}.");
                return Ok(NewSimulator {
                    id: new_id,
                    device_type,
                    os_version,
                    name,
                });
            }
            Err(error) => {
                debug!("Failed to create simulator {new_id}: {error}.");
                let _ = new_simulator.delete(true).await;
                debug!("Deleted half-created simulator {new_id}.");
                if attempt != SIM_CREATE_MAX_ATTEMPTS - 1 {
                    // A stuck CoreSimulatorService usually clears after a
                    // short pause.
                    tokio::time::sleep(SIM_CREATE_RETRY_DELAY).await;
                }
            }
        }
    }
    Err(RunnerError::sim(format!(
        "Failed to create simulator in {SIM_CREATE_MAX_ATTEMPTS} attempts."
    )))
}

/// Names of supported simulator device types, optionally filtered by OS.
pub async fn supported_device_types(
    executor: &Arc<dyn CommandExecutor>,
    os_type: Option<Os>,
) -> Result<Vec<String>, RunnerError> {
    let output = run_simctl(executor, &[simctl::LIST, simctl::DEVICETYPES, "-j"]).await?;
    let json: serde_json::Value = serde_json::from_str(&output)?;
    let mut device_types = Vec::new();
    if let Some(entries) = json.get("devicetypes").and_then(|v| v.as_array()) {
        for entry in entries {
            let Some(name) = entry.get("name").and_then(|v| v.as_str()) else {
                continue;
            };
            let matches = match os_type {
                None => true,
                Some(Os::Ios) => name.starts_with('i'),
                Some(Os::TvOs) => name.contains("TV"),
                Some(Os::WatchOs) => name.contains("Watch"),
            };
            if matches {
                device_types.push(name.to_string());
            }
        }
    }
    Ok(device_types)
}

/// Supported runtime versions of the given OS family, oldest first.
///
/// Runtimes are skipped when marked unavailable, when their bundle requires
/// a newer Xcode (`DTXcode` of the runtime bundle's Info.plist), or - for
/// listings without a bundle path - when the version exceeds what this
/// Xcode can host.
pub async fn supported_os_versions(
    executor: &Arc<dyn CommandExecutor>,
    xcode: &Xcode,
    os_type: Os,
) -> Result<Vec<String>, RunnerError> {
    let xcode_version = xcode.version_number().await?;
    let output = run_simctl(executor, &[simctl::LIST, simctl::RUNTIMES, "-j"]).await?;
    let json: serde_json::Value = serde_json::from_str(&output)?;
    let mut versions = Vec::new();
    let Some(runtimes) = json.get("runtimes").and_then(|v| v.as_array()) else {
        return Ok(versions);
    };
    for runtime in runtimes {
        // The listing normally omits unavailable runtimes; check both
        // availability fields anyway.
        if runtime
            .get("availability")
            .and_then(|v| v.as_str())
            .is_some_and(|a| a.contains("unavailable"))
        {
            continue;
        }
        if runtime
            .get("isAvailable")
            .is_some_and(|v| v.as_bool() == Some(false))
        {
            continue;
        }
        let Some(name) = runtime.get("name").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some((listed_os, listed_version)) = name.split_once(' ') else {
            continue;
        };
        if listed_os != os_type.display_name() {
            continue;
        }
        if let Some(bundle_path) = runtime.get("bundlePath").and_then(|v| v.as_str()) {
            let info_plist = Plist::new(
                PathBuf::from(bundle_path).join("Contents/Info.plist"),
                executor.clone(),
            );
            // DTXcode is a zero-padded string, e.g. "0830" for Xcode 8.3.
            let field = info_plist.get_field("DTXcode").await?;
            let min_xcode = match &field {
                crate::utils::plist::PlistValue::String(s) => s.trim().parse::<i64>().ok(),
                other => other.as_i64(),
            }
            .ok_or_else(|| RunnerError::plist(format!("Unexpected DTXcode value: {field:?}")))?;
            if (xcode_version as i64) >= min_xcode {
                versions.push(listed_version.to_string());
            }
        } else {
            // Old listings carry no bundle path; fall back to the rule that
            // one Xcode hosts runtimes up to roughly its version + 200.
            if os_type == Os::Ios {
                let packed = crate::models::version::version_number(listed_version)? / 10 * 10;
                if packed > xcode_version + 200 {
                    continue;
                }
            }
            versions.push(listed_version.to_string());
        }
    }
    Ok(versions)
}

/// The newest supported OS version, bounded by the device type's profile
/// when one is given.
pub async fn last_supported_os_version(
    executor: &Arc<dyn CommandExecutor>,
    xcode: &Xcode,
    os_type: Os,
    device_type: Option<&str>,
) -> Result<String, RunnerError> {
    let supported = supported_os_versions(executor, xcode, os_type).await?;
    let Some(newest) = supported.last().cloned() else {
        return Err(RunnerError::sim(format!(
            "Can not find supported OS version of {os_type}."
        )));
    };
    let Some(device_type) = device_type else {
        return Ok(newest);
    };
    let max_os_version = SimTypeProfile::new(device_type, executor.clone(), xcode)
        .max_os_version()
        .await?;
    let Some(max_os_version) = max_os_version else {
        return Ok(newest);
    };
    for version in supported.iter().rev() {
        if os_version_value(version)? <= max_os_version {
            return Ok(version.clone());
        }
    }
    Err(RunnerError::illegal_argument(format!(
        "The supported OS versions {supported:?} can not match simulator type {device_type}. \
         Because its max OS version is {max_os_version}"
    )))
}

/// The newest iPhone device type whose minimum OS allows the given version.
pub async fn last_supported_iphone_type(
    executor: &Arc<dyn CommandExecutor>,
    xcode: &Xcode,
    os_version: &str,
) -> Result<String, RunnerError> {
    let requested = os_version_value(os_version)?;
    let device_types = supported_device_types(executor, Some(Os::Ios)).await?;
    for device_type in device_types.iter().rev() {
        if !device_type.starts_with("iPhone") {
            continue;
        }
        let min_os_version = SimTypeProfile::new(device_type, executor.clone(), xcode)
            .min_os_version()
            .await?;
        if requested >= min_os_version {
            return Ok(device_type.clone());
        }
    }
    Err(RunnerError::sim(
        "Can not find supported iPhone simulator type.".to_string(),
    ))
}

/// The OS family a device type belongs to.
pub fn os_type_of_device(device_type: &str) -> Result<Os, RunnerError> {
    if device_type.starts_with('i') {
        return Ok(Os::Ios);
    }
    if device_type.contains("TV") {
        return Ok(Os::TvOs);
    }
    if device_type.contains("Watch") {
        return Ok(Os::WatchOs);
    }
    Err(RunnerError::illegal_argument(format!(
        "Failed to recognize the os type for simulator device type {device_type}."
    )))
}

async fn validate_device_type(
    executor: &Arc<dyn CommandExecutor>,
    device_type: &str,
) -> Result<(), RunnerError> {
    let supported = supported_device_types(executor, None).await?;
    if !supported.iter().any(|t| t == device_type) {
        return Err(RunnerError::illegal_argument(format!(
            "The simulator device type {device_type} is not supported. Supported simulator \
             device types are {supported:?}."
        )));
    }
    Ok(())
}

async fn validate_device_type_with_os_version(
    executor: &Arc<dyn CommandExecutor>,
    xcode: &Xcode,
    device_type: &str,
    os_version: &str,
) -> Result<(), RunnerError> {
    let requested = os_version_value(os_version)?;
    let profile = SimTypeProfile::new(device_type, executor.clone(), xcode);
    let min_os_version = profile.min_os_version().await?;
    if min_os_version > requested {
        return Err(RunnerError::illegal_argument(format!(
            "The min OS version of {device_type} is {min_os_version}. But current OS \
             version is {os_version}"
        )));
    }
    if let Some(max_os_version) = profile.max_os_version().await? {
        if max_os_version < requested {
            return Err(RunnerError::illegal_argument(format!(
                "The max OS version of {device_type} is {max_os_version}. But current OS \
                 version is {os_version}"
            )));
        }
    }
    Ok(())
}
