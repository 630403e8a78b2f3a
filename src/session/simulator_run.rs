//! The simulator retry planner.
//!
//! Runs a prepared session against freshly minted simulators, honoring the
//! classified exit codes between attempts: a recreate classification mints
//! a new instance, a reboot classification shuts the current one down and
//! lets the next run boot it again, anything else is final. Simulator
//! resources are torn down on every exit path.

use log::warn;

use crate::constants::limits::SIM_TEST_MAX_ATTEMPTS;
use crate::managers::simulator::{create_new_simulator, quit_simulator_app, Simulator};
use crate::models::{ExitCode, RunnerError};
use crate::session::XctestSession;

/// Xcode versions below this can neither delete a booted simulator nor be
/// trusted to leave Simulator.app alone.
const MODERN_SIMCTL_XCODE_VERSION: u32 = 900;

/// Runs the session on new simulators, retrying within the simulator
/// attempt bound.
pub async fn run_simulator_test(
    session: &mut XctestSession,
    device_type: Option<&str>,
    os_version: Option<&str>,
    name_prefix: Option<&str>,
) -> Result<ExitCode, RunnerError> {
    let executor = session.executor().clone();
    let xcode = session.xcode().clone();
    let legacy_toolchain = xcode.version_number().await? < MODERN_SIMCTL_XCODE_VERSION;

    // Before Xcode 9, `xcodebuild test` launches Simulator.app itself; a
    // second instance already running makes the boot fail.
    if legacy_toolchain {
        quit_simulator_app(&executor).await;
    }

    let mut reboot_sim = false;
    let mut simulator_id = String::new();
    for attempt in 0..SIM_TEST_MAX_ATTEMPTS {
        if !reboot_sim {
            let created =
                create_new_simulator(&executor, &xcode, device_type, os_version, name_prefix)
                    .await?;
            simulator_id = created.id;
        }
        reboot_sim = false;

        // `xcodebuild test` handles booting the simulator itself; launching
        // Simulator.app here would race it.
        let run_result = session.run_test(&simulator_id).await;

        let outcome = match &run_result {
            Ok(ExitCode::NeedRecreateSim) if attempt < SIM_TEST_MAX_ATTEMPTS - 1 => {
                warn!("Will create a new simulator to retry running test.");
                None
            }
            Ok(ExitCode::NeedRebootDevice) if attempt < SIM_TEST_MAX_ATTEMPTS - 1 => {
                warn!("Will reboot the simulator to retry running test.");
                reboot_sim = true;
                None
            }
            _ => Some(()),
        };

        // Teardown runs on every path out of the attempt. Failures are
        // logged rather than raised so they never mask the run result.
        if legacy_toolchain {
            quit_simulator_app(&executor).await;
        }
        let mut simulator = Simulator::new(simulator_id.clone(), executor.clone());
        if reboot_sim {
            if let Err(e) = simulator.shutdown().await {
                warn!("Failed to shut down simulator {simulator_id}: {e}");
            }
        } else {
            if legacy_toolchain {
                // Only a Shutdown simulator can be deleted on old simctl.
                if let Err(e) = simulator.shutdown().await {
                    warn!("Failed to shut down simulator {simulator_id}: {e}");
                }
            }
            if let Err(e) = simulator.delete(true).await {
                warn!("Failed to delete simulator {simulator_id}: {e}");
            }
        }

        if outcome.is_some() {
            return run_result;
        }
    }
    Err(RunnerError::xcodebuild_test("Unexpected runtime error."))
}
