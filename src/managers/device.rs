//! Device resolution.
//!
//! Maps an opaque device id to the SDK of the device it names. Simulators
//! are checked first: `simctl list devices` is much faster than asking
//! `instruments` to enumerate attached hardware.

use std::sync::Arc;

use crate::constants::commands::{simctl, INSTRUMENTS};
use crate::managers::simulator::run_simctl;
use crate::models::{RunnerError, Sdk};
use crate::utils::command_executor::CommandExecutor;

/// Resolves the SDK of the device with the given id.
pub async fn sdk_for_device(
    executor: &Arc<dyn CommandExecutor>,
    device_id: &str,
) -> Result<Sdk, RunnerError> {
    let simulator_list = run_simctl(executor, &[simctl::LIST, simctl::DEVICES]).await?;
    if simulator_list.contains(device_id) {
        return Ok(Sdk::Iphonesimulator);
    }

    let output = executor.output(INSTRUMENTS, &["-s", "devices"]).await?;
    if !output.success() {
        return Err(RunnerError::sim(format!(
            "Failed to list known devices: {}",
            output.combined()
        )));
    }
    for line in output.stdout.lines() {
        if line.contains(device_id) && !line.contains("(Simulator)") {
            return Ok(Sdk::Iphoneos);
        }
    }

    Err(RunnerError::illegal_argument(format!(
        "The device with id {device_id} can not be found. The known devices are:\n{}",
        output.stdout
    )))
}
