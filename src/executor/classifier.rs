//! Failure classification for runs whose test never started.
//!
//! Each predicate inspects the captured child output (or the simulator
//! system-log tail) for a known failure signature. The supervisor evaluates
//! them in a fixed order and maps hits to recovery actions: relaunch the
//! test, reboot the device, or recreate the simulator.

use crate::constants::patterns;
use crate::constants::signals::{
    BACKGROUND_TEST_RUNNER_ERROR, CORESIMULATOR_INTERRUPTED_ERROR, INIT_SIM_SERVICE_ERROR,
    LOST_CONNECTION_DTSERVICEHUB_ERROR, LOST_CONNECTION_TESTMANAGERD_ERROR,
    PROCESS_EXITED_OR_CRASHED_ERROR, REQUEST_DENIED_ERROR, TOO_MANY_INSTANCES_ERROR,
};
use crate::managers::simulator;
use crate::models::TestType;

/// Real device: connection-level flakes that a plain relaunch fixes.
pub fn device_needs_relaunch(output: &str) -> bool {
    patterns::DEVICE_TYPE_WAS_NULL.is_match(output)
        || output.contains(LOST_CONNECTION_TESTMANAGERD_ERROR)
        || output.contains(LOST_CONNECTION_DTSERVICEHUB_ERROR)
}

/// Real device: the device's service table is exhausted; only a reboot
/// clears it.
pub fn device_needs_reboot(output: &str) -> bool {
    output.contains(TOO_MANY_INSTANCES_ERROR)
}

/// Simulator: the UI-test runner could not be backgrounded; rebooting the
/// simulator recovers.
pub fn sim_needs_reboot(test_type: Option<TestType>, output: &str) -> bool {
    test_type == Some(TestType::Xcuitest) && output.contains(BACKGROUND_TEST_RUNNER_ERROR)
}

/// Simulator: the instance is wedged beyond repair; only a fresh one helps.
pub fn sim_needs_recreate(output: &str) -> bool {
    patterns::APP_UNKNOWN_TO_FRONTBOARD.is_match(output)
        || output.contains(REQUEST_DENIED_ERROR)
        || output.contains(INIT_SIM_SERVICE_ERROR)
}

/// Simulator system log: the test or app process crashed at launch. Which
/// crash pattern applies depends on whether the test runs hosted or as a
/// bare xctest process.
pub fn sim_log_shows_launch_crash(
    test_type: Option<TestType>,
    sim_log_tail: &str,
    app_bundle_id: Option<&str>,
) -> bool {
    let process_crashed = if test_type == Some(TestType::LogicTest) {
        simulator::is_xctest_failed_to_launch_on_sim(sim_log_tail)
    } else {
        simulator::is_app_failed_to_launch_on_sim(sim_log_tail, app_bundle_id.unwrap_or(""))
    };
    process_crashed || simulator::is_core_simulator_crash(sim_log_tail)
}

/// Simulator: the app process launched but died immediately.
pub fn output_shows_launch_crash(output: &str) -> bool {
    output.contains(PROCESS_EXITED_OR_CRASHED_ERROR)
}

/// Simulator: CoreSimulatorService dropped the connection mid-run.
pub fn output_shows_interruption(output: &str) -> bool {
    output.contains(CORESIMULATOR_INTERRUPTED_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_relaunch_signatures() {
        assert!(device_needs_relaunch(
            "2019-01-01 DTDeviceKit: deviceType from 1ab2c3 was NULL"
        ));
        assert!(device_needs_relaunch("... Lost connection to testmanagerd ..."));
        assert!(device_needs_relaunch("... Lost connection to DTServiceHub ..."));
        assert!(!device_needs_relaunch("all good"));
    }

    #[test]
    fn device_reboot_signature() {
        assert!(device_needs_reboot(
            "Too many instances of this service are already running."
        ));
        assert!(!device_needs_reboot("Lost connection to testmanagerd"));
    }

    #[test]
    fn sim_reboot_requires_uitest() {
        let output = "Failed to background test runner";
        assert!(sim_needs_reboot(Some(TestType::Xcuitest), output));
        assert!(!sim_needs_reboot(Some(TestType::Xctest), output));
        assert!(!sim_needs_reboot(None, output));
    }

    #[test]
    fn sim_recreate_signatures() {
        assert!(sim_needs_recreate(
            r#"Application "com.example.app" is unknown to FrontBoard."#
        ));
        assert!(sim_needs_recreate(
            "The request was denied by service delegate (SBMainWorkspace) for reason: Busy"
        ));
        assert!(sim_needs_recreate(
            "Failed to initiate service connection to simulator"
        ));
        assert!(!sim_needs_recreate("Failed to background test runner"));
    }

    #[test]
    fn crash_pattern_depends_on_test_type() {
        let app_crash = "com.apple.CoreSimulator.SimDevice.AB12-CD34 x \
                         (UIKitApplication:com.example.app[0x1][9]): Service exited due to signal 9";
        let xctest_crash = "com.apple.CoreSimulator.SimDevice.AB12-CD34 x \
                            (io.test.xctest[42]): Service exited due to Terminated";
        assert!(sim_log_shows_launch_crash(
            Some(TestType::Xctest),
            app_crash,
            Some("com.example.app")
        ));
        assert!(!sim_log_shows_launch_crash(
            Some(TestType::LogicTest),
            app_crash,
            None
        ));
        assert!(sim_log_shows_launch_crash(
            Some(TestType::LogicTest),
            xctest_crash,
            None
        ));
    }
}
