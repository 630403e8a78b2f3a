//! Fixed strings recognized in tool output.
//!
//! Substring signatures only; signatures that need a regular expression live
//! in [`crate::constants::patterns`].

/// First sign that the test harness is live.
pub const TEST_STARTED_SIGNAL: &str = "Test Suite";

/// The UI-test runner app has come up. Printed before any test suite is
/// announced, so it only proves the harness launched.
pub const XCTRUNNER_STARTED_SIGNAL: &str = "Running tests...";

/// xcodebuild result markers for `test-without-building`.
pub const TEST_EXECUTE_SUCCEEDED_SIGNAL: &str = "** TEST EXECUTE SUCCEEDED **";
pub const TEST_EXECUTE_FAILED_SIGNAL: &str = "** TEST EXECUTE FAILED **";

/// Transient CoreSimulatorService failure; one retry is worthwhile.
pub const CORESIMULATOR_INTERRUPTED_ERROR: &str = "CoreSimulatorService connection interrupted";

/// simctl prints this warning on stderr after an Xcode update; stdout is
/// still authoritative when it appears.
pub const CORESIMULATOR_CHANGE_ERROR: &str =
    "CoreSimulator detected Xcode.app relocation or CoreSimulatorService version change";

/// Simulator failure signatures recognized by the classifier.
pub const BACKGROUND_TEST_RUNNER_ERROR: &str = "Failed to background test runner";
pub const PROCESS_EXITED_OR_CRASHED_ERROR: &str =
    "The process did launch, but has since exited or crashed.";
pub const REQUEST_DENIED_ERROR: &str =
    "The request was denied by service delegate (SBMainWorkspace) for reason";
pub const INIT_SIM_SERVICE_ERROR: &str = "Failed to initiate service connection to simulator";

/// Real-device failure signatures recognized by the classifier.
pub const TOO_MANY_INSTANCES_ERROR: &str = "Too many instances of this service are already running.";
pub const LOST_CONNECTION_TESTMANAGERD_ERROR: &str = "Lost connection to testmanagerd";
pub const LOST_CONNECTION_DTSERVICEHUB_ERROR: &str = "Lost connection to DTServiceHub";

/// Benign simctl errors that are treated as success.
pub const ALREADY_SHUTDOWN_ERROR: &str = "Unable to shutdown device in current state: Shutdown";
