//! Timeout and delay constants for various operations.

use std::time::Duration;

/// Default wall time the startup watchdog allows before the test child is
/// deemed stuck and killed.
pub const XCODEBUILD_STARTUP_TIMEOUT: Duration = Duration::from_secs(150);

/// Interval between watchdog wake-ups.
pub const WATCHDOG_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Interval between simulator state polls.
pub const SIM_STATE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Wait for a freshly created simulator to reach Shutdown.
pub const SIM_CREATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait for a booting simulator to reach Booted.
pub const SIM_BOOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait for a simulator to reach Shutdown.
pub const SIM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between simulator creation attempts.
pub const SIM_CREATE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Pause before relaunching a test on a real device.
pub const DEVICE_RELAUNCH_DELAY: Duration = Duration::from_secs(5);

/// Settle time before tailing the simulator system log.
pub const SIM_LOG_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Upper bound of the random backoff applied after a CoreSimulatorService
/// interruption. Two simulators booting at once can interrupt each other;
/// the jitter keeps retries from colliding again.
pub const INTERRUPTED_BACKOFF_MAX: Duration = Duration::from_secs(2);
