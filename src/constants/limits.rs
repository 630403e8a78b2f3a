//! Attempt bounds for retryable operations.

/// Supervisor attempts per session when targeting a simulator.
pub const SIM_TEST_MAX_ATTEMPTS: usize = 3;

/// Supervisor attempts per session when targeting a real device.
pub const DEVICE_TEST_MAX_ATTEMPTS: usize = 2;

/// Attempts to provision a new simulator before giving up.
pub const SIM_CREATE_MAX_ATTEMPTS: usize = 3;

/// Attempts per simctl invocation (one retry on a transient interruption).
pub const SIMCTL_MAX_ATTEMPTS: usize = 2;

/// Lines of the simulator system log inspected for crash signatures.
pub const TAIL_SIM_LOG_LINES: usize = 200;
