//! Environment variable names used by the application.

/// Prefix that `simctl spawn` strips before handing a variable to the
/// spawned process inside the simulator.
pub const SIMCTL_CHILD_PREFIX: &str = "SIMCTL_CHILD_";

/// Forces line-buffered output from the test child.
pub const NS_UNBUFFERED_IO: &str = "NSUnbufferedIO";
pub const YES: &str = "YES";

/// Active developer directory override honored by xcrun.
pub const DEVELOPER_DIR: &str = "DEVELOPER_DIR";

/// dyld search path fallbacks for Swift runtime libraries.
pub const DYLD_FALLBACK_LIBRARY_PATH: &str = "DYLD_FALLBACK_LIBRARY_PATH";
pub const DYLD_FALLBACK_FRAMEWORK_PATH: &str = "DYLD_FALLBACK_FRAMEWORK_PATH";

/// Logging variables
pub const RUST_LOG: &str = "RUST_LOG";
