//! Command line tools and executables.

/// Xcode command-line tools
pub const XCRUN: &str = "xcrun";
pub const SIMCTL: &str = "simctl";
pub const XCODEBUILD: &str = "xcodebuild";
pub const XCODE_SELECT: &str = "xcode-select";
pub const INSTRUMENTS: &str = "instruments";

/// System tools
pub const PLUTIL: &str = "plutil";
pub const NM: &str = "nm";
pub const LIPO: &str = "lipo";
pub const TAIL: &str = "tail";
pub const GETCONF: &str = "getconf";
pub const KILLALL: &str = "killall";
pub const UNZIP: &str = "unzip";

/// simctl subcommands
pub mod simctl {
    pub const LIST: &str = "list";
    pub const DEVICES: &str = "devices";
    pub const DEVICETYPES: &str = "devicetypes";
    pub const RUNTIMES: &str = "runtimes";
    pub const CREATE: &str = "create";
    pub const BOOT: &str = "boot";
    pub const SHUTDOWN: &str = "shutdown";
    pub const DELETE: &str = "delete";
    pub const SPAWN: &str = "spawn";
    pub const GET_APP_CONTAINER: &str = "get_app_container";
}

/// xcodebuild arguments
pub mod xcodebuild {
    pub const TEST_WITHOUT_BUILDING: &str = "test-without-building";
    pub const XCTESTRUN_ARG: &str = "-xctestrun";
    pub const DESTINATION_ARG: &str = "-destination";
    pub const DESTINATION_TIMEOUT_ARG: &str = "-destination-timeout";
    pub const DERIVED_DATA_PATH_ARG: &str = "-derivedDataPath";
    pub const VERSION_ARG: &str = "-version";
}
