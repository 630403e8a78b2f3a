//! Regular expression patterns for parsing tool output.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// FrontBoard no longer knows the installed app; only recreating the
    /// simulator recovers from this.
    pub static ref APP_UNKNOWN_TO_FRONTBOARD: Regex =
        Regex::new(r#"Application ".*" is unknown to FrontBoard\."#).unwrap();

    /// DTDeviceKit failed to resolve the attached device.
    pub static ref DEVICE_TYPE_WAS_NULL: Regex =
        Regex::new(r"DTDeviceKit: deviceType from .* was NULL").unwrap();

    /// An xctest process died inside the simulator (hostless logic tests).
    pub static ref XCTEST_PROCESS_CRASH_ON_SIM: Regex = Regex::new(
        r"com\.apple\.CoreSimulator\.SimDevice\.[A-Z0-9\-]+(.+) \((.+)xctest\[[0-9]+\]\): Service exited (due to (signal|Terminated|Killed|Abort trap)|with abnormal code)",
    )
    .unwrap();

    /// CoreSimulator itself crashed.
    pub static ref CORESIMULATOR_CRASH: Regex = Regex::new(
        r"com\.apple\.CoreSimulator\.SimDevice\.[A-Z0-9\-]+(.+) \(com\.apple\.CoreSimulator(.+)\): Service exited due to ",
    )
    .unwrap();
}

/// A UIKit application died inside the simulator. Parameterized by bundle id;
/// an empty id matches any UIKitApplication.
pub fn app_crash_on_sim(app_bundle_id: &str) -> Regex {
    Regex::new(&format!(
        r"com\.apple\.CoreSimulator\.SimDevice\.[A-Z0-9\-]+(.+) \(UIKitApplication:{}(.+)\): Service exited (due to (signal|Terminated|Killed|Abort trap)|with abnormal code)",
        regex::escape(app_bundle_id),
    ))
    .unwrap()
}

/// Per-session cache directories under Xcode's EmbeddedAppDeltas root, as
/// they appear in xcodebuild output.
pub fn embedded_app_deltas_dir(cache_root: &str) -> Regex {
    Regex::new(&format!("({}/[a-z0-9]+)/", regex::escape(cache_root))).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontboard_pattern_matches_any_bundle_id() {
        let line = r#"Application "com.example.app" is unknown to FrontBoard."#;
        assert!(APP_UNKNOWN_TO_FRONTBOARD.is_match(line));
        assert!(!APP_UNKNOWN_TO_FRONTBOARD.is_match("Application is unknown"));
    }

    #[test]
    fn app_crash_pattern_is_anchored_to_bundle_id() {
        let log = "Mar  1 10:00:00 host com.apple.CoreSimulator.SimDevice.ABCD-1234 \
                   (UIKitApplication:com.example.app[0x8f2][123]): Service exited due to signal 6";
        assert!(app_crash_on_sim("com.example.app").is_match(log));
        assert!(!app_crash_on_sim("com.other.app").is_match(log));
        // An empty bundle id matches any UIKitApplication crash.
        assert!(app_crash_on_sim("").is_match(log));
    }

    #[test]
    fn xctest_crash_pattern() {
        let log = "May  4 09:00:00 host com.apple.CoreSimulator.SimDevice.ABCD-1234 \
                   (com.apple.xctest[4242]): Service exited with abnormal code: 1";
        assert!(XCTEST_PROCESS_CRASH_ON_SIM.is_match(log));
    }

    #[test]
    fn embedded_app_deltas_pattern_escapes_root() {
        let pattern = embedded_app_deltas_dir("/var/cache/com.apple.DeveloperTools/All/Xcode/EmbeddedAppDeltas");
        let output = "Copying /var/cache/com.apple.DeveloperTools/All/Xcode/EmbeddedAppDeltas/0ab3f9/Payload";
        let captured = pattern
            .captures(output)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        assert_eq!(
            captured.as_deref(),
            Some("/var/cache/com.apple.DeveloperTools/All/Xcode/EmbeddedAppDeltas/0ab3f9")
        );
    }
}
