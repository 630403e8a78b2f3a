//! Launch-options and signing-options documents.
//!
//! Both documents are JSON files supplied on the command line. Unknown keys
//! are rejected so a typo in a CI config fails loudly instead of silently
//! dropping an option.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::models::RunnerError;

/// Options of launching the test, loaded from `--launch_options_json_path`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LaunchOptions {
    /// Additional environment variables for the test process.
    #[serde(default)]
    pub env_vars: HashMap<String, String>,

    /// Additional arguments for the test process.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables for the app under test's process. In xctest the
    /// app under test hosts the tests, so these merge with `env_vars`; in
    /// xcuitest the two processes are distinct.
    #[serde(default)]
    pub app_under_test_env_vars: HashMap<String, String>,

    /// Arguments for the app under test's process.
    #[serde(default)]
    pub app_under_test_args: Vec<String>,

    /// Keep the xcresult bundle produced by the run in the output directory.
    #[serde(default)]
    pub keep_xcresult_data: bool,

    /// Specific tests to run, each `TestClass[/TestMethod]`.
    #[serde(default)]
    pub tests_to_run: Vec<String>,

    /// Specific tests to skip, same shape. Logic tests do not support it.
    #[serde(default)]
    pub skip_tests: Vec<String>,

    /// Capture screenshots automatically in UI tests.
    #[serde(default)]
    pub uitest_auto_screenshots: bool,

    /// Seconds until the xcodebuild command is deemed stuck.
    #[serde(default)]
    pub startup_timeout_seconds: Option<u64>,

    /// Seconds to wait while searching for the destination device.
    #[serde(default)]
    pub destination_timeout_sec: Option<u64>,
}

/// Options of signing the app, loaded from `--signing_options_json_path`.
/// Only meaningful when running on the iphoneos SDK.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SigningOptions {
    /// Provisioning profile for the generated test-runner app. Falls back to
    /// the app under test's profile.
    #[serde(default)]
    pub xctrunner_app_provisioning_profile: Option<String>,

    /// Enable `UIFileSharingEnabled` in the generated runner's Info.plist.
    #[serde(default)]
    pub xctrunner_app_enable_ui_file_sharing: bool,

    /// The keychain to use while signing.
    #[serde(default)]
    pub keychain_path: Option<String>,
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, RunnerError> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| RunnerError::illegal_argument(format!("{}: {e}", path.display())))
}

impl LaunchOptions {
    pub fn from_json_file(path: &Path) -> Result<Self, RunnerError> {
        load_json(path)
    }
}

impl SigningOptions {
    pub fn from_json_file(path: &Path) -> Result<Self, RunnerError> {
        load_json(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_options_default_when_keys_absent() {
        let options: LaunchOptions = serde_json::from_str("{}").unwrap();
        assert!(options.env_vars.is_empty());
        assert!(options.tests_to_run.is_empty());
        assert!(!options.keep_xcresult_data);
        assert_eq!(options.startup_timeout_seconds, None);
    }

    #[test]
    fn launch_options_parse_all_keys() {
        let options: LaunchOptions = serde_json::from_str(
            r#"{
                "env_vars": {"FOO": "bar"},
                "args": ["-AppleLanguages", "(ja)"],
                "app_under_test_env_vars": {"BAZ": "qux"},
                "app_under_test_args": ["--fast"],
                "keep_xcresult_data": true,
                "tests_to_run": ["MyTests/testOne"],
                "skip_tests": ["MyTests/testFlaky"],
                "uitest_auto_screenshots": true,
                "startup_timeout_seconds": 60,
                "destination_timeout_sec": 30
            }"#,
        )
        .unwrap();
        assert_eq!(options.env_vars["FOO"], "bar");
        assert_eq!(options.tests_to_run, vec!["MyTests/testOne"]);
        assert_eq!(options.startup_timeout_seconds, Some(60));
        assert!(options.uitest_auto_screenshots);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<LaunchOptions, _> = serde_json::from_str(r#"{"env_var": {}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn signing_options_parse() {
        let options: SigningOptions = serde_json::from_str(
            r#"{
                "xctrunner_app_provisioning_profile": "/tmp/profile.mobileprovision",
                "xctrunner_app_enable_ui_file_sharing": true,
                "keychain_path": "/tmp/ci.keychain"
            }"#,
        )
        .unwrap();
        assert!(options.xctrunner_app_enable_ui_file_sharing);
        assert_eq!(options.keychain_path.as_deref(), Some("/tmp/ci.keychain"));
    }
}
