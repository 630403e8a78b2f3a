//! Simulator device-type profiles.
//!
//! Each device type ships a `profile.plist` inside its `.simdevicetype`
//! bundle declaring the OS range the hardware model supports. The profile
//! location moved twice across Xcode releases; both historical locations
//! are handled.

use std::path::PathBuf;
use std::sync::Arc;

use crate::managers::xcode::Xcode;
use crate::models::version::normalize_profile_os_version;
use crate::models::{RunnerError, Sdk};
use crate::utils::command_executor::CommandExecutor;
use crate::utils::plist::{Plist, PlistValue};

/// Reads min/max supported OS versions from a device type's profile.
pub struct SimTypeProfile<'a> {
    device_type: String,
    executor: Arc<dyn CommandExecutor>,
    xcode: &'a Xcode,
}

impl<'a> SimTypeProfile<'a> {
    pub fn new(
        device_type: impl Into<String>,
        executor: Arc<dyn CommandExecutor>,
        xcode: &'a Xcode,
    ) -> Self {
        Self {
            device_type: device_type.into(),
            executor,
            xcode,
        }
    }

    async fn profile_plist(&self) -> Result<Plist, RunnerError> {
        let xcode_version = self.xcode.version_number().await?;
        let platform_path = if xcode_version >= 900 {
            self.xcode.sdk_platform_path(Sdk::Iphoneos).await?
        } else {
            self.xcode.sdk_platform_path(Sdk::Iphonesimulator).await?
        };
        let profiles_dir = if xcode_version >= 1100 {
            platform_path.join("Library/Developer/CoreSimulator/Profiles")
        } else {
            platform_path.join("Developer/Library/CoreSimulator/Profiles")
        };
        let profile_path = profiles_dir.join(format!(
            "DeviceTypes/{}.simdevicetype/Contents/Resources/profile.plist",
            self.device_type
        ));
        Ok(Plist::new(profile_path, self.executor.clone()))
    }

    /// The minimum OS version the device type supports.
    pub async fn min_os_version(&self) -> Result<f64, RunnerError> {
        let value = self.profile_plist().await?.get_field("minRuntimeVersion").await?;
        normalize_profile_os_version(&version_string(&value)?)
    }

    /// The maximum OS version, or None when the profile declares no upper
    /// bound (the device supports the platform's newest runtime).
    pub async fn max_os_version(&self) -> Result<Option<f64>, RunnerError> {
        let plist = self.profile_plist().await?;
        let value = match plist.get_field("maxRuntimeVersion").await {
            Ok(value) => value,
            // No maxRuntimeVersion field means no constraint.
            Err(RunnerError::Plist(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(normalize_profile_os_version(&version_string(&value)?)?))
    }
}

fn version_string(value: &PlistValue) -> Result<String, RunnerError> {
    match value {
        PlistValue::String(s) => Ok(s.clone()),
        PlistValue::Integer(n) => Ok(n.to_string()),
        other => Err(RunnerError::plist(format!(
            "Unexpected runtime version value: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::command_executor::mock::MockCommandExecutor;

    fn xcode_with_version(mock: MockCommandExecutor, version: &str) -> (MockCommandExecutor, Xcode) {
        let mock = mock
            .with_success("xcodebuild", &["-version"], &format!("Xcode {version}\n"))
            .with_success(
                "xcrun",
                &["--sdk", "iphoneos", "--show-sdk-platform-path"],
                "/Xcode/iPhoneOS.platform\n",
            );
        let xcode = Xcode::new(Arc::new(mock.clone()));
        (mock, xcode)
    }

    #[tokio::test]
    async fn min_os_version_is_normalized() {
        let (mock, xcode) = xcode_with_version(MockCommandExecutor::new(), "11.4");
        let profile_path = "/Xcode/iPhoneOS.platform/Library/Developer/CoreSimulator/Profiles/DeviceTypes/iPhone 8.simdevicetype/Contents/Resources/profile.plist";
        let mock = mock.with_success(
            "plutil",
            &["-convert", "json", "-o", "-", profile_path],
            r#"{"minRuntimeVersion": "11.0", "maxRuntimeVersion": "16.255.255"}"#,
        );
        let profile = SimTypeProfile::new("iPhone 8", Arc::new(mock), &xcode);
        assert_eq!(profile.min_os_version().await.unwrap(), 11.0);
        assert_eq!(profile.max_os_version().await.unwrap(), Some(16.99));
    }

    #[tokio::test]
    async fn missing_max_runtime_version_means_unbounded() {
        let (mock, xcode) = xcode_with_version(MockCommandExecutor::new(), "11.4");
        let profile_path = "/Xcode/iPhoneOS.platform/Library/Developer/CoreSimulator/Profiles/DeviceTypes/iPhone 15.simdevicetype/Contents/Resources/profile.plist";
        let mock = mock.with_success(
            "plutil",
            &["-convert", "json", "-o", "-", profile_path],
            r#"{"minRuntimeVersion": "17.0"}"#,
        );
        let profile = SimTypeProfile::new("iPhone 15", Arc::new(mock), &xcode);
        assert_eq!(profile.max_os_version().await.unwrap(), None);
    }
}
