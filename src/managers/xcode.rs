//! Xcode toolchain queries.
//!
//! The toolchain version is read once and memoized for the process lifetime;
//! nobody swaps Xcode mid-run, and `xcodebuild -version` is slow enough to
//! matter at CI scale. First access is guarded against concurrent callers.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::constants::commands::{xcodebuild, GETCONF, XCODEBUILD, XCODE_SELECT, XCRUN};
use crate::models::version::version_number;
use crate::models::{RunnerError, Sdk};
use crate::utils::command_executor::CommandExecutor;

/// Relative path of the Swift 5.0 fallback libraries inside the developer
/// directory. Xcode 11+ packages Swift dylibs in a way that breaks tests on
/// older simulator runtimes unless dyld falls back to these copies.
const SWIFT5_LIBS_RELATIVE_PATH: &str = "Toolchains/XcodeDefault.xctoolchain/usr/lib/swift-5.0";

/// Queries about the installed Xcode, memoized where the answer cannot
/// change during a run.
pub struct Xcode {
    executor: Arc<dyn CommandExecutor>,
    version: OnceCell<u32>,
    developer_path: OnceCell<String>,
    cache_dir: OnceCell<String>,
}

impl Xcode {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            version: OnceCell::new(),
            developer_path: OnceCell::new(),
            cache_dir: OnceCell::new(),
        }
    }

    pub fn executor(&self) -> &Arc<dyn CommandExecutor> {
        &self.executor
    }

    /// The Xcode version packed as a number, e.g. 8.2.1 -> 821.
    pub async fn version_number(&self) -> Result<u32, RunnerError> {
        self.version
            .get_or_try_init(|| async {
                // Example output:
                // Xcode 8.2.1
                // Build version 8C1002
                let output = self
                    .executor
                    .output(XCODEBUILD, &[xcodebuild::VERSION_ARG])
                    .await?;
                let version = output
                    .stdout
                    .lines()
                    .next()
                    .and_then(|line| line.split_whitespace().nth(1))
                    .ok_or_else(|| {
                        RunnerError::sim(format!(
                            "Unrecognized `xcodebuild -version` output: {}",
                            output.combined()
                        ))
                    })?;
                version_number(version)
            })
            .await
            .copied()
    }

    /// The active developer path reported by `xcode-select -p`.
    pub async fn developer_path(&self) -> Result<&str, RunnerError> {
        self.developer_path
            .get_or_try_init(|| async {
                let output = self.executor.output(XCODE_SELECT, &["-p"]).await?;
                Ok::<_, RunnerError>(output.stdout.trim().to_string())
            })
            .await
            .map(|s| s.as_str())
    }

    /// The selected SDK platform path.
    pub async fn sdk_platform_path(&self, sdk: Sdk) -> Result<PathBuf, RunnerError> {
        let output = self
            .executor
            .output(
                XCRUN,
                &["--sdk", sdk.short_name(), "--show-sdk-platform-path"],
            )
            .await?;
        Ok(PathBuf::from(output.stdout.trim()))
    }

    /// The selected SDK version.
    pub async fn sdk_version(&self, sdk: Sdk) -> Result<String, RunnerError> {
        let output = self
            .executor
            .output(XCRUN, &["--sdk", sdk.short_name(), "--show-sdk-version"])
            .await?;
        Ok(output.stdout.trim().to_string())
    }

    /// Path of the `xctest` agent binary under the given SDK platform.
    pub async fn xctest_tool_path(&self, sdk: Sdk) -> Result<PathBuf, RunnerError> {
        Ok(self
            .sdk_platform_path(sdk)
            .await?
            .join("Developer/Library/Xcode/Agents/xctest"))
    }

    /// The Swift 5.0 fallback library directory for the simulator platform,
    /// or None when this Xcode does not ship one.
    pub async fn swift5_fallback_libs_dir(&self) -> Result<Option<PathBuf>, RunnerError> {
        let dir = PathBuf::from(self.developer_path().await?)
            .join(SWIFT5_LIBS_RELATIVE_PATH)
            .join(Sdk::Iphonesimulator.short_name());
        Ok(dir.exists().then_some(dir))
    }

    /// The Darwin per-user cache directory.
    pub async fn darwin_user_cache_dir(&self) -> Result<String, RunnerError> {
        self.cache_dir
            .get_or_try_init(|| async {
                let output = self
                    .executor
                    .output(GETCONF, &["DARWIN_USER_CACHE_DIR"])
                    .await?;
                Ok::<_, RunnerError>(output.stdout.trim_end().to_string())
            })
            .await
            .cloned()
    }

    /// Xcode's EmbeddedAppDeltas cache root. Real-device runs leave per-app
    /// delta directories here that must be purged.
    pub async fn embedded_app_deltas_dir(&self) -> Result<PathBuf, RunnerError> {
        Ok(PathBuf::from(self.darwin_user_cache_dir().await?)
            .join("com.apple.DeveloperTools/All/Xcode/EmbeddedAppDeltas"))
    }
}
