//! Xctr - Core library for the XCTest command-line orchestrator.
//!
//! This library drives XCTest, XCUITest and hostless logic-test bundles on
//! iOS real devices and simulators through the Xcode command-line tools. It
//! is built for continuous-integration fleets: every run terminates with a
//! deterministic exit code, transient simulator failures are classified and
//! retried within bounds, and all temporary resources (simulators, working
//! directories) are torn down on every exit path.
//!
//! # Architecture Overview
//!
//! The library is organized into the following modules:
//!
//! - [`session`] - Test-session coordination: staging bundles, selecting a
//!   run strategy, and the simulator retry planner
//! - [`executor`] - The `xcodebuild` child-process supervisor with its
//!   startup watchdog and failure classifier
//! - [`managers`] - Simulator lifecycle control, Xcode toolchain queries,
//!   device-type profiles and device resolution
//! - [`models`] - Core data structures: platforms, test types, exit codes,
//!   launch options and the error taxonomy
//! - [`utils`] - Command execution, plist navigation and logging
//! - [`constants`] - Tool names, output signatures, timeouts and patterns
//!
//! # Key Properties
//!
//! - **Async-first design**: child processes, state polling and the startup
//!   watchdog all run on Tokio without blocking threads
//! - **Deterministic exit codes**: every run maps to the closed
//!   [`models::ExitCode`] enumeration
//! - **Testable control plane**: every external tool invocation goes through
//!   the [`utils::command_executor::CommandExecutor`] trait

pub mod constants;

/// The `xcodebuild` child-process supervisor.
///
/// Spawns one test command, mirrors its output, enforces a startup watchdog
/// and classifies the outcome.
pub mod executor;

/// Simulator lifecycle, Xcode toolchain and device resolution.
pub mod managers;

/// Core data structures and domain models.
pub mod models;

/// Test-session coordination and the simulator retry planner.
pub mod session;

/// Shared utility functions and helpers.
pub mod utils;

pub use models::{ExitCode, RunnerError};
pub use session::XctestSession;
