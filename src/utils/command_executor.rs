//! Command execution abstraction for testability
//!
//! This module provides a trait-based abstraction over external command
//! execution, allowing command calls to be mocked in tests while keeping the
//! same behavior in production code. Every vendor-tool invocation in the
//! crate (`xcrun`, `xcodebuild`, `plutil`, `nm`, ...) goes through this
//! trait.

use std::collections::HashMap;
use std::process::ExitStatus;

use anyhow::Result;
use async_trait::async_trait;

/// Captured result of a completed command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, or None when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn from_std(output: std::process::Output) -> Self {
        Self {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout and stderr joined by a newline, trimmed.
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
            .trim()
            .to_string()
    }
}

/// Trait for executing external commands
///
/// This abstraction allows dependency injection of command execution logic,
/// making it possible to mock external command calls in tests.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command to completion, capturing exit code, stdout and stderr.
    async fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Run a command with stdout and stderr passed through to the caller's
    /// terminal, returning its exit status. Used for child processes whose
    /// output the user must see live.
    async fn run_streaming(
        &self,
        program: &str,
        args: &[&str],
        env: &HashMap<String, String>,
    ) -> Result<ExitStatus>;

    /// Spawn a command as a detached background process and return its pid.
    /// The process is not monitored.
    async fn spawn_detached(&self, program: &str, args: &[&str]) -> Result<u32>;
}

pub mod mock {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::sync::{Arc, Mutex};

    type CallHistory = Arc<Mutex<Vec<(String, Vec<String>)>>>;

    /// Mock implementation of CommandExecutor for testing
    #[derive(Clone, Default)]
    pub struct MockCommandExecutor {
        responses: Arc<Mutex<HashMap<String, CommandOutput>>>,
        call_history: CallHistory,
        streaming_env_history: Arc<Mutex<Vec<HashMap<String, String>>>>,
    }

    impl MockCommandExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        fn key(program: &str, args: &[&str]) -> String {
            format!("{} {}", program, args.join(" "))
        }

        /// Add a canned result for a specific command line.
        pub fn with_output(
            self,
            program: &str,
            args: &[&str],
            exit_code: i32,
            stdout: &str,
            stderr: &str,
        ) -> Self {
            self.responses.lock().unwrap().insert(
                Self::key(program, args),
                CommandOutput {
                    exit_code: Some(exit_code),
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                },
            );
            self
        }

        /// Add a successful response for a specific command line.
        pub fn with_success(self, program: &str, args: &[&str], stdout: &str) -> Self {
            self.with_output(program, args, 0, stdout, "")
        }

        /// Add a failing response for a specific command line.
        pub fn with_error(self, program: &str, args: &[&str], stderr: &str) -> Self {
            self.with_output(program, args, 1, "", stderr)
        }

        /// Get the call history
        pub fn call_history(&self) -> Vec<(String, Vec<String>)> {
            self.call_history.lock().unwrap().clone()
        }

        /// Environments passed to streaming runs, in call order.
        pub fn streaming_env_history(&self) -> Vec<HashMap<String, String>> {
            self.streaming_env_history.lock().unwrap().clone()
        }

        /// Count calls whose command line starts with the given prefix.
        pub fn calls_matching(&self, prefix: &str) -> usize {
            self.call_history
                .lock()
                .unwrap()
                .iter()
                .filter(|(program, args)| {
                    format!("{} {}", program, args.join(" ")).starts_with(prefix)
                })
                .count()
        }

        fn record(&self, program: &str, args: &[&str]) {
            self.call_history.lock().unwrap().push((
                program.to_string(),
                args.iter().map(|s| s.to_string()).collect(),
            ));
        }

        fn lookup(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
            self.responses
                .lock()
                .unwrap()
                .get(&Self::key(program, args))
                .cloned()
                .ok_or_else(|| {
                    anyhow::anyhow!("No mock response for: {}", Self::key(program, args))
                })
        }
    }

    #[async_trait]
    impl CommandExecutor for MockCommandExecutor {
        async fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
            self.record(program, args);
            self.lookup(program, args)
        }

        async fn run_streaming(
            &self,
            program: &str,
            args: &[&str],
            env: &HashMap<String, String>,
        ) -> Result<ExitStatus> {
            self.record(program, args);
            self.streaming_env_history.lock().unwrap().push(env.clone());
            let output = self.lookup(program, args)?;
            Ok(ExitStatus::from_raw(output.exit_code.unwrap_or(1) << 8))
        }

        async fn spawn_detached(&self, program: &str, args: &[&str]) -> Result<u32> {
            self.record(program, args);
            Ok(1)
        }
    }
}
