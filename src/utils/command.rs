//! Command execution utilities
//!
//! This module provides the production implementation of
//! [`CommandExecutor`]: asynchronous execution of external commands with
//! output capture, error propagation and debug logging.

use std::collections::HashMap;
use std::process::ExitStatus;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use crate::utils::command_executor::{CommandExecutor, CommandOutput};

/// A utility for executing external commands asynchronously.
///
/// CommandRunner provides a consistent interface for running the Xcode
/// command-line tools (`xcrun`, `xcodebuild`, `plutil`, ...). It handles
/// output capture, error propagation and debug logging.
#[derive(Clone, Default)]
pub struct CommandRunner;

impl CommandRunner {
    /// Creates a new CommandRunner instance.
    pub fn new() -> Self {
        Self
    }

    /// Executes a command and waits for it to complete, returning stdout.
    ///
    /// If the command fails (non-zero exit code), an error is returned with
    /// details from stderr and stdout.
    pub async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = self.capture(program, args).await?;
        if !output.success() {
            return Err(anyhow::anyhow!(
                "Command failed with exit code {}: stderr: {} stdout: {}",
                output.exit_code.unwrap_or(-1),
                output.stderr.trim(),
                output.stdout.trim()
            ));
        }
        Ok(output.stdout)
    }

    async fn capture(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!("Executing command: {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to execute {program}"))?;

        let output = CommandOutput::from_std(output);
        debug!(
            "Command exit code: {:?}, stdout: {} bytes, stderr: {} bytes",
            output.exit_code,
            output.stdout.len(),
            output.stderr.len()
        );
        Ok(output)
    }
}

#[async_trait]
impl CommandExecutor for CommandRunner {
    async fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        self.capture(program, args).await
    }

    async fn run_streaming(
        &self,
        program: &str,
        args: &[&str],
        env: &HashMap<String, String>,
    ) -> Result<ExitStatus> {
        debug!("Executing command (streaming): {} {}", program, args.join(" "));

        let mut command = Command::new(program);
        command.args(args);
        for (key, value) in env {
            command.env(key, value);
        }
        // stderr folds into the caller-visible stream alongside stdout.
        let status = command
            .stdin(std::process::Stdio::null())
            .status()
            .await
            .with_context(|| format!("Failed to execute {program}"))?;
        Ok(status)
    }

    async fn spawn_detached(&self, program: &str, args: &[&str]) -> Result<u32> {
        let child = Command::new(program)
            .args(args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .stdin(std::process::Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn {program}"))?;
        Ok(child.id().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_returns_stdout_on_success() {
        let runner = CommandRunner::new();
        let stdout = runner.run("echo", &["hello"]).await.unwrap();
        assert_eq!(stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn run_surfaces_failure_details() {
        let runner = CommandRunner::new();
        let result = runner.run("sh", &["-c", "echo oops >&2; exit 3"]).await;
        let message = result.unwrap_err().to_string();
        assert!(message.contains("exit code 3"));
        assert!(message.contains("oops"));
    }

    #[tokio::test]
    async fn output_captures_both_streams() {
        let runner = CommandRunner::new();
        let output = runner
            .output("sh", &["-c", "echo out; echo err >&2"])
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }
}
