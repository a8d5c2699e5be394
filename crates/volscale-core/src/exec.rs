//! OS command execution seam.
//!
//! Discovery, the cloud client, and the filesystem grower all shell out to
//! host tools. They do it through the `CommandRunner` trait so tests can
//! script outputs without touching the host, and so every invocation gets
//! a hard timeout.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    /// Exit status code, if the process exited normally.
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum CmdError {
    #[error("failed to spawn {program}: {detail}")]
    Spawn { program: String, detail: String },

    #[error("{program} did not finish within {secs}s")]
    Timeout { program: String, secs: u64 },
}

/// Runs host commands with a per-call timeout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CmdOutput, CmdError>;
}

/// Production runner backed by `tokio::process`.
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CmdOutput, CmdError> {
        debug!(%program, ?args, "running command");
        let fut = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                return Err(CmdError::Spawn {
                    program: program.to_string(),
                    detail: e.to_string(),
                });
            }
            Err(_) => {
                return Err(CmdError::Timeout {
                    program: program.to_string(),
                    secs: timeout.as_secs(),
                });
            }
        };

        Ok(CmdOutput {
            status_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Check whether a tool is resolvable on `$PATH`.
pub async fn tool_on_path(runner: &dyn CommandRunner, tool: &str) -> bool {
    match runner.run("which", &[tool], Duration::from_secs(5)).await {
        Ok(out) => out.success() && !out.stdout.trim().is_empty(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_true_successfully() {
        let out = SystemRunner
            .run("true", &[], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success());
    }

    #[tokio::test]
    async fn captures_stdout() {
        let out = SystemRunner
            .run("echo", &["hello"], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_success() {
        let out = SystemRunner
            .run("false", &[], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!out.success());
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let err = SystemRunner
            .run("definitely-not-a-real-tool", &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CmdError::Spawn { .. }));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let err = SystemRunner
            .run("sleep", &["5"], Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, CmdError::Timeout { .. }));
    }

    #[tokio::test]
    async fn tool_on_path_finds_sh() {
        assert!(tool_on_path(&SystemRunner, "sh").await);
        assert!(!tool_on_path(&SystemRunner, "definitely-not-a-real-tool").await);
    }
}
