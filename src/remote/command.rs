//! External programs driven by a remote backend (`sftp`).
//!
//! Backends talk to a [`CommandExecutor`] so tests can stand in for a real
//! SSH server. The production executor runs the program with
//! `tokio::process`, so a session never blocks the runtime.

use crate::error::{Result, ScribepoolError};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `program` with `args`, writing `input` to its stdin.
    ///
    /// Returns stdout on a zero exit status.
    async fn execute(&self, program: &str, args: &[&str], input: &str) -> Result<String>;
}

/// Runs programs on the local machine, reporting failures against `backend`.
#[derive(Debug, Clone)]
pub struct SystemCommandExecutor {
    backend: &'static str,
}

impl SystemCommandExecutor {
    pub fn new(backend: &'static str) -> Self {
        Self { backend }
    }

    fn failed(&self, message: String) -> ScribepoolError {
        ScribepoolError::RemoteOperation {
            backend: self.backend,
            message,
        }
    }
}

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn execute(&self, program: &str, args: &[&str], input: &str) -> Result<String> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => self.failed(format!(
                    "{program} not found; install an OpenSSH client (openssh-client)"
                )),
                _ => self.failed(format!("can't start {program}: {e}")),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| self.failed(format!("writing to {program}: {e}")))?;
            // Dropping stdin closes the pipe so the program sees EOF.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| self.failed(format!("waiting for {program}: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let status = output
                .status
                .code()
                .map_or_else(|| "a signal".to_string(), |code| code.to_string());
            return Err(self.failed(format!(
                "{program} exited with {status}: {}",
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
