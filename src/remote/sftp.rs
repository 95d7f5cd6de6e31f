//! Transfer backend: files copied to an SFTP host and served by its web server.
//!
//! Each `put` or `remove` is one `sftp -b -` batch session fed on stdin, so
//! a batch either runs to the end or stops at the first failing line.

use super::command::{CommandExecutor, SystemCommandExecutor};
use super::{Remote, Stream, parse_base_url, resolve_names, url_basename};
use crate::config::TransferConfig;
use crate::error::{Result, ScribepoolError};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, warn};
use url::Url;

const BACKEND: &str = "SFTP";

pub struct SftpRemote<E: CommandExecutor = SystemCommandExecutor> {
    user: String,
    host: String,
    path: String,
    base: Url,
    identity: Option<PathBuf>,
    executor: E,
}

impl SftpRemote<SystemCommandExecutor> {
    pub fn from_config(config: &TransferConfig) -> Result<Self> {
        Self::with_executor(config, SystemCommandExecutor::new(BACKEND))
    }
}

impl<E: CommandExecutor> SftpRemote<E> {
    pub fn with_executor(config: &TransferConfig, executor: E) -> Result<Self> {
        Ok(Self {
            user: config.user()?.to_string(),
            host: config.host()?.to_string(),
            path: config.path().to_string(),
            base: parse_base_url("remote-transfer.url", config.url()?)?,
            identity: config.identity(),
            executor,
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Directory on the host that uploads land in.
    pub fn remote_dir(&self) -> &str {
        &self.path
    }

    fn remote_file(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.path, name)
        }
    }

    fn failed(&self, error: impl std::fmt::Display) -> ScribepoolError {
        ScribepoolError::RemoteOperation {
            backend: BACKEND,
            message: format!("{}@{}: {error}", self.user, self.host),
        }
    }

    /// Name the host on an executor failure, keeping its backend.
    fn at_host(&self, error: ScribepoolError) -> ScribepoolError {
        match error {
            ScribepoolError::RemoteOperation { message, .. } => self.failed(message),
            other => self.failed(other),
        }
    }

    async fn run_batch(&self, batch: &str) -> Result<()> {
        let identity_arg = self
            .identity
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());
        let destination = format!("{}@{}", self.user, self.host);

        let mut args = vec!["-b", "-", "-o", "BatchMode=yes"];
        if let Some(identity) = identity_arg.as_deref() {
            args.extend(["-i", identity]);
        }
        args.push(destination.as_str());

        self.executor
            .execute("sftp", &args, batch)
            .await
            .map(|_| ())
            .map_err(|e| self.at_host(e))
    }

    async fn remove_names(&self, names: &[&str]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        // A leading '-' tells sftp to carry on when the file is already gone.
        let batch: String = names
            .iter()
            .map(|name| format!("-rm {}\n", quote(&self.remote_file(name))))
            .collect();
        self.run_batch(&batch).await
    }
}

/// Quote an argument for an sftp batch line.
fn quote(arg: &str) -> String {
    format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
}

#[async_trait]
impl<E: CommandExecutor + 'static> Remote for SftpRemote<E> {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn base_url(&self) -> &Url {
        &self.base
    }

    async fn put(&self, streams: &[Stream], names: Option<&[String]>) -> Result<Vec<String>> {
        let names = resolve_names(streams, names)?;
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let staging = tempfile::tempdir().map_err(|e| self.failed(e))?;
        let mut batch = String::new();
        for (stream, name) in streams.iter().zip(&names) {
            let local = staging.path().join(name);
            tokio::fs::write(&local, stream.data())
                .await
                .map_err(|e| self.failed(e))?;
            batch.push_str(&format!(
                "put {} {}\n",
                quote(&local.to_string_lossy()),
                quote(&self.remote_file(name))
            ));
        }

        if let Err(e) = self.run_batch(&batch).await {
            // Lines before the failing one may already be on the host.
            let staged: Vec<&str> = names.iter().map(String::as_str).collect();
            if let Err(cleanup) = self.remove_names(&staged).await {
                warn!(error = %cleanup, "failed to clean up partial SFTP upload");
            }
            return Err(e);
        }

        debug!(count = names.len(), host = %self.host, "uploaded via SFTP");
        Ok(names.iter().map(|name| self.url_for(name)).collect())
    }

    async fn remove(&self, names_or_urls: &[String]) -> Result<()> {
        let names: Vec<&str> = names_or_urls.iter().map(|s| url_basename(s)).collect();
        self.remove_names(&names).await
    }
}
