//! Transport over the system OpenSSH client.

use super::{CommandOutput, Transport, shell_quote};
use crate::error::TransportError;
use async_trait::async_trait;
use fleetbench_core::{Host, SshConfig};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Exit status `ssh` uses for its own errors.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Runs scripts through `ssh` and fetches files with `scp`.
///
/// Authentication is never interactive (`BatchMode=yes`); keys and agents
/// must already be in place.
#[derive(Debug, Clone)]
pub struct SshTransport {
    config: SshConfig,
}

impl SshTransport {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Options shared by `ssh` and `scp`. The port flag differs between them.
    fn common_args(&self, host: &Host, port_flag: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
        ];
        for option in &self.config.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        if let Some(port) = host.port {
            args.push(port_flag.to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &host.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args
    }

    /// Arguments for running `script` on `host`.
    pub fn exec_args(&self, host: &Host, script: &str) -> Vec<String> {
        let mut args = self.common_args(host, "-p");
        args.push(host.destination());
        args.push(format!("sh -c {}", shell_quote(script)));
        args
    }

    /// Arguments for copying `remote` from `host` to `local`.
    pub fn fetch_args(&self, host: &Host, remote: &str, local: &Path) -> Vec<String> {
        let mut args = self.common_args(host, "-P");
        args.push("-q".to_string());
        args.push(format!("{}:{}", host.destination(), remote));
        args.push(local.display().to_string());
        args
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn exec(
        &self,
        host: &Host,
        script: &str,
        limit: Duration,
    ) -> Result<CommandOutput, TransportError> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.exec_args(host, script))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(host = %host.name, address = %host.address, "Running remote script");

        let output = match timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => CommandOutput::from(output),
            Ok(Err(e)) => return Err(TransportError::Io {
                host: host.name.clone(),
                source: e,
            }),
            Err(_) => {
                return Err(TransportError::TimedOut {
                    host: host.name.clone(),
                    after: limit,
                });
            }
        };

        // A remote command exiting 255 is indistinguishable from an ssh failure.
        if output.exit_code == SSH_CONNECTION_FAILURE {
            let reason = output.stderr.trim().to_string();
            warn!(host = %host.name, reason = %reason, "ssh connection failed");
            return Err(TransportError::Unreachable {
                host: host.name.clone(),
                reason,
            });
        }
        Ok(output)
    }

    async fn fetch(&self, host: &Host, remote: &str, local: &Path) -> Result<(), TransportError> {
        let output = Command::new(&self.config.scp_program)
            .args(self.fetch_args(host, remote, local))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| TransportError::Io {
                host: host.name.clone(),
                source: e,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(TransportError::Transfer {
                host: host.name.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
