//! Transport running scripts on the controller itself.

use super::{CommandOutput, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use fleetbench_core::Host;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Runs scripts with the local `sh`. Used for `connection: local` hosts.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    shell: String,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn exec(
        &self,
        host: &Host,
        script: &str,
        limit: Duration,
    ) -> Result<CommandOutput, TransportError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(host = %host.name, "Running local script");

        match timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => Ok(CommandOutput::from(output)),
            Ok(Err(e)) => Err(TransportError::Io {
                host: host.name.clone(),
                source: e,
            }),
            Err(_) => Err(TransportError::TimedOut {
                host: host.name.clone(),
                after: limit,
            }),
        }
    }

    async fn fetch(&self, host: &Host, remote: &str, local: &Path) -> Result<(), TransportError> {
        tokio::fs::copy(remote, local).await.map(|_| ()).map_err(|e| TransportError::Transfer {
            host: host.name.clone(),
            reason: format!("{}: {}", remote, e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_exec_captures_output() {
        let transport = LocalTransport::new();
        let out = transport
            .exec(&Host::local("ctl"), "echo out; echo err >&2; exit 4", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 4);
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_exec_times_out() {
        let transport = LocalTransport::new();
        let start = Instant::now();
        let result = transport
            .exec(&Host::local("ctl"), "sleep 5", Duration::from_millis(200))
            .await;
        assert!(matches!(result, Err(TransportError::TimedOut { .. })));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_fetch_copies_file() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = tmp.path().join("remote.log");
        let local = tmp.path().join("local.log");
        std::fs::write(&remote, "result").unwrap();

        let transport = LocalTransport::new();
        transport.fetch(&Host::local("ctl"), remote.to_str().unwrap(), &local).await.unwrap();
        assert_eq!(std::fs::read_to_string(&local).unwrap(), "result");

        let missing = transport.fetch(&Host::local("ctl"), "/nonexistent/x", &local).await;
        assert!(matches!(missing, Err(TransportError::Transfer { .. })));
    }
}
