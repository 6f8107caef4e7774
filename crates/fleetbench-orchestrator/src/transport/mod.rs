//! Transports: how a shell script reaches a host.
//!
//! Everything the executor does (sync runs, detached launches, polls,
//! stops, existence checks) is a shell script sent through
//! [`Transport::exec`], so a transport only needs to run `sh -c` somewhere
//! and copy a file back.

pub mod local;
pub mod shell;
pub mod ssh;

pub use local::LocalTransport;
pub use shell::shell_quote;
pub use ssh::SshTransport;

use crate::error::TransportError;
use async_trait::async_trait;
use fleetbench_core::{Connection, Host, SshConfig};
use std::path::Path;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

/// Captured result of one script run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `-1` if the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// A way of running scripts on, and fetching files from, a host.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Runs `script` with `sh -c` on `host`, bounded by `timeout`.
    ///
    /// A non-zero exit is not an error. Errors mean the script could not be
    /// run to completion: the host was unreachable or the timeout elapsed.
    async fn exec(
        &self,
        host: &Host,
        script: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError>;

    /// Copies `remote` on `host` to the local path `local`.
    async fn fetch(&self, host: &Host, remote: &str, local: &Path) -> Result<(), TransportError>;
}

/// Routes each call to the transport matching the host's `connection`.
#[derive(Clone)]
pub struct TransportRouter {
    ssh: Arc<dyn Transport>,
    local: Arc<dyn Transport>,
}

impl TransportRouter {
    pub fn new(config: &SshConfig) -> Self {
        Self {
            ssh: Arc::new(SshTransport::new(config.clone())),
            local: Arc::new(LocalTransport::new()),
        }
    }

    /// Router with explicit transports per connection type.
    pub fn with_transports(ssh: Arc<dyn Transport>, local: Arc<dyn Transport>) -> Self {
        Self { ssh, local }
    }

    fn route(&self, host: &Host) -> &dyn Transport {
        match host.connection {
            Connection::Ssh => self.ssh.as_ref(),
            Connection::Local => self.local.as_ref(),
        }
    }
}

impl std::fmt::Debug for TransportRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRouter").finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for TransportRouter {
    async fn exec(
        &self,
        host: &Host,
        script: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError> {
        self.route(host).exec(host, script, timeout).await
    }

    async fn fetch(&self, host: &Host, remote: &str, local: &Path) -> Result<(), TransportError> {
        self.route(host).fetch(host, remote, local).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl Transport for Counting {
        async fn exec(
            &self,
            _: &Host,
            _: &str,
            _: Duration,
        ) -> Result<CommandOutput, TransportError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(CommandOutput::default())
        }

        async fn fetch(&self, _: &Host, _: &str, _: &Path) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_router_picks_transport_by_connection() {
        let ssh = Arc::new(Counting(AtomicUsize::new(0)));
        let local = Arc::new(Counting(AtomicUsize::new(0)));
        let router = TransportRouter::with_transports(ssh.clone(), local.clone());

        router.exec(&Host::local("ctl"), "true", Duration::from_secs(1)).await.unwrap();
        let remote = Host::from_def("c1", &fleetbench_core::HostDef::default());
        router.exec(&remote, "true", Duration::from_secs(1)).await.unwrap();
        router.exec(&remote, "true", Duration::from_secs(1)).await.unwrap();

        assert_eq!(local.0.load(Ordering::SeqCst), 1);
        assert_eq!(ssh.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_command_output_success() {
        assert!(CommandOutput::default().success());
        let failed = CommandOutput {
            exit_code: 2,
            ..CommandOutput::default()
        };
        assert!(!failed.success());
    }
}
