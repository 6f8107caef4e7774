//! Artifact collection with deterministic local names.

use crate::error::{CollectError, TransportError};
use crate::transport::Transport;
use crate::transport::shell::exists_script;
use chrono::{NaiveDateTime, Timelike};
use fleetbench_core::Host;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Local file name of a collected artifact:
/// `<YYYYMMDD>_<HHMM>_<server>_<host>_<file>`.
///
/// The time is the run start rounded down to the configured bucket, so
/// every artifact of a run shares the same prefix and reruns within the
/// same bucket overwrite rather than accumulate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactName {
    pub date: String,
    pub bucket: String,
    pub server: String,
    pub host: String,
    pub file: String,
}

impl ArtifactName {
    /// `file` is the artifact name plus the remote file's extension.
    pub fn new(
        started: NaiveDateTime,
        bucket_minutes: u32,
        server: &str,
        host: &str,
        artifact: &str,
        remote_path: &str,
    ) -> Self {
        let bucket_minutes = bucket_minutes.max(1);
        let minute_of_day = started.hour() * 60 + started.minute();
        let bucketed = minute_of_day - minute_of_day % bucket_minutes;

        let extension = Path::new(remote_path)
            .extension()
            .map(|ext| format!(".{}", clean(&ext.to_string_lossy())))
            .unwrap_or_default();

        Self {
            date: started.format("%Y%m%d").to_string(),
            bucket: format!("{:02}{:02}", bucketed / 60, bucketed % 60),
            server: sanitize(server),
            host: sanitize(host),
            file: format!("{}{}", sanitize(artifact), extension),
        }
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}_{}_{}", self.date, self.bucket, self.server, self.host, self.file)
    }
}

/// Keeps names filesystem-safe and the `_` separator unambiguous.
///
/// A name changed by cleaning gets a short digest of the original appended,
/// so `c_1` and `c-1` stay distinct.
fn sanitize(component: &str) -> String {
    let cleaned = clean(component);
    if cleaned == component {
        return cleaned;
    }
    let mut hasher = Sha256::new();
    hasher.update(component.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-{}", cleaned, &digest[..8])
}

fn clean(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() { "unnamed".to_string() } else { trimmed.to_string() }
}

/// Pulls remote files into a local directory.
pub struct Collector {
    transport: Arc<dyn Transport>,
    started: NaiveDateTime,
    bucket_minutes: u32,
    server: String,
    check_timeout: Duration,
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("started", &self.started)
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl Collector {
    /// `started` and `server` are fixed for the whole run.
    pub fn new(
        transport: Arc<dyn Transport>,
        started: NaiveDateTime,
        bucket_minutes: u32,
        server: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            started,
            bucket_minutes,
            server: server.into(),
            check_timeout: Duration::from_secs(30),
        }
    }

    pub fn artifact_name(&self, host: &Host, artifact: &str, remote_path: &str) -> ArtifactName {
        ArtifactName::new(
            self.started,
            self.bucket_minutes,
            &self.server,
            &host.name,
            artifact,
            remote_path,
        )
    }

    /// Copies `remote_path` from `host` into `local_dir`.
    ///
    /// The name is computed before any transfer. The file lands under a
    /// temporary name and is renamed into place once complete.
    pub async fn collect(
        &self,
        host: &Host,
        artifact: &str,
        remote_path: &str,
        local_dir: &Path,
    ) -> Result<PathBuf, CollectError> {
        let name = self.artifact_name(host, artifact, remote_path);
        let target = local_dir.join(name.to_string());

        match self.transport.exec(host, &exists_script(remote_path), self.check_timeout).await {
            Ok(output) if output.success() => {}
            Ok(_) => {
                warn!(host = %host.name, path = %remote_path, "Artifact missing");
                return Err(CollectError::ArtifactMissing {
                    host: host.name.clone(),
                    path: remote_path.to_string(),
                });
            }
            Err(TransportError::Unreachable { reason, .. }) => {
                return Err(CollectError::Unreachable {
                    host: host.name.clone(),
                    reason,
                });
            }
            Err(e) => {
                return Err(CollectError::Transfer {
                    host: host.name.clone(),
                    reason: e.to_string(),
                });
            }
        }

        tokio::fs::create_dir_all(local_dir).await?;
        let partial = local_dir.join(format!(".{}.partial", name));
        debug!(
            host = %host.name,
            remote = %remote_path,
            local = %partial.display(),
            "Fetching artifact"
        );

        if let Err(e) = self.transport.fetch(host, remote_path, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(match e {
                TransportError::Unreachable { reason, .. } => {
                    CollectError::Unreachable {
                        host: host.name.clone(),
                        reason,
                    }
                }
                other => CollectError::Transfer {
                    host: host.name.clone(),
                    reason: other.to_string(),
                },
            });
        }

        tokio::fs::rename(&partial, &target).await?;
        info!(
            host = %host.name,
            artifact = %artifact,
            path = %target.display(),
            "Artifact collected"
        );
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use chrono::NaiveDate;
    use std::collections::HashSet;

    fn started() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap().and_hms_opt(14, 27, 45).unwrap()
    }

    #[test]
    fn test_name_is_deterministic() {
        let a = ArtifactName::new(started(), 10, "s1", "c1", "iperf", "/tmp/iperf-c1.log");
        let b = ArtifactName::new(started(), 10, "s1", "c1", "iperf", "/tmp/iperf-c1.log");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "20261019_1420_s1_c1_iperf.log");
    }

    #[test]
    fn test_name_bucket_and_sanitizing() {
        let name =
            ArtifactName::new(started(), 60, "srv01", "gpu node/2", "nvidia smi", "/tmp/out");
        assert_eq!(name.date, "20261019");
        assert_eq!(name.bucket, "1400");
        assert_eq!(name.server, "srv01");
        assert!(name.host.starts_with("gpu-node-2-"));
        assert_eq!(name.host.len(), "gpu-node-2-".len() + 8);
        assert!(name.file.starts_with("nvidia-smi-"));
        assert!(!name.to_string().contains(' '));

        let unbucketed = ArtifactName::new(started(), 0, "s", "h", "a", "/x.json");
        assert_eq!(unbucketed.bucket, "1427");
        assert_eq!(unbucketed.file, "a.json");
    }

    #[test]
    fn test_cleaned_host_names_stay_distinct() {
        let hosts = ["c-1", "c_1", "c.1", "c/1", "c 1"];
        let names: HashSet<String> = hosts
            .iter()
            .map(|host| {
                ArtifactName::new(started(), 10, "s1", host, "iperf", "/tmp/out.log").to_string()
            })
            .collect();
        assert_eq!(names.len(), hosts.len());
        assert_eq!(
            ArtifactName::new(started(), 10, "s1", "c-1", "iperf", "/tmp/out.log").to_string(),
            "20261019_1420_s1_c-1_iperf.log"
        );
        assert_eq!(sanitize("c_1"), sanitize("c_1"));
    }

    #[tokio::test]
    async fn test_collect_local_file() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = tmp.path().join("fio.json");
        std::fs::write(&remote, "{\"jobs\": []}").unwrap();
        let out_dir = tmp.path().join("results");

        let collector = Collector::new(Arc::new(LocalTransport::new()), started(), 10, "s1");
        let path = collector
            .collect(&Host::local("t1"), "fio", remote.to_str().unwrap(), &out_dir)
            .await
            .unwrap();

        assert_eq!(path, out_dir.join("20261019_1420_s1_t1_fio.json"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"jobs\": []}");
        let leftovers: Vec<_> = std::fs::read_dir(&out_dir).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_collect_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let collector = Collector::new(Arc::new(LocalTransport::new()), started(), 10, "s1");
        let result = collector
            .collect(&Host::local("t1"), "fio", "/nonexistent/fio.json", tmp.path())
            .await;
        assert!(matches!(result, Err(CollectError::ArtifactMissing { .. })));
    }
}
