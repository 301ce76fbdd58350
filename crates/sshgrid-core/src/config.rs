//! sshgrid.toml configuration parser.
//!
//! Every field has a default, so an absent file or an empty section is
//! valid. CLI flags override what is read here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SshgridConfig {
    pub store: StoreConfig,
    pub defaults: DefaultsConfig,
    pub paths: RemotePathsConfig,
    pub ssh: SshClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/sshgrid/state.redb"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DefaultsConfig {
    pub namespace: String,
    pub cluster_name: String,
    pub ssh_credential_secret: String,
    pub bootstrap_token_secret: String,
    pub ssh_port: u16,
    /// Drain timeout, e.g. "5m". Zero means wait forever.
    pub drain_timeout: String,
    /// Per-pod grace period in seconds. Negative uses the pod's own value.
    pub drain_grace_period_secs: i64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            cluster_name: "cluster".to_string(),
            ssh_credential_secret: "sshCredential".to_string(),
            bootstrap_token_secret: "bootstrapToken".to_string(),
            ssh_port: 22,
            drain_timeout: "5m".to_string(),
            drain_grace_period_secs: -1,
        }
    }
}

/// Locations of binaries and files on the managed machines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemotePathsConfig {
    pub kubeadm: String,
    pub kubectl: String,
    pub etcdadm: String,
    pub nodeadm: String,
    pub admin_kubeconfig: String,
    pub etcd_pki_dir: String,
    pub etcd_snapshot: String,
    pub nodeadm_config: String,
    pub control_plane_service: String,
}

impl Default for RemotePathsConfig {
    fn default() -> Self {
        Self {
            kubeadm: "/opt/bin/kubeadm".to_string(),
            kubectl: "/opt/bin/kubectl".to_string(),
            etcdadm: "/opt/bin/etcdadm".to_string(),
            nodeadm: "/opt/bin/nodeadm".to_string(),
            admin_kubeconfig: "/etc/kubernetes/admin.conf".to_string(),
            etcd_pki_dir: "/etc/etcd/pki".to_string(),
            etcd_snapshot: "/var/tmp/etcd-snapshot.db".to_string(),
            nodeadm_config: "/var/tmp/nodeadm.yaml".to_string(),
            control_plane_service: "kubelet".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SshClientConfig {
    /// `ssh` binary to invoke.
    pub binary: String,
    pub connect_timeout_secs: u64,
    /// Run privileged file placement (`mkdir -p`, `mv`) through sudo.
    pub use_sudo: bool,
}

impl Default for SshClientConfig {
    fn default() -> Self {
        Self {
            binary: "ssh".to_string(),
            connect_timeout_secs: 30,
            use_sudo: true,
        }
    }
}

impl SshgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SshgridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path` if given; otherwise `./sshgrid.toml` if present,
    /// otherwise defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let local = Path::new("sshgrid.toml");
                if local.is_file() {
                    Self::from_file(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Parse `"90s"`, `"500ms"`, `"5m"`, `"1h"` or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        let config: SshgridConfig = toml::from_str("").unwrap();
        assert_eq!(config, SshgridConfig::default());
    }

    #[test]
    fn test_parse_partial() {
        let toml_str = r#"
[defaults]
namespace = "lab"
drain_timeout = "10m"

[ssh]
use_sudo = false
"#;
        let config: SshgridConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.defaults.namespace, "lab");
        assert_eq!(config.defaults.drain_timeout, "10m");
        assert_eq!(config.defaults.cluster_name, "cluster");
        assert!(!config.ssh.use_sudo);
        assert_eq!(config.paths.etcdadm, "/opt/bin/etcdadm");
    }

    #[test]
    fn test_round_trip_toml() {
        let config = SshgridConfig::default();
        let text = config.to_toml_string().unwrap();
        let back: SshgridConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sshgrid.toml");
        std::fs::write(&path, "[store]\npath = \"/tmp/x.redb\"\n").unwrap();

        let config = SshgridConfig::load(Some(&path)).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/tmp/x.redb"));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn parse_duration_rejects_overflow() {
        assert_eq!(parse_duration(&format!("{}m", u64::MAX)), None);
        assert_eq!(parse_duration(&format!("{}h", u64::MAX / 60)), None);
    }
}
