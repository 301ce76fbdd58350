//! Domain types for sshgrid.
//!
//! Two layers live here:
//!
//! - Generic store objects ([`Cluster`], [`Machine`], [`ProvisionedMachine`],
//!   [`Secret`]). The object store persists these verbatim and never looks
//!   inside their [`ProviderConfig`] payloads.
//! - Typed provider payloads ([`ClusterProviderSpec`], [`MachineProviderStatus`],
//!   ...). These are what the orchestrators actually read and write, through
//!   the accessor methods on the generic objects.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::codec::{ProviderConfigCodec, ProviderKind};
use crate::error::{CoreError, CoreResult};

// ── Metadata ───────────────────────────────────────────────────────

/// Identity shared by every stored object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    /// Unix timestamp (seconds) when the object was built.
    pub created_at: u64,
}

impl ObjectMeta {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            created_at: epoch_secs(),
        }
    }

    /// Store key, `{namespace}/{name}`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Opaque provider payload embedded in a generic object.
///
/// Stored as hex inside the object's JSON so the store never has to
/// understand it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ProviderConfig {
    #[serde(with = "hex::serde")]
    pub value: Vec<u8>,
}

// ── Roles ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MachineRole {
    Master,
    Node,
}

impl fmt::Display for MachineRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineRole::Master => f.write_str("Master"),
            MachineRole::Node => f.write_str("Node"),
        }
    }
}

impl FromStr for MachineRole {
    type Err = CoreError;

    /// Case-insensitive: `master`, `Master` and `MASTER` are all accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "master" => Ok(MachineRole::Master),
            "node" => Ok(MachineRole::Node),
            _ => Err(CoreError::InvalidRole(s.to_string())),
        }
    }
}

// ── Provider payloads ──────────────────────────────────────────────

/// How to reach a machine over SSH.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    /// Authorized host public keys. Empty means host identity is not verified.
    #[serde(default)]
    pub public_keys: Vec<String>,
    /// Name of the Secret holding the username and private key.
    pub credential_secret: String,
}

/// One etcd participant, as reported by `etcdadm info`.
///
/// Identity is the `ID` field alone; two records with the same ID are the
/// same member even if their URLs differ.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EtcdMember {
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "peerURLs", default)]
    pub peer_urls: Vec<String>,
    #[serde(rename = "clientURLs", default)]
    pub client_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterProviderSpec {
    /// Secret holding the etcd root-of-trust (`tls.crt`, `tls.key`).
    pub etcd_ca_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vip_address: Option<String>,
    pub api_server_port: u16,
}

impl ProviderKind for ClusterProviderSpec {
    const KIND: &'static str = "ClusterSpec";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterProviderStatus {
    #[serde(default)]
    pub etcd_members: Vec<EtcdMember>,
}

impl ProviderKind for ClusterProviderStatus {
    const KIND: &'static str = "ClusterStatus";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineProviderSpec {
    pub provisioned_machine_name: String,
    pub roles: Vec<MachineRole>,
}

impl ProviderKind for MachineProviderSpec {
    const KIND: &'static str = "MachineSpec";
}

/// Where a machine is in its provisioning lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MachinePhase {
    /// Objects exist in the store, remote bootstrap has not completed.
    #[default]
    Pending,
    /// The actuator finished bootstrapping the machine.
    Bootstrapped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineProviderStatus {
    #[serde(default)]
    pub phase: MachinePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_config: Option<SshConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_member: Option<EtcdMember>,
}

impl ProviderKind for MachineProviderStatus {
    const KIND: &'static str = "MachineStatus";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedMachineProviderSpec {
    pub ssh_config: SshConfig,
    /// Interface the floating IP binds to on masters.
    pub vip_network_interface: String,
    /// Back reference to the bound Machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_name: Option<String>,
}

impl ProviderKind for ProvisionedMachineProviderSpec {
    const KIND: &'static str = "ProvisionedMachineSpec";
}

// ── Cluster ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClusterSpec {
    pub provider_spec: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClusterStatus {
    #[serde(default)]
    pub provider_status: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cluster {
    pub meta: ObjectMeta,
    pub spec: ClusterSpec,
    #[serde(default)]
    pub status: ClusterStatus,
}

impl Cluster {
    pub fn new(namespace: &str, name: &str, spec: &ClusterProviderSpec) -> CoreResult<Self> {
        let mut cluster = Self {
            meta: ObjectMeta::new(namespace, name),
            spec: ClusterSpec::default(),
            status: ClusterStatus::default(),
        };
        cluster.put_provider_spec(spec)?;
        Ok(cluster)
    }

    pub fn provider_spec(&self) -> CoreResult<ClusterProviderSpec> {
        ProviderConfigCodec::new().decode(&self.spec.provider_spec)
    }

    pub fn put_provider_spec(&mut self, spec: &ClusterProviderSpec) -> CoreResult<()> {
        self.spec.provider_spec = ProviderConfigCodec::new().encode(spec)?;
        Ok(())
    }

    /// Decoded status; an object that never had a status yields the default.
    pub fn provider_status(&self) -> CoreResult<ClusterProviderStatus> {
        match &self.status.provider_status {
            Some(config) => ProviderConfigCodec::new().decode(config),
            None => Ok(ClusterProviderStatus::default()),
        }
    }

    pub fn put_provider_status(&mut self, status: &ClusterProviderStatus) -> CoreResult<()> {
        self.status.provider_status = Some(ProviderConfigCodec::new().encode(status)?);
        Ok(())
    }
}

// ── Machine ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MachineSpec {
    pub roles: Vec<MachineRole>,
    pub provider_spec: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MachineStatus {
    #[serde(default)]
    pub provider_status: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Machine {
    pub meta: ObjectMeta,
    pub spec: MachineSpec,
    #[serde(default)]
    pub status: MachineStatus,
}

impl Machine {
    /// A machine with the given roles and no provider payloads yet.
    pub fn new(namespace: &str, name: &str, roles: Vec<MachineRole>) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec: MachineSpec {
                roles,
                provider_spec: ProviderConfig::default(),
            },
            status: MachineStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn has_role(&self, role: MachineRole) -> bool {
        self.spec.roles.contains(&role)
    }

    pub fn provider_spec(&self) -> CoreResult<MachineProviderSpec> {
        ProviderConfigCodec::new().decode(&self.spec.provider_spec)
    }

    pub fn put_provider_spec(&mut self, spec: &MachineProviderSpec) -> CoreResult<()> {
        self.spec.provider_spec = ProviderConfigCodec::new().encode(spec)?;
        Ok(())
    }

    pub fn provider_status(&self) -> CoreResult<MachineProviderStatus> {
        match &self.status.provider_status {
            Some(config) => ProviderConfigCodec::new().decode(config),
            None => Ok(MachineProviderStatus::default()),
        }
    }

    pub fn put_provider_status(&mut self, status: &MachineProviderStatus) -> CoreResult<()> {
        self.status.provider_status = Some(ProviderConfigCodec::new().encode(status)?);
        Ok(())
    }
}

// ── ProvisionedMachine ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ProvisionedMachineSpec {
    pub provider_spec: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvisionedMachine {
    pub meta: ObjectMeta,
    pub spec: ProvisionedMachineSpec,
}

impl ProvisionedMachine {
    pub fn new(
        namespace: &str,
        name: &str,
        spec: &ProvisionedMachineProviderSpec,
    ) -> CoreResult<Self> {
        let mut pm = Self {
            meta: ObjectMeta::new(namespace, name),
            spec: ProvisionedMachineSpec::default(),
        };
        pm.put_provider_spec(spec)?;
        Ok(pm)
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn provider_spec(&self) -> CoreResult<ProvisionedMachineProviderSpec> {
        ProviderConfigCodec::new().decode(&self.spec.provider_spec)
    }

    pub fn put_provider_spec(&mut self, spec: &ProvisionedMachineProviderSpec) -> CoreResult<()> {
        self.spec.provider_spec = ProviderConfigCodec::new().encode(spec)?;
        Ok(())
    }
}

// ── Secret ─────────────────────────────────────────────────────────

/// Opaque key/value credential object (SSH credential, bootstrap token,
/// etcd CA).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Secret {
    pub meta: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Secret {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

/// Secret keys used by the SSH credential.
pub const SSH_USERNAME_KEY: &str = "username";
pub const SSH_PRIVATE_KEY_KEY: &str = "ssh-privatekey";

/// Secret keys used by the bootstrap token.
pub const BOOTSTRAP_TOKEN_KEY: &str = "token";
pub const BOOTSTRAP_CA_HASH_KEY: &str = "cahash";

/// Secret keys used by TLS key pairs.
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
