//! Typed remote tools.
//!
//! Each tool knows its own command line and how to read its own output.
//! Output-shape assumptions (field positions, JSON layout) live here and
//! nowhere else.

use std::time::Duration;

use tracing::debug;

use sshgrid_core::config::RemotePathsConfig;
use sshgrid_core::EtcdMember;

use crate::client::MachineClient;
use crate::error::{RemoteError, RemoteResult};

pub trait RemoteTool {
    type Output;

    fn command(&self) -> String;

    fn parse(&self, stdout: &[u8]) -> RemoteResult<Self::Output>;
}

/// Run a tool and parse its stdout.
pub fn run_tool<T: RemoteTool>(client: &dyn MachineClient, tool: &T) -> RemoteResult<T::Output> {
    let command = tool.command();
    debug!(host = client.host(), %command, "running remote tool");
    let output = client.run_command(&command)?;
    tool.parse(&output.stdout)
}

fn unparseable(command: String, stdout: &[u8], reason: impl Into<String>) -> RemoteError {
    RemoteError::UnparseableOutput {
        command,
        output: String::from_utf8_lossy(stdout).into_owned(),
        reason: reason.into(),
    }
}

// ── Bootstrap token ────────────────────────────────────────────────

/// Token and discovery hash a node needs to join the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapToken {
    pub token: String,
    pub ca_hash: String,
}

/// `kubeadm token create --print-join-command`.
///
/// Expected output is a single line of exactly 7 fields:
/// `kubeadm join <server:port> --token <token> --discovery-token-ca-cert-hash <hash>`.
#[derive(Debug, Clone)]
pub struct JoinTokenCreate {
    kubeadm: String,
}

impl JoinTokenCreate {
    pub fn parse_join_command(command: String, stdout: &[u8]) -> RemoteResult<BootstrapToken> {
        let text = String::from_utf8_lossy(stdout);
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 7 {
            return Err(unparseable(
                command,
                stdout,
                format!("expected 7 fields, found {}", fields.len()),
            ));
        }
        Ok(BootstrapToken {
            token: fields[4].to_string(),
            ca_hash: fields[6].to_string(),
        })
    }
}

impl RemoteTool for JoinTokenCreate {
    type Output = BootstrapToken;

    fn command(&self) -> String {
        format!("{} token create --print-join-command", self.kubeadm)
    }

    fn parse(&self, stdout: &[u8]) -> RemoteResult<BootstrapToken> {
        Self::parse_join_command(self.command(), stdout)
    }
}

// ── etcd ───────────────────────────────────────────────────────────

/// `etcdadm info`: one JSON object describing the local member.
#[derive(Debug, Clone)]
pub struct EtcdInfo {
    etcdadm: String,
}

impl RemoteTool for EtcdInfo {
    type Output = EtcdMember;

    fn command(&self) -> String {
        format!("{} info", self.etcdadm)
    }

    fn parse(&self, stdout: &[u8]) -> RemoteResult<EtcdMember> {
        serde_json::from_slice(stdout)
            .map_err(|e| unparseable(self.command(), stdout, e.to_string()))
    }
}

/// `etcdadm init`, optionally restoring from a snapshot already on the machine.
#[derive(Debug, Clone)]
pub struct EtcdInit {
    etcdadm: String,
    snapshot: Option<String>,
}

impl RemoteTool for EtcdInit {
    type Output = ();

    fn command(&self) -> String {
        match &self.snapshot {
            Some(path) => format!("{} init --snapshot {path}", self.etcdadm),
            None => format!("{} init", self.etcdadm),
        }
    }

    fn parse(&self, _stdout: &[u8]) -> RemoteResult<()> {
        Ok(())
    }
}

/// `etcdadm join <endpoint>`.
#[derive(Debug, Clone)]
pub struct EtcdJoin {
    etcdadm: String,
    endpoint: String,
}

impl RemoteTool for EtcdJoin {
    type Output = ();

    fn command(&self) -> String {
        format!("{} join {}", self.etcdadm, self.endpoint)
    }

    fn parse(&self, _stdout: &[u8]) -> RemoteResult<()> {
        Ok(())
    }
}

/// `etcdadm reset`. With `skip_remove_member` the local member is torn down
/// without asking the (possibly dead) quorum to remove it first.
#[derive(Debug, Clone)]
pub struct EtcdReset {
    etcdadm: String,
    skip_remove_member: bool,
}

impl RemoteTool for EtcdReset {
    type Output = ();

    fn command(&self) -> String {
        if self.skip_remove_member {
            format!("{} reset --skip-remove-member", self.etcdadm)
        } else {
            format!("{} reset", self.etcdadm)
        }
    }

    fn parse(&self, _stdout: &[u8]) -> RemoteResult<()> {
        Ok(())
    }
}

// ── Cluster nodes ──────────────────────────────────────────────────

/// Find the cluster node object for the machine we are connected to.
///
/// Prints `node/<name>` or nothing.
#[derive(Debug, Clone)]
pub struct NodeLookup {
    kubectl: String,
    kubeconfig: String,
}

impl RemoteTool for NodeLookup {
    type Output = Option<String>;

    fn command(&self) -> String {
        format!(
            "{} --kubeconfig={} get node --selector kubernetes.io/hostname=$(hostname -f) -oname",
            self.kubectl, self.kubeconfig
        )
    }

    fn parse(&self, stdout: &[u8]) -> RemoteResult<Option<String>> {
        let name = String::from_utf8_lossy(stdout).trim().to_string();
        if name.is_empty() {
            return Ok(None);
        }
        if name.lines().count() > 1 {
            return Err(unparseable(self.command(), stdout, "expected at most one node"));
        }
        Ok(Some(name))
    }
}

/// Drain a node.
///
/// DaemonSet pods are ignored. Pods with local data and unmanaged pods are
/// left for the operator, since evicting them loses data or the pod.
#[derive(Debug, Clone)]
pub struct NodeDrain {
    kubectl: String,
    kubeconfig: String,
    node: String,
    timeout: Duration,
    grace_period_secs: i64,
}

impl RemoteTool for NodeDrain {
    type Output = String;

    fn command(&self) -> String {
        format!(
            "{} --kubeconfig={} drain --timeout={} --grace-period={} --ignore-daemonsets {}",
            self.kubectl,
            self.kubeconfig,
            kubectl_duration(self.timeout),
            self.grace_period_secs,
            self.node
        )
    }

    fn parse(&self, stdout: &[u8]) -> RemoteResult<String> {
        Ok(String::from_utf8_lossy(stdout).into_owned())
    }
}

/// kubectl reads `0s` as "no timeout", so a fractional timeout is rounded
/// up to whole milliseconds instead of truncated.
fn kubectl_duration(timeout: Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{}ms", timeout.as_nanos().div_ceil(1_000_000))
    }
}

#[derive(Debug, Clone)]
pub struct NodeDelete {
    kubectl: String,
    kubeconfig: String,
    node: String,
}

impl RemoteTool for NodeDelete {
    type Output = String;

    fn command(&self) -> String {
        format!("{} --kubeconfig={} delete {}", self.kubectl, self.kubeconfig, self.node)
    }

    fn parse(&self, stdout: &[u8]) -> RemoteResult<String> {
        Ok(String::from_utf8_lossy(stdout).into_owned())
    }
}

// ── Services and node bootstrap ────────────────────────────────────

/// `systemctl restart <unit>`.
#[derive(Debug, Clone)]
pub struct ServiceRestart {
    unit: String,
}

impl RemoteTool for ServiceRestart {
    type Output = ();

    fn command(&self) -> String {
        format!("systemctl restart {}", self.unit)
    }

    fn parse(&self, _stdout: &[u8]) -> RemoteResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeadmAction {
    Init,
    Join,
    Reset,
}

/// `nodeadm init|join --cfg <file>` or `nodeadm reset`.
#[derive(Debug, Clone)]
pub struct Nodeadm {
    nodeadm: String,
    action: NodeadmAction,
    config: String,
}

impl RemoteTool for Nodeadm {
    type Output = ();

    fn command(&self) -> String {
        match self.action {
            NodeadmAction::Init => format!("{} init --cfg {}", self.nodeadm, self.config),
            NodeadmAction::Join => format!("{} join --cfg {}", self.nodeadm, self.config),
            NodeadmAction::Reset => format!("{} reset", self.nodeadm),
        }
    }

    fn parse(&self, _stdout: &[u8]) -> RemoteResult<()> {
        Ok(())
    }
}

// ── Toolbox ────────────────────────────────────────────────────────

/// Builds tools against the configured remote binary locations.
#[derive(Debug, Clone, Default)]
pub struct Toolbox {
    paths: RemotePathsConfig,
}

impl Toolbox {
    pub fn new(paths: RemotePathsConfig) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &RemotePathsConfig {
        &self.paths
    }

    pub fn join_token_create(&self) -> JoinTokenCreate {
        JoinTokenCreate {
            kubeadm: self.paths.kubeadm.clone(),
        }
    }

    pub fn etcd_info(&self) -> EtcdInfo {
        EtcdInfo {
            etcdadm: self.paths.etcdadm.clone(),
        }
    }

    pub fn etcd_init(&self) -> EtcdInit {
        EtcdInit {
            etcdadm: self.paths.etcdadm.clone(),
            snapshot: None,
        }
    }

    pub fn etcd_init_from_snapshot(&self, snapshot: &str) -> EtcdInit {
        EtcdInit {
            etcdadm: self.paths.etcdadm.clone(),
            snapshot: Some(snapshot.to_string()),
        }
    }

    pub fn etcd_join(&self, endpoint: &str) -> EtcdJoin {
        EtcdJoin {
            etcdadm: self.paths.etcdadm.clone(),
            endpoint: endpoint.to_string(),
        }
    }

    pub fn etcd_reset(&self, skip_remove_member: bool) -> EtcdReset {
        EtcdReset {
            etcdadm: self.paths.etcdadm.clone(),
            skip_remove_member,
        }
    }

    pub fn node_lookup(&self) -> NodeLookup {
        NodeLookup {
            kubectl: self.paths.kubectl.clone(),
            kubeconfig: self.paths.admin_kubeconfig.clone(),
        }
    }

    pub fn node_drain(&self, node: &str, timeout: Duration, grace_period_secs: i64) -> NodeDrain {
        NodeDrain {
            kubectl: self.paths.kubectl.clone(),
            kubeconfig: self.paths.admin_kubeconfig.clone(),
            node: node.to_string(),
            timeout,
            grace_period_secs,
        }
    }

    pub fn node_delete(&self, node: &str) -> NodeDelete {
        NodeDelete {
            kubectl: self.paths.kubectl.clone(),
            kubeconfig: self.paths.admin_kubeconfig.clone(),
            node: node.to_string(),
        }
    }

    pub fn restart_control_plane_service(&self) -> ServiceRestart {
        ServiceRestart {
            unit: self.paths.control_plane_service.clone(),
        }
    }

    pub fn nodeadm(&self, action: NodeadmAction) -> Nodeadm {
        Nodeadm {
            nodeadm: self.paths.nodeadm.clone(),
            action,
            config: self.paths.nodeadm_config.clone(),
        }
    }
}
