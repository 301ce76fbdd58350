//! Shared fixtures for the orchestration scenarios.
//!
//! `FakeConnector` stands in for SSH: every connect and remote call is
//! appended to a log, command stdout is scripted per host, and files live
//! in a map keyed by `(host, path)`.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use sshgrid_core::config::SshgridConfig;
use sshgrid_core::{
    Cluster, ClusterProviderSpec, ClusterProviderStatus, EtcdMember, Machine, MachinePhase,
    MachineProviderStatus, MachineRole, ProvisionedMachine, ProvisionedMachineProviderSpec,
    Secret, SshConfig, SSH_PRIVATE_KEY_KEY, SSH_USERNAME_KEY, TLS_CERT_KEY, TLS_KEY_KEY,
};
use sshgrid_ops::{Actuator, Context, MachineBinder, OpsResult};
use sshgrid_remote::{
    CommandOutput, Connector, MachineClient, RemoteCredential, RemoteError, RemoteResult,
};
use sshgrid_state::StateStore;

pub const NS: &str = "default";
pub const JOIN_COMMAND: &str = "/opt/bin/kubeadm token create --print-join-command";
pub const ETCD_INFO: &str = "/opt/bin/etcdadm info";
pub const NODE_LOOKUP: &str = "/opt/bin/kubectl --kubeconfig=/etc/kubernetes/admin.conf get node --selector kubernetes.io/hostname=$(hostname -f) -oname";
pub const ADMIN_CONF: &str = "/etc/kubernetes/admin.conf";

// ── Fake transport ─────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeWorld {
    pub log: Vec<String>,
    stdout: HashMap<(String, String), Vec<u8>>,
    failures: HashMap<(String, String), String>,
    unreachable: HashSet<String>,
    pub files: HashMap<(String, String), Vec<u8>>,
}

pub type World = Rc<RefCell<FakeWorld>>;

impl FakeWorld {
    pub fn respond(&mut self, host: &str, command: &str, stdout: &str) {
        self.stdout
            .insert((host.to_string(), command.to_string()), stdout.as_bytes().to_vec());
    }

    pub fn fail(&mut self, host: &str, command: &str, stderr: &str) {
        self.failures
            .insert((host.to_string(), command.to_string()), stderr.to_string());
    }

    pub fn unreachable(&mut self, host: &str) {
        self.unreachable.insert(host.to_string());
    }

    pub fn put_file(&mut self, host: &str, path: &str, data: &[u8]) {
        self.files.insert((host.to_string(), path.to_string()), data.to_vec());
    }

    pub fn file(&self, host: &str, path: &str) -> Option<&[u8]> {
        self.files
            .get(&(host.to_string(), path.to_string()))
            .map(Vec::as_slice)
    }

    /// Log entries for one host, with the `host: ` prefix removed.
    pub fn calls_on(&self, host: &str) -> Vec<String> {
        let prefix = format!("{host}: ");
        self.log
            .iter()
            .filter_map(|l| l.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn connects(&self) -> Vec<String> {
        self.log
            .iter()
            .filter_map(|l| l.strip_prefix("connect ").map(str::to_string))
            .collect()
    }

    /// Etcd info output for a fresh member on `host`.
    pub fn etcd_member_on(&mut self, host: &str, member: &EtcdMember) {
        let json = serde_json::to_string(member).unwrap();
        self.respond(host, ETCD_INFO, &json);
    }
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    pub world: World,
}

impl Connector for FakeConnector {
    fn connect(
        &self,
        ssh: &SshConfig,
        credential: RemoteCredential,
    ) -> RemoteResult<Box<dyn MachineClient>> {
        let mut world = self.world.borrow_mut();
        world.log.push(format!("connect {}", ssh.host));
        if world.unreachable.contains(&ssh.host) {
            return Err(RemoteError::Connect {
                host: ssh.host.clone(),
                port: ssh.port,
                reason: "connection refused".to_string(),
            });
        }
        assert_eq!(credential.username, "ubuntu");
        Ok(Box::new(FakeClient {
            host: ssh.host.clone(),
            world: self.world.clone(),
        }))
    }
}

struct FakeClient {
    host: String,
    world: World,
}

impl FakeClient {
    fn record(&self, entry: String) {
        self.world
            .borrow_mut()
            .log
            .push(format!("{}: {entry}", self.host));
    }

    fn key(&self, s: &str) -> (String, String) {
        (self.host.clone(), s.to_string())
    }
}

impl MachineClient for FakeClient {
    fn host(&self) -> &str {
        &self.host
    }

    fn run_command(&self, command: &str) -> RemoteResult<CommandOutput> {
        self.record(command.to_string());
        let world = self.world.borrow();
        if let Some(stderr) = world.failures.get(&self.key(command)) {
            return Err(RemoteError::Command {
                host: self.host.clone(),
                command: command.to_string(),
                status: "exit status: 1".to_string(),
                stdout: String::new(),
                stderr: stderr.clone(),
            });
        }
        Ok(CommandOutput {
            stdout: world.stdout.get(&self.key(command)).cloned().unwrap_or_default(),
            stderr: Vec::new(),
        })
    }

    fn read_file(&self, path: &str) -> RemoteResult<Vec<u8>> {
        self.record(format!("read {path}"));
        self.world
            .borrow()
            .files
            .get(&self.key(path))
            .cloned()
            .ok_or_else(|| RemoteError::Command {
                host: self.host.clone(),
                command: format!("cat {path}"),
                status: "exit status: 1".to_string(),
                stdout: String::new(),
                stderr: "No such file or directory".to_string(),
            })
    }

    fn write_file(&self, path: &str, mode: u32, data: &[u8]) -> RemoteResult<()> {
        self.record(format!("write {path} {mode:o}"));
        self.world
            .borrow_mut()
            .files
            .insert(self.key(path), data.to_vec());
        Ok(())
    }

    fn mkdir_all(&self, path: &str, mode: u32) -> RemoteResult<()> {
        self.record(format!("mkdir {path} {mode:o}"));
        Ok(())
    }

    fn move_file(&self, src: &str, dst: &str) -> RemoteResult<()> {
        self.record(format!("mv {src} {dst}"));
        let mut world = self.world.borrow_mut();
        if let Some(data) = world.files.remove(&self.key(src)) {
            world.files.insert(self.key(dst), data);
        }
        Ok(())
    }
}

// ── Recording actuator ─────────────────────────────────────────────

/// Marks machines bootstrapped without touching them. Masters get the
/// member registered for their name.
#[derive(Clone, Default)]
pub struct RecordingActuator {
    pub calls: Rc<RefCell<Vec<String>>>,
    pub members: Rc<RefCell<HashMap<String, EtcdMember>>>,
}

impl Actuator for RecordingActuator {
    fn create(&self, ctx: &Context, _cluster: &Cluster, machine: &mut Machine) -> OpsResult<()> {
        self.calls
            .borrow_mut()
            .push(format!("create {}", machine.name()));
        let provisioned = MachineBinder::new(&ctx.store, ctx.namespace())
            .provisioned_machine_for(machine)?
            .provider_spec()?;
        let member = if machine.has_role(MachineRole::Master) {
            self.members.borrow().get(machine.name()).cloned()
        } else {
            None
        };
        machine.put_provider_status(&MachineProviderStatus {
            phase: MachinePhase::Bootstrapped,
            ssh_config: Some(provisioned.ssh_config),
            etcd_member: member,
        })?;
        ctx.store.update_status(machine)?;
        Ok(())
    }

    fn delete(&self, _ctx: &Context, _cluster: &Cluster, machine: &Machine) -> OpsResult<()> {
        self.calls
            .borrow_mut()
            .push(format!("delete {}", machine.name()));
        Ok(())
    }
}

// ── Store fixtures ─────────────────────────────────────────────────

pub fn member(id: u64, host: &str) -> EtcdMember {
    EtcdMember {
        id,
        name: host.to_string(),
        peer_urls: vec![format!("https://{host}:2380")],
        client_urls: vec![format!("https://{host}:2379")],
    }
}

pub fn ssh(host: &str) -> SshConfig {
    SshConfig {
        host: host.to_string(),
        port: 22,
        public_keys: vec![],
        credential_secret: "sshCredential".to_string(),
    }
}

pub fn context_with(connector: FakeConnector, actuator: Box<dyn Actuator>) -> Context {
    let store = StateStore::open_in_memory().unwrap();
    Context::new(store, Box::new(connector), actuator, &SshgridConfig::default())
}

/// Cluster, SSH credential and etcd CA secrets.
pub fn seed_cluster(store: &StateStore) {
    let cluster = Cluster::new(
        NS,
        "cluster",
        &ClusterProviderSpec {
            etcd_ca_secret: "etcd-ca".to_string(),
            vip_address: None,
            api_server_port: 6443,
        },
    )
    .unwrap();
    store.create(&cluster).unwrap();
    store
        .create(
            &Secret::new(NS, "sshCredential")
                .with(SSH_USERNAME_KEY, "ubuntu")
                .with(SSH_PRIVATE_KEY_KEY, "PRIVATE KEY"),
        )
        .unwrap();
    store
        .create(
            &Secret::new(NS, "etcd-ca")
                .with(TLS_CERT_KEY, "CA CERT")
                .with(TLS_KEY_KEY, "CA KEY"),
        )
        .unwrap();
}

/// A bootstrapped, bound machine. Masters with a member are also added to
/// the cluster membership.
pub fn add_machine(store: &StateStore, host: &str, role: MachineRole, etcd: Option<EtcdMember>) {
    let mut machine = Machine::new(NS, host, vec![role]);
    let mut provisioned = ProvisionedMachine::new(
        NS,
        host,
        &ProvisionedMachineProviderSpec {
            ssh_config: ssh(host),
            vip_network_interface: "eth0".to_string(),
            machine_name: None,
        },
    )
    .unwrap();
    machine
        .put_provider_status(&MachineProviderStatus {
            phase: MachinePhase::Bootstrapped,
            ssh_config: Some(ssh(host)),
            etcd_member: etcd.clone(),
        })
        .unwrap();
    let binder = MachineBinder::new(store, NS);
    binder.bind(&mut machine, &mut provisioned).unwrap();
    binder.persist_bound_pair(&machine, &provisioned).unwrap();

    if let Some(member) = etcd {
        let mut cluster: Cluster = store.get(NS, "cluster").unwrap();
        let mut status = cluster.provider_status().unwrap();
        status.etcd_members.push(member);
        status.etcd_members.sort_by_key(|m| m.id);
        cluster.put_provider_status(&status).unwrap();
        store.update_status(&cluster).unwrap();
    }
}

pub fn cluster_member_ids(store: &StateStore) -> Vec<u64> {
    let cluster: Cluster = store.get(NS, "cluster").unwrap();
    let status: ClusterProviderStatus = cluster.provider_status().unwrap();
    status.etcd_members.iter().map(|m| m.id).collect()
}

pub fn machine_status(store: &StateStore, name: &str) -> MachineProviderStatus {
    store
        .get::<Machine>(NS, name)
        .unwrap()
        .provider_status()
        .unwrap()
}
