//! MachineLifecycle — create, delete and inspect machines.
//!
//! Preconditions are checked before any step runs. Past that point each
//! workflow is a [`Saga`]: fail-fast, no rollback, with the failed step and
//! the steps already done carried in the error.

use std::time::Duration;

use serde::Serialize;
use tracing::info;

use sshgrid_core::config::{parse_duration, DefaultsConfig};
use sshgrid_core::{
    Cluster, EtcdMember, Machine, MachinePhase, MachineProviderStatus, MachineRole,
    ProvisionedMachine, ProvisionedMachineProviderSpec, Secret, SshConfig, BOOTSTRAP_CA_HASH_KEY,
    BOOTSTRAP_TOKEN_KEY,
};
use sshgrid_remote::{install_file, run_tool, MachineClient};
use sshgrid_state::StateError;

use crate::binder::MachineBinder;
use crate::context::Context;
use crate::error::{OpsError, OpsResult, StepContext};
use crate::saga::{Saga, SagaReport};
use crate::status::{insert_cluster_member, remove_cluster_member};

#[derive(Debug, Clone)]
pub struct CreateMachineRequest {
    /// `master` or `node`, any case.
    pub role: String,
    pub ssh: SshConfig,
    pub vip_network_interface: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOptions {
    /// Zero waits forever.
    pub timeout: Duration,
    /// Negative uses each pod's own grace period.
    pub grace_period_secs: i64,
}

impl DrainOptions {
    pub fn from_defaults(defaults: &DefaultsConfig) -> OpsResult<Self> {
        let timeout = parse_duration(&defaults.drain_timeout).ok_or_else(|| {
            OpsError::Precondition(format!("invalid drain timeout {:?}", defaults.drain_timeout))
        })?;
        Ok(Self {
            timeout,
            grace_period_secs: defaults.drain_grace_period_secs,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DeleteMachineRequest {
    pub name: String,
    pub drain: DrainOptions,
}

/// A machine with its provider payloads decoded, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineView {
    pub name: String,
    pub roles: Vec<MachineRole>,
    pub provisioned_machine: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub phase: MachinePhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etcd_member: Option<EtcdMember>,
}

pub struct MachineLifecycle<'c> {
    ctx: &'c Context,
}

struct CreateRun<'c> {
    ctx: &'c Context,
    cluster: Cluster,
    machine: Machine,
    provisioned: ProvisionedMachine,
    /// Session to the master that issued the bootstrap token.
    master: Option<Box<dyn MachineClient>>,
}

struct DeleteRun<'c> {
    ctx: &'c Context,
    cluster: Cluster,
    machine: Machine,
    provisioned: ProvisionedMachine,
    drain: DrainOptions,
}

impl<'c> MachineLifecycle<'c> {
    pub fn new(ctx: &'c Context) -> Self {
        Self { ctx }
    }

    pub fn create(&self, req: CreateMachineRequest) -> OpsResult<SagaReport> {
        let ctx = self.ctx;
        let ns = ctx.namespace();
        let role: MachineRole = req.role.parse()?;
        let cluster = ctx.cluster()?;
        ctx.secret(&req.ssh.credential_secret)?;

        let name = req.ssh.host.clone();
        let mut machine = Machine::new(ns, &name, vec![role]);
        machine.put_provider_status(&MachineProviderStatus::default())?;
        let mut provisioned = ProvisionedMachine::new(
            ns,
            &name,
            &ProvisionedMachineProviderSpec {
                ssh_config: req.ssh,
                vip_network_interface: req.vip_network_interface,
                machine_name: None,
            },
        )?;
        MachineBinder::new(&ctx.store, ns).bind(&mut machine, &mut provisioned)?;
        info!(machine = %name, %role, "creating machine");

        let is_node = role == MachineRole::Node;
        let mut run = CreateRun {
            ctx,
            cluster,
            machine,
            provisioned,
            master: None,
        };
        Saga::<CreateRun<'_>>::new("create machine")
            .step(format!("persist {name}"), persist_machine)
            .step_if(is_node, "issue bootstrap token", issue_bootstrap_token)
            .step(format!("bootstrap {name}"), bootstrap_machine)
            .step_if(is_node, format!("copy admin kubeconfig to {name}"), copy_admin_kubeconfig)
            .step_if(!is_node, "update cluster membership", record_membership)
            .run(&mut run)
    }

    pub fn delete(&self, req: DeleteMachineRequest) -> OpsResult<SagaReport> {
        let ctx = self.ctx;
        let ns = ctx.namespace();
        let machine: Machine = ctx.store.get(ns, &req.name)?;
        let provisioned = MachineBinder::new(&ctx.store, ns).provisioned_machine_for(&machine)?;
        let cluster = ctx.cluster()?;

        if machine.has_role(MachineRole::Master) {
            let machines = ctx.store.list::<Machine>(ns)?;
            let masters = machines.iter().filter(|m| m.has_role(MachineRole::Master)).count();
            let nodes = machines.iter().filter(|m| m.has_role(MachineRole::Node)).count();
            if masters == 1 && nodes > 0 {
                return Err(OpsError::WouldOrphanNodes { nodes });
            }
        }

        let has_member = machine.provider_status()?.etcd_member.is_some();
        let name = req.name;
        info!(machine = %name, "deleting machine");
        let mut run = DeleteRun {
            ctx,
            cluster,
            machine,
            provisioned,
            drain: req.drain,
        };
        Saga::<DeleteRun<'_>>::new("delete machine")
            .step(format!("drain {name}"), drain_and_delete_node)
            .step(format!("reset {name}"), reset_machine)
            .step_if(has_member, "update cluster membership", forget_membership)
            .step(format!("delete {name}"), delete_objects)
            .run(&mut run)
    }

    /// One machine by name, or every machine in the namespace.
    pub fn get(&self, name: Option<&str>) -> OpsResult<Vec<MachineView>> {
        let ns = self.ctx.namespace();
        let machines = match name {
            Some(name) => vec![self.ctx.store.get::<Machine>(ns, name)?],
            None => self.ctx.store.list::<Machine>(ns)?,
        };
        machines.iter().map(|m| self.view(m)).collect()
    }

    fn view(&self, machine: &Machine) -> OpsResult<MachineView> {
        let spec = machine.provider_spec()?;
        let status = machine.provider_status()?;
        let ssh = match status.ssh_config {
            Some(ssh) => Some(ssh),
            None => match self
                .ctx
                .store
                .try_get::<ProvisionedMachine>(self.ctx.namespace(), &spec.provisioned_machine_name)?
            {
                Some(pm) => Some(pm.provider_spec()?.ssh_config),
                None => None,
            },
        };
        Ok(MachineView {
            name: machine.name().to_string(),
            roles: machine.spec.roles.clone(),
            provisioned_machine: spec.provisioned_machine_name,
            host: ssh.as_ref().map(|s| s.host.clone()),
            port: ssh.as_ref().map(|s| s.port),
            phase: status.phase,
            etcd_member: status.etcd_member,
        })
    }
}

// ── create steps ───────────────────────────────────────────────────

fn persist_machine(run: &mut CreateRun<'_>) -> OpsResult<()> {
    MachineBinder::new(&run.ctx.store, run.ctx.namespace())
        .persist_bound_pair(&run.machine, &run.provisioned)
}

fn issue_bootstrap_token(run: &mut CreateRun<'_>) -> OpsResult<()> {
    let ctx = run.ctx;
    let (master, master_pm) = ctx.first_master()?.ok_or_else(|| {
        OpsError::Precondition(
            "unable to find any machine with Master role, cannot obtain bootstrap token".to_string(),
        )
    })?;
    let ssh = master_pm.provider_spec()?.ssh_config;
    let client = ctx.connect(&ssh).step("connect", master.name())?;
    let token = run_tool(client.as_ref(), &ctx.tools.join_token_create())
        .step("create bootstrap token", master.name())?;

    let secret = Secret::new(ctx.namespace(), &ctx.defaults.bootstrap_token_secret)
        .with(BOOTSTRAP_TOKEN_KEY, token.token)
        .with(BOOTSTRAP_CA_HASH_KEY, token.ca_hash);
    match ctx.store.create(&secret) {
        Err(StateError::AlreadyExists(_)) => ctx.store.update(&secret)?,
        other => other?,
    }
    info!(master = %master.name(), secret = %secret.meta.name, "bootstrap token issued");
    run.master = Some(client);
    Ok(())
}

fn bootstrap_machine(run: &mut CreateRun<'_>) -> OpsResult<()> {
    let ctx = run.ctx;
    ctx.actuator.create(ctx, &run.cluster, &mut run.machine)
}

fn copy_admin_kubeconfig(run: &mut CreateRun<'_>) -> OpsResult<()> {
    let ctx = run.ctx;
    let name = run.machine.name().to_string();
    let path = &ctx.tools.paths().admin_kubeconfig;
    let master = run.master.as_ref().ok_or_else(|| {
        OpsError::Precondition("no master session to read the admin kubeconfig from".to_string())
    })?;
    let kubeconfig = master.read_file(path).step("read admin kubeconfig", master.host())?;

    let ssh = run.provisioned.provider_spec()?.ssh_config;
    let client = ctx.connect(&ssh).step("connect", &name)?;
    install_file(client.as_ref(), path, 0o600, &kubeconfig).step("write admin kubeconfig", &name)?;
    Ok(())
}

fn record_membership(run: &mut CreateRun<'_>) -> OpsResult<()> {
    match run.machine.provider_status()?.etcd_member {
        Some(member) => insert_cluster_member(&run.ctx.store, &mut run.cluster, &member),
        None => Ok(()),
    }
}

// ── delete steps ───────────────────────────────────────────────────

fn drain_and_delete_node(run: &mut DeleteRun<'_>) -> OpsResult<()> {
    let ctx = run.ctx;
    let name = run.machine.name();
    let ssh = run.provisioned.provider_spec()?.ssh_config;
    let client = ctx.connect(&ssh).step("connect", name)?;

    let Some(node) = run_tool(client.as_ref(), &ctx.tools.node_lookup())
        .step("identify cluster node", name)?
    else {
        info!(machine = %name, "no cluster node registered, skipping drain");
        return Ok(());
    };
    info!(machine = %name, %node, "draining cluster node");
    let drain = ctx
        .tools
        .node_drain(&node, run.drain.timeout, run.drain.grace_period_secs);
    run_tool(client.as_ref(), &drain).step("drain cluster node", name)?;
    info!(machine = %name, %node, "deleting cluster node");
    run_tool(client.as_ref(), &ctx.tools.node_delete(&node)).step("delete cluster node", name)?;
    Ok(())
}

fn reset_machine(run: &mut DeleteRun<'_>) -> OpsResult<()> {
    let ctx = run.ctx;
    ctx.actuator.delete(ctx, &run.cluster, &run.machine)
}

fn forget_membership(run: &mut DeleteRun<'_>) -> OpsResult<()> {
    match run.machine.provider_status()?.etcd_member {
        Some(member) => remove_cluster_member(&run.ctx.store, &mut run.cluster, &member),
        None => Ok(()),
    }
}

fn delete_objects(run: &mut DeleteRun<'_>) -> OpsResult<()> {
    let ns = run.ctx.namespace();
    run.ctx.store.delete::<Machine>(ns, run.machine.name())?;
    run.ctx
        .store
        .delete::<ProvisionedMachine>(ns, run.provisioned.name())?;
    Ok(())
}
