//! Recovery — rebuild the etcd quorum from a single snapshot.
//!
//! Every master is reset, re-armed with the etcd CA, and then the first
//! master (store list order) is seeded from the snapshot. The remaining
//! masters join the seed one at a time. Membership is rewritten in the
//! store as each member goes away or comes back, so an aborted run leaves
//! the store describing exactly the members that exist.

use std::path::PathBuf;

use tracing::info;

use sshgrid_core::{Cluster, EtcdMember, Machine, SshConfig};
use sshgrid_remote::{install_file, run_tool, MachineClient};

use crate::actuator::etcd_ca_pair;
use crate::binder::MachineBinder;
use crate::context::Context;
use crate::error::{OpsError, OpsResult, StepContext};
use crate::saga::{Saga, SagaReport};
use crate::status::{insert_cluster_member, record_machine_member, remove_cluster_member};

#[derive(Debug, Clone)]
pub struct RecoverRequest {
    /// Local path of the etcd snapshot to restore.
    pub snapshot: PathBuf,
}

pub struct Recovery<'c> {
    ctx: &'c Context,
}

struct MasterSession {
    machine: Machine,
    ssh: SshConfig,
    client: Option<Box<dyn MachineClient>>,
}

struct RecoveryRun<'c> {
    ctx: &'c Context,
    cluster: Cluster,
    masters: Vec<MasterSession>,
    ca_cert: String,
    ca_key: String,
    snapshot: Vec<u8>,
    seed_member: Option<EtcdMember>,
}

fn session(masters: &[MasterSession], i: usize) -> OpsResult<&dyn MachineClient> {
    masters
        .get(i)
        .and_then(|m| m.client.as_deref())
        .ok_or_else(|| OpsError::Precondition(format!("no session for master #{i}")))
}

impl<'c> Recovery<'c> {
    pub fn new(ctx: &'c Context) -> Self {
        Self { ctx }
    }

    pub fn recover(&self, req: RecoverRequest) -> OpsResult<SagaReport> {
        let ctx = self.ctx;
        let masters = ctx.masters()?;
        if masters.is_empty() {
            info!("no master machines, nothing to recover");
            return Ok(SagaReport::default());
        }

        let cluster = ctx.cluster()?;
        let cluster_spec = cluster.provider_spec()?;
        let ca = ctx.secret(&cluster_spec.etcd_ca_secret)?;
        let (ca_cert, ca_key) = etcd_ca_pair(&ca)?;
        let (ca_cert, ca_key) = (ca_cert.to_string(), ca_key.to_string());

        let binder = MachineBinder::new(&ctx.store, ctx.namespace());
        let sessions = masters
            .into_iter()
            .map(|machine| {
                let ssh = binder.provisioned_machine_for(&machine)?.provider_spec()?.ssh_config;
                Ok(MasterSession {
                    machine,
                    ssh,
                    client: None,
                })
            })
            .collect::<OpsResult<Vec<_>>>()?;

        let snapshot = std::fs::read(&req.snapshot).map_err(|source| OpsError::Io {
            context: format!("unable to read snapshot {}", req.snapshot.display()),
            source,
        })?;

        let names: Vec<String> = sessions.iter().map(|s| s.machine.name().to_string()).collect();
        info!(masters = names.len(), seed = %names[0], snapshot = %req.snapshot.display(), "recovering etcd");

        let mut saga = Saga::<RecoveryRun<'_>>::new("recover etcd");
        for (i, name) in names.iter().enumerate() {
            saga = saga.step(format!("connect {name}"), move |run| connect(run, i));
        }
        for (i, name) in names.iter().enumerate() {
            saga = saga.step(format!("reset etcd {name}"), move |run| reset_member(run, i));
        }
        for (i, name) in names.iter().enumerate() {
            saga = saga.step(format!("write etcd CA {name}"), move |run| write_ca(run, i));
        }
        saga = saga
            .step(format!("seed {} from snapshot", names[0]), seed)
            .step("check seed endpoints", check_seed_endpoints);
        for (i, name) in names.iter().enumerate().skip(1) {
            saga = saga.step(format!("join {name}"), move |run| join_seed(run, i));
        }
        for (i, name) in names.iter().enumerate() {
            let service = ctx.tools.paths().control_plane_service.clone();
            saga = saga.best_effort(format!("restart {service} {name}"), move |run| {
                restart_service(run, i)
            });
        }

        let mut run = RecoveryRun {
            ctx,
            cluster,
            masters: sessions,
            ca_cert,
            ca_key,
            snapshot,
            seed_member: None,
        };
        let report = saga.run(&mut run)?;
        let members = run.cluster.provider_status()?.etcd_members.len();
        info!(
            members,
            warnings = report.warnings.len(),
            "etcd recovered"
        );
        Ok(report)
    }
}

fn connect(run: &mut RecoveryRun<'_>, i: usize) -> OpsResult<()> {
    let master = &mut run.masters[i];
    let client = run
        .ctx
        .connect(&master.ssh)
        .step("connect", master.machine.name())?;
    master.client = Some(client);
    Ok(())
}

fn reset_member(run: &mut RecoveryRun<'_>, i: usize) -> OpsResult<()> {
    let RecoveryRun {
        ctx,
        cluster,
        masters,
        ..
    } = run;
    let client = session(masters, i)?;
    let name = masters[i].machine.name().to_string();
    // The quorum may be gone, so the member is not removed through it.
    run_tool(client, &ctx.tools.etcd_reset(true)).step("etcdadm reset", &name)?;

    let machine = &mut masters[i].machine;
    match machine.provider_status()?.etcd_member {
        Some(member) => {
            remove_cluster_member(&ctx.store, cluster, &member)?;
            record_machine_member(&ctx.store, machine, None)?;
        }
        None => info!(machine = %name, "no etcd member recorded"),
    }
    Ok(())
}

fn write_ca(run: &mut RecoveryRun<'_>, i: usize) -> OpsResult<()> {
    let client = session(&run.masters, i)?;
    let name = run.masters[i].machine.name();
    let dir = &run.ctx.tools.paths().etcd_pki_dir;
    install_file(client, &format!("{dir}/ca.crt"), 0o644, run.ca_cert.as_bytes())
        .step("write etcd CA certificate", name)?;
    install_file(client, &format!("{dir}/ca.key"), 0o600, run.ca_key.as_bytes())
        .step("write etcd CA key", name)?;
    Ok(())
}

fn seed(run: &mut RecoveryRun<'_>) -> OpsResult<()> {
    let ctx = run.ctx;
    let client = session(&run.masters, 0)?;
    let name = run.masters[0].machine.name().to_string();
    let path = &ctx.tools.paths().etcd_snapshot;

    client
        .write_file(path, 0o600, &run.snapshot)
        .step("copy snapshot", &name)?;
    run_tool(client, &ctx.tools.etcd_init_from_snapshot(path)).step("etcdadm init", &name)?;
    let member = run_tool(client, &ctx.tools.etcd_info()).step("etcdadm info", &name)?;

    record(run, 0, &member)?;
    info!(machine = %name, member = member.id, "etcd seeded from snapshot");
    run.seed_member = Some(member);
    Ok(())
}

fn check_seed_endpoints(run: &mut RecoveryRun<'_>) -> OpsResult<()> {
    seed_endpoint(run).map(|_| ())
}

fn seed_endpoint(run: &RecoveryRun<'_>) -> OpsResult<String> {
    let seed = run
        .seed_member
        .as_ref()
        .ok_or_else(|| OpsError::Precondition("etcd has not been seeded".to_string()))?;
    seed.client_urls.first().cloned().ok_or_else(|| {
        OpsError::Precondition(format!(
            "seed etcd member {} ({}) reported no client URLs",
            seed.id, seed.name
        ))
    })
}

fn join_seed(run: &mut RecoveryRun<'_>, i: usize) -> OpsResult<()> {
    let ctx = run.ctx;
    let endpoint = seed_endpoint(run)?;
    let client = session(&run.masters, i)?;
    let name = run.masters[i].machine.name().to_string();

    run_tool(client, &ctx.tools.etcd_join(&endpoint)).step("etcdadm join", &name)?;
    let member = run_tool(client, &ctx.tools.etcd_info()).step("etcdadm info", &name)?;
    record(run, i, &member)?;
    info!(machine = %name, member = member.id, %endpoint, "etcd member joined");
    Ok(())
}

fn restart_service(run: &mut RecoveryRun<'_>, i: usize) -> OpsResult<()> {
    let client = session(&run.masters, i)?;
    let name = run.masters[i].machine.name();
    run_tool(client, &run.ctx.tools.restart_control_plane_service()).step("restart service", name)
}

/// Write a fresh member to both the machine and the cluster.
fn record(run: &mut RecoveryRun<'_>, i: usize, member: &EtcdMember) -> OpsResult<()> {
    let store = &run.ctx.store;
    record_machine_member(store, &mut run.masters[i].machine, Some(member.clone()))?;
    insert_cluster_member(store, &mut run.cluster, member)
}
