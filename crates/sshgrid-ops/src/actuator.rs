//! Machine actuator — brings a bound machine into (or out of) the cluster.
//!
//! The lifecycle orchestrator owns the store objects and the ordering; the
//! actuator owns what happens on the machine itself.

use serde::Serialize;
use tracing::info;

use sshgrid_core::{
    Cluster, ClusterProviderSpec, EtcdMember, Machine, MachinePhase, MachineRole,
    ProvisionedMachineProviderSpec, Secret, BOOTSTRAP_CA_HASH_KEY, BOOTSTRAP_TOKEN_KEY,
    TLS_CERT_KEY, TLS_KEY_KEY,
};
use sshgrid_remote::tools::NodeadmAction;
use sshgrid_remote::{install_file, run_tool, MachineClient, Toolbox};

use crate::binder::MachineBinder;
use crate::context::Context;
use crate::error::{OpsError, OpsResult, StepContext};

pub trait Actuator {
    /// Bootstrap `machine`. On success its status is `Bootstrapped` and has
    /// been written back to the store.
    fn create(&self, ctx: &Context, cluster: &Cluster, machine: &mut Machine) -> OpsResult<()>;

    /// Tear down whatever `create` set up on the machine.
    fn delete(&self, ctx: &Context, cluster: &Cluster, machine: &Machine) -> OpsResult<()>;
}

/// Bootstraps machines with `etcdadm` and `nodeadm`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeadmActuator;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeadmMasterConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    vip_configuration: Option<VipConfiguration>,
    master_configuration: MasterConfiguration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VipConfiguration {
    ip: String,
    network_interface: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MasterConfiguration {
    api: ApiEndpoint,
    etcd: EtcdEndpoints,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiEndpoint {
    advertise_address: String,
    bind_port: u16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EtcdEndpoints {
    endpoints: Vec<String>,
    ca_file: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeadmNodeConfig {
    master_endpoint: String,
    token: String,
    #[serde(rename = "discoveryTokenCACertHashes")]
    discovery_token_ca_cert_hashes: Vec<String>,
}

impl NodeadmActuator {
    fn install_etcd_ca(
        &self,
        client: &dyn MachineClient,
        tools: &Toolbox,
        ca: &Secret,
        machine: &str,
    ) -> OpsResult<()> {
        let (cert, key) = etcd_ca_pair(ca)?;
        let dir = &tools.paths().etcd_pki_dir;
        install_file(client, &format!("{dir}/ca.crt"), 0o644, cert.as_bytes())
            .step("write etcd CA certificate", machine)?;
        install_file(client, &format!("{dir}/ca.key"), 0o600, key.as_bytes())
            .step("write etcd CA key", machine)?;
        Ok(())
    }

    fn bootstrap_master(
        &self,
        ctx: &Context,
        client: &dyn MachineClient,
        cluster_spec: &ClusterProviderSpec,
        members: &[EtcdMember],
        provisioned: &ProvisionedMachineProviderSpec,
        machine: &str,
    ) -> OpsResult<EtcdMember> {
        let ca = ctx.secret(&cluster_spec.etcd_ca_secret)?;
        self.install_etcd_ca(client, &ctx.tools, &ca, machine)?;

        match members.first() {
            None => {
                info!(%machine, "initializing etcd cluster");
                run_tool(client, &ctx.tools.etcd_init()).step("etcdadm init", machine)?;
            }
            Some(existing) => {
                let endpoint = existing.client_urls.first().ok_or_else(|| {
                    OpsError::Precondition(format!(
                        "etcd member {} has no client URLs to join through",
                        existing.id
                    ))
                })?;
                info!(%machine, %endpoint, "joining etcd cluster");
                run_tool(client, &ctx.tools.etcd_join(endpoint)).step("etcdadm join", machine)?;
            }
        }
        let member = run_tool(client, &ctx.tools.etcd_info()).step("etcdadm info", machine)?;

        let mut endpoints: Vec<String> = members
            .iter()
            .filter(|m| m.id != member.id)
            .flat_map(|m| m.client_urls.iter().cloned())
            .collect();
        endpoints.extend(member.client_urls.iter().cloned());

        let config = NodeadmMasterConfig {
            vip_configuration: cluster_spec.vip_address.as_ref().map(|ip| VipConfiguration {
                ip: ip.clone(),
                network_interface: provisioned.vip_network_interface.clone(),
            }),
            master_configuration: MasterConfiguration {
                api: ApiEndpoint {
                    advertise_address: provisioned.ssh_config.host.clone(),
                    bind_port: cluster_spec.api_server_port,
                },
                etcd: EtcdEndpoints {
                    endpoints,
                    ca_file: format!("{}/ca.crt", ctx.tools.paths().etcd_pki_dir),
                },
            },
        };
        write_nodeadm_config(client, &ctx.tools, &config, machine)?;
        run_tool(client, &ctx.tools.nodeadm(NodeadmAction::Init)).step("nodeadm init", machine)?;
        Ok(member)
    }

    fn bootstrap_node(
        &self,
        ctx: &Context,
        client: &dyn MachineClient,
        cluster_spec: &ClusterProviderSpec,
        machine: &str,
    ) -> OpsResult<()> {
        let token = ctx.secret(&ctx.defaults.bootstrap_token_secret)?;
        let missing = |key: &str| {
            OpsError::Precondition(format!(
                "bootstrap token secret {:?} has no {key:?}",
                token.meta.name
            ))
        };
        let value = token.get(BOOTSTRAP_TOKEN_KEY).ok_or_else(|| missing(BOOTSTRAP_TOKEN_KEY))?;
        let ca_hash = token
            .get(BOOTSTRAP_CA_HASH_KEY)
            .ok_or_else(|| missing(BOOTSTRAP_CA_HASH_KEY))?;

        let host = match &cluster_spec.vip_address {
            Some(vip) => vip.clone(),
            None => {
                let (_, master) = ctx.first_master()?.ok_or_else(|| {
                    OpsError::Precondition("no master machine to join".to_string())
                })?;
                master.provider_spec()?.ssh_config.host
            }
        };

        let config = NodeadmNodeConfig {
            master_endpoint: format!("{host}:{}", cluster_spec.api_server_port),
            token: value.to_string(),
            discovery_token_ca_cert_hashes: vec![ca_hash.to_string()],
        };
        write_nodeadm_config(client, &ctx.tools, &config, machine)?;
        run_tool(client, &ctx.tools.nodeadm(NodeadmAction::Join)).step("nodeadm join", machine)?;
        Ok(())
    }
}

impl Actuator for NodeadmActuator {
    fn create(&self, ctx: &Context, cluster: &Cluster, machine: &mut Machine) -> OpsResult<()> {
        let name = machine.name().to_string();
        let provisioned = MachineBinder::new(&ctx.store, ctx.namespace())
            .provisioned_machine_for(machine)?
            .provider_spec()?;
        let cluster_spec = cluster.provider_spec()?;
        let client = ctx.connect(&provisioned.ssh_config).step("connect", &name)?;

        let member = if machine.has_role(MachineRole::Master) {
            let members = cluster.provider_status()?.etcd_members;
            Some(self.bootstrap_master(
                ctx,
                client.as_ref(),
                &cluster_spec,
                &members,
                &provisioned,
                &name,
            )?)
        } else {
            self.bootstrap_node(ctx, client.as_ref(), &cluster_spec, &name)?;
            None
        };

        let mut status = machine.provider_status()?;
        status.phase = MachinePhase::Bootstrapped;
        status.ssh_config = Some(provisioned.ssh_config);
        status.etcd_member = member;
        machine.put_provider_status(&status)?;
        ctx.store.update_status(machine)?;
        info!(machine = %name, "machine bootstrapped");
        Ok(())
    }

    fn delete(&self, ctx: &Context, _cluster: &Cluster, machine: &Machine) -> OpsResult<()> {
        let name = machine.name();
        let provisioned = MachineBinder::new(&ctx.store, ctx.namespace())
            .provisioned_machine_for(machine)?
            .provider_spec()?;
        let client = ctx.connect(&provisioned.ssh_config).step("connect", name)?;

        run_tool(client.as_ref(), &ctx.tools.nodeadm(NodeadmAction::Reset))
            .step("nodeadm reset", name)?;
        if machine.has_role(MachineRole::Master) {
            run_tool(client.as_ref(), &ctx.tools.etcd_reset(false)).step("etcdadm reset", name)?;
        }
        info!(machine = %name, "machine reset");
        Ok(())
    }
}

/// The `tls.crt` / `tls.key` pair from the etcd CA secret.
pub(crate) fn etcd_ca_pair(secret: &Secret) -> OpsResult<(&str, &str)> {
    let get = |key: &str| {
        secret.get(key).ok_or_else(|| {
            OpsError::Precondition(format!("etcd CA secret {:?} has no {key:?}", secret.meta.name))
        })
    };
    Ok((get(TLS_CERT_KEY)?, get(TLS_KEY_KEY)?))
}

fn write_nodeadm_config<T: Serialize>(
    client: &dyn MachineClient,
    tools: &Toolbox,
    config: &T,
    machine: &str,
) -> OpsResult<()> {
    // JSON is valid YAML, which is what nodeadm reads.
    let body = serde_json::to_vec_pretty(config).map_err(|e| OpsError::Encoding(e.to_string()))?;
    install_file(client, &tools.paths().nodeadm_config, 0o600, &body).step("write nodeadm config", machine)
}
