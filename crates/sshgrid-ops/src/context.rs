//! Everything an operation needs, built once at command start.

use std::path::Path;

use tracing::debug;

use sshgrid_core::config::{DefaultsConfig, SshgridConfig};
use sshgrid_core::{Cluster, Machine, MachineRole, ProvisionedMachine, Secret, SshConfig};
use sshgrid_remote::{Connector, MachineClient, RemoteCredential, SshConnector, Toolbox};
use sshgrid_state::StateStore;

use crate::actuator::{Actuator, NodeadmActuator};
use crate::binder::MachineBinder;
use crate::error::OpsResult;

pub struct Context {
    pub store: StateStore,
    pub connector: Box<dyn Connector>,
    pub actuator: Box<dyn Actuator>,
    pub tools: Toolbox,
    pub defaults: DefaultsConfig,
}

impl Context {
    pub fn new(
        store: StateStore,
        connector: Box<dyn Connector>,
        actuator: Box<dyn Actuator>,
        config: &SshgridConfig,
    ) -> Self {
        Self {
            store,
            connector,
            actuator,
            tools: Toolbox::new(config.paths.clone()),
            defaults: config.defaults.clone(),
        }
    }

    /// Production wiring: on-disk store, OpenSSH connector, nodeadm actuator.
    pub fn init(config: &SshgridConfig, state_path: &Path) -> OpsResult<Self> {
        let store = StateStore::open(state_path)?;
        debug!(path = %state_path.display(), "context initialized");
        Ok(Self::new(
            store,
            Box::new(SshConnector::new(config.ssh.clone())),
            Box::new(NodeadmActuator),
            config,
        ))
    }

    pub fn namespace(&self) -> &str {
        &self.defaults.namespace
    }

    pub fn cluster(&self) -> OpsResult<Cluster> {
        Ok(self
            .store
            .get(&self.defaults.namespace, &self.defaults.cluster_name)?)
    }

    pub fn secret(&self, name: &str) -> OpsResult<Secret> {
        Ok(self.store.get(&self.defaults.namespace, name)?)
    }

    /// Machines with the `Master` role, in store list order.
    pub fn masters(&self) -> OpsResult<Vec<Machine>> {
        Ok(self
            .store
            .list::<Machine>(self.namespace())?
            .into_iter()
            .filter(|m| m.has_role(MachineRole::Master))
            .collect())
    }

    /// The first master in store list order and its bound ProvisionedMachine.
    pub fn first_master(&self) -> OpsResult<Option<(Machine, ProvisionedMachine)>> {
        let Some(master) = self.masters()?.into_iter().next() else {
            return Ok(None);
        };
        let provisioned =
            MachineBinder::new(&self.store, self.namespace()).provisioned_machine_for(&master)?;
        Ok(Some((master, provisioned)))
    }

    /// Open a session, resolving the credential Secret the config names.
    pub fn connect(&self, ssh: &SshConfig) -> OpsResult<Box<dyn MachineClient>> {
        let secret = self.secret(&ssh.credential_secret)?;
        let credential = RemoteCredential::from_secret(&secret)?;
        Ok(self.connector.connect(ssh, credential)?)
    }
}
