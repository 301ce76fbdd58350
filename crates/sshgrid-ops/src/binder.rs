//! Machine ⇄ ProvisionedMachine binding.
//!
//! Each side names the other inside its provider spec. Names are resolved
//! by lookup and the back reference is checked every time, so a pair that
//! disagrees is reported instead of silently followed.

use tracing::{debug, warn};

use sshgrid_core::{CoreError, Machine, MachineProviderSpec, ProvisionedMachine};
use sshgrid_state::StateStore;

use crate::error::{OpsError, OpsResult};

pub struct MachineBinder<'a> {
    store: &'a StateStore,
    namespace: &'a str,
}

fn encoding(err: CoreError) -> OpsError {
    OpsError::Encoding(err.to_string())
}

fn machine_ref(namespace: &str, name: &str) -> String {
    format!("Machine {namespace}/{name}")
}

fn provisioned_ref(namespace: &str, name: &str) -> String {
    format!("ProvisionedMachine {namespace}/{name}")
}

impl<'a> MachineBinder<'a> {
    pub fn new(store: &'a StateStore, namespace: &'a str) -> Self {
        Self { store, namespace }
    }

    /// Point `machine` and `provisioned` at each other.
    ///
    /// Both payloads are encoded before either object is touched, so on
    /// error neither side has changed.
    pub fn bind(&self, machine: &mut Machine, provisioned: &mut ProvisionedMachine) -> OpsResult<()> {
        let mut machine_spec = if machine.spec.provider_spec.value.is_empty() {
            MachineProviderSpec {
                provisioned_machine_name: String::new(),
                roles: machine.spec.roles.clone(),
            }
        } else {
            machine.provider_spec().map_err(encoding)?
        };
        machine_spec.provisioned_machine_name = provisioned.name().to_string();

        let mut provisioned_spec = provisioned.provider_spec().map_err(encoding)?;
        provisioned_spec.machine_name = Some(machine.name().to_string());

        let mut bound_machine = machine.clone();
        bound_machine.put_provider_spec(&machine_spec).map_err(encoding)?;
        let mut bound_provisioned = provisioned.clone();
        bound_provisioned
            .put_provider_spec(&provisioned_spec)
            .map_err(encoding)?;

        *machine = bound_machine;
        *provisioned = bound_provisioned;
        debug!(machine = %machine.name(), provisioned = %provisioned.name(), "bound");
        Ok(())
    }

    /// Create a bound pair in the store, ProvisionedMachine first.
    ///
    /// If the Machine cannot be created the ProvisionedMachine is removed
    /// again, so the store never holds only one side of a new bind.
    pub fn persist_bound_pair(&self, machine: &Machine, provisioned: &ProvisionedMachine) -> OpsResult<()> {
        self.check_pair(machine, provisioned)?;

        self.store.create(provisioned)?;
        if let Err(err) = self.store.create(machine) {
            if let Err(cleanup) = self
                .store
                .delete::<ProvisionedMachine>(&provisioned.meta.namespace, provisioned.name())
            {
                warn!(
                    provisioned = %provisioned.name(),
                    error = %cleanup,
                    "unable to remove provisioned machine after failed machine create"
                );
            }
            return Err(err.into());
        }
        Ok(())
    }

    pub fn provisioned_machine_for(&self, machine: &Machine) -> OpsResult<ProvisionedMachine> {
        let spec = machine.provider_spec()?;
        let from = machine_ref(self.namespace, machine.name());
        let to = provisioned_ref(self.namespace, &spec.provisioned_machine_name);

        let provisioned: ProvisionedMachine = self
            .store
            .try_get(self.namespace, &spec.provisioned_machine_name)?
            .ok_or_else(|| OpsError::DanglingReference {
                from: from.clone(),
                to: to.clone(),
                reason: "target does not exist".to_string(),
            })?;

        let back = provisioned.provider_spec()?.machine_name;
        if back.as_deref() != Some(machine.name()) {
            return Err(OpsError::DanglingReference {
                from,
                to,
                reason: format!("target is bound to {}", describe_back(back.as_deref())),
            });
        }
        Ok(provisioned)
    }

    pub fn machine_for(&self, provisioned: &ProvisionedMachine) -> OpsResult<Machine> {
        let spec = provisioned.provider_spec()?;
        let from = provisioned_ref(self.namespace, provisioned.name());
        let Some(machine_name) = spec.machine_name else {
            return Err(OpsError::DanglingReference {
                from,
                to: "Machine".to_string(),
                reason: "not bound to any machine".to_string(),
            });
        };
        let to = machine_ref(self.namespace, &machine_name);

        let machine: Machine = self
            .store
            .try_get(self.namespace, &machine_name)?
            .ok_or_else(|| OpsError::DanglingReference {
                from: from.clone(),
                to: to.clone(),
                reason: "target does not exist".to_string(),
            })?;

        let back = machine.provider_spec()?.provisioned_machine_name;
        if back != provisioned.name() {
            return Err(OpsError::DanglingReference {
                from,
                to,
                reason: format!("target is bound to {}", describe_back(Some(&back))),
            });
        }
        Ok(machine)
    }

    fn check_pair(&self, machine: &Machine, provisioned: &ProvisionedMachine) -> OpsResult<()> {
        let machine_side = machine.provider_spec().map_err(encoding)?.provisioned_machine_name;
        let provisioned_side = provisioned.provider_spec().map_err(encoding)?.machine_name;
        if machine_side != provisioned.name() || provisioned_side.as_deref() != Some(machine.name()) {
            return Err(OpsError::DanglingReference {
                from: machine_ref(&machine.meta.namespace, machine.name()),
                to: provisioned_ref(&provisioned.meta.namespace, provisioned.name()),
                reason: "pair is not bound to each other".to_string(),
            });
        }
        Ok(())
    }
}

fn describe_back(name: Option<&str>) -> String {
    match name {
        Some(n) if !n.is_empty() => format!("{n:?}"),
        _ => "nothing".to_string(),
    }
}
