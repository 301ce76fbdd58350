//! Binding between the generic object kinds and their tables.

use redb::TableDefinition;
use serde::de::DeserializeOwned;
use serde::Serialize;

use sshgrid_core::{Cluster, Machine, ObjectMeta, ProvisionedMachine, Secret};

use crate::tables::*;

/// A top-level object kind the store can hold.
pub trait StoredObject: Serialize + DeserializeOwned + Clone {
    const KIND: &'static str;
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]>;

    fn meta(&self) -> &ObjectMeta;

    /// Copy the status sub-resource from `other` into `self`.
    ///
    /// Kinds without a status keep the default no-op.
    fn copy_status_from(&mut self, _other: &Self) {}
}

impl StoredObject for Cluster {
    const KIND: &'static str = "Cluster";
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = CLUSTERS;

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn copy_status_from(&mut self, other: &Self) {
        self.status = other.status.clone();
    }
}

impl StoredObject for Machine {
    const KIND: &'static str = "Machine";
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = MACHINES;

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn copy_status_from(&mut self, other: &Self) {
        self.status = other.status.clone();
    }
}

impl StoredObject for ProvisionedMachine {
    const KIND: &'static str = "ProvisionedMachine";
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = PROVISIONED_MACHINES;

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
}

impl StoredObject for Secret {
    const KIND: &'static str = "Secret";
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = SECRETS;

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
}
