//! StateStore — redb-backed object persistence for sshgrid.
//!
//! Typed CRUD over any [`StoredObject`]. Values are JSON-serialized into
//! redb's `&[u8]` value columns. `update` never touches the stored status and
//! `update_status` never touches anything else, so a spec write cannot
//! clobber a status written by another step and vice versa.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::object::StoredObject;
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe object store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

fn object_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

fn describe<T: StoredObject>(key: &str) -> String {
    format!("{} {key}", T::KIND)
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        txn.open_table(MACHINES).map_err(map_err!(Table))?;
        txn.open_table(PROVISIONED_MACHINES).map_err(map_err!(Table))?;
        txn.open_table(SECRETS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get an object, or `NotFound`.
    pub fn get<T: StoredObject>(&self, namespace: &str, name: &str) -> StateResult<T> {
        let key = object_key(namespace, name);
        self.try_get(namespace, name)?
            .ok_or_else(|| StateError::NotFound(describe::<T>(&key)))
    }

    /// Get an object if it exists.
    pub fn try_get<T: StoredObject>(&self, namespace: &str, name: &str) -> StateResult<Option<T>> {
        let key = object_key(namespace, name);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let obj: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(obj))
            }
            None => Ok(None),
        }
    }

    /// List all objects of a kind in a namespace, ordered by name.
    pub fn list<T: StoredObject>(&self, namespace: &str) -> StateResult<Vec<T>> {
        let prefix = format!("{namespace}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let obj: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(obj);
            }
        }
        Ok(results)
    }

    /// Create a new object. Fails with `AlreadyExists` if the key is taken.
    pub fn create<T: StoredObject>(&self, obj: &T) -> StateResult<()> {
        let key = obj.meta().key();
        let value = serde_json::to_vec(obj).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(describe::<T>(&key)));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(kind = T::KIND, %key, "object created");
        Ok(())
    }

    /// Replace an existing object, keeping its stored status.
    pub fn update<T: StoredObject>(&self, obj: &T) -> StateResult<()> {
        self.replace(obj, |incoming, stored| {
            let mut merged = incoming.clone();
            merged.copy_status_from(stored);
            merged
        })?;
        debug!(kind = T::KIND, key = %obj.meta().key(), "object updated");
        Ok(())
    }

    /// Replace only the status of an existing object.
    pub fn update_status<T: StoredObject>(&self, obj: &T) -> StateResult<()> {
        self.replace(obj, |incoming, stored| {
            let mut merged = stored.clone();
            merged.copy_status_from(incoming);
            merged
        })?;
        debug!(kind = T::KIND, key = %obj.meta().key(), "object status updated");
        Ok(())
    }

    /// Read-modify-write inside one write transaction.
    fn replace<T: StoredObject>(&self, obj: &T, merge: impl FnOnce(&T, &T) -> T) -> StateResult<()> {
        let key = obj.meta().key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
            let stored_bytes = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => guard.value().to_vec(),
                None => return Err(StateError::NotFound(describe::<T>(&key))),
            };
            let stored: T =
                serde_json::from_slice(&stored_bytes).map_err(map_err!(Deserialize))?;
            let merged = merge(obj, &stored);
            let value = serde_json::to_vec(&merged).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Delete an object. Fails with `NotFound` if it does not exist.
    pub fn delete<T: StoredObject>(&self, namespace: &str, name: &str) -> StateResult<()> {
        let key = object_key(namespace, name);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        if !existed {
            return Err(StateError::NotFound(describe::<T>(&key)));
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(kind = T::KIND, %key, "object deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sshgrid_core::*;

    fn test_cluster() -> Cluster {
        Cluster::new(
            "default",
            "cluster",
            &ClusterProviderSpec {
                etcd_ca_secret: "etcd-ca".to_string(),
                vip_address: None,
                api_server_port: 6443,
            },
        )
        .unwrap()
    }

    fn test_machine(name: &str, role: MachineRole) -> Machine {
        let mut machine = Machine::new("default", name, vec![role]);
        machine
            .put_provider_spec(&MachineProviderSpec {
                provisioned_machine_name: name.to_string(),
                roles: vec![role],
            })
            .unwrap();
        machine
    }

    fn member(id: u64) -> EtcdMember {
        EtcdMember {
            id,
            name: format!("m{id}"),
            peer_urls: vec![],
            client_urls: vec![format!("https://10.0.0.{id}:2379")],
        }
    }

    // ── CRUD ───────────────────────────────────────────────────────

    #[test]
    fn create_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let machine = test_machine("10.0.0.1", MachineRole::Master);

        store.create(&machine).unwrap();
        let retrieved: Machine = store.get("default", "10.0.0.1").unwrap();

        assert_eq!(retrieved, machine);
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.get::<Machine>("default", "nope").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not found: Machine default/nope");
        assert!(store.try_get::<Machine>("default", "nope").unwrap().is_none());
    }

    #[test]
    fn create_twice_is_already_exists() {
        let store = StateStore::open_in_memory().unwrap();
        let secret = Secret::new("default", "sshCredential");
        store.create(&secret).unwrap();
        let err = store.create(&secret).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
    }

    #[test]
    fn list_is_scoped_by_namespace_and_sorted() {
        let store = StateStore::open_in_memory().unwrap();
        store.create(&test_machine("10.0.0.2", MachineRole::Node)).unwrap();
        store.create(&test_machine("10.0.0.1", MachineRole::Master)).unwrap();
        let mut other = test_machine("10.0.0.3", MachineRole::Node);
        other.meta.namespace = "other".to_string();
        store.create(&other).unwrap();

        let names: Vec<String> = store
            .list::<Machine>("default")
            .unwrap()
            .into_iter()
            .map(|m| m.meta.name)
            .collect();
        assert_eq!(names, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(store.list::<Machine>("other").unwrap().len(), 1);
    }

    #[test]
    fn kinds_do_not_collide() {
        let store = StateStore::open_in_memory().unwrap();
        store.create(&test_machine("10.0.0.1", MachineRole::Master)).unwrap();
        assert!(store
            .try_get::<ProvisionedMachine>("default", "10.0.0.1")
            .unwrap()
            .is_none());
    }

    #[test]
    fn delete_then_missing() {
        let store = StateStore::open_in_memory().unwrap();
        store.create(&test_machine("10.0.0.1", MachineRole::Node)).unwrap();

        store.delete::<Machine>("default", "10.0.0.1").unwrap();
        assert!(store.delete::<Machine>("default", "10.0.0.1").unwrap_err().is_not_found());
        assert!(store.list::<Machine>("default").unwrap().is_empty());
    }

    // ── Status sub-resource ────────────────────────────────────────

    #[test]
    fn update_status_leaves_spec_alone() {
        let store = StateStore::open_in_memory().unwrap();
        let cluster = test_cluster();
        store.create(&cluster).unwrap();

        let mut local = cluster.clone();
        local.spec.provider_spec = ProviderConfig::default();
        local
            .put_provider_status(&ClusterProviderStatus {
                etcd_members: vec![member(1)],
            })
            .unwrap();
        store.update_status(&local).unwrap();

        let stored: Cluster = store.get("default", "cluster").unwrap();
        assert_eq!(stored.spec, cluster.spec);
        assert_eq!(
            stored.provider_status().unwrap().etcd_members,
            vec![member(1)]
        );
    }

    #[test]
    fn update_keeps_stored_status() {
        let store = StateStore::open_in_memory().unwrap();
        let mut machine = test_machine("10.0.0.1", MachineRole::Master);
        store.create(&machine).unwrap();

        machine
            .put_provider_status(&MachineProviderStatus {
                phase: MachinePhase::Bootstrapped,
                ssh_config: None,
                etcd_member: Some(member(3)),
            })
            .unwrap();
        store.update_status(&machine).unwrap();

        let mut stale = test_machine("10.0.0.1", MachineRole::Master);
        stale.spec.roles.push(MachineRole::Node);
        store.update(&stale).unwrap();

        let stored: Machine = store.get("default", "10.0.0.1").unwrap();
        assert_eq!(stored.spec.roles, vec![MachineRole::Master, MachineRole::Node]);
        assert_eq!(stored.provider_status().unwrap().etcd_member, Some(member(3)));
    }

    #[test]
    fn update_missing_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.update_status(&test_cluster()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn secret_update_overwrites_data() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .create(&Secret::new("default", "bootstrapToken").with("token", "old"))
            .unwrap();
        store
            .update(&Secret::new("default", "bootstrapToken").with("token", "new"))
            .unwrap();

        let secret: Secret = store.get("default", "bootstrapToken").unwrap();
        assert_eq!(secret.get("token"), Some("new"));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.create(&test_cluster()).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let cluster: Cluster = store.get("default", "cluster").unwrap();
        assert_eq!(cluster.provider_spec().unwrap().etcd_ca_secret, "etcd-ca");
    }
}
