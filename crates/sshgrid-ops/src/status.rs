//! Status write-back helpers.
//!
//! A status change only counts once it is in the store, so every helper
//! mutates the in-memory object and then calls `update_status`.

use tracing::info;

use sshgrid_core::{Cluster, EtcdMember, Machine, MembershipSet};
use sshgrid_state::StateStore;

use crate::error::OpsResult;

/// Add (or replace) `member` in the cluster membership and persist.
pub fn insert_cluster_member(store: &StateStore, cluster: &mut Cluster, member: &EtcdMember) -> OpsResult<()> {
    mutate_membership(store, cluster, |set| set.insert(member.clone()))?;
    info!(cluster = %cluster.meta.name, member = member.id, name = %member.name, "etcd member recorded");
    Ok(())
}

/// Remove `member` from the cluster membership by id and persist.
pub fn remove_cluster_member(store: &StateStore, cluster: &mut Cluster, member: &EtcdMember) -> OpsResult<()> {
    mutate_membership(store, cluster, |set| set.delete(member))?;
    info!(cluster = %cluster.meta.name, member = member.id, "etcd member removed");
    Ok(())
}

fn mutate_membership(
    store: &StateStore,
    cluster: &mut Cluster,
    mutate: impl FnOnce(&mut MembershipSet),
) -> OpsResult<()> {
    let mut status = cluster.provider_status()?;
    let mut set = MembershipSet::new(status.etcd_members);
    mutate(&mut set);
    status.etcd_members = set.list();
    cluster.put_provider_status(&status)?;
    store.update_status(cluster)?;
    Ok(())
}

/// Record the etcd member running on `machine` and persist.
pub fn record_machine_member(store: &StateStore, machine: &mut Machine, member: Option<EtcdMember>) -> OpsResult<()> {
    let mut status = machine.provider_status()?;
    status.etcd_member = member;
    machine.put_provider_status(&status)?;
    store.update_status(machine)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sshgrid_core::{ClusterProviderSpec, MachineRole};

    fn member(id: u64) -> EtcdMember {
        EtcdMember {
            id,
            name: format!("m{id}"),
            peer_urls: vec![],
            client_urls: vec![],
        }
    }

    fn stored_cluster(store: &StateStore) -> Cluster {
        let cluster = Cluster::new(
            "default",
            "cluster",
            &ClusterProviderSpec {
                etcd_ca_secret: "etcd-ca".to_string(),
                vip_address: None,
                api_server_port: 6443,
            },
        )
        .unwrap();
        store.create(&cluster).unwrap();
        cluster
    }

    #[test]
    fn membership_changes_are_persisted() {
        let store = StateStore::open_in_memory().unwrap();
        let mut cluster = stored_cluster(&store);

        insert_cluster_member(&store, &mut cluster, &member(9)).unwrap();
        insert_cluster_member(&store, &mut cluster, &member(3)).unwrap();
        insert_cluster_member(&store, &mut cluster, &member(9)).unwrap();
        remove_cluster_member(&store, &mut cluster, &member(3)).unwrap();
        remove_cluster_member(&store, &mut cluster, &member(77)).unwrap();

        let stored: Cluster = store.get("default", "cluster").unwrap();
        assert_eq!(stored.provider_status().unwrap().etcd_members, vec![member(9)]);
        assert_eq!(stored, cluster);
    }

    #[test]
    fn machine_member_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        let mut machine = Machine::new("default", "10.0.0.1", vec![MachineRole::Master]);
        store.create(&machine).unwrap();

        record_machine_member(&store, &mut machine, Some(member(5))).unwrap();
        let stored: Machine = store.get("default", "10.0.0.1").unwrap();
        assert_eq!(stored.provider_status().unwrap().etcd_member, Some(member(5)));

        record_machine_member(&store, &mut machine, None).unwrap();
        let stored: Machine = store.get("default", "10.0.0.1").unwrap();
        assert_eq!(stored.provider_status().unwrap().etcd_member, None);
    }
}
