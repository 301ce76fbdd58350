//! De-duplicated set of etcd members, keyed by member ID.
//!
//! The cluster status persists `list()` verbatim, so listing order is
//! ascending by ID regardless of insertion order.

use std::collections::BTreeMap;

use crate::types::EtcdMember;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSet {
    members: BTreeMap<u64, EtcdMember>,
}

impl MembershipSet {
    pub fn new(members: impl IntoIterator<Item = EtcdMember>) -> Self {
        let mut set = Self::default();
        for member in members {
            set.insert(member);
        }
        set
    }

    /// Insert a member, replacing any existing member with the same ID.
    pub fn insert(&mut self, member: EtcdMember) {
        self.members.insert(member.id, member);
    }

    /// Remove the member with the same ID. Other fields are not compared.
    pub fn delete(&mut self, member: &EtcdMember) {
        self.members.remove(&member.id);
    }

    pub fn contains_id(&self, id: u64) -> bool {
        self.members.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn list(&self) -> Vec<EtcdMember> {
        self.members.values().cloned().collect()
    }
}
