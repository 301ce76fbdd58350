//! redb table definitions for the sshgrid object store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized objects).
//! Keys follow the pattern `{namespace}/{name}`.

use redb::TableDefinition;

pub const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("clusters");

pub const MACHINES: TableDefinition<&str, &[u8]> = TableDefinition::new("machines");

pub const PROVISIONED_MACHINES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("provisioned_machines");

pub const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");
