//! sshgrid-core — shared domain types for sshgrid.
//!
//! The object store only understands the generic objects in [`types`]
//! (Cluster, Machine, ProvisionedMachine, Secret). Everything the SSH
//! provider needs lives in typed payloads that travel inside those objects
//! as opaque [`ProviderConfig`] bytes, encoded and decoded by [`codec`].

pub mod codec;
pub mod config;
pub mod error;
pub mod membership;
pub mod types;

pub use codec::{ProviderConfigCodec, ProviderKind, API_VERSION};
pub use config::SshgridConfig;
pub use error::{CoreError, CoreResult};
pub use membership::MembershipSet;
pub use types::*;
