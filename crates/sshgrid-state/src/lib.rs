//! sshgrid-state — the object store behind sshgrid.
//!
//! Backed by [redb](https://docs.rs/redb). Holds the generic objects from
//! `sshgrid-core` (clusters, machines, provisioned machines, secrets) with
//! CRUD by namespace + name, plus a separate status write path.
//!
//! # Architecture
//!
//! Each object kind has its own table. Keys are `{namespace}/{name}`, values
//! are the JSON-serialized object. Provider payloads inside the objects stay
//! opaque here.
//!
//! The `StateStore` is `Clone` (backed by `Arc<Database>`).

pub mod error;
pub mod object;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use object::StoredObject;
pub use store::StateStore;
