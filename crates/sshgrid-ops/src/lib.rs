//! sshgrid-ops — orchestration for SSH-provisioned clusters.
//!
//! Every operation keeps three things in step: the generic objects in the
//! store, the provider payloads inside them, and what is actually running
//! on each machine.
//!
//! # Architecture
//!
//! ```text
//! Context (store + connector + actuator + settings)
//!   ├── MachineLifecycle
//!   │   ├── create() → bind + persist, bootstrap token, actuator, kubeconfig, membership
//!   │   ├── delete() → orphan check, drain, actuator, membership, objects
//!   │   └── get()    → decoded machine views
//!   └── Recovery
//!       └── recover() → connect, reset, CA, seed from snapshot, join, restart
//! ```
//!
//! Multi-step workflows run as a [`Saga`]: an ordered list of named steps
//! where the point of failure and everything completed before it are part
//! of the returned error.

pub mod actuator;
pub mod binder;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod recovery;
pub mod saga;
pub mod status;

pub use actuator::{Actuator, NodeadmActuator};
pub use binder::MachineBinder;
pub use context::Context;
pub use error::{OpsError, OpsResult, StepContext};
pub use lifecycle::{CreateMachineRequest, DeleteMachineRequest, DrainOptions, MachineLifecycle, MachineView};
pub use recovery::{RecoverRequest, Recovery};
pub use saga::{Saga, SagaReport, StepWarning};
