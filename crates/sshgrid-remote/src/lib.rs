//! sshgrid-remote — how sshgrid talks to machines.
//!
//! - [`client`]: the [`MachineClient`] / [`Connector`] seam every
//!   orchestrator goes through, plus credential resolution.
//! - [`ssh`]: the production connector, which drives the system `ssh` binary.
//! - [`tools`]: one typed command/response pair per remote tool, so the
//!   shape of each tool's output is checked in exactly one place.

pub mod client;
pub mod error;
pub mod ssh;
pub mod tools;

pub use client::{install_file, CommandOutput, Connector, MachineClient, RemoteCredential};
pub use error::{RemoteError, RemoteResult};
pub use ssh::SshConnector;
pub use tools::{run_tool, BootstrapToken, RemoteTool, Toolbox};
