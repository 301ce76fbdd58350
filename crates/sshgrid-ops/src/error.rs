//! Error types for sshgrid orchestration.

use thiserror::Error;

use sshgrid_core::CoreError;
use sshgrid_remote::RemoteError;
use sshgrid_state::StateError;

pub type OpsResult<T> = Result<T, OpsError>;

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("machine role {0:?} is not supported, must be \"master\" or \"node\"")]
    InvalidRole(String),

    #[error("provider config schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },

    #[error("provider config encoding error: {0}")]
    Encoding(String),

    #[error("dangling reference from {from} to {to}: {reason}")]
    DanglingReference {
        from: String,
        to: String,
        reason: String,
    },

    #[error("unable to parse output of {command:?}: {reason} (output: {output:?})")]
    UnparseableOutput {
        command: String,
        output: String,
        reason: String,
    },

    #[error("not deleting the last master while {nodes} node(s) are in the cluster, delete the nodes first")]
    WouldOrphanNodes { nodes: usize },

    #[error("remote execution failed")]
    RemoteExecution(#[source] RemoteError),

    #[error("state store error")]
    State(#[source] StateError),

    #[error("{0}")]
    Precondition(String),

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{step} on machine {machine:?}")]
    Step {
        step: String,
        machine: String,
        #[source]
        source: Box<OpsError>,
    },

    #[error("{saga} aborted at step {step:?} after {} completed step(s)", completed.len())]
    SagaAborted {
        saga: String,
        step: String,
        completed: Vec<String>,
        #[source]
        source: Box<OpsError>,
    },
}

impl OpsError {
    /// The underlying error with step and saga annotations peeled off.
    pub fn root_cause(&self) -> &OpsError {
        let mut err = self;
        loop {
            match err {
                OpsError::Step { source, .. } | OpsError::SagaAborted { source, .. } => {
                    err = source.as_ref();
                }
                other => return other,
            }
        }
    }

    /// This error and every source below it, joined with `": "`.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str(": ");
            out.push_str(&err.to_string());
            source = std::error::Error::source(err);
        }
        out
    }
}

impl From<CoreError> for OpsError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidRole(role) => OpsError::InvalidRole(role),
            CoreError::SchemaMismatch { expected, found } => {
                OpsError::SchemaMismatch { expected, found }
            }
            CoreError::Encoding(msg) => OpsError::Encoding(msg),
        }
    }
}

impl From<StateError> for OpsError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => OpsError::NotFound(what),
            other => OpsError::State(other),
        }
    }
}

impl From<RemoteError> for OpsError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::UnparseableOutput {
                command,
                output,
                reason,
            } => OpsError::UnparseableOutput {
                command,
                output,
                reason,
            },
            other => OpsError::RemoteExecution(other),
        }
    }
}

/// Annotate a failure with the step and machine it happened on.
pub trait StepContext<T> {
    fn step(self, step: &str, machine: &str) -> OpsResult<T>;
}

impl<T, E: Into<OpsError>> StepContext<T> for Result<T, E> {
    fn step(self, step: &str, machine: &str) -> OpsResult<T> {
        self.map_err(|e| OpsError::Step {
            step: step.to_string(),
            machine: machine.to_string(),
            source: Box::new(e.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_peels_annotations() {
        let err: OpsResult<()> = Err(OpsError::WouldOrphanNodes { nodes: 2 });
        let err = err.step("check masters", "10.0.0.1").unwrap_err();
        let err = OpsError::SagaAborted {
            saga: "delete machine".to_string(),
            step: "check".to_string(),
            completed: vec![],
            source: Box::new(err),
        };
        assert!(matches!(err.root_cause(), OpsError::WouldOrphanNodes { nodes: 2 }));
    }

    #[test]
    fn step_message_names_machine() {
        let err: Result<(), CoreError> = Err(CoreError::Encoding("bad".to_string()));
        let err = err.step("decode machine spec", "10.0.0.9").unwrap_err();
        assert_eq!(
            err.chain(),
            "decode machine spec on machine \"10.0.0.9\": provider config encoding error: bad"
        );
    }

    #[test]
    fn remote_unparseable_is_lifted() {
        let err: OpsError = RemoteError::UnparseableOutput {
            command: "kubeadm".to_string(),
            output: "x".to_string(),
            reason: "expected 7 fields, found 1".to_string(),
        }
        .into();
        assert!(matches!(err, OpsError::UnparseableOutput { .. }));

        let err: OpsError = RemoteError::Command {
            host: "h".to_string(),
            command: "false".to_string(),
            status: "exit status: 1".to_string(),
            stdout: String::new(),
            stderr: "boom".to_string(),
        }
        .into();
        assert!(matches!(err, OpsError::RemoteExecution(_)));
        assert!(err.chain().contains("boom"));
    }

    #[test]
    fn chain_names_each_layer_once() {
        let err: OpsResult<()> = Err(OpsError::Precondition("no client URLs".to_string()));
        let err = OpsError::SagaAborted {
            saga: "recover etcd".to_string(),
            step: "reset etcd 10.0.0.1".to_string(),
            completed: vec![],
            source: Box::new(err.step("etcdadm reset", "10.0.0.1").unwrap_err()),
        };
        assert_eq!(
            err.chain(),
            "recover etcd aborted at step \"reset etcd 10.0.0.1\" after 0 completed step(s): \
             etcdadm reset on machine \"10.0.0.1\": no client URLs"
        );
    }

    #[test]
    fn state_not_found_is_lifted() {
        let err: OpsError = StateError::NotFound("Machine default/x".to_string()).into();
        assert!(matches!(err, OpsError::NotFound(what) if what == "Machine default/x"));
    }
}
