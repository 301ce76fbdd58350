//! Error types for remote execution.

use thiserror::Error;

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("unable to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("unable to read SSH credential from secret {secret:?}: {reason}")]
    Credential { secret: String, reason: String },

    #[error("error running {command:?} on {host}: {status} (stdout: {stdout:?}, stderr: {stderr:?})")]
    Command {
        host: String,
        command: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("unable to parse output of {command:?}: {reason} (output: {output:?})")]
    UnparseableOutput {
        command: String,
        output: String,
        reason: String,
    },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl RemoteError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        RemoteError::Io {
            context: context.into(),
            source,
        }
    }
}
