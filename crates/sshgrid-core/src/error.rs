//! Error types shared by the sshgrid core types.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("machine role {0:?} is not supported, must be \"master\" or \"node\"")]
    InvalidRole(String),

    #[error("provider config schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },

    #[error("provider config encoding error: {0}")]
    Encoding(String),
}
