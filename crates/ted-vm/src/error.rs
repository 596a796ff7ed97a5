//! Error types for ted-vm.

use std::fmt;
use thiserror::Error;

/// Result type alias for ted-vm operations.
pub type Result<T> = std::result::Result<T, VmError>;

/// What kind of driver object a lookup was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// A virtual machine
    Machine,
    /// A named snapshot of a machine
    Snapshot,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Machine => write!(f, "machine"),
            ObjectKind::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Errors that can occur during driver operations.
#[derive(Debug, Error)]
pub enum VmError {
    /// Machine or snapshot lookup came back empty
    #[error("{kind} not found: {name}")]
    NotFound { kind: ObjectKind, name: String },

    /// Failure from start/stop/snapshot/env/copy operations
    #[error("driver error: {0}")]
    Driver(String),

    /// Remote script exited nonzero or could not be dispatched
    #[error("script `{command}` failed with exit code {exit_code:?}: {stderr}")]
    Script {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout waiting for the driver tool
    #[error("driver call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl VmError {
    /// Shorthand for a missing machine.
    pub fn machine_not_found(name: impl Into<String>) -> Self {
        VmError::NotFound {
            kind: ObjectKind::Machine,
            name: name.into(),
        }
    }

    /// Shorthand for a missing snapshot.
    pub fn snapshot_not_found(name: impl Into<String>) -> Self {
        VmError::NotFound {
            kind: ObjectKind::Snapshot,
            name: name.into(),
        }
    }

    /// Whether this is a `NotFound` error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, VmError::NotFound { .. })
    }
}
