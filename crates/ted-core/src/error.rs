//! Error types for ted-core.

use thiserror::Error;

/// Result type alias for ted-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can end a context pipeline.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error from the VM driver
    #[error("VM error: {0}")]
    Vm(#[from] ted_vm::VmError),

    /// Tag is not of the form `<machine>:<snapshot>`
    #[error("invalid tag `{tag}`: {reason}")]
    InvalidTag {
        /// The rejected tag string
        tag: String,
        /// What is wrong with it
        reason: &'static str,
    },

    /// Machine platform has no install recipe
    #[error("platform not implemented: {platform} ({tag})")]
    UnsupportedPlatform {
        /// Platform reported by the driver
        platform: String,
        /// Tag of the context
        tag: String,
    },

    /// A step ran before the machine was located
    #[error("machine for `{0}` has not been located")]
    MachineUnavailable(String),

    /// A step exceeded the configured step timeout
    #[error("step timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A step panicked or its task was cancelled
    #[error("step aborted: {0}")]
    Aborted(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Whether this is a missing machine or snapshot.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::Vm(e) if e.is_not_found())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ted_vm::VmError;

    #[test]
    fn test_classification() {
        let err: CoreError = VmError::snapshot_not_found("missingSnap").into();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "VM error: snapshot not found: missingSnap");

        let err = CoreError::UnsupportedPlatform {
            platform: "plan9".into(),
            tag: "vm1:clean".into(),
        };
        assert!(!err.is_not_found());
        assert_eq!(
            err.to_string(),
            "platform not implemented: plan9 (vm1:clean)"
        );
    }
}
