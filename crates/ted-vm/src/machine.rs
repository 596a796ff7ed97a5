//! Driver traits - the capability set ted needs from a VM backend.

use crate::error::{Result, VmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Guest operating system family of a machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// macOS guests
    Darwin,
    /// Linux guests
    Linux,
    /// Windows guests
    Win32,
    /// Anything else, raw value preserved
    Other(String),
}

impl Platform {
    /// Whether scripts for this platform run under a POSIX shell.
    pub fn is_posix(&self) -> bool {
        matches!(self, Self::Darwin | Self::Linux)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Darwin => write!(f, "darwin"),
            Platform::Linux => write!(f, "linux"),
            Platform::Win32 => write!(f, "win32"),
            Platform::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Options for [`Machine::start`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOptions {
    /// Open the hypervisor's console window (default: false).
    pub gui: bool,
}

/// Entry point into a VM backend.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Locate a machine by name.
    ///
    /// # Errors
    /// Returns [`VmError::NotFound`] if no machine has that name.
    async fn find_machine(&self, name: &str) -> Result<Arc<dyn Machine>>;
}

/// A located virtual machine.
#[async_trait]
pub trait Machine: Send + Sync {
    /// Name the machine was located by.
    fn name(&self) -> &str;

    /// Guest platform, fixed when the handle was obtained.
    fn platform(&self) -> &Platform;

    /// Look up a snapshot, `None` if it does not exist.
    async fn find_snapshot(&self, name: &str) -> Result<Option<Box<dyn Snapshot>>>;

    /// Look up a snapshot, failing with [`VmError::NotFound`] if absent.
    async fn find_snapshot_strict(&self, name: &str) -> Result<Box<dyn Snapshot>> {
        self.find_snapshot(name)
            .await?
            .ok_or_else(|| VmError::snapshot_not_found(name))
    }

    /// Power on the machine.
    async fn start(&self, options: StartOptions) -> Result<()>;

    /// Power off the machine.
    async fn stop(&self) -> Result<()>;

    /// Take a snapshot named `id`. Duplicate names are the backend's concern.
    async fn create_snapshot(&self, id: &str) -> Result<()>;

    /// Run a script or command line in the guest and capture its output.
    async fn script(&self, path: &str) -> Result<String>;

    /// Copy a host file into the guest.
    async fn copy(&self, local_path: &str) -> Result<()>;

    /// Read the guest environment.
    async fn get_env(&self) -> Result<HashMap<String, String>>;

    /// Set one guest environment variable.
    async fn set_env(&self, key: &str, value: &str) -> Result<()>;
}

/// A named, restorable state of a machine.
#[async_trait]
pub trait Snapshot: Send + Sync {
    /// Snapshot name.
    fn name(&self) -> &str;

    /// Restore the machine to this snapshot.
    async fn revert(&self) -> Result<()>;

    /// Delete this snapshot.
    async fn remove(&self) -> Result<()>;
}
