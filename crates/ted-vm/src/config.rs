//! Configuration for the vmrun driver.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use crate::machine::Platform;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Guest scratch directory on macOS and Linux guests.
pub const POSIX_GUEST_DIR: &str = "/tmp";

/// Guest scratch directory on Windows guests.
pub const WIN32_GUEST_DIR: &str = r"C:\Windows\Temp";

/// Settings for driving VMware through the `vmrun` tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmrunConfig {
    /// Path to the vmrun binary.
    pub vmrun_path: PathBuf,

    /// vmrun host type (`ws`, `fusion`, `player`).
    pub host_type: String,

    /// Directory searched for `<name>.vmx` files.
    pub machines_dir: PathBuf,

    /// Guest login used for in-guest operations.
    pub guest_user: Option<String>,

    /// Guest password used for in-guest operations.
    pub guest_password: Option<String>,

    /// Guest directory for copied files and captured script output.
    /// Unset means a per-platform default.
    pub guest_dir: Option<String>,

    /// Upper bound for any single vmrun invocation.
    #[serde(with = "opt_secs")]
    pub command_timeout: Option<Duration>,
}

impl Default for VmrunConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").map(PathBuf::from).unwrap_or_default();
        Self {
            vmrun_path: PathBuf::from("vmrun"),
            host_type: "ws".to_string(),
            machines_dir: home.join("vmware"),
            guest_user: None,
            guest_password: None,
            guest_dir: None,
            command_timeout: None,
        }
    }
}

impl VmrunConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `TED_VMRUN` | `vmrun` |
    /// | `TED_VMRUN_HOST` | `ws` |
    /// | `TED_MACHINES_DIR` | `$HOME/vmware` |
    /// | `TED_GUEST_USER` | unset |
    /// | `TED_GUEST_PASSWORD` | unset |
    /// | `TED_GUEST_DIR` | `/tmp`, or `C:\Windows\Temp` on win32 guests |
    /// | `TED_VMRUN_TIMEOUT_SECS` | unset (no timeout) |
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            vmrun_path: std::env::var("TED_VMRUN")
                .map(PathBuf::from)
                .unwrap_or(default.vmrun_path),
            host_type: std::env::var("TED_VMRUN_HOST").unwrap_or(default.host_type),
            machines_dir: std::env::var("TED_MACHINES_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.machines_dir),
            guest_user: std::env::var("TED_GUEST_USER").ok().or(default.guest_user),
            guest_password: std::env::var("TED_GUEST_PASSWORD")
                .ok()
                .or(default.guest_password),
            guest_dir: std::env::var("TED_GUEST_DIR").ok().or(default.guest_dir),
            command_timeout: std::env::var("TED_VMRUN_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .or(default.command_timeout),
        }
    }

    /// Guest scratch directory for a machine running `platform`.
    pub fn guest_dir_for(&self, platform: &Platform) -> &str {
        match (&self.guest_dir, platform) {
            (Some(dir), _) => dir.as_str(),
            (None, Platform::Win32) => WIN32_GUEST_DIR,
            (None, _) => POSIX_GUEST_DIR,
        }
    }

    /// Warn about settings that will make every call fail.
    pub fn validate_warn(&self) {
        if !self.machines_dir.exists() {
            tracing::warn!("Machines directory not found: {:?}", self.machines_dir);
        }
        if self.guest_user.is_none() {
            tracing::warn!("TED_GUEST_USER not set, in-guest operations will fail");
        }
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VmrunConfig::default();
        assert_eq!(config.vmrun_path, PathBuf::from("vmrun"));
        assert_eq!(config.host_type, "ws");
        assert!(config.guest_dir.is_none());
        assert!(config.guest_user.is_none());
        assert!(config.command_timeout.is_none());
        assert!(config.machines_dir.ends_with("vmware"));
    }

    #[test]
    fn test_guest_dir_per_platform() {
        let mut config = VmrunConfig::default();
        assert_eq!(config.guest_dir_for(&Platform::Linux), "/tmp");
        assert_eq!(config.guest_dir_for(&Platform::Darwin), "/tmp");
        assert_eq!(config.guest_dir_for(&Platform::Win32), r"C:\Windows\Temp");

        config.guest_dir = Some("/var/tmp/ted".into());
        assert_eq!(config.guest_dir_for(&Platform::Win32), "/var/tmp/ted");
    }
}
