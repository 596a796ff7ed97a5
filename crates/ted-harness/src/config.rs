//! Configuration for the suite layer.
//!
//! Configuration is loaded from an optional JSON file plus environment
//! variable overrides, and handed to [`Harness`](crate::Harness) explicitly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use ted_core::{ContextOptions, MachineTag};

/// Git ref used when none is configured.
pub const DEFAULT_GIT_REF: &str = "HEAD";

/// Which ref is under test and which machines to run suites on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Git ref under test, used only in suite names (default: `HEAD`).
    pub git_ref: String,

    /// Tags (`<machine>:<snapshot>`) to run every suite against.
    pub vms: Vec<String>,

    /// Options for every context the harness creates.
    pub context: ContextOptions,
}

/// Configuration loading or validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for [`HarnessConfig`]
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A configured tag is not `<machine>:<snapshot>`
    #[error("invalid vm tag {tag:?}: {source}")]
    InvalidTag {
        tag: String,
        #[source]
        source: ted_core::CoreError,
    },

    /// No tags configured
    #[error("no vms configured")]
    NoVms,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            git_ref: DEFAULT_GIT_REF.to_string(),
            vms: Vec::new(),
            context: ContextOptions::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from the environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `TED_CONFIG` | unset (JSON file read first when set) |
    /// | `TED_REF` | `HEAD` |
    /// | `TED_VMS` | empty (comma separated tags) |
    /// | `TED_GUI` | `false` |
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load configuration using `lookup` in place of the process environment.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup("TED_CONFIG") {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(git_ref) = lookup("TED_REF").filter(|v| !v.trim().is_empty()) {
            config.git_ref = git_ref.trim().to_string();
        }
        if let Some(vms) = lookup("TED_VMS") {
            config.vms = parse_vms(&vms);
        }
        if let Some(gui) = lookup("TED_GUI") {
            config.context.gui = gui != "false" && gui != "0";
        }
        Ok(config)
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check that at least one vm is configured and every tag parses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vms.is_empty() {
            return Err(ConfigError::NoVms);
        }
        for tag in &self.vms {
            MachineTag::parse(tag).map_err(|source| ConfigError::InvalidTag {
                tag: tag.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Validate configuration but only log warnings instead of failing.
    pub fn validate_warn(&self) {
        if let Err(e) = self.validate() {
            tracing::warn!(error = %e, "Harness configuration incomplete");
        }
    }
}

/// Split a comma separated tag list, dropping blanks.
fn parse_vms(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = HarnessConfig::default();
        assert_eq!(config.git_ref, "HEAD");
        assert!(config.vms.is_empty());
        assert!(!config.context.gui);
    }

    #[test]
    fn test_load_from_env_vars() {
        let config = HarnessConfig::load_with(lookup(&[
            ("TED_REF", "v0.12.0"),
            ("TED_VMS", "ubuntu:clean, win10:clean,,"),
            ("TED_GUI", "1"),
        ]))
        .unwrap();
        assert_eq!(config.git_ref, "v0.12.0");
        assert_eq!(config.vms, vec!["ubuntu:clean", "win10:clean"]);
        assert!(config.context.gui);
    }

    #[test]
    fn test_load_without_vars_uses_defaults() {
        let config = HarnessConfig::load_with(lookup(&[])).unwrap();
        assert_eq!(config, HarnessConfig::default());
    }

    #[test]
    fn test_env_overrides_file() {
        let path = std::env::temp_dir().join(format!("ted-config-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"git_ref": "main", "vms": ["osx:clean"], "context": {"gui": true}}"#,
        )
        .unwrap();

        let path_str = path.to_string_lossy().into_owned();
        let config =
            HarnessConfig::load_with(lookup(&[("TED_CONFIG", &path_str), ("TED_REF", "feature")]))
                .unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.git_ref, "feature");
        assert_eq!(config.vms, vec!["osx:clean"]);
        assert!(config.context.gui);
    }

    #[test]
    fn test_missing_file() {
        let err = HarnessConfig::from_file("/nonexistent/ted.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_validate() {
        let mut config = HarnessConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::NoVms)));

        config.vms = vec!["ubuntu:clean".into(), "win10".into()];
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTag { ref tag, .. } if tag == "win10"));

        config.vms.pop();
        assert!(config.validate().is_ok());
    }
}
