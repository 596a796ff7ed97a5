//! Kalabox install macro.
//!
//! Sets `KALABOX_DEV`, builds dependencies, smoke-tests the toolchain, runs
//! the platform installer and checks the installed version. Script choice
//! depends on the machine's platform.

use crate::context::Session;
use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ted_vm::{Machine, Platform};

/// Environment variable set before anything else runs.
pub const DEV_ENV_KEY: &str = "KALABOX_DEV";

/// Script paths and commands used by the install macro.
///
/// Defaults are relative to the test runner's working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallScripts {
    /// Dependency build script for macOS guests.
    pub build_deps_darwin: String,
    /// Dependency build script for Linux guests.
    pub build_deps_linux: String,
    /// PowerShell helper copied to Windows guests before the build.
    pub build_deps_win32_ps1: String,
    /// Batch wrapper that runs the Windows build.
    pub build_deps_win32_bat: String,
    /// Installer for macOS and Linux guests.
    pub install_posix: String,
    /// Installer for Windows guests.
    pub install_win32: String,
    /// Commands run in order after the build; output is discarded.
    pub smoke_checks: Vec<String>,
    /// Command run after the installer.
    pub version_check: String,
}

impl Default for InstallScripts {
    fn default() -> Self {
        Self {
            build_deps_darwin: "../scripts/build/build_deps_darwin.sh".into(),
            build_deps_linux: "../scripts/build/build_deps_linux.sh".into(),
            build_deps_win32_ps1: "../scripts/build/build_deps_win32.ps1".into(),
            build_deps_win32_bat: "../scripts/build/build_deps_win32.bat".into(),
            install_posix: "../scripts/install/install_posix.sh".into(),
            install_win32: "../scripts/install/install_win32.bat".into(),
            smoke_checks: vec![
                "git version".into(),
                "npm version".into(),
                format!("env | grep {DEV_ENV_KEY}"),
            ],
            version_check: "kbox version".into(),
        }
    }
}

/// Options for [`OrderedContext::install_with`](crate::OrderedContext::install_with).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallOptions {
    /// Scripts to run.
    pub scripts: InstallScripts,
    /// Snapshot to take (and record for cleanup) once installed.
    /// Default: none.
    pub snapshot_after: Option<String>,
}

/// One driver action of the install macro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallAction {
    /// Copy a host file into the guest.
    Copy(String),
    /// Run a script or command in the guest.
    Script(String),
}

impl InstallAction {
    async fn apply(&self, machine: &dyn Machine) -> Result<()> {
        match self {
            InstallAction::Copy(path) => machine.copy(path).await?,
            InstallAction::Script(path) => {
                machine.script(path).await?;
            }
        }
        Ok(())
    }
}

impl InstallScripts {
    /// Actions that build dependencies on `platform`.
    ///
    /// # Errors
    /// Returns [`CoreError::UnsupportedPlatform`] for platforms without a recipe.
    pub fn build_plan(&self, platform: &Platform, tag: &str) -> Result<Vec<InstallAction>> {
        match platform {
            Platform::Darwin => Ok(vec![InstallAction::Script(self.build_deps_darwin.clone())]),
            Platform::Linux => Ok(vec![InstallAction::Script(self.build_deps_linux.clone())]),
            Platform::Win32 => Ok(vec![
                InstallAction::Copy(self.build_deps_win32_ps1.clone()),
                InstallAction::Script(self.build_deps_win32_bat.clone()),
            ]),
            Platform::Other(_) => Err(unsupported(platform, tag)),
        }
    }

    /// Actions that run the installer on `platform`.
    ///
    /// # Errors
    /// Returns [`CoreError::UnsupportedPlatform`] for platforms without a recipe.
    pub fn installer_plan(&self, platform: &Platform, tag: &str) -> Result<Vec<InstallAction>> {
        match platform {
            Platform::Darwin | Platform::Linux => {
                Ok(vec![InstallAction::Script(self.install_posix.clone())])
            }
            Platform::Win32 => Ok(vec![InstallAction::Script(self.install_win32.clone())]),
            Platform::Other(_) => Err(unsupported(platform, tag)),
        }
    }
}

fn unsupported(platform: &Platform, tag: &str) -> CoreError {
    CoreError::UnsupportedPlatform {
        platform: platform.to_string(),
        tag: tag.to_string(),
    }
}

async fn apply_all(machine: &dyn Machine, actions: &[InstallAction]) -> Result<()> {
    for action in actions {
        action.apply(machine).await?;
    }
    Ok(())
}

/// Run the install macro as one pipeline step.
pub(crate) async fn run(session: Session, options: InstallOptions) -> Result<Value> {
    let machine = session.machine()?;
    let platform = machine.platform().clone();
    let tag = session.tag().to_string();
    let scripts = &options.scripts;
    tracing::info!(context_id = %session.id(), %platform, "Installing kalabox");

    machine.set_env(DEV_ENV_KEY, "true").await?;

    let build = scripts.build_plan(&platform, &tag)?;
    apply_all(machine.as_ref(), &build).await?;

    for check in &scripts.smoke_checks {
        machine.script(check).await?;
    }

    let installer = scripts.installer_plan(&platform, &tag)?;
    apply_all(machine.as_ref(), &installer).await?;

    machine.script(&scripts.version_check).await?;

    if let Some(id) = options.snapshot_after {
        machine.create_snapshot(&id).await?;
        session.record_snapshot(id).await;
    }

    tracing::info!(context_id = %session.id(), %platform, "Kalabox installed");
    Ok(Value::Null)
}
