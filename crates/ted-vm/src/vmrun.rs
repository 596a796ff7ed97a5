//! Driver backed by VMware's `vmrun` command-line tool.
//!
//! Every operation is a single `vmrun` invocation against the machine's
//! `.vmx` file. Guest operations (scripts, copies, environment) pass the
//! configured guest credentials.

use crate::config::VmrunConfig;
use crate::error::{Result, VmError};
use crate::machine::{Driver, Machine, Platform, Snapshot, StartOptions};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use uuid::Uuid;

/// Maximum captured output size in bytes (1 MB).
const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// File name prefix for captured guest script output.
const CAPTURE_PREFIX: &str = "ted-output";

/// How deep below `machines_dir` to look for `.vmx` files.
const SEARCH_DEPTH: usize = 2;

/// Guest OS families reported in `.vmx` files that are Linux distributions.
const LINUX_FAMILIES: &[&str] = &[
    "linux", "ubuntu", "debian", "centos", "rhel", "fedora", "suse", "sles", "oracle", "redhat",
    "mandriva", "alma", "rocky",
];

/// Captured result of one vmrun invocation.
#[derive(Debug, Clone)]
struct CommandOutput {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// vmrun reports most failures on stdout as `Error: ...`.
    fn message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Truncate a string to max bytes, preserving UTF-8 boundaries.
fn truncate_output(s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = s[..end].to_string();
    truncated.push_str("\n... [output truncated]");
    truncated
}

/// Spawns vmrun processes with the configured host type and credentials.
#[derive(Debug)]
struct Vmrun {
    config: VmrunConfig,
}

impl Vmrun {
    async fn exec(&self, args: &[&str], guest: bool) -> Result<CommandOutput> {
        let mut cmd = Command::new(&self.config.vmrun_path);
        cmd.arg("-T").arg(&self.config.host_type);
        if guest {
            if let Some(user) = &self.config.guest_user {
                cmd.arg("-gu").arg(user);
            }
            if let Some(password) = &self.config.guest_password {
                cmd.arg("-gp").arg(password);
            }
        }
        cmd.args(args);
        cmd.kill_on_drop(true);

        tracing::debug!(args = ?args, "Dispatching vmrun");
        let output = match self.config.command_timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| VmError::Timeout(limit))??,
            None => cmd.output().await?,
        };

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: truncate_output(
                String::from_utf8_lossy(&output.stdout).into_owned(),
                MAX_OUTPUT_SIZE,
            ),
            stderr: truncate_output(
                String::from_utf8_lossy(&output.stderr).into_owned(),
                MAX_OUTPUT_SIZE,
            ),
        };
        tracing::trace!(
            exit_code = ?result.exit_code,
            stdout = %result.stdout,
            stderr = %result.stderr,
            "vmrun output"
        );
        Ok(result)
    }

    /// Run vmrun, mapping nonzero exit to [`VmError::Driver`].
    ///
    /// `guest` passes the guest credentials for in-guest operations.
    async fn checked(&self, args: &[&str], guest: bool) -> Result<String> {
        let output = self.exec(args, guest).await?;
        if !output.success() {
            return Err(VmError::Driver(format!(
                "vmrun {} failed: {}",
                args.first().copied().unwrap_or_default(),
                output.message()
            )));
        }
        Ok(output.stdout)
    }
}

/// [`Driver`] implementation over `vmrun`.
#[derive(Debug, Clone)]
pub struct VmrunDriver {
    vmrun: Arc<Vmrun>,
}

impl VmrunDriver {
    /// Create a driver with the given configuration.
    pub fn new(config: VmrunConfig) -> Self {
        Self {
            vmrun: Arc::new(Vmrun { config }),
        }
    }

    /// Get the driver configuration.
    pub fn config(&self) -> &VmrunConfig {
        &self.vmrun.config
    }
}

#[async_trait]
impl Driver for VmrunDriver {
    async fn find_machine(&self, name: &str) -> Result<Arc<dyn Machine>> {
        let dir = &self.vmrun.config.machines_dir;
        tracing::debug!(machine = %name, dir = %dir.display(), "Locating machine");

        let vmx = find_vmx(dir, name)
            .await?
            .ok_or_else(|| VmError::machine_not_found(name))?;
        let contents = tokio::fs::read_to_string(&vmx).await?;
        let platform = parse_guest_os(&contents)
            .map(|os| platform_from_guest_os(&os))
            .unwrap_or_else(|| Platform::Other("unknown".into()));

        tracing::info!(machine = %name, vmx = %vmx.display(), %platform, "Machine located");
        let machine: Arc<dyn Machine> = Arc::new(VmrunMachine {
            name: name.to_string(),
            vmx_arg: vmx.to_string_lossy().into_owned(),
            vmx,
            platform,
            vmrun: Arc::clone(&self.vmrun),
        });
        Ok(machine)
    }
}

/// A machine addressed by its `.vmx` path.
#[derive(Debug)]
pub struct VmrunMachine {
    name: String,
    vmx: PathBuf,
    vmx_arg: String,
    platform: Platform,
    vmrun: Arc<Vmrun>,
}

impl VmrunMachine {
    /// Path of the machine's `.vmx` file.
    pub fn vmx_path(&self) -> &Path {
        &self.vmx
    }

    fn vmx(&self) -> &str {
        &self.vmx_arg
    }

    /// Guest path of `file_name` inside the configured guest directory.
    fn guest_path(&self, file_name: &str) -> String {
        join_guest_path(
            self.vmrun.config.guest_dir_for(&self.platform),
            &self.platform,
            file_name,
        )
    }

    /// Copy a captured output file back to the host, read it and delete both copies.
    async fn fetch_output(&self, file_name: &str, guest_file: &str) -> Result<String> {
        let host_file = std::env::temp_dir().join(file_name);
        let host_arg = host_file.to_string_lossy().into_owned();

        self.vmrun
            .checked(
                &["copyFileFromGuestToHost", self.vmx(), guest_file, host_arg.as_str()],
                true,
            )
            .await?;
        let contents = tokio::fs::read(&host_file).await;

        if let Err(e) = tokio::fs::remove_file(&host_file).await {
            tracing::warn!(file = %host_file.display(), error = %e, "Failed to remove captured output");
        }
        if let Err(e) = self
            .vmrun
            .checked(&["deleteFileInGuest", self.vmx(), guest_file], true)
            .await
        {
            tracing::warn!(machine = %self.name, file = %guest_file, error = %e, "Failed to remove guest output file");
        }

        Ok(truncate_output(
            String::from_utf8_lossy(&contents?).into_owned(),
            MAX_OUTPUT_SIZE,
        ))
    }

    async fn list_snapshots(&self) -> Result<Vec<String>> {
        let out = self.vmrun.checked(&["listSnapshots", self.vmx()], false).await?;
        Ok(parse_snapshot_list(&out))
    }
}

#[async_trait]
impl Machine for VmrunMachine {
    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> &Platform {
        &self.platform
    }

    async fn find_snapshot(&self, name: &str) -> Result<Option<Box<dyn Snapshot>>> {
        let found = self.list_snapshots().await?.into_iter().any(|s| s == name);
        tracing::debug!(machine = %self.name, snapshot = %name, found, "Snapshot lookup");
        if !found {
            return Ok(None);
        }
        let snapshot: Box<dyn Snapshot> = Box::new(VmrunSnapshot {
            name: name.to_string(),
            vmx: self.vmx().to_string(),
            vmrun: Arc::clone(&self.vmrun),
        });
        Ok(Some(snapshot))
    }

    async fn start(&self, options: StartOptions) -> Result<()> {
        tracing::info!(machine = %self.name, gui = options.gui, "Starting machine");
        let mode = if options.gui { "gui" } else { "nogui" };
        self.vmrun.checked(&["start", self.vmx(), mode], false).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        tracing::info!(machine = %self.name, "Stopping machine");
        self.vmrun.checked(&["stop", self.vmx(), "soft"], false).await?;
        Ok(())
    }

    async fn create_snapshot(&self, id: &str) -> Result<()> {
        tracing::info!(machine = %self.name, snapshot = %id, "Creating snapshot");
        self.vmrun.checked(&["snapshot", self.vmx(), id], false).await?;
        Ok(())
    }

    async fn script(&self, path: &str) -> Result<String> {
        // A host file is shipped as script text, anything else is a command line.
        let text = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(_) => path.to_string(),
        };
        let interpreter = if self.platform.is_posix() { "/bin/sh" } else { "" };

        // runScriptInGuest does not return guest output, so it goes to a file.
        let file_name = format!("{CAPTURE_PREFIX}-{}.log", Uuid::new_v4());
        let capture = self.guest_path(&file_name);
        let wrapped = capture_script(&self.platform, &text, &capture);

        tracing::debug!(machine = %self.name, script = %path, capture = %capture, "Running guest script");
        let output = self
            .vmrun
            .exec(&["runScriptInGuest", self.vmx(), interpreter, wrapped.as_str()], true)
            .await?;
        let captured = self.fetch_output(&file_name, &capture).await;

        if !output.success() {
            let stderr = match captured {
                Ok(text) if !text.trim().is_empty() => text,
                _ => output.message(),
            };
            return Err(VmError::Script {
                command: path.to_string(),
                exit_code: output.exit_code,
                stderr,
            });
        }
        let captured = captured?;
        tracing::trace!(machine = %self.name, script = %path, output = %captured, "Guest script output");
        Ok(captured)
    }

    async fn copy(&self, local_path: &str) -> Result<()> {
        let file_name = Path::new(local_path)
            .file_name()
            .ok_or_else(|| VmError::Driver(format!("not a file path: {local_path}")))?
            .to_string_lossy();
        let dest = self.guest_path(&file_name);

        tracing::debug!(machine = %self.name, src = %local_path, dest = %dest, "Copying file to guest");
        self.vmrun
            .checked(&["copyFileFromHostToGuest", self.vmx(), local_path, dest.as_str()], true)
            .await?;
        Ok(())
    }

    async fn get_env(&self) -> Result<HashMap<String, String>> {
        let command = if self.platform.is_posix() { "env" } else { "set" };
        let out = self.script(command).await?;
        Ok(parse_env(&out))
    }

    async fn set_env(&self, key: &str, value: &str) -> Result<()> {
        tracing::debug!(machine = %self.name, key = %key, "Setting guest environment variable");
        self.vmrun
            .checked(&["writeVariable", self.vmx(), "guestEnv", key, value], true)
            .await?;
        Ok(())
    }
}

/// A snapshot known to exist on a vmrun machine.
#[derive(Debug)]
pub struct VmrunSnapshot {
    name: String,
    vmx: String,
    vmrun: Arc<Vmrun>,
}

#[async_trait]
impl Snapshot for VmrunSnapshot {
    fn name(&self) -> &str {
        &self.name
    }

    async fn revert(&self) -> Result<()> {
        tracing::info!(snapshot = %self.name, "Reverting to snapshot");
        self.vmrun
            .checked(&["revertToSnapshot", self.vmx.as_str(), self.name.as_str()], false)
            .await?;
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        tracing::info!(snapshot = %self.name, "Removing snapshot");
        self.vmrun
            .checked(&["deleteSnapshot", self.vmx.as_str(), self.name.as_str()], false)
            .await?;
        Ok(())
    }
}

/// Search `dir` (and its subdirectories, up to [`SEARCH_DEPTH`]) for `<name>.vmx`.
async fn find_vmx(dir: &Path, name: &str) -> Result<Option<PathBuf>> {
    let target = format!("{name}.vmx");
    let mut pending = vec![(dir.to_path_buf(), 0usize)];

    while let Some((current, depth)) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_file() && entry.file_name().to_string_lossy() == target {
                return Ok(Some(path));
            }
            if file_type.is_dir() && depth < SEARCH_DEPTH {
                pending.push((path, depth + 1));
            }
        }
    }
    Ok(None)
}

/// Join a guest directory and file name with the platform's separator.
fn join_guest_path(dir: &str, platform: &Platform, file_name: &str) -> String {
    let separator = if platform.is_posix() { '/' } else { '\\' };
    format!("{}{separator}{file_name}", dir.trim_end_matches(['/', '\\']))
}

/// Wrap script text so that everything it prints lands in `capture`.
///
/// The exit status of the wrapped script is the exit status of `text`.
pub fn capture_script(platform: &Platform, text: &str, capture: &str) -> String {
    if platform.is_posix() {
        format!("exec > '{capture}' 2>&1\n{text}\n")
    } else {
        format!("@echo off\r\n(\r\n{text}\r\n) > \"{capture}\" 2>&1\r\nexit /b %errorlevel%\r\n")
    }
}

/// Extract the `guestOS` value from `.vmx` contents.
pub fn parse_guest_os(vmx: &str) -> Option<String> {
    vmx.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("guestOS") {
            return None;
        }
        Some(value.trim().trim_matches('"').to_string())
    })
}

/// Map a VMware `guestOS` identifier onto a [`Platform`].
pub fn platform_from_guest_os(guest_os: &str) -> Platform {
    let os = guest_os.to_lowercase();
    if os.starts_with("darwin") {
        Platform::Darwin
    } else if os.starts_with("win") {
        Platform::Win32
    } else if LINUX_FAMILIES.iter().any(|family| os.contains(family)) {
        Platform::Linux
    } else {
        Platform::Other(guest_os.to_string())
    }
}

/// Parse `vmrun listSnapshots` output into snapshot names.
pub fn parse_snapshot_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("Total snapshots"))
        .map(str::to_string)
        .collect()
}

/// Parse `KEY=VALUE` lines from `env` / `set` output.
pub fn parse_env(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.trim_end_matches('\r').split_once('=')?;
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
