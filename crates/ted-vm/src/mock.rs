//! In-memory driver for tests.
//!
//! [`MockDriver`] records every driver call in order, keeps per-machine
//! snapshot and environment state, and fails operations on request.
//!
//! ```
//! use ted_vm::mock::{Call, MockDriver, MockMachineSpec, Op};
//! use ted_vm::{Driver, Machine, Platform, StartOptions};
//!
//! # tokio_test::block_on(async {
//! let driver = MockDriver::new()
//!     .with_machine(MockMachineSpec::new("vm1", Platform::Linux).snapshot("clean"));
//! driver.fail_on(Op::Stop);
//!
//! let machine = driver.find_machine("vm1").await.unwrap();
//! machine.start(StartOptions::default()).await.unwrap();
//! assert!(machine.stop().await.is_err());
//!
//! assert_eq!(
//!     driver.calls(),
//!     vec![Call::FindMachine("vm1".into()), Call::Start { gui: false }, Call::Stop]
//! );
//! # });
//! ```

use crate::error::{Result, VmError};
use crate::machine::{Driver, Machine, Platform, Snapshot, StartOptions};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `Driver::find_machine` with the machine name
    FindMachine(String),
    /// `Machine::find_snapshot` with the snapshot name
    FindSnapshot(String),
    /// `Machine::find_snapshot_strict` with the snapshot name
    FindSnapshotStrict(String),
    /// `Snapshot::revert` on the named snapshot
    Revert(String),
    /// `Snapshot::remove` on the named snapshot
    RemoveSnapshot(String),
    /// `Machine::start` with its gui flag
    Start { gui: bool },
    /// `Machine::stop`
    Stop,
    /// `Machine::create_snapshot` with the new id
    CreateSnapshot(String),
    /// `Machine::script` with the script path or command
    Script(String),
    /// `Machine::copy` with the host path
    Copy(String),
    /// `Machine::get_env`
    GetEnv,
    /// `Machine::set_env` with key and value
    SetEnv(String, String),
}

impl Call {
    /// The operation this call belongs to.
    pub fn op(&self) -> Op {
        match self {
            Call::FindMachine(_) => Op::FindMachine,
            Call::FindSnapshot(_) | Call::FindSnapshotStrict(_) => Op::FindSnapshot,
            Call::Revert(_) => Op::Revert,
            Call::RemoveSnapshot(_) => Op::RemoveSnapshot,
            Call::Start { .. } => Op::Start,
            Call::Stop => Op::Stop,
            Call::CreateSnapshot(_) => Op::CreateSnapshot,
            Call::Script(_) => Op::Script,
            Call::Copy(_) => Op::Copy,
            Call::GetEnv => Op::GetEnv,
            Call::SetEnv(..) => Op::SetEnv,
        }
    }
}

/// Operation kinds that failures can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Machine lookup
    FindMachine,
    /// Snapshot lookup, strict or not
    FindSnapshot,
    /// Snapshot revert
    Revert,
    /// Snapshot removal
    RemoveSnapshot,
    /// Machine start
    Start,
    /// Machine stop
    Stop,
    /// Snapshot creation
    CreateSnapshot,
    /// Guest script, failing with a script error
    Script,
    /// Host to guest copy
    Copy,
    /// Environment read
    GetEnv,
    /// Environment write
    SetEnv,
}

/// Initial state of a mock machine.
#[derive(Debug, Clone)]
pub struct MockMachineSpec {
    name: String,
    platform: Platform,
    snapshots: Vec<String>,
    env: HashMap<String, String>,
    script_outputs: HashMap<String, String>,
}

impl MockMachineSpec {
    /// A machine with no snapshots and an empty environment.
    pub fn new(name: impl Into<String>, platform: Platform) -> Self {
        Self {
            name: name.into(),
            platform,
            snapshots: Vec::new(),
            env: HashMap::new(),
            script_outputs: HashMap::new(),
        }
    }

    /// Add an existing snapshot.
    pub fn snapshot(mut self, name: impl Into<String>) -> Self {
        self.snapshots.push(name.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the output returned when `command` is run.
    pub fn script_output(mut self, command: impl Into<String>, output: impl Into<String>) -> Self {
        self.script_outputs.insert(command.into(), output.into());
        self
    }
}

#[derive(Debug, Default)]
struct MachineState {
    snapshots: Vec<String>,
    env: HashMap<String, String>,
    script_outputs: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct Inner {
    machines: HashMap<String, (Platform, MachineState)>,
    calls: Vec<Call>,
    /// Remaining successful calls per op before it starts failing.
    failures: HashMap<Op, usize>,
    failing_scripts: HashSet<String>,
    delay: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

impl Inner {
    fn injected_failure(&mut self, call: &Call) -> Option<VmError> {
        if let Call::Script(command) = call {
            if self.failing_scripts.contains(command) {
                return Some(VmError::Script {
                    command: command.clone(),
                    exit_code: Some(1),
                    stderr: "injected failure".into(),
                });
            }
        }
        let remaining = self.failures.get_mut(&call.op())?;
        if *remaining > 0 {
            *remaining -= 1;
            return None;
        }
        Some(match call {
            Call::Script(command) => VmError::Script {
                command: command.clone(),
                exit_code: Some(1),
                stderr: "injected failure".into(),
            },
            other => VmError::Driver(format!("injected failure: {other:?}")),
        })
    }

    fn machine(&mut self, name: &str) -> Result<&mut MachineState> {
        self.machines
            .get_mut(name)
            .map(|(_, state)| state)
            .ok_or_else(|| VmError::machine_not_found(name))
    }
}

#[derive(Debug, Default)]
struct Shared {
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `call`, hold it in flight for the configured delay, and
    /// return any injected failure.
    async fn dispatch(&self, call: Call) -> Result<()> {
        let (delay, failure) = {
            let mut inner = self.lock();
            inner.calls.push(call.clone());
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
            let failure = inner.injected_failure(&call);
            (inner.delay, failure)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.lock().in_flight -= 1;
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Recording, failure-injecting [`Driver`].
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    shared: Arc<Shared>,
}

impl MockDriver {
    /// An empty driver with no machines.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a machine.
    pub fn with_machine(self, spec: MockMachineSpec) -> Self {
        let state = MachineState {
            snapshots: spec.snapshots,
            env: spec.env,
            script_outputs: spec.script_outputs,
        };
        self.shared
            .lock()
            .machines
            .insert(spec.name, (spec.platform, state));
        self
    }

    /// Hold every call in flight for `delay` before it completes.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.shared.lock().delay = Some(delay);
        self
    }

    /// Make every call of `op` fail.
    pub fn fail_on(&self, op: Op) {
        self.fail_after(op, 0);
    }

    /// Let `successes` calls of `op` through, then fail every later one.
    pub fn fail_after(&self, op: Op, successes: usize) {
        self.shared.lock().failures.insert(op, successes);
    }

    /// Make running `command` fail with a script error.
    pub fn fail_script(&self, command: impl Into<String>) {
        self.shared.lock().failing_scripts.insert(command.into());
    }

    /// All calls recorded so far, in dispatch order.
    pub fn calls(&self) -> Vec<Call> {
        self.shared.lock().calls.clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.shared.lock().calls.clear();
    }

    /// Current snapshot names of `machine`.
    pub fn snapshots(&self, machine: &str) -> Vec<String> {
        self.shared
            .lock()
            .machines
            .get(machine)
            .map(|(_, state)| state.snapshots.clone())
            .unwrap_or_default()
    }

    /// Current environment of `machine`.
    pub fn env(&self, machine: &str) -> HashMap<String, String> {
        self.shared
            .lock()
            .machines
            .get(machine)
            .map(|(_, state)| state.env.clone())
            .unwrap_or_default()
    }

    /// Highest number of calls that were ever in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.shared.lock().max_in_flight
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn find_machine(&self, name: &str) -> Result<Arc<dyn Machine>> {
        self.shared
            .dispatch(Call::FindMachine(name.to_string()))
            .await?;
        let platform = self
            .shared
            .lock()
            .machines
            .get(name)
            .map(|(platform, _)| platform.clone())
            .ok_or_else(|| VmError::machine_not_found(name))?;
        let machine: Arc<dyn Machine> = Arc::new(MockMachine {
            name: name.to_string(),
            platform,
            shared: Arc::clone(&self.shared),
        });
        Ok(machine)
    }
}

/// Machine handle returned by [`MockDriver`].
#[derive(Debug)]
pub struct MockMachine {
    name: String,
    platform: Platform,
    shared: Arc<Shared>,
}

impl MockMachine {
    fn snapshot_handle(&self, name: &str) -> Result<Option<Box<dyn Snapshot>>> {
        let mut inner = self.shared.lock();
        if !inner.machine(&self.name)?.snapshots.iter().any(|s| s == name) {
            return Ok(None);
        }
        let snapshot: Box<dyn Snapshot> = Box::new(MockSnapshot {
            machine: self.name.clone(),
            name: name.to_string(),
            shared: Arc::clone(&self.shared),
        });
        Ok(Some(snapshot))
    }
}

#[async_trait]
impl Machine for MockMachine {
    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> &Platform {
        &self.platform
    }

    async fn find_snapshot(&self, name: &str) -> Result<Option<Box<dyn Snapshot>>> {
        self.shared
            .dispatch(Call::FindSnapshot(name.to_string()))
            .await?;
        self.snapshot_handle(name)
    }

    async fn find_snapshot_strict(&self, name: &str) -> Result<Box<dyn Snapshot>> {
        self.shared
            .dispatch(Call::FindSnapshotStrict(name.to_string()))
            .await?;
        self.snapshot_handle(name)?
            .ok_or_else(|| VmError::snapshot_not_found(name))
    }

    async fn start(&self, options: StartOptions) -> Result<()> {
        self.shared.dispatch(Call::Start { gui: options.gui }).await
    }

    async fn stop(&self) -> Result<()> {
        self.shared.dispatch(Call::Stop).await
    }

    async fn create_snapshot(&self, id: &str) -> Result<()> {
        self.shared
            .dispatch(Call::CreateSnapshot(id.to_string()))
            .await?;
        self.shared
            .lock()
            .machine(&self.name)?
            .snapshots
            .push(id.to_string());
        Ok(())
    }

    async fn script(&self, path: &str) -> Result<String> {
        self.shared.dispatch(Call::Script(path.to_string())).await?;
        let mut inner = self.shared.lock();
        Ok(inner
            .machine(&self.name)?
            .script_outputs
            .get(path)
            .cloned()
            .unwrap_or_default())
    }

    async fn copy(&self, local_path: &str) -> Result<()> {
        self.shared
            .dispatch(Call::Copy(local_path.to_string()))
            .await
    }

    async fn get_env(&self) -> Result<HashMap<String, String>> {
        self.shared.dispatch(Call::GetEnv).await?;
        Ok(self.shared.lock().machine(&self.name)?.env.clone())
    }

    async fn set_env(&self, key: &str, value: &str) -> Result<()> {
        self.shared
            .dispatch(Call::SetEnv(key.to_string(), value.to_string()))
            .await?;
        self.shared
            .lock()
            .machine(&self.name)?
            .env
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Snapshot handle returned by [`MockMachine`].
#[derive(Debug)]
pub struct MockSnapshot {
    machine: String,
    name: String,
    shared: Arc<Shared>,
}

#[async_trait]
impl Snapshot for MockSnapshot {
    fn name(&self) -> &str {
        &self.name
    }

    async fn revert(&self) -> Result<()> {
        self.shared.dispatch(Call::Revert(self.name.clone())).await
    }

    async fn remove(&self) -> Result<()> {
        self.shared
            .dispatch(Call::RemoveSnapshot(self.name.clone()))
            .await?;
        let mut inner = self.shared.lock();
        let snapshots = &mut inner.machine(&self.machine)?.snapshots;
        let index = snapshots
            .iter()
            .position(|s| s == &self.name)
            .ok_or_else(|| VmError::snapshot_not_found(&self.name))?;
        snapshots.remove(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn driver() -> MockDriver {
        MockDriver::new().with_machine(
            MockMachineSpec::new("vm1", Platform::Linux)
                .snapshot("clean")
                .env("PATH", "/usr/bin")
                .script_output("echo hi", "hi\n"),
        )
    }

    #[tokio::test]
    async fn test_find_machine_not_found() {
        let driver = driver();
        let err = assert_err!(driver.find_machine("missing").await.map(|_| ()));
        assert!(err.is_not_found());
        assert_eq!(driver.calls(), vec![Call::FindMachine("missing".into())]);
    }

    #[tokio::test]
    async fn test_snapshot_lifecycle() {
        let driver = driver();
        let machine = assert_ok!(driver.find_machine("vm1").await);

        assert!(assert_ok!(machine.find_snapshot("last").await).is_none());
        assert_ok!(machine.create_snapshot("last").await);
        let last = assert_ok!(machine.find_snapshot_strict("last").await);
        assert_eq!(last.name(), "last");
        assert_ok!(last.remove().await);

        assert_eq!(driver.snapshots("vm1"), vec!["clean"]);
        let err = assert_err!(last.remove().await);
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_strict_lookup_fails_when_absent() {
        let driver = driver();
        let machine = assert_ok!(driver.find_machine("vm1").await);
        let err = assert_err!(machine.find_snapshot_strict("nope").await.map(|_| ()));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_script_output_and_env() {
        let driver = driver();
        let machine = assert_ok!(driver.find_machine("vm1").await);

        assert_eq!(assert_ok!(machine.script("echo hi").await), "hi\n");
        assert_eq!(assert_ok!(machine.script("true").await), "");

        assert_ok!(machine.set_env("KALABOX_DEV", "true").await);
        let env = assert_ok!(machine.get_env().await);
        assert_eq!(env.get("KALABOX_DEV").map(String::as_str), Some("true"));
        assert_eq!(env.get("PATH").map(String::as_str), Some("/usr/bin"));
    }

    #[tokio::test]
    async fn test_fail_after() {
        let driver = driver();
        driver.fail_after(Op::Start, 1);
        let machine = assert_ok!(driver.find_machine("vm1").await);

        assert_ok!(machine.start(StartOptions::default()).await);
        assert_err!(machine.start(StartOptions::default()).await);
        assert_err!(machine.start(StartOptions::default()).await);
    }

    #[tokio::test]
    async fn test_failed_create_leaves_no_snapshot() {
        let driver = driver();
        driver.fail_on(Op::CreateSnapshot);
        let machine = assert_ok!(driver.find_machine("vm1").await);

        assert_err!(machine.create_snapshot("after").await);
        assert_eq!(driver.snapshots("vm1"), vec!["clean"]);
    }

    #[tokio::test]
    async fn test_fail_script() {
        let driver = driver();
        driver.fail_script("npm version");
        let machine = assert_ok!(driver.find_machine("vm1").await);

        assert_ok!(machine.script("git version").await);
        let err = assert_err!(machine.script("npm version").await);
        assert!(matches!(err, VmError::Script { exit_code: Some(1), .. }));
    }
}
