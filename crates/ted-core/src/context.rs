//! OrderedContext - a strictly ordered pipeline of operations on one machine.
//!
//! Every builder method appends one step. Steps are spawned onto the Tokio
//! runtime as soon as they are chained, but each one first waits for its
//! predecessor: step N+1 is never dispatched before step N has finished,
//! and a failed step short-circuits everything after it.

use crate::cleanup;
use crate::config::ContextOptions;
use crate::error::{CoreError, Result};
use crate::install::InstallOptions;
use crate::tag::MachineTag;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use ted_vm::{Driver, Machine, StartOptions};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

/// Unique identifier for a context, used to correlate log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Create a new random context ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State shared between a context and the steps it has spawned.
///
/// Every chained step receives a clone. The machine handle is bound once by
/// the bootstrap step; the snapshot ledger lists snapshots this context
/// created, in creation order, for removal during cleanup.
#[derive(Clone)]
pub struct Session {
    id: ContextId,
    tag: Arc<MachineTag>,
    machine: Arc<OnceLock<Arc<dyn Machine>>>,
    snapshots: Arc<Mutex<Vec<String>>>,
}

impl Session {
    fn new(tag: MachineTag) -> Self {
        Self {
            id: ContextId::new(),
            tag: Arc::new(tag),
            machine: Arc::new(OnceLock::new()),
            snapshots: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// ID of the owning context.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Tag of the owning context.
    pub fn tag(&self) -> &MachineTag {
        &self.tag
    }

    /// The located machine.
    ///
    /// # Errors
    /// Returns [`CoreError::MachineUnavailable`] if bootstrap has not located it.
    pub fn machine(&self) -> Result<Arc<dyn Machine>> {
        self.machine
            .get()
            .cloned()
            .ok_or_else(|| CoreError::MachineUnavailable(self.tag.to_string()))
    }

    /// Add a snapshot to the cleanup ledger.
    pub async fn record_snapshot(&self, id: impl Into<String>) {
        self.snapshots.lock().await.push(id.into());
    }

    /// Snapshots currently in the cleanup ledger.
    pub async fn recorded_snapshots(&self) -> Vec<String> {
        self.snapshots.lock().await.clone()
    }

    fn bind(&self, machine: Arc<dyn Machine>) {
        if self.machine.set(machine).is_err() {
            tracing::warn!(context_id = %self.id, "Machine already bound, keeping first handle");
        }
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.machine.get().is_some()
    }

    /// Drop the first ledger entry equal to `id`.
    pub(crate) async fn forget_snapshot(&self, id: &str) {
        let mut ledger = self.snapshots.lock().await;
        if let Some(index) = ledger.iter().position(|s| s == id) {
            ledger.remove(index);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Run `fut`, bounded by `limit` when one is set.
pub(crate) async fn guarded<T>(
    limit: Option<Duration>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| CoreError::Timeout(limit))?,
        None => fut.await,
    }
}

/// Wait for a spawned step, flattening task failure into [`CoreError::Aborted`].
async fn join(handle: JoinHandle<Result<Value>>) -> Result<Value> {
    handle
        .await
        .map_err(|e| CoreError::Aborted(e.to_string()))?
}

/// A strictly ordered sequence of operations against one machine.
///
/// Construction enqueues the bootstrap (locate machine, revert to the tag's
/// snapshot, start). Builder methods append further steps and return
/// `&mut Self` for chaining. [`settle`](Self::settle) hands back the
/// pipeline's outcome; [`cleanup`](Self::cleanup) first appends the
/// guaranteed teardown.
///
/// Contexts must be created inside a Tokio runtime.
///
/// # Example
///
/// ```ignore
/// let mut ctx = OrderedContext::new(driver, "vm1:clean", ContextOptions::default())?;
/// ctx.run("echo hi").snapshot("after-echo");
/// ctx.cleanup().await?;
/// ```
pub struct OrderedContext {
    session: Session,
    options: ContextOptions,
    created_at: DateTime<Utc>,
    pipeline: Option<JoinHandle<Result<Value>>>,
    steps: usize,
}

impl OrderedContext {
    /// Parse `tag` and enqueue the bootstrap sequence.
    ///
    /// Returns immediately; the bootstrap runs in the background.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidTag`] if `tag` is not `<machine>:<snapshot>`.
    pub fn new(driver: Arc<dyn Driver>, tag: &str, options: ContextOptions) -> Result<Self> {
        let tag = MachineTag::parse(tag)?;
        let mut context = Self {
            session: Session::new(tag),
            options,
            created_at: Utc::now(),
            pipeline: None,
            steps: 0,
        };
        tracing::info!(
            context_id = %context.session.id,
            tag = %context.session.tag,
            gui = context.options.gui,
            "Creating context"
        );

        let gui = context.options.gui;
        context.chain(move |session, _| async move {
            let tag = session.tag().clone();
            let machine = driver.find_machine(tag.machine()).await?;
            session.bind(Arc::clone(&machine));

            let snapshot = machine.find_snapshot_strict(tag.snapshot()).await?;
            snapshot.revert().await?;
            machine.start(StartOptions { gui }).await?;

            tracing::info!(context_id = %session.id(), tag = %tag, "Machine booted");
            Ok(Value::Null)
        });
        Ok(context)
    }

    /// Get the context ID.
    pub fn id(&self) -> ContextId {
        self.session.id
    }

    /// Get the tag this context targets.
    pub fn tag(&self) -> &MachineTag {
        &self.session.tag
    }

    /// Get the options used to create this context.
    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// Get the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get a handle to the shared step state.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Snapshots this context created that cleanup will remove.
    pub async fn recorded_snapshots(&self) -> Vec<String> {
        self.session.recorded_snapshots().await
    }

    /// Append `step` to the pipeline.
    ///
    /// `step` receives the session and the previous step's value and is
    /// not invoked until every earlier step has succeeded. If an earlier
    /// step failed, `step` is skipped and the failure passes through.
    pub fn chain<F, Fut>(&mut self, step: F) -> &mut Self
    where
        F: FnOnce(Session, Value) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let previous = self.pipeline.take();
        let session = self.session.clone();
        let limit = self.options.step_timeout;
        let index = self.steps;
        self.steps += 1;

        let span = tracing::debug_span!("step", context_id = %session.id, index);
        let handle = tokio::spawn(
            async move {
                let value = match previous {
                    Some(handle) => join(handle).await?,
                    None => Value::Null,
                };
                let start = std::time::Instant::now();
                tracing::debug!("Step started");
                let result = guarded(limit, step(session, value)).await;
                match &result {
                    Ok(_) => tracing::debug!(
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Step completed"
                    ),
                    Err(e) => tracing::debug!(
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        error = %e,
                        "Step failed"
                    ),
                }
                result
            }
            .instrument(span),
        );
        self.pipeline = Some(handle);
        self
    }

    /// Take a snapshot named `id` and add it to the cleanup ledger.
    ///
    /// The id is recorded only if the snapshot was created.
    pub fn snapshot(&mut self, id: impl Into<String>) -> &mut Self {
        let id = id.into();
        self.chain(move |session, _| async move {
            session.machine()?.create_snapshot(&id).await?;
            session.record_snapshot(id).await;
            Ok(Value::Null)
        })
    }

    /// Revert to the existing snapshot `id`.
    pub fn revert(&mut self, id: impl Into<String>) -> &mut Self {
        let id = id.into();
        self.chain(move |session, _| async move {
            let snapshot = session.machine()?.find_snapshot_strict(&id).await?;
            snapshot.revert().await?;
            Ok(Value::Null)
        })
    }

    /// Start the machine with the driver's default options.
    pub fn start(&mut self) -> &mut Self {
        self.chain(|session, _| async move {
            session.machine()?.start(StartOptions::default()).await?;
            Ok(Value::Null)
        })
    }

    /// Stop the machine, then start it again.
    pub fn restart(&mut self) -> &mut Self {
        self.chain(|session, _| async move {
            let machine = session.machine()?;
            machine.stop().await?;
            machine.start(StartOptions::default()).await?;
            Ok(Value::Null)
        })
    }

    /// Run a script in the guest; its output becomes the pipeline value.
    pub fn run(&mut self, script: impl Into<String>) -> &mut Self {
        let script = script.into();
        self.chain(move |session, _| async move {
            let output = session.machine()?.script(&script).await?;
            Ok(Value::String(output))
        })
    }

    /// Install kalabox with the default scripts.
    pub fn install(&mut self) -> &mut Self {
        self.install_with(InstallOptions::default())
    }

    /// Install kalabox with custom scripts or a post-install snapshot.
    pub fn install_with(&mut self, options: InstallOptions) -> &mut Self {
        self.chain(move |session, _| crate::install::run(session, options))
    }

    /// Read the guest environment and replace the pipeline value with
    /// whatever `handler` returns.
    pub fn get_env<F, T>(&mut self, handler: F) -> &mut Self
    where
        F: FnOnce(&HashMap<String, String>) -> T + Send + 'static,
        T: Serialize,
    {
        self.chain(move |session, _| async move {
            let env = session.machine()?.get_env().await?;
            Ok(serde_json::to_value(handler(&env))?)
        })
    }

    /// Set one guest environment variable.
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        self.chain(move |session, _| async move {
            session.machine()?.set_env(&key, &value).await?;
            Ok(Value::Null)
        })
    }

    /// Wait for the pipeline and return its outcome.
    ///
    /// The pipeline is reset to an empty, already-successful state, so the
    /// context can be reused; settling again without chaining returns
    /// `Ok(Value::Null)`.
    pub async fn settle(&mut self) -> Result<Value> {
        match self.pipeline.take() {
            Some(handle) => join(handle).await,
            None => Ok(Value::Null),
        }
    }

    /// Append the guaranteed teardown and settle.
    ///
    /// Teardown runs whether or not the pipeline failed: stop the machine,
    /// rotate the `last` snapshot, remove every snapshot in the ledger. Each
    /// phase runs even if the previous one failed. When several things fail
    /// the last failure is returned; earlier ones are logged.
    pub async fn cleanup(&mut self) -> Result<Value> {
        let previous = self.pipeline.take();
        let session = self.session.clone();
        let limit = self.options.step_timeout;

        let span = tracing::info_span!("cleanup", context_id = %session.id);
        let handle = tokio::spawn(
            async move {
                let outcome = match previous {
                    Some(handle) => join(handle).await,
                    None => Ok(Value::Null),
                };
                cleanup::run(&session, outcome, limit).await
            }
            .instrument(span),
        );
        self.pipeline = Some(handle);
        self.settle().await
    }
}

impl fmt::Debug for OrderedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedContext")
            .field("id", &self.session.id)
            .field("tag", &self.session.tag)
            .field("options", &self.options)
            .field("steps", &self.steps)
            .field("pending", &self.pipeline.is_some())
            .finish()
    }
}

/// Create a context for `tag` with default options.
pub fn vm(driver: Arc<dyn Driver>, tag: &str) -> Result<OrderedContext> {
    OrderedContext::new(driver, tag, ContextOptions::default())
}

/// Create a context for `tag` with [`OrderedContext::install`] already chained.
pub fn install(driver: Arc<dyn Driver>, tag: &str) -> Result<OrderedContext> {
    let mut context = vm(driver, tag)?;
    context.install();
    Ok(context)
}
