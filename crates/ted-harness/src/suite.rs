//! Per-machine suites.
//!
//! A suite body is run once for every configured tag, in order, and the
//! outcome of each run is collected into a [`SuiteReport`].

use crate::config::HarnessConfig;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use ted_core::{OrderedContext, Result};
use ted_vm::Driver;

/// What a suite body is told about the run it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuiteParams {
    /// Tag the suite targets.
    pub tag: String,
    /// Git ref under test.
    pub git_ref: String,
}

impl SuiteParams {
    /// Suite name: `"<tag>#<ref> - <title>"`.
    pub fn suite_name(&self, title: &str) -> String {
        format!("{}#{} - {}", self.tag, self.git_ref, title)
    }
}

/// How one suite run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum SuiteOutcome {
    /// The body returned `Ok`
    Passed,
    /// The body returned an error, rendered with `Display`
    Failed(String),
}

/// Result of running a suite against one tag.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    /// Suite name, `"<tag>#<ref> - <title>"`.
    pub name: String,
    /// Tag the suite ran against.
    pub tag: String,
    /// How the run ended.
    pub outcome: SuiteOutcome,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
}

impl SuiteReport {
    /// Whether the run passed.
    pub fn passed(&self) -> bool {
        self.outcome == SuiteOutcome::Passed
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.elapsed.as_millis();
        match &self.outcome {
            SuiteOutcome::Passed => write!(f, "ok     {} ({ms} ms)", self.name),
            SuiteOutcome::Failed(e) => write!(f, "FAILED {} ({ms} ms): {e}", self.name),
        }
    }
}

/// Runs suites against every configured machine.
///
/// # Example
///
/// ```ignore
/// let harness = Harness::new(HarnessConfig::load()?, driver);
/// let reports = harness
///     .describe("install", |harness, params| async move {
///         harness.install(&params.tag)?.cleanup().await?;
///         Ok::<_, ted_core::CoreError>(())
///     })
///     .await;
/// ```
#[derive(Clone)]
pub struct Harness {
    config: Arc<HarnessConfig>,
    driver: Arc<dyn Driver>,
}

impl Harness {
    /// Create a harness running suites through `driver`.
    pub fn new(config: HarnessConfig, driver: Arc<dyn Driver>) -> Self {
        Self {
            config: Arc::new(config),
            driver,
        }
    }

    /// Get the harness configuration.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Create a context for `tag` with the configured options.
    pub fn vm(&self, tag: &str) -> Result<OrderedContext> {
        OrderedContext::new(Arc::clone(&self.driver), tag, self.config.context.clone())
    }

    /// Create a context for `tag` with the install macro already chained.
    pub fn install(&self, tag: &str) -> Result<OrderedContext> {
        let mut context = self.vm(tag)?;
        context.install();
        Ok(context)
    }

    /// Run `body` once per configured tag, one tag at a time.
    ///
    /// A failing run is reported and the next tag still runs.
    pub async fn describe<F, Fut, E>(&self, title: &str, mut body: F) -> Vec<SuiteReport>
    where
        F: FnMut(Harness, SuiteParams) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: fmt::Display,
    {
        let mut reports = Vec::with_capacity(self.config.vms.len());
        for tag in &self.config.vms {
            let params = SuiteParams {
                tag: tag.clone(),
                git_ref: self.config.git_ref.clone(),
            };
            let name = params.suite_name(title);
            tracing::info!(suite = %name, "Suite started");

            let start = Instant::now();
            let outcome = match body(self.clone(), params).await {
                Ok(()) => SuiteOutcome::Passed,
                Err(e) => SuiteOutcome::Failed(e.to_string()),
            };
            let elapsed = start.elapsed();

            match &outcome {
                SuiteOutcome::Passed => tracing::info!(
                    suite = %name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Suite passed"
                ),
                SuiteOutcome::Failed(e) => tracing::warn!(
                    suite = %name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "Suite failed"
                ),
            }
            reports.push(SuiteReport {
                name,
                tag: tag.clone(),
                outcome,
                elapsed,
            });
        }
        reports
    }
}

impl fmt::Debug for Harness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harness")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
