//! Guaranteed teardown appended by [`OrderedContext::cleanup`](crate::OrderedContext::cleanup).
//!
//! Phases run in a fixed order and every phase runs regardless of how the
//! pipeline or earlier phases ended. Failure precedence is "last failure
//! wins": a failing phase replaces whatever outcome came before it, and the
//! replaced error is logged.

use crate::context::{guarded, Session};
use crate::error::{CoreError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use ted_vm::Machine;

/// Snapshot rotated on every cleanup so the final machine state is kept.
pub const LAST_SNAPSHOT: &str = "last";

/// One teardown phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPhase {
    /// Stop the machine.
    Stop,
    /// Replace the `last` snapshot with the current state.
    RotateLast,
    /// Remove every snapshot in the context's ledger.
    RemoveRecorded,
}

/// Teardown phases in execution order.
pub const PHASES: [CleanupPhase; 3] = [
    CleanupPhase::Stop,
    CleanupPhase::RotateLast,
    CleanupPhase::RemoveRecorded,
];

impl fmt::Display for CleanupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupPhase::Stop => write!(f, "stop"),
            CleanupPhase::RotateLast => write!(f, "rotate-last"),
            CleanupPhase::RemoveRecorded => write!(f, "remove-recorded"),
        }
    }
}

impl CleanupPhase {
    fn execute<'a>(
        self,
        session: &'a Session,
        machine: &'a dyn Machine,
    ) -> BoxFuture<'a, Result<()>> {
        match self {
            CleanupPhase::Stop => async move {
                machine.stop().await?;
                Ok::<_, CoreError>(())
            }
            .boxed(),
            CleanupPhase::RotateLast => rotate_last(machine).boxed(),
            CleanupPhase::RemoveRecorded => remove_recorded(session, machine).boxed(),
        }
    }
}

async fn rotate_last(machine: &dyn Machine) -> Result<()> {
    if let Some(previous) = machine.find_snapshot(LAST_SNAPSHOT).await? {
        previous.remove().await?;
    }
    machine.create_snapshot(LAST_SNAPSHOT).await?;
    Ok(())
}

/// Remove ledger snapshots in creation order, stopping at the first failure.
///
/// An id leaves the ledger only once its snapshot is gone, so a failed or
/// cancelled removal keeps every snapshot still on the machine tracked.
async fn remove_recorded(session: &Session, machine: &dyn Machine) -> Result<()> {
    for id in session.recorded_snapshots().await {
        machine.find_snapshot_strict(&id).await?.remove().await?;
        session.forget_snapshot(&id).await;
        tracing::debug!(snapshot = %id, "Removed recorded snapshot");
    }
    Ok(())
}

/// Fold a phase result into the running outcome.
fn supersede(current: Result<Value>, phase: CleanupPhase, result: Result<()>) -> Result<Value> {
    match (current, result) {
        (current, Ok(())) => current,
        (Ok(_), Err(e)) => Err(e),
        (Err(previous), Err(e)) => {
            tracing::warn!(%phase, superseded = %previous, error = %e, "Cleanup failure replaces earlier error");
            Err(e)
        }
    }
}

/// Run every phase after a pipeline that ended with `outcome`.
pub(crate) async fn run(
    session: &Session,
    outcome: Result<Value>,
    limit: Option<Duration>,
) -> Result<Value> {
    let machine = match session.machine() {
        Ok(machine) => machine,
        Err(_) => {
            tracing::warn!(tag = %session.tag(), "Machine never located, skipping cleanup phases");
            return outcome;
        }
    };
    if let Err(e) = &outcome {
        tracing::warn!(error = %e, "Pipeline failed, cleaning up anyway");
    }

    let start = std::time::Instant::now();
    let mut outcome = outcome;
    for phase in PHASES {
        tracing::info!(%phase, "Cleanup phase");
        let result = guarded(limit, phase.execute(session, machine.as_ref())).await;
        if let Err(e) = &result {
            tracing::warn!(%phase, error = %e, "Cleanup phase failed");
        }
        outcome = supersede(outcome, phase, result);
    }

    tracing::info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        ok = outcome.is_ok(),
        "Cleanup finished"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(msg: &str) -> CoreError {
        CoreError::Aborted(msg.to_string())
    }

    #[test]
    fn test_phase_order() {
        assert_eq!(
            PHASES.map(|p| p.to_string()),
            ["stop", "rotate-last", "remove-recorded"]
        );
    }

    #[test]
    fn test_supersede_keeps_value_when_phase_succeeds() {
        let out = supersede(Ok(Value::Bool(true)), CleanupPhase::Stop, Ok(()));
        assert_eq!(out.unwrap(), Value::Bool(true));

        let out = supersede(Err(err("pipeline")), CleanupPhase::Stop, Ok(()));
        assert_eq!(out.unwrap_err().to_string(), "step aborted: pipeline");
    }

    #[test]
    fn test_supersede_last_failure_wins() {
        let out = supersede(Ok(Value::Null), CleanupPhase::Stop, Err(err("stop")));
        let out = supersede(out, CleanupPhase::RotateLast, Ok(()));
        let out = supersede(out, CleanupPhase::RemoveRecorded, Err(err("remove")));
        assert_eq!(out.unwrap_err().to_string(), "step aborted: remove");
    }
}
