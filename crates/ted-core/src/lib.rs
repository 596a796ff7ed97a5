//! # ted-core
//!
//! Ordered VM operation context for integration tests that need a pristine,
//! reproducible machine.
//!
//! An [`OrderedContext`] wraps one machine, accumulates a strictly ordered
//! pipeline of steps against it, and guarantees teardown.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ted-core (host)                      │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │ OrderedContext  │────▶│  pipeline: JoinHandle     │   │
//! │  │   - chain()     │     │  (each step awaits the    │   │
//! │  │   - run()       │     │   one before it)          │   │
//! │  │   - snapshot()  │     └──────────────────────────┘   │
//! │  │   - install()   │                                    │
//! │  │   - settle()    │     ┌──────────────────────────┐   │
//! │  │   - cleanup()   │────▶│  Session                  │   │
//! │  └─────────────────┘     │  - machine handle         │   │
//! │                          │  - snapshot ledger        │   │
//! │                          └──────────────────────────┘   │
//! │                                       │                  │
//! └───────────────────────────────────────┼──────────────────┘
//!                                         ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │              ted-vm Driver / Machine / Snapshot           │
//! │                 (vmrun, or the mock driver)               │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use ted_core::{ContextOptions, OrderedContext};
//! use ted_vm::{VmrunConfig, VmrunDriver};
//!
//! # async fn example() -> ted_core::Result<()> {
//! let driver = Arc::new(VmrunDriver::new(VmrunConfig::from_env()));
//!
//! // Revert ubuntu to its "clean" snapshot and boot it
//! let mut ctx = OrderedContext::new(driver, "ubuntu:clean", ContextOptions::default())?;
//!
//! // Queue work; nothing here blocks
//! ctx.install()
//!     .run("kbox create drupal")
//!     .snapshot("after-create");
//!
//! // Stop, rotate `last`, remove "after-create", and report the outcome
//! ctx.cleanup().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Ordered Steps**: step N+1 never starts before step N finishes
//! - **Short-Circuiting**: the first failure skips everything after it
//! - **Guaranteed Cleanup**: stop, `last` rotation and snapshot removal always run
//! - **Install Macro**: platform-aware kalabox install with smoke checks
//! - **Step Timeouts**: optional per-step time limit

mod cleanup;
mod config;
mod context;
mod error;
mod install;
mod tag;

pub use cleanup::{CleanupPhase, LAST_SNAPSHOT, PHASES};
pub use config::{ContextOptions, ContextOptionsBuilder};
pub use context::{install, vm, ContextId, OrderedContext, Session};
pub use error::{CoreError, Result};
pub use install::{InstallAction, InstallOptions, InstallScripts, DEV_ENV_KEY};
pub use tag::{MachineTag, TAG_SEPARATOR};

/// Value carried between pipeline steps.
pub use serde_json::Value;
