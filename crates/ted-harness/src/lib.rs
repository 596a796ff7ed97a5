//! # ted-harness
//!
//! Runs ted test suites against every configured machine.
//!
//! ## Quick Start
//!
//! Run the install smoke suite with the `ted` binary:
//!
//! ```bash
//! cargo run -p ted-harness
//! ```
//!
//! Configure via environment variables:
//!
//! ```bash
//! export TED_VMS=ubuntu:clean,win10:clean
//! export TED_REF=v0.12.0
//! export TED_MACHINES_DIR=$HOME/vmware
//! export TED_GUEST_USER=kalabox
//! export TED_GUEST_PASSWORD=kalabox
//! cargo run -p ted-harness
//! ```
//!
//! Or point `TED_CONFIG` at a JSON file:
//!
//! ```json
//! { "git_ref": "HEAD", "vms": ["ubuntu:clean"], "context": { "gui": false } }
//! ```

mod config;
mod suite;

pub use config::{ConfigError, HarnessConfig, DEFAULT_GIT_REF};
pub use suite::{Harness, SuiteOutcome, SuiteParams, SuiteReport};
