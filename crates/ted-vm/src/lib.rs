//! # ted-vm
//!
//! VM driver boundary for ted.
//! Defines the capability set the sequencing layer needs from a hypervisor
//! and provides two implementations of it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ted_vm::{Driver, Machine, StartOptions, VmrunConfig, VmrunDriver};
//!
//! # async fn example() -> ted_vm::Result<()> {
//! let driver = VmrunDriver::new(VmrunConfig::from_env());
//!
//! // Locate the machine and roll it back to a known state
//! let machine = driver.find_machine("ubuntu").await?;
//! machine.find_snapshot_strict("clean").await?.revert().await?;
//!
//! // Boot it headless and run a command
//! machine.start(StartOptions::default()).await?;
//! let out = machine.script("uname -a").await?;
//! println!("{out}");
//!
//! machine.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Driver Traits**: `Driver`, `Machine` and `Snapshot`, object safe and async
//! - **vmrun Backend**: VMware Workstation/Fusion through the `vmrun` tool
//! - **Mock Backend**: recording, failure-injecting in-memory driver for tests

mod config;
mod error;
mod machine;
pub mod mock;
mod vmrun;

pub use config::{VmrunConfig, POSIX_GUEST_DIR, WIN32_GUEST_DIR};
pub use error::{ObjectKind, Result, VmError};
pub use machine::{Driver, Machine, Platform, Snapshot, StartOptions};
pub use vmrun::{
    capture_script, parse_env, parse_guest_os, parse_snapshot_list, platform_from_guest_os, VmrunDriver,
    VmrunMachine, VmrunSnapshot,
};
