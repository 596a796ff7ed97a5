//! Context configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options for constructing an [`OrderedContext`](crate::OrderedContext).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    /// Boot the machine with a console window (default: false).
    pub gui: bool,
    /// Maximum time any single pipeline step may take (default: none).
    pub step_timeout: Option<Duration>,
}

impl ContextOptions {
    /// Create a new options builder.
    pub fn builder() -> ContextOptionsBuilder {
        ContextOptionsBuilder::default()
    }
}

/// Builder for ContextOptions.
#[derive(Debug, Default)]
pub struct ContextOptionsBuilder {
    options: ContextOptions,
}

impl ContextOptionsBuilder {
    /// Boot with a console window.
    pub fn gui(mut self, gui: bool) -> Self {
        self.options.gui = gui;
        self
    }

    /// Bound every step by `timeout`.
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.options.step_timeout = Some(timeout);
        self
    }

    /// Build the options.
    pub fn build(self) -> ContextOptions {
        self.options
    }
}
