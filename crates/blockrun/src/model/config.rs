//! Runner configuration.
//!
//! Every field has a default, so an empty YAML or JSON document is a valid
//! configuration.

use crate::error::{RunnerError, RunnerResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Ceiling for a single run: five minutes.
pub const DEFAULT_TIMEOUT_MS: u64 = 5 * 60 * 1000;
/// Framed lines buffered between the reader and the transport.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_DRAIN_GRACE_MS: u64 = 2_000;
pub const DEFAULT_KILL_GRACE_MS: u64 = 500;
pub const DEFAULT_FILE_TREE_CONTENT_LIMIT: u64 = 1024 * 1024;

/// How the child's output is attached.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PtyMode {
    /// Pseudo-terminal when the platform supports it, pipes otherwise.
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { rows: 40, cols: 120 }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub timeout_ms: u64,
    pub pty: PtyMode,
    pub terminal_size: TerminalSize,
    pub queue_capacity: usize,
    /// How long readers get to reach end-of-stream once the process exited.
    pub drain_grace_ms: u64,
    /// SIGTERM to SIGKILL grace when force-terminating.
    pub kill_grace_ms: u64,
    /// Larger files are listed in the file tree without content.
    pub file_tree_content_limit: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            pty: PtyMode::default(),
            terminal_size: TerminalSize::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            drain_grace_ms: DEFAULT_DRAIN_GRACE_MS,
            kill_grace_ms: DEFAULT_KILL_GRACE_MS,
            file_tree_content_limit: DEFAULT_FILE_TREE_CONTENT_LIMIT,
        }
    }
}

impl RunnerConfig {
    /// Load a configuration file. YAML is a superset of JSON, so both parse.
    pub fn load(path: &Path) -> RunnerResult<Self> {
        let data = fs::read_to_string(path)
            .map_err(|err| RunnerError::io("failed to read config file", err))?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> RunnerResult<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yml::from_str(data).map_err(|err| {
            RunnerError::protocol(
                "failed to parse config",
                serde_json::json!({ "source": err.to_string() }),
            )
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Queue capacity, never zero (a zero-capacity channel cannot be built).
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }
}
