use crate::error::ErrorCode;
use crate::model::ids::RunId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Exit code reported when the deadline forced termination.
pub const TIMEOUT_EXIT_CODE: i32 = -1;
/// Exit code reported when the process could not be started.
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = -2;
/// Exit code reported when the caller canceled the run.
pub const CANCELED_EXIT_CODE: i32 = -3;

/// Key/value results parsed from the outputs artifact.
pub type BlockOutputs = BTreeMap<String, String>;

/// Variables added or changed by a script.
pub type EnvDiff = BTreeMap<String, String>;

/// What to execute.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Program {
    /// Script source written to a temporary file and run by an interpreter.
    /// `language` overrides shebang detection.
    Script {
        content: String,
        #[serde(default)]
        language: Option<String>,
    },
    /// A program run directly.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// Block provenance forwarded on `files_captured`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Everything the caller decides about one run. Immutable once execution starts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRequest {
    pub program: Program,
    /// Working directory; falls back to the session's current directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Overlay applied on top of the session environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Where captured files are relocated. No file capture without it.
    #[serde(default)]
    pub output_root: Option<PathBuf>,
    /// Run-scoped scratch directory. A private temporary directory is
    /// allocated when absent.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    /// Overrides the configured deadline.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub block: Option<BlockInfo>,
}

impl RunRequest {
    pub fn new(program: Program) -> Self {
        Self {
            program,
            working_dir: None,
            env: BTreeMap::new(),
            output_root: None,
            scratch_dir: None,
            timeout_ms: None,
            block: None,
        }
    }

    /// Run `content` as a script, detecting the interpreter from its shebang.
    pub fn script(content: impl Into<String>) -> Self {
        Self::new(Program::Script {
            content: content.into(),
            language: None,
        })
    }

    pub fn command(program: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(Program::Command {
            program: program.into(),
            args,
        })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Classifier taxonomy.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Success,
    Warn,
    Fail,
    TimedOut,
}

impl StatusKind {
    /// Status string on the wire. Timeouts are reported as failures.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warn => "warn",
            Self::Fail | Self::TimedOut => "fail",
        }
    }

    /// Whether side-effect harvesting may run.
    pub fn allows_harvest(self) -> bool {
        matches!(self, Self::Success | Self::Warn)
    }
}

/// Terminal classification of a run, produced exactly once.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub kind: StatusKind,
    pub code: i32,
}

/// A file relocated from scratch storage into the output root.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedFile {
    pub name: String,
    pub relative_path: String,
    pub size: u64,
}

/// A scratch file that was not relocated, and why.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedFile {
    pub relative_path: String,
    pub reason: String,
}

/// Everything a run produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub status: ExitStatus,
    pub outputs: Option<BlockOutputs>,
    pub files: Option<Vec<CapturedFile>>,
    pub env_diff: Option<EnvDiff>,
    #[serde(default)]
    pub rejected_files: Vec<RejectedFile>,
    /// Set when the run ended with an `error` event instead of `status`.
    pub launch_error: Option<String>,
    /// Number of transport flushes that failed.
    #[serde(default)]
    pub flush_failures: usize,
    /// The observer went away mid-run.
    #[serde(default)]
    pub observer_lost: bool,
}

impl RunOutcome {
    pub(crate) fn new(run_id: RunId, status: ExitStatus) -> Self {
        Self {
            run_id,
            status,
            outputs: None,
            files: None,
            env_diff: None,
            rejected_files: Vec::new(),
            launch_error: None,
            flush_failures: 0,
            observer_lost: false,
        }
    }

    /// Why the run did not complete on its own, if it did not.
    pub fn error_code(&self) -> Option<ErrorCode> {
        if self.launch_error.is_some() {
            return Some(ErrorCode::Launch);
        }
        match (self.status.kind, self.status.code) {
            (StatusKind::TimedOut, _) => Some(ErrorCode::Timeout),
            (StatusKind::Fail, CANCELED_EXIT_CODE) => Some(ErrorCode::Canceled),
            _ => None,
        }
    }
}
