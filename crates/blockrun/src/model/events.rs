//! Outward events and their JSON payloads.
//!
//! Event names and field names are part of the wire contract with the
//! streaming client; payloads always serialize as compact JSON objects.

use crate::error::{RunnerError, RunnerResult};
use crate::model::run::{BlockOutputs, CapturedFile, ExitStatus};
use crate::model::tree::FileTreeNode;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub line: String,
    /// RFC 3339.
    pub timestamp: String,
    pub replace: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub status: String,
    pub exit_code: i32,
}

impl From<ExitStatus> for StatusEvent {
    fn from(status: ExitStatus) -> Self {
        Self {
            status: status.kind.wire_name().to_string(),
            exit_code: status.code,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OutputsEvent {
    pub outputs: BlockOutputs,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesCapturedEvent {
    pub files: Vec<CapturedFile>,
    pub count: usize,
    pub file_tree: Vec<FileTreeNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_block_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_block_type: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

/// One named event of the outward stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RunEvent {
    Log(LogEvent),
    Status(StatusEvent),
    Outputs(OutputsEvent),
    FilesCaptured(FilesCapturedEvent),
    Done,
    Error(ErrorEvent),
}

impl RunEvent {
    /// Event name used in the `event:` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Log(_) => "log",
            Self::Status(_) => "status",
            Self::Outputs(_) => "outputs",
            Self::FilesCaptured(_) => "files_captured",
            Self::Done => "done",
            Self::Error(_) => "error",
        }
    }

    /// Compact JSON payload used in the `data:` field.
    pub fn data(&self) -> RunnerResult<String> {
        let encoded = match self {
            Self::Log(payload) => serde_json::to_string(payload),
            Self::Status(payload) => serde_json::to_string(payload),
            Self::Outputs(payload) => serde_json::to_string(payload),
            Self::FilesCaptured(payload) => serde_json::to_string(payload),
            Self::Done => return Ok("{}".to_string()),
            Self::Error(payload) => serde_json::to_string(payload),
        };
        encoded.map_err(|err| {
            RunnerError::protocol(format!("failed to encode {} event: {err}", self.name()), None)
        })
    }

    /// True for `status` and `error`, after which no `log` may follow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Status(_) | Self::Error(_))
    }
}
