//! Error taxonomy shared by every component of a run.
//!
//! Errors carry a stable [`ErrorCode`], a human message, and optional JSON
//! context so the CLI can render them through `miette` and embedders can
//! match on the code without parsing text.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Result alias used throughout the crate.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Stable machine-readable error codes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The subprocess could not be started at all.
    #[serde(rename = "E_LAUNCH")]
    Launch,
    /// Filesystem or descriptor failure.
    #[serde(rename = "E_IO")]
    Io,
    /// A path failed Path Guard validation.
    #[serde(rename = "E_PATH_DENIED")]
    PathDenied,
    /// Malformed input such as an unreadable config file.
    #[serde(rename = "E_PROTOCOL")]
    Protocol,
    /// The run exceeded its deadline.
    #[serde(rename = "E_TIMEOUT")]
    Timeout,
    /// The caller canceled the run.
    #[serde(rename = "E_CANCELED")]
    Canceled,
    /// Broken internal invariant (poisoned lock, closed channel).
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

impl ErrorCode {
    /// Wire form of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Launch => "E_LAUNCH",
            Self::Io => "E_IO",
            Self::PathDenied => "E_PATH_DENIED",
            Self::Protocol => "E_PROTOCOL",
            Self::Timeout => "E_TIMEOUT",
            Self::Canceled => "E_CANCELED",
            Self::Internal => "E_INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by fallible engine operations.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RunnerError {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<Value>,
}

impl Diagnostic for RunnerError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.context
            .as_ref()
            .map(|context| Box::new(context.to_string()) as Box<dyn fmt::Display + 'a>)
    }
}

impl RunnerError {
    pub fn new(
        code: ErrorCode,
        message: impl Into<String>,
        context: impl Into<Option<Value>>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            context: context.into(),
        }
    }

    /// The subprocess could not be started.
    pub fn launch(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::Launch,
            message,
            serde_json::json!({ "source": err.to_string() }),
        )
    }

    pub fn io(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::Io,
            message,
            serde_json::json!({ "source": err.to_string() }),
        )
    }

    pub fn path_denied(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::PathDenied, message, context)
    }

    pub fn protocol(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::Protocol, message, context)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message, None)
    }
}

impl From<crate::guard::PathError> for RunnerError {
    fn from(err: crate::guard::PathError) -> Self {
        let context = serde_json::json!({ "path": err.path() });
        Self::path_denied(err.to_string(), context)
    }
}
