//! Exit classification.
//!
//! A run starts `Running` and moves to exactly one terminal [`ExitStatus`].
//! Later observations are ignored, which is what gives a deadline precedence
//! over whatever exit code the force-terminated process reports afterwards.

use crate::model::{
    ExitStatus, StatusKind, CANCELED_EXIT_CODE, LAUNCH_FAILURE_EXIT_CODE, TIMEOUT_EXIT_CODE,
};

/// Exit code scripts use to signal "succeeded with caveats".
pub const WARN_EXIT_CODE: i32 = 2;

/// How a run ended, as observed by the multiplexer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Termination {
    /// The process exited on its own with this code.
    Exited(i32),
    LaunchFailed,
    DeadlineExceeded,
    Canceled,
}

/// Map a real exit code to a status kind.
pub fn kind_for_exit_code(code: i32) -> StatusKind {
    match code {
        0 => StatusKind::Success,
        WARN_EXIT_CODE => StatusKind::Warn,
        _ => StatusKind::Fail,
    }
}

/// Stateless classification of a single termination.
pub fn classify(termination: Termination) -> ExitStatus {
    match termination {
        Termination::Exited(code) => ExitStatus {
            kind: kind_for_exit_code(code),
            code,
        },
        Termination::LaunchFailed => ExitStatus {
            kind: StatusKind::Fail,
            code: LAUNCH_FAILURE_EXIT_CODE,
        },
        Termination::DeadlineExceeded => ExitStatus {
            kind: StatusKind::TimedOut,
            code: TIMEOUT_EXIT_CODE,
        },
        Termination::Canceled => ExitStatus {
            kind: StatusKind::Fail,
            code: CANCELED_EXIT_CODE,
        },
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
enum State {
    #[default]
    Running,
    Terminal(ExitStatus),
}

/// Run-scoped classifier state machine.
#[derive(Debug, Default)]
pub struct ExitClassifier {
    state: State,
}

impl ExitClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a termination. The first call decides the status; every call
    /// returns that status.
    pub fn observe(&mut self, termination: Termination) -> ExitStatus {
        match self.state {
            State::Terminal(status) => {
                tracing::debug!(?termination, ?status, "ignoring termination after terminal state");
                status
            }
            State::Running => {
                let status = classify(termination);
                self.state = State::Terminal(status);
                status
            }
        }
    }

    pub fn status(&self) -> Option<ExitStatus> {
        match self.state {
            State::Running => None,
            State::Terminal(status) => Some(status),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_some()
    }
}
