//! Blockrun: run a script or command, stream its output with terminal
//! fidelity, classify the outcome and harvest what it left behind.
//!
//! A run is driven by [`mux::Runner::run`], which emits an ordered event
//! stream (`log*`, `status`, `outputs?`, `files_captured?`, `done`, or a
//! single `error`) into an [`mux::EventSink`].
//!
//! # Example
//!
//! ```no_run
//! use blockrun::harvest::SessionEnv;
//! use blockrun::model::{RunRequest, RunnerConfig};
//! use blockrun::mux::{Runner, SseWriter};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), blockrun::error::RunnerError> {
//! let runner = Runner::new(RunnerConfig::default());
//! let session = SessionEnv::from_process()?;
//! let mut sink = SseWriter::new(std::io::stdout());
//! let request = RunRequest::script("echo hello\necho GREETING=hi >> \"$RUNBOOK_OUTPUT\"\n");
//! let outcome = runner
//!     .run(&request, &session, &mut sink, &CancellationToken::new())
//!     .await;
//! assert_eq!(outcome.status.code, 0);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
// Public API types have docs; internal helpers are documented where the
// behaviour is not obvious from the signature.
#![allow(missing_docs)]

pub mod classify;
pub mod error;
pub mod framer;
pub mod guard;
pub mod harvest;
pub mod launch;
pub mod model;
pub mod mux;
pub mod scratch;

pub use crate::error::{ErrorCode, RunnerError, RunnerResult};
pub use crate::model::*;
