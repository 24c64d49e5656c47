//! Side-effect harvesters.
//!
//! Each harvester reads an artifact the script left in its scratch area and
//! turns it into an event or a session update. None of them runs unless the
//! run classified as success or warn, and none of them can change that
//! classification.
//!
//! # Key Operations
//!
//! - [`outputs::read_outputs`] - `KEY=VALUE` results
//! - [`env::capture_into_session`] - environment changes into a [`env::SessionEnv`]
//! - [`files::capture_files`] - scratch files into the output root
//! - [`tree::build_file_tree`] - listing of the output root

pub mod env;
pub mod files;
pub mod outputs;
pub mod tree;

pub use env::{SessionEnv, SessionMetadata, SessionSnapshot};
pub use files::{capture_files, FileCapture, OutputRoot, OutputRootReport};
pub use outputs::{parse_outputs, read_outputs, ParsedOutputs};
pub use tree::{build_file_tree, language_for};
