//! Run-scoped scratch storage and the variables that advertise it.
//!
//! A script learns where to leave results through two environment
//! variables: [`OUTPUTS_ENV_VAR`] names a file it may append `KEY=VALUE`
//! lines to, [`FILES_ENV_VAR`] names a directory whose files are relocated
//! into the output root after a non-failing run.

use crate::error::{RunnerError, RunnerResult};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const OUTPUTS_ENV_VAR: &str = "RUNBOOK_OUTPUT";
pub const FILES_ENV_VAR: &str = "GENERATED_FILES";

const OUTPUTS_FILE: &str = "outputs";
const FILES_DIR: &str = "files";
const ENV_CAPTURE_FILE: &str = "env-capture";
const PWD_CAPTURE_FILE: &str = "pwd-capture";

/// Scratch layout for one run. A scratch area created by [`Scratch::create`]
/// is deleted on drop; one given to [`Scratch::at`] belongs to the caller.
#[derive(Debug)]
pub struct Scratch {
    root: PathBuf,
    _owned: Option<TempDir>,
}

impl Scratch {
    /// Allocate a private temporary scratch directory.
    pub fn create() -> RunnerResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix("blockrun-")
            .tempdir()
            .map_err(|err| RunnerError::io("failed to create scratch directory", err))?;
        let scratch = Self {
            root: dir.path().to_path_buf(),
            _owned: Some(dir),
        };
        scratch.prepare()?;
        Ok(scratch)
    }

    /// Use a caller-owned directory. Artifacts left by an earlier run,
    /// including anything still in the files directory, are removed first.
    pub fn at(root: &Path) -> RunnerResult<Self> {
        let scratch = Self {
            root: root.to_path_buf(),
            _owned: None,
        };
        match fs::remove_dir_all(scratch.files_dir()) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(RunnerError::io(
                    "failed to clear scratch files directory",
                    err,
                ))
            }
        }
        scratch.prepare()?;
        for stale in [
            scratch.outputs_file(),
            scratch.env_capture_file(),
            scratch.pwd_capture_file(),
        ] {
            match fs::remove_file(&stale) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(RunnerError::io("failed to clear scratch artifact", err)),
            }
        }
        Ok(scratch)
    }

    fn prepare(&self) -> RunnerResult<()> {
        fs::create_dir_all(self.files_dir())
            .map_err(|err| RunnerError::io("failed to create scratch files directory", err))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn outputs_file(&self) -> PathBuf {
        self.root.join(OUTPUTS_FILE)
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    pub fn env_capture_file(&self) -> PathBuf {
        self.root.join(ENV_CAPTURE_FILE)
    }

    pub fn pwd_capture_file(&self) -> PathBuf {
        self.root.join(PWD_CAPTURE_FILE)
    }

    /// Variables injected into the child environment.
    pub fn env_vars(&self) -> [(&'static str, String); 2] {
        [
            (OUTPUTS_ENV_VAR, self.outputs_file().display().to_string()),
            (FILES_ENV_VAR, self.files_dir().display().to_string()),
        ]
    }
}
