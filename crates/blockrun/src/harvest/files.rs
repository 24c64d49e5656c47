//! File Capturer: relocate scratch files into the output root.
//!
//! Every candidate goes through the Path Guard twice: lexically before any
//! write, and again against the canonical destination directory once it
//! exists, which catches symlinked directories planted inside the output
//! root. A rejected candidate never stops the rest of the batch.
//!
//! Files land through a temporary sibling that is renamed into place, so
//! concurrent runs sharing an output root never see partial files.

use crate::error::{RunnerError, RunnerResult};
use crate::guard;
use crate::model::{CapturedFile, RejectedFile};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// Outcome of one capture pass.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FileCapture {
    pub captured: Vec<CapturedFile>,
    pub rejected: Vec<RejectedFile>,
}

impl FileCapture {
    pub fn is_empty(&self) -> bool {
        self.captured.is_empty() && self.rejected.is_empty()
    }
}

fn relative_display(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Copy every regular file under `scratch_dir` to the same relative path
/// under `output_root`.
///
/// Returns an empty capture when the scratch directory is missing or empty.
/// Fails only when the output root itself cannot be prepared.
pub fn capture_files(scratch_dir: &Path, output_root: &Path) -> RunnerResult<FileCapture> {
    let mut capture = FileCapture::default();
    if !scratch_dir.is_dir() {
        return Ok(capture);
    }
    let has_entries = fs::read_dir(scratch_dir)
        .map_err(|err| RunnerError::io("failed to read scratch files directory", err))?
        .next()
        .is_some();
    if !has_entries {
        return Ok(capture);
    }

    fs::create_dir_all(output_root)
        .map_err(|err| RunnerError::io("failed to create output root", err))?;
    let canonical_root = fs::canonicalize(output_root)
        .map_err(|err| RunnerError::io("failed to resolve output root", err))?;

    let walker = WalkDir::new(scratch_dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let relative = err
                    .path()
                    .and_then(|path| path.strip_prefix(scratch_dir).ok())
                    .map(relative_display)
                    .unwrap_or_default();
                capture.rejected.push(RejectedFile {
                    relative_path: relative,
                    reason: err.to_string(),
                });
                continue;
            }
        };
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(scratch_dir) else {
            continue;
        };
        let relative = relative_display(relative);

        if file_type.is_symlink() {
            reject(&mut capture, relative, "symbolic links are not captured");
            continue;
        }
        if !file_type.is_file() {
            reject(&mut capture, relative, "not a regular file");
            continue;
        }

        match relocate(entry.path(), &relative, &canonical_root) {
            Ok(size) => {
                let name = entry.file_name().to_string_lossy().into_owned();
                tracing::debug!(path = %relative, size, "captured file");
                capture.captured.push(CapturedFile {
                    name,
                    relative_path: relative,
                    size,
                });
            }
            Err(reason) => reject(&mut capture, relative, reason),
        }
    }

    Ok(capture)
}

fn reject(capture: &mut FileCapture, relative_path: String, reason: impl Into<String>) {
    let reason = reason.into();
    tracing::warn!(path = %relative_path, %reason, "file not captured");
    capture.rejected.push(RejectedFile {
        relative_path,
        reason,
    });
}

/// Copy one file into place. Errors are rejection reasons.
fn relocate(source: &Path, relative: &str, canonical_root: &Path) -> Result<u64, String> {
    guard::validate_relative(relative).map_err(|err| err.to_string())?;
    let destination =
        guard::resolve_within(canonical_root, relative).map_err(|err| err.to_string())?;
    let parent = destination
        .parent()
        .ok_or_else(|| "destination has no parent directory".to_string())?;

    fs::create_dir_all(parent).map_err(|err| format!("failed to create directory: {err}"))?;
    let canonical_parent =
        fs::canonicalize(parent).map_err(|err| format!("failed to resolve directory: {err}"))?;
    if !guard::is_contained_in(&canonical_parent, canonical_root) {
        return Err(format!(
            "destination directory '{}' resolves outside the output root",
            canonical_parent.display()
        ));
    }

    let mut input = File::open(source).map_err(|err| format!("failed to open source: {err}"))?;
    let permissions = input
        .metadata()
        .map_err(|err| format!("failed to stat source: {err}"))?
        .permissions();
    let mut staged = NamedTempFile::new_in(&canonical_parent)
        .map_err(|err| format!("failed to stage file: {err}"))?;
    let size = io::copy(&mut input, &mut staged).map_err(|err| format!("failed to copy: {err}"))?;
    fs::set_permissions(staged.path(), permissions)
        .map_err(|err| format!("failed to set permissions: {err}"))?;

    let file_name = destination
        .file_name()
        .ok_or_else(|| "destination has no file name".to_string())?;
    staged
        .persist(canonical_parent.join(file_name))
        .map_err(|err| format!("failed to move file into place: {}", err.error))?;
    Ok(size)
}

/// What [`OutputRoot::inspect`] reports.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRootReport {
    pub path: PathBuf,
    pub exists: bool,
    pub file_count: usize,
}

/// The externally owned directory captured files are relocated into.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputRoot {
    path: PathBuf,
}

impl OutputRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the root exists and how many regular files it holds.
    pub fn inspect(&self) -> RunnerResult<OutputRootReport> {
        let exists = match fs::metadata(&self.path) {
            Ok(meta) => meta.is_dir(),
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => return Err(RunnerError::io("failed to stat output root", err)),
        };
        let file_count = if exists {
            WalkDir::new(&self.path)
                .min_depth(1)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file())
                .count()
        } else {
            0
        };
        Ok(OutputRootReport {
            path: self.path.clone(),
            exists,
            file_count,
        })
    }

    /// Delete everything inside the root, keeping the root itself.
    ///
    /// The root must resolve inside `base` and must not be a system
    /// directory. Returns the number of top-level entries removed.
    pub fn clear(&self, base: &Path) -> RunnerResult<usize> {
        let resolved = guard::validate_output_root(&self.path, base)?;
        let entries = match fs::read_dir(&resolved) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(RunnerError::io("failed to read output root", err)),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|err| RunnerError::io("failed to read output root", err))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(|err| RunnerError::io("failed to stat output entry", err))?;
            let result = if file_type.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            result.map_err(|err| RunnerError::io("failed to remove output entry", err))?;
            removed += 1;
        }
        tracing::info!(path = %resolved.display(), removed, "cleared output root");
        Ok(removed)
    }
}
