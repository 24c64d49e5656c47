//! Path Guard: pure validation of relative paths and containment checks.
//!
//! Every filesystem-touching component routes caller- or script-supplied
//! paths through this module before reading, writing, or deleting anything.
//! Nothing here touches the filesystem; all checks are lexical.
//!
//! # Key Operations
//!
//! - [`validate_relative`] / [`validate_relative_or_default`] - reject absolute
//!   paths and `..` segments
//! - [`is_contained_in`] - segment-wise containment (`/out` never contains `/output`)
//! - [`resolve_within`] - join, normalize, and confirm the result stays in a base
//! - [`is_system_directory`] - refuse destructive operations on OS directories

use std::path::{Component, Path, PathBuf};

/// Directories that must never be used as an output root for destructive
/// operations. Compared lowercase with `/` separators and no trailing slash.
const SYSTEM_DIRECTORIES: &[&str] = &[
    "/",
    "/bin",
    "/boot",
    "/dev",
    "/etc",
    "/home",
    "/lib",
    "/lib64",
    "/opt",
    "/proc",
    "/root",
    "/sbin",
    "/sys",
    "/usr",
    "/var",
    "c:",
    "c:/windows",
    "c:/program files",
    "c:/program files (x86)",
    "c:/users",
];

/// Reasons a path is refused.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum PathError {
    #[error("path must not be empty")]
    Empty,
    #[error("path '{0}' must be relative")]
    Absolute(String),
    #[error("path '{0}' contains a '..' segment")]
    Traversal(String),
    #[error("path '{path}' resolves outside '{base}'")]
    Escapes { path: String, base: String },
    #[error("refusing to operate on system directory '{0}'")]
    SystemDirectory(String),
}

impl PathError {
    /// The offending path as given by the caller.
    pub fn path(&self) -> &str {
        match self {
            Self::Empty => "",
            Self::Absolute(path)
            | Self::Traversal(path)
            | Self::SystemDirectory(path)
            | Self::Escapes { path, .. } => path,
        }
    }
}

/// True when any `/`- or `\`-separated segment is exactly `..`.
///
/// Names that merely contain two dots (`foo..bar`, `..hidden`) are not
/// traversal.
pub fn contains_traversal(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| segment == "..")
}

/// True for POSIX-rooted paths, backslash-rooted paths and drive-letter
/// forms such as `C:\x` or `c:/x`, regardless of the host platform.
pub fn is_absolute(path: &str) -> bool {
    if path.starts_with('/') || path.starts_with('\\') {
        return true;
    }
    let mut chars = path.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(drive), Some(':')) if drive.is_ascii_alphabetic()
    )
}

/// Validate a caller-supplied relative path. Empty is rejected.
pub fn validate_relative(path: &str) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    validate_relative_or_default(path)
}

/// Like [`validate_relative`], but an empty path means "use the default"
/// and is accepted.
pub fn validate_relative_or_default(path: &str) -> Result<(), PathError> {
    if path.is_empty() {
        return Ok(());
    }
    if is_absolute(path) {
        return Err(PathError::Absolute(path.to_string()));
    }
    if contains_traversal(path) {
        return Err(PathError::Traversal(path.to_string()));
    }
    Ok(())
}

/// Lexically normalize a path: drop `.` segments and fold `..` into its
/// parent. `..` never climbs above the root of an absolute path.
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    let mut depth = 0usize;

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    normalized.pop();
                    depth -= 1;
                } else if !normalized.has_root() {
                    // Relative path climbing above its start; keep it visible.
                    normalized.push("..");
                }
            }
            Component::Normal(part) => {
                normalized.push(part);
                depth += 1;
            }
            Component::RootDir => normalized.push(Component::RootDir.as_os_str()),
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
        }
    }

    normalized
}

/// Segment-wise containment of `candidate` in `base` after normalization.
///
/// A path is contained in itself.
pub fn is_contained_in(candidate: &Path, base: &Path) -> bool {
    let candidate = normalize(candidate);
    let base = normalize(base);
    !base.as_os_str().is_empty() && candidate.starts_with(&base)
}

/// Join `relative` onto `base` and return the normalized result, provided it
/// stays inside `base`.
///
/// Unlike [`validate_relative`], interior `..` segments are accepted as long
/// as the normalized result does not escape (`a/../b` is fine, `a/../../b`
/// is not).
pub fn resolve_within(base: &Path, relative: &str) -> Result<PathBuf, PathError> {
    if relative.is_empty() {
        return Err(PathError::Empty);
    }
    if is_absolute(relative) {
        return Err(PathError::Absolute(relative.to_string()));
    }
    let resolved = normalize(&base.join(relative));
    if is_contained_in(&resolved, base) {
        Ok(resolved)
    } else {
        Err(PathError::Escapes {
            path: relative.to_string(),
            base: base.display().to_string(),
        })
    }
}

/// True when `path` names an operating-system directory (`/`, `/etc`,
/// `C:\Windows`, ...). Comparison is case-insensitive and separator-agnostic.
pub fn is_system_directory(path: &Path) -> bool {
    let normalized = normalize(path);
    let text = normalized
        .to_string_lossy()
        .replace('\\', "/")
        .to_ascii_lowercase();
    let trimmed = if text.len() > 1 {
        text.trim_end_matches('/')
    } else {
        text.as_str()
    };
    SYSTEM_DIRECTORIES.contains(&trimmed)
}

/// Resolve an output root against `base` and make sure destructive
/// operations on it are safe: it must stay inside `base` and must not be a
/// system directory.
pub fn validate_output_root(root: &Path, base: &Path) -> Result<PathBuf, PathError> {
    let resolved = normalize(&base.join(root));
    let shown = root.display().to_string();
    if is_system_directory(&resolved) {
        return Err(PathError::SystemDirectory(shown));
    }
    if !is_contained_in(&resolved, base) {
        return Err(PathError::Escapes {
            path: shown,
            base: base.display().to_string(),
        });
    }
    Ok(resolved)
}
