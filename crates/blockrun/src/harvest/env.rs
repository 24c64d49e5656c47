//! Environment Capturer and the session-scoped environment store.
//!
//! Bash-compatible scripts dump their final environment on exit (see
//! [`crate::launch::script::wrap_for_env_capture`]). The dump is compared to
//! the environment the child was given and only added or changed variables
//! are merged into the [`SessionEnv`]. Merging never removes keys.

use crate::error::{RunnerError, RunnerResult};
use crate::launch::script::WRAPPER_VAR_PREFIX;
use crate::model::EnvDiff;
use crate::scratch::{FILES_ENV_VAR, OUTPUTS_ENV_VAR};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Variables the shell maintains for itself. Persisting them would leak
/// stale values into later runs.
const SHELL_INTERNAL_VARS: &[&str] = &[
    "_",
    "SHLVL",
    "PWD",
    "OLDPWD",
    "FUNCNAME",
    "LINENO",
    "RANDOM",
    "SRANDOM",
    "SECONDS",
    "EPOCHSECONDS",
    "EPOCHREALTIME",
    "BASHPID",
    "PPID",
    "PIPESTATUS",
    "HISTCMD",
];

/// True for variables that must never be captured.
pub fn is_excluded(key: &str) -> bool {
    SHELL_INTERNAL_VARS.contains(&key)
        || key.starts_with("BASH_")
        || key.starts_with(WRAPPER_VAR_PREFIX)
        || key == OUTPUTS_ENV_VAR
        || key == FILES_ENV_VAR
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Parse an environment dump. NUL-delimited input (`env -0`) is split on
/// NUL; otherwise lines that do not start a `NAME=` pair continue the
/// previous value.
pub fn parse_env_dump(data: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    if data.contains('\0') {
        for entry in data.split('\0').filter(|entry| !entry.is_empty()) {
            if let Some((key, value)) = entry.split_once('=') {
                env.insert(key.to_string(), value.to_string());
            }
        }
        return env;
    }

    let mut current: Option<(String, Vec<&str>)> = None;
    for line in data.split('\n') {
        match line.split_once('=') {
            Some((key, value)) if is_valid_name(key) => {
                if let Some((key, lines)) = current.take() {
                    env.insert(key, lines.join("\n"));
                }
                current = Some((key.to_string(), vec![value]));
            }
            _ => {
                if let Some((_, lines)) = current.as_mut() {
                    if !line.is_empty() {
                        lines.push(line);
                    }
                }
            }
        }
    }
    if let Some((key, lines)) = current {
        env.insert(key, lines.join("\n"));
    }
    env
}

/// Environment and working directory a script left behind.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CapturedEnv {
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

fn read_optional(path: &Path, what: &str) -> RunnerResult<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(RunnerError::io(format!("failed to read {what} capture"), err)),
    }
}

/// Read the capture files. `Ok(None)` when the script left no environment
/// dump (it was killed, or exec'd away from the wrapper).
pub fn read_capture(env_path: &Path, pwd_path: &Path) -> RunnerResult<Option<CapturedEnv>> {
    let Some(dump) = read_optional(env_path, "environment")? else {
        return Ok(None);
    };
    let env = parse_env_dump(&dump);
    if env.is_empty() {
        return Ok(None);
    }
    let working_dir = read_optional(pwd_path, "working directory")?
        .map(|pwd| pwd.trim().to_string())
        .filter(|pwd| !pwd.is_empty())
        .map(PathBuf::from);
    Ok(Some(CapturedEnv { env, working_dir }))
}

/// Keys of `after` that are new or changed relative to `before`, minus
/// excluded variables.
pub fn diff_env(before: &BTreeMap<String, String>, after: &BTreeMap<String, String>) -> EnvDiff {
    after
        .iter()
        .filter(|(key, _)| !is_excluded(key))
        .filter(|(key, value)| before.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// The environment a run starts from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionSnapshot {
    pub env: BTreeMap<String, String>,
    pub working_dir: PathBuf,
}

/// Public view of a session. Never includes variable values.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub working_dir: PathBuf,
    pub execution_count: u64,
    pub created_at: String,
    pub last_activity: String,
}

#[derive(Debug)]
struct SessionState {
    env: BTreeMap<String, String>,
    working_dir: PathBuf,
    initial_env: BTreeMap<String, String>,
    initial_working_dir: PathBuf,
    execution_count: u64,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

/// Caller-owned environment that persists across the runs of one session.
///
/// Each session has its own lock; runs in different sessions never contend.
#[derive(Debug)]
pub struct SessionEnv {
    state: Mutex<SessionState>,
}

impl SessionEnv {
    pub fn new(env: BTreeMap<String, String>, working_dir: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            state: Mutex::new(SessionState {
                initial_env: env.clone(),
                initial_working_dir: working_dir.clone(),
                env,
                working_dir,
                execution_count: 0,
                created_at: now,
                last_activity: now,
            }),
        }
    }

    /// Start from the current process environment and directory.
    pub fn from_process() -> RunnerResult<Self> {
        let working_dir = std::env::current_dir()
            .map_err(|err| RunnerError::io("failed to read current directory", err))?;
        Ok(Self::new(std::env::vars().collect(), working_dir))
    }

    fn lock(&self) -> RunnerResult<MutexGuard<'_, SessionState>> {
        self.state
            .lock()
            .map_err(|_| RunnerError::internal("session environment lock poisoned"))
    }

    pub fn snapshot(&self) -> RunnerResult<SessionSnapshot> {
        let state = self.lock()?;
        Ok(SessionSnapshot {
            env: state.env.clone(),
            working_dir: state.working_dir.clone(),
        })
    }

    pub fn get(&self, key: &str) -> RunnerResult<Option<String>> {
        Ok(self.lock()?.env.get(key).cloned())
    }

    /// Fold a diff into the session under one lock acquisition and count the
    /// execution.
    pub fn merge(&self, diff: &EnvDiff, working_dir: Option<&Path>) -> RunnerResult<()> {
        let mut state = self.lock()?;
        for (key, value) in diff {
            state.env.insert(key.clone(), value.clone());
        }
        if let Some(dir) = working_dir {
            state.working_dir = dir.to_path_buf();
        }
        state.execution_count += 1;
        state.last_activity = Utc::now();
        Ok(())
    }

    /// Restore the environment and directory the session was created with.
    pub fn reset(&self) -> RunnerResult<()> {
        let mut state = self.lock()?;
        state.env = state.initial_env.clone();
        state.working_dir = state.initial_working_dir.clone();
        state.last_activity = Utc::now();
        Ok(())
    }

    pub fn metadata(&self) -> RunnerResult<SessionMetadata> {
        let state = self.lock()?;
        Ok(SessionMetadata {
            working_dir: state.working_dir.clone(),
            execution_count: state.execution_count,
            created_at: state.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            last_activity: state.last_activity.to_rfc3339_opts(SecondsFormat::Secs, true),
        })
    }
}

/// Read the capture left by a run, diff it against the environment the child
/// received and merge the result. Returns the diff that was merged.
pub fn capture_into_session(
    env_path: &Path,
    pwd_path: &Path,
    child_env: &BTreeMap<String, String>,
    session: &SessionEnv,
) -> RunnerResult<Option<EnvDiff>> {
    let Some(captured) = read_capture(env_path, pwd_path)? else {
        tracing::debug!("no environment capture left by script");
        return Ok(None);
    };
    merge_capture(&captured, child_env, session).map(Some)
}

/// Merge an already read capture into `session`. Touches only memory, so it
/// is safe to call from async code.
pub fn merge_capture(
    captured: &CapturedEnv,
    child_env: &BTreeMap<String, String>,
    session: &SessionEnv,
) -> RunnerResult<EnvDiff> {
    let diff = diff_env(child_env, &captured.env);
    session.merge(&diff, captured.working_dir.as_deref())?;
    tracing::debug!(changed = diff.len(), "merged environment changes");
    Ok(diff)
}
