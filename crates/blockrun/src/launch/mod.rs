//! Process launching behind a capability interface.
//!
//! A [`Launcher`] starts a subprocess and hands back its output byte
//! streams, a blocking wait handle, and a [`Terminator`] usable from another
//! task while the wait is in progress.
//!
//! # Key Types
//!
//! - [`PtyLauncher`] - combined stdout/stderr through a pseudo-terminal, ANSI preserved
//! - [`PipeLauncher`] - separate stdout and stderr pipes
//! - [`LaunchSpec`] - fully resolved program, arguments, directory and environment
//!
//! The child always leads its own process group so termination reaches
//! everything it spawned.

pub mod pipe;
pub mod pty;
pub mod script;

pub use pipe::PipeLauncher;
pub use pty::PtyLauncher;

use crate::error::{RunnerError, RunnerResult};
use crate::model::{PtyMode, TerminalSize};
#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Fully resolved launch parameters.
#[derive(Clone, Debug)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Complete child environment; nothing is inherited implicitly.
    pub env: BTreeMap<String, String>,
    pub size: TerminalSize,
}

/// Exit of a process that ran to completion. Signal deaths are reported as
/// `128 + signal`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProcessExit {
    pub code: i32,
}

/// Blocking wait on a launched process.
pub trait ProcessHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Block until the process exits. Implementations release any terminal
    /// descriptor they hold once the wait returns, so readers see end of
    /// stream.
    fn wait(&mut self) -> RunnerResult<ProcessExit>;
}

/// Signals the process group of a launched child.
pub struct Terminator {
    pid: Option<u32>,
    killer: Option<Box<dyn portable_pty::ChildKiller + Send + Sync>>,
}

impl Terminator {
    pub(crate) fn new(
        pid: Option<u32>,
        killer: Option<Box<dyn portable_pty::ChildKiller + Send + Sync>>,
    ) -> Self {
        Self { pid, killer }
    }

    /// Ask the group to exit (SIGTERM), or kill it outright.
    pub fn signal(&mut self, force: bool) -> RunnerResult<()> {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            let pgid = i32::try_from(pid)
                .map_err(|_| RunnerError::internal("process id does not fit in pid_t"))?;
            let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
            return signal_process_group(Pid::from_raw(pgid), signal);
        }

        match self.killer.as_mut() {
            Some(killer) => killer
                .kill()
                .map_err(|err| RunnerError::io("failed to kill child", err)),
            None => {
                tracing::warn!(pid = ?self.pid, "no way to signal child on this platform");
                Ok(())
            }
        }
    }
}

#[cfg(unix)]
fn signal_process_group(pgid: Pid, signal: Signal) -> RunnerResult<()> {
    match killpg(pgid, signal) {
        // ESRCH: the group is already gone.
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(err) => Err(RunnerError::io("failed to signal process group", err)),
    }
}

/// A started process.
pub struct LaunchedProcess {
    /// Output streams; one for a pseudo-terminal, stdout and stderr for pipes.
    pub outputs: Vec<Box<dyn Read + Send>>,
    pub handle: Box<dyn ProcessHandle>,
    pub terminator: Terminator,
}

/// Starts subprocesses.
pub trait Launcher: Send + Sync {
    fn name(&self) -> &'static str;

    fn launch(&self, spec: &LaunchSpec) -> RunnerResult<LaunchedProcess>;
}

/// Pick the launcher for a mode. `Auto` probes pseudo-terminal support once
/// per process.
pub fn launcher_for(mode: PtyMode) -> Box<dyn Launcher> {
    let use_pty = match mode {
        PtyMode::Always => true,
        PtyMode::Never => false,
        PtyMode::Auto => pty_available(),
    };
    if use_pty {
        Box::new(PtyLauncher)
    } else {
        Box::new(PipeLauncher)
    }
}

fn pty_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        let probe = portable_pty::native_pty_system().openpty(portable_pty::PtySize::default());
        if let Err(err) = &probe {
            tracing::debug!(error = %err, "pseudo-terminal unavailable, using pipes");
        }
        probe.is_ok()
    })
}
