//! Pseudo-terminal backed launching.
//!
//! stdout and stderr share the terminal, so the child sees an interactive
//! session and keeps its colours and progress bars. The master side stays
//! open until the wait completes; dropping it earlier can leave readers
//! blocked on some platforms, dropping it later leaks the descriptor.

use super::{LaunchSpec, LaunchedProcess, Launcher, ProcessExit, ProcessHandle, Terminator};
use crate::error::{RunnerError, RunnerResult};
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

const DEFAULT_TERM: &str = "xterm-256color";

/// Launches through the platform's native pseudo-terminal system.
#[derive(Clone, Copy, Debug, Default)]
pub struct PtyLauncher;

impl Launcher for PtyLauncher {
    fn name(&self) -> &'static str {
        "pty"
    }

    fn launch(&self, spec: &LaunchSpec) -> RunnerResult<LaunchedProcess> {
        let system = native_pty_system();
        let pair = system
            .openpty(PtySize {
                rows: spec.size.rows,
                cols: spec.size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| RunnerError::launch("failed to open pty", err))?;

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(cwd) = &spec.cwd {
            cmd.cwd(cwd);
        }
        cmd.env_clear();
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if !spec.env.contains_key("TERM") {
            cmd.env("TERM", DEFAULT_TERM);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|err| {
            RunnerError::launch(format!("failed to start '{}'", spec.program), err)
        })?;
        // Only the child may hold the slave, or the reader never sees EOF.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| RunnerError::io("failed to clone pty reader", err))?;

        let pid = child.process_id();
        let killer = child.clone_killer();
        tracing::debug!(program = %spec.program, ?pid, "spawned on pty");

        Ok(LaunchedProcess {
            outputs: vec![reader],
            handle: Box::new(PtyHandle {
                child,
                master: Some(pair.master),
            }),
            terminator: Terminator::new(pid, Some(killer)),
        })
    }
}

struct PtyHandle {
    child: Box<dyn Child + Send + Sync>,
    master: Option<Box<dyn MasterPty + Send>>,
}

impl ProcessHandle for PtyHandle {
    fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    fn wait(&mut self) -> RunnerResult<ProcessExit> {
        let waited = self.child.wait();
        // Close after wait, whatever the wait returned.
        drop(self.master.take());
        let status = waited.map_err(|err| RunnerError::io("failed to wait for child", err))?;
        let mut code = i32::try_from(status.exit_code()).unwrap_or(i32::MAX);
        let rendered = status.to_string();
        if let Some(signal) = signal_description(&rendered) {
            if let Some(number) = signal_number(signal) {
                code = 128 + number;
            }
            tracing::debug!(signal, code, "pty child terminated by signal");
        }
        Ok(ProcessExit { code })
    }
}

/// portable-pty only exposes the signal through its `Display` output,
/// `Terminated by <description>`.
fn signal_description(rendered: &str) -> Option<&str> {
    rendered.strip_prefix("Terminated by ")
}

/// Map the signal description portable-pty reports (`strsignal` text, or
/// `Signal N` when the platform has none) back to a signal number.
#[cfg(unix)]
fn signal_number(description: &str) -> Option<i32> {
    use nix::sys::signal::Signal;

    const DESCRIPTIONS: &[(&str, Signal)] = &[
        ("Hangup", Signal::SIGHUP),
        ("Interrupt", Signal::SIGINT),
        ("Quit", Signal::SIGQUIT),
        ("Aborted", Signal::SIGABRT),
        ("Abort trap", Signal::SIGABRT),
        ("Killed", Signal::SIGKILL),
        ("Segmentation fault", Signal::SIGSEGV),
        ("Broken pipe", Signal::SIGPIPE),
        ("Alarm clock", Signal::SIGALRM),
        ("Terminated", Signal::SIGTERM),
    ];

    if let Some(number) = description.strip_prefix("Signal ") {
        return number.trim().parse().ok();
    }
    DESCRIPTIONS
        .iter()
        .find(|(known, _)| description.starts_with(known))
        .map(|(_, signal)| *signal as i32)
}

#[cfg(not(unix))]
fn signal_number(_description: &str) -> Option<i32> {
    None
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        // The wait thread normally reaps; this covers handles that were never waited on.
        if self.master.is_some() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
