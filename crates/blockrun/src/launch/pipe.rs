//! Pipe backed launching, for hosts without pseudo-terminal support or
//! callers that want stdout and stderr apart.

use super::{LaunchSpec, LaunchedProcess, Launcher, ProcessExit, ProcessHandle, Terminator};
use crate::error::{RunnerError, RunnerResult};
use std::io::Read;
use std::process::{Child, Command, Stdio};

#[derive(Clone, Copy, Debug, Default)]
pub struct PipeLauncher;

impl Launcher for PipeLauncher {
    fn name(&self) -> &'static str {
        "pipe"
    }

    fn launch(&self, spec: &LaunchSpec) -> RunnerResult<LaunchedProcess> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .env_clear()
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|err| {
            RunnerError::launch(format!("failed to start '{}'", spec.program), err)
        })?;

        let mut outputs: Vec<Box<dyn Read + Send>> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            outputs.push(Box::new(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            outputs.push(Box::new(stderr));
        }

        let pid = child.id();
        tracing::debug!(program = %spec.program, pid, "spawned on pipes");

        Ok(LaunchedProcess {
            outputs,
            handle: Box::new(PipeHandle { child, reaped: false }),
            terminator: Terminator::new(Some(pid), None),
        })
    }
}

struct PipeHandle {
    child: Child,
    reaped: bool,
}

impl ProcessHandle for PipeHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn wait(&mut self) -> RunnerResult<ProcessExit> {
        let status = self
            .child
            .wait()
            .map_err(|err| RunnerError::io("failed to wait for child", err))?;
        self.reaped = true;
        Ok(ProcessExit {
            code: normalize_exit(status),
        })
    }
}

impl Drop for PipeHandle {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Exit code of a finished process; signal deaths map to `128 + signal`.
pub fn normalize_exit(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(code) = status.code() {
            code
        } else if let Some(signal) = status.signal() {
            128 + signal
        } else {
            1
        }
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(1)
    }
}
