//! Turning a [`Program`] into something a launcher can start.
//!
//! Scripts are written to a private executable file inside the scratch
//! directory and run through an interpreter picked from the explicit
//! language, the shebang line, or `bash`. Bash-compatible scripts are
//! wrapped so that their final environment and working directory are
//! dumped on exit.

use crate::error::{RunnerError, RunnerResult};
use crate::model::Program;
use crate::scratch::Scratch;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tempfile::TempPath;

const DEFAULT_INTERPRETER: &str = "bash";

const BASH_COMPATIBLE: &[&str] = &[
    "bash",
    "sh",
    "/bin/bash",
    "/bin/sh",
    "/usr/bin/bash",
    "/usr/bin/sh",
];

/// Prefix of every shell variable the capture wrapper defines.
pub const WRAPPER_VAR_PREFIX: &str = "__blockrun_";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Interpreter {
    pub program: String,
    pub args: Vec<String>,
}

/// Choose an interpreter. An explicit language wins; otherwise the shebang
/// decides (`#!/usr/bin/env python3 -u` gives `python3 -u`, `#!/bin/bash -e`
/// gives `bash -e`); otherwise bash.
pub fn detect_interpreter(script: &str, language: Option<&str>) -> Interpreter {
    if let Some(language) = language.map(str::trim).filter(|l| !l.is_empty()) {
        return Interpreter {
            program: language.to_string(),
            args: Vec::new(),
        };
    }

    let shebang = script
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("#!"))
        .map(str::trim);

    if let Some(shebang) = shebang {
        let mut parts = shebang.split_whitespace();
        if shebang.contains("/env ") {
            // The first word is the env binary itself.
            let _env = parts.next();
            if let Some(program) = parts.next() {
                return Interpreter {
                    program: program.to_string(),
                    args: parts.map(str::to_string).collect(),
                };
            }
        } else if let Some(path) = parts.next() {
            let program = path.rsplit('/').next().unwrap_or(path);
            return Interpreter {
                program: program.to_string(),
                args: parts.map(str::to_string).collect(),
            };
        }
    }

    Interpreter {
        program: DEFAULT_INTERPRETER.to_string(),
        args: Vec::new(),
    }
}

pub fn is_bash_compatible(interpreter: &str) -> bool {
    BASH_COMPATIBLE.contains(&interpreter)
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Wrap a shell script so it dumps `env -0` and `pwd` into the given files
/// when it exits, keeping its exit code.
///
/// Under bash (outside POSIX mode) a user `trap ... EXIT` is intercepted by
/// a `trap` function and run first from the combined handler. Other traps
/// pass through. Shells that cannot override the special builtin keep the
/// user's EXIT trap and skip the capture.
pub fn wrap_for_env_capture(script: &str, env_path: &Path, pwd_path: &Path) -> String {
    let env_path = shell_quote(&env_path.display().to_string());
    let pwd_path = shell_quote(&pwd_path.display().to_string());
    format!(
        r#"__blockrun_env_path={env_path}
__blockrun_pwd_path={pwd_path}
__blockrun_user_exit=''

__blockrun_capture() {{
    env -0 > "$__blockrun_env_path" 2>/dev/null || env > "$__blockrun_env_path" 2>/dev/null
    pwd > "$__blockrun_pwd_path" 2>/dev/null
}}

__blockrun_trap() {{
    case "$1" in
        -p|-l) command trap "$@"; return $? ;;
    esac
    if [ $# -ge 2 ]; then
        for __blockrun_sig in "$@"; do
            case "$__blockrun_sig" in
                EXIT|0)
                    case "$1" in
                        -|"") __blockrun_user_exit="" ;;
                        *) __blockrun_user_exit=$1 ;;
                    esac
                    return 0
                    ;;
            esac
        done
    fi
    command trap "$@"
}}

case ":${{SHELLOPTS:-}}:" in
    *:posix:*) ;;
    *) [ -n "${{BASH_VERSION:-}}" ] && eval 'trap() {{ __blockrun_trap "$@"; }}' ;;
esac

__blockrun_on_exit() {{
    __blockrun_status=$?
    if [ -n "$__blockrun_user_exit" ]; then
        eval "$__blockrun_user_exit" || true
    fi
    __blockrun_capture
    exit $__blockrun_status
}}

command trap __blockrun_on_exit EXIT

{script}
"#
    )
}

/// Look `name` up on the `PATH` the child will receive. Names containing a
/// separator, and names not found, are returned unchanged.
pub fn resolve_program(name: &str, env: &BTreeMap<String, String>) -> String {
    if name.contains('/') {
        return name.to_string();
    }
    let Some(path_var) = env.get("PATH") else {
        return name.to_string();
    };
    std::env::split_paths(path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
        .map(|found| found.display().to_string())
        .unwrap_or_else(|| name.to_string())
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.is_file() && meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        meta.is_file()
    }
}

/// A program ready to launch. Holds the temporary script file, which is
/// deleted on drop.
#[derive(Debug)]
pub struct PreparedProgram {
    pub program: String,
    pub args: Vec<String>,
    /// The script was wrapped for environment capture.
    pub captures_env: bool,
    script: Option<TempPath>,
}

impl PreparedProgram {
    pub fn script_path(&self) -> Option<&Path> {
        self.script.as_deref()
    }
}

/// Resolve the interpreter, write the script file and wrap it when the
/// interpreter is bash-compatible.
pub fn prepare(
    program: &Program,
    scratch: &Scratch,
    env: &BTreeMap<String, String>,
) -> RunnerResult<PreparedProgram> {
    match program {
        Program::Command { program, args } => Ok(PreparedProgram {
            program: resolve_program(program, env),
            args: args.clone(),
            captures_env: false,
            script: None,
        }),
        Program::Script { content, language } => {
            let interpreter = detect_interpreter(content, language.as_deref());
            let captures_env = is_bash_compatible(&interpreter.program);
            let body = if captures_env {
                wrap_for_env_capture(
                    content,
                    &scratch.env_capture_file(),
                    &scratch.pwd_capture_file(),
                )
            } else {
                content.clone()
            };
            let script = write_script(scratch.root(), &body)?;
            let mut args = interpreter.args;
            args.push(script.display().to_string());
            tracing::debug!(interpreter = %interpreter.program, captures_env, "prepared script");
            Ok(PreparedProgram {
                program: resolve_program(&interpreter.program, env),
                args,
                captures_env,
                script: Some(script),
            })
        }
    }
}

fn write_script(dir: &Path, body: &str) -> RunnerResult<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("script-")
        .suffix(".sh")
        .tempfile_in(dir)
        .map_err(|err| RunnerError::io("failed to create script file", err))?;
    file.write_all(body.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|err| RunnerError::io("failed to write script file", err))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o700))
            .map_err(|err| RunnerError::io("failed to make script executable", err))?;
    }
    Ok(file.into_temp_path())
}
