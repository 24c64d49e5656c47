//! blockrun CLI: run a script or command and stream it as server-sent events.
//!
//! Events go to stdout; diagnostics and tracing output go to stderr.

// CLI-specific lint allowances (CLI binary, not library)
#![allow(missing_docs)]
#![allow(clippy::print_stdout)] // CLI must print to stdout
#![allow(clippy::print_stderr)] // CLI must print to stderr
#![allow(clippy::exit)] // CLI uses exit codes

use blockrun::guard;
use blockrun::harvest::{OutputRoot, SessionEnv};
use blockrun::mux::{Runner, SseWriter};
use blockrun::{
    BlockInfo, ErrorCode, Program, PtyMode, RunOutcome, RunRequest, RunnerConfig, StatusKind,
};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use miette::{IntoDiagnostic, Result};
use std::fs;
use std::io;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Exit code for a run that hit its deadline, as `timeout(1)` reports it.
const EXIT_TIMED_OUT: i32 = 124;
const EXIT_FAILED: i32 = 1;
const EXIT_LAUNCH_ERROR: i32 = 2;

/// Color output mode
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal and `NO_COLOR` env
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Debug, Parser)]
#[command(
    name = "blockrun",
    version,
    about = "Run scripts and stream their output as server-sent events"
)]
struct Cli {
    /// Control color output
    #[arg(long, value_enum, default_value = "auto", global = true)]
    color: ColorMode,

    /// Log engine activity to stderr at debug level
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute one script or command, streaming SSE frames to stdout
    Run(RunArgs),
    /// Inspect or clear an output root
    Outputs {
        #[command(subcommand)]
        action: OutputsAction,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum, help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    #[arg(long, help = "Runner configuration file (YAML or JSON)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Working directory for the child")]
    cwd: Option<PathBuf>,
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,
    #[arg(long, help = "Directory generated files are relocated into")]
    output_root: Option<PathBuf>,
    #[arg(long, help = "Deadline for the run in milliseconds")]
    timeout_ms: Option<u64>,
    #[arg(long, conflicts_with = "no_pty", help = "Require a pseudo-terminal")]
    pty: bool,
    #[arg(long, help = "Use pipes instead of a pseudo-terminal")]
    no_pty: bool,
    #[arg(long, requires = "block_type")]
    block_id: Option<String>,
    #[arg(long, requires = "block_id")]
    block_type: Option<String>,
    #[arg(long, conflicts_with = "command", help = "Script file to execute")]
    script: Option<PathBuf>,
    #[arg(long, help = "Interpreter for --script, overriding its shebang")]
    language: Option<String>,
    #[arg(last = true)]
    command: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum OutputsAction {
    /// Report whether the output root exists and how many files it holds
    Check {
        #[arg(long)]
        output_root: PathBuf,
    },
    /// Delete everything inside the output root
    Clean {
        #[arg(long)]
        output_root: PathBuf,
    },
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

/// Configure color output based on CLI flag and environment
fn configure_colors(mode: ColorMode) -> bool {
    let use_color = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => {
            if std::env::var("NO_COLOR").is_ok() {
                false
            } else {
                supports_color::on(supports_color::Stream::Stderr).is_some()
            }
        }
    };

    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .color(use_color)
                .unicode(use_color)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set
    use_color
}

fn init_tracing(verbose: bool, use_color: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(use_color)
        .try_init()
        .ok();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let use_color = configure_colors(cli.color);
    init_tracing(cli.verbose, use_color);
    match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Outputs { action } => cmd_outputs(action),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

/// Handle the run command.
fn cmd_run(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::default(),
    };
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if args.pty {
        config.pty = PtyMode::Always;
    } else if args.no_pty {
        config.pty = PtyMode::Never;
    }

    let request = build_request(args)?;
    let session = SessionEnv::from_process()?;
    let runner = Runner::new(config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || on_interrupt.cancel()).into_diagnostic()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    let mut sink = SseWriter::new(io::stdout());
    let outcome = runtime.block_on(runner.run(&request, &session, &mut sink, &cancel));

    let code = exit_code_for_outcome(&outcome);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn build_request(args: RunArgs) -> Result<RunRequest> {
    let mut request = match (args.script, args.command.split_first()) {
        (Some(path), _) => {
            let content = fs::read_to_string(&path).into_diagnostic()?;
            RunRequest::new(Program::Script {
                content,
                language: args.language,
            })
        }
        (None, Some((program, rest))) => RunRequest::command(program.clone(), rest.to_vec()),
        (None, None) => miette::bail!("nothing to run: pass --script FILE or -- COMMAND"),
    };
    request.working_dir = args.cwd;
    request.env = args.env.into_iter().collect();
    request.output_root = args.output_root;
    request.block = args
        .block_id
        .zip(args.block_type)
        .map(|(id, kind)| BlockInfo { id, kind });
    Ok(request)
}

/// Handle the outputs command.
fn cmd_outputs(action: OutputsAction) -> Result<()> {
    let base = std::env::current_dir().into_diagnostic()?;
    let payload = match action {
        OutputsAction::Check { output_root } => {
            let resolved = guard::validate_output_root(&output_root, &base)
                .map_err(blockrun::RunnerError::from)?;
            let report = OutputRoot::new(resolved).inspect()?;
            serde_json::to_string(&report).into_diagnostic()?
        }
        OutputsAction::Clean { output_root } => {
            let root = OutputRoot::new(&output_root);
            let removed = root.clear(&base)?;
            serde_json::to_string(&serde_json::json!({
                "path": output_root,
                "removed": removed,
            }))
            .into_diagnostic()?
        }
    };
    println!("{payload}");
    Ok(())
}

/// Handle the completions command.
#[allow(clippy::unnecessary_wraps)] // Consistent with other command handlers
fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}

fn exit_code_for_outcome(outcome: &RunOutcome) -> i32 {
    match outcome.error_code() {
        Some(ErrorCode::Launch) => EXIT_LAUNCH_ERROR,
        Some(ErrorCode::Timeout) => EXIT_TIMED_OUT,
        Some(_) => EXIT_FAILED,
        None => match outcome.status.kind {
            StatusKind::Success | StatusKind::Warn => 0,
            StatusKind::TimedOut | StatusKind::Fail => EXIT_FAILED,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::parse_env_pair;

    #[test]
    fn env_pairs_split_at_first_equals() {
        assert_eq!(
            parse_env_pair("URL=a=b"),
            Ok(("URL".to_string(), "a=b".to_string()))
        );
        assert_eq!(parse_env_pair("EMPTY="), Ok(("EMPTY".to_string(), String::new())));
    }

    #[test]
    fn env_pairs_require_a_key() {
        assert!(parse_env_pair("=value").is_err());
        assert!(parse_env_pair("novalue").is_err());
    }
}
