//! Event Multiplexer: supervises one run and renders it as an ordered
//! event stream.
//!
//! Every run produces `log*`, `status`, `outputs?`, `files_captured?`,
//! `done`, or a single `error` when the process could not be started.
//!
//! # Concurrency
//!
//! - one reader thread per output stream frames bytes into [`OutputLine`]s
//!   and pushes them into a bounded queue
//! - one waiter thread blocks on the OS-level wait and reports the exit
//! - the [`Runner::run`] future owns the transport and selects between
//!   queued lines, the exit report, the deadline and caller cancellation
//!
//! Once the run is decided the queue is drained (bounded by the drain grace)
//! before `status` is emitted and then dropped, so no `log` can follow a
//! terminal event.

pub mod sink;

pub use sink::{encode_sse, CollectingSink, EventSink, SseWriter};

use crate::classify::{ExitClassifier, Termination};
use crate::error::{RunnerError, RunnerResult};
use crate::framer::{LineFramer, OutputLine};
use crate::harvest::env::CapturedEnv;
use crate::harvest::{self, SessionEnv};
use crate::launch::script::{self, PreparedProgram};
use crate::launch::{self, LaunchSpec, Launcher, ProcessExit, ProcessHandle, Terminator};
use crate::model::{
    BlockOutputs, CapturedFile, EnvDiff, ErrorEvent, ExitStatus, FileTreeNode,
    FilesCapturedEvent, LogEvent, OutputsEvent, RejectedFile, RunEvent, RunId, RunOutcome,
    RunRequest, RunnerConfig, StatusEvent,
};
use crate::scratch::Scratch;
use chrono::{SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const READ_CHUNK: usize = 4096;

type ExitReport = oneshot::Receiver<RunnerResult<ProcessExit>>;

/// Executes runs with one configuration and one launcher.
pub struct Runner {
    config: RunnerConfig,
    launcher: Box<dyn Launcher>,
}

impl Runner {
    /// Build a runner whose launcher follows `config.pty`.
    pub fn new(config: RunnerConfig) -> Self {
        let launcher = launch::launcher_for(config.pty);
        Self { config, launcher }
    }

    pub fn with_launcher(config: RunnerConfig, launcher: Box<dyn Launcher>) -> Self {
        Self { config, launcher }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn launcher_name(&self) -> &'static str {
        self.launcher.name()
    }

    /// Execute one request, streaming its events into `sink`.
    ///
    /// Never fails: every problem ends up as an event and in the returned
    /// outcome. Environment changes are merged into `session` when the run
    /// succeeds or warns. Canceling `cancel` terminates the process and ends
    /// the run as a failure.
    pub async fn run(
        &self,
        request: &RunRequest,
        session: &SessionEnv,
        sink: &mut dyn EventSink,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let run_id = RunId::new();
        let span = tracing::info_span!("run", %run_id, launcher = self.launcher.name());
        self.run_inner(run_id, request, session, sink, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: RunId,
        request: &RunRequest,
        session: &SessionEnv,
        sink: &mut dyn EventSink,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let mut out = Emitter::new(sink);

        let started = match self.start(request, session) {
            Ok(started) => started,
            Err(err) => return launch_failed(run_id, &mut out, &err),
        };
        let Started {
            scratch,
            prepared,
            child_env,
            workers,
            mut terminator,
        } = started;
        let Workers {
            mut lines,
            mut exit,
        } = workers;

        let timeout = request.timeout().unwrap_or_else(|| self.config.timeout());
        let mut classifier = ExitClassifier::new();
        let completion = supervise(&mut out, &mut lines, &mut exit, timeout, cancel).await;

        let status = match completion {
            Completion::Exited(report) => {
                self.drain(&mut out, &mut lines, &mut terminator).await;
                classifier.observe(Termination::Exited(exit_code(report)))
            }
            Completion::DeadlineExceeded => {
                self.terminate(&mut terminator, &mut exit).await;
                self.drain(&mut out, &mut lines, &mut terminator).await;
                out.note(format!(
                    "Script execution timed out after {}",
                    describe_duration(timeout)
                ));
                classifier.observe(Termination::DeadlineExceeded)
            }
            Completion::Canceled => {
                self.terminate(&mut terminator, &mut exit).await;
                self.drain(&mut out, &mut lines, &mut terminator).await;
                out.note("Execution canceled".to_string());
                classifier.observe(Termination::Canceled)
            }
        };
        // Readers still attached past this point can no longer reach the observer.
        drop(lines);

        let harvested = if status.kind.allows_harvest() {
            self.harvest(request, &scratch, &prepared, &child_env, session).await
        } else {
            Harvest::default()
        };
        let outcome = finish(run_id, status, harvested, request, &mut out);
        tracing::info!(
            status = status.kind.wire_name(),
            exit_code = status.code,
            error_code = ?outcome.error_code(),
            "run finished"
        );
        outcome
    }

    fn start(&self, request: &RunRequest, session: &SessionEnv) -> RunnerResult<Started> {
        let scratch = match &request.scratch_dir {
            Some(dir) => Scratch::at(dir)?,
            None => Scratch::create()?,
        };
        let snapshot = session.snapshot()?;
        let child_env = child_environment(snapshot.env, &request.env, &scratch);
        let prepared = script::prepare(&request.program, &scratch, &child_env)?;
        let cwd = request
            .working_dir
            .clone()
            .unwrap_or(snapshot.working_dir);

        let spec = LaunchSpec {
            program: prepared.program.clone(),
            args: prepared.args.clone(),
            cwd: Some(cwd),
            env: child_env.clone(),
            size: self.config.terminal_size,
        };
        let process = self.launcher.launch(&spec)?;
        let mut terminator = process.terminator;
        let capacity = self.config.queue_capacity();
        let workers = match spawn_workers(process.outputs, process.handle, capacity) {
            Ok(workers) => workers,
            Err(err) => {
                if let Err(kill_err) = terminator.signal(true) {
                    tracing::warn!(error = %kill_err, "failed to kill orphaned child");
                }
                return Err(err);
            }
        };

        Ok(Started {
            scratch,
            prepared,
            child_env,
            workers,
            terminator,
        })
    }

    /// Forward whatever the readers still produce until they reach end of
    /// stream. A reader still open after the drain grace means something
    /// else holds the terminal; the process group is killed and the drain
    /// ends with what is already queued.
    async fn drain(
        &self,
        out: &mut Emitter<'_>,
        lines: &mut mpsc::Receiver<OutputLine>,
        terminator: &mut Terminator,
    ) {
        let grace = tokio::time::sleep(self.config.drain_grace());
        tokio::pin!(grace);
        loop {
            tokio::select! {
                biased;
                line = lines.recv() => match line {
                    Some(line) => {
                        out.log(line);
                    }
                    None => return,
                },
                () = &mut grace => break,
            }
        }

        tracing::warn!("output still open after drain grace, killing process group");
        if let Err(err) = terminator.signal(true) {
            tracing::warn!(error = %err, "failed to kill process group");
        }
        while let Ok(line) = lines.try_recv() {
            out.log(line);
        }
    }

    /// SIGTERM, wait out the kill grace, then SIGKILL.
    async fn terminate(&self, terminator: &mut Terminator, exit: &mut ExitReport) {
        let grace = self.config.kill_grace();
        if let Err(err) = terminator.signal(false) {
            tracing::warn!(error = %err, "failed to signal process group");
        }
        if tokio::time::timeout(grace, &mut *exit).await.is_ok() {
            return;
        }
        tracing::debug!("process ignored SIGTERM, sending SIGKILL");
        if let Err(err) = terminator.signal(true) {
            tracing::warn!(error = %err, "failed to kill process group");
        }
        if tokio::time::timeout(grace, &mut *exit).await.is_err() {
            tracing::warn!("process still not reaped after SIGKILL");
        }
    }

    /// Filesystem work runs on the blocking pool; only the in-memory
    /// session merge happens on the executor.
    async fn harvest(
        &self,
        request: &RunRequest,
        scratch: &Scratch,
        prepared: &PreparedProgram,
        child_env: &BTreeMap<String, String>,
        session: &SessionEnv,
    ) -> Harvest {
        let job = HarvestJob {
            outputs_file: scratch.outputs_file(),
            env_capture: prepared
                .captures_env
                .then(|| (scratch.env_capture_file(), scratch.pwd_capture_file())),
            files_dir: scratch.files_dir(),
            output_root: request.output_root.clone(),
            tree_content_limit: self.config.file_tree_content_limit,
        };
        let span = tracing::Span::current();
        let collected = tokio::task::spawn_blocking(move || span.in_scope(|| job.collect())).await;
        let (mut harvested, captured_env) = match collected {
            Ok(collected) => collected,
            Err(err) => {
                let mut harvested = Harvest::default();
                harvested.warn(format!("Failed to harvest run artifacts: {err}"));
                return harvested;
            }
        };

        if let Some(captured) = captured_env {
            match harvest::env::merge_capture(&captured, child_env, session) {
                Ok(diff) => harvested.env_diff = Some(diff),
                Err(err) => harvested.warn(format!(
                    "Failed to capture environment changes: {}",
                    err.message
                )),
            }
        }
        harvested
    }
}

/// Owned inputs for the blocking half of a harvest.
struct HarvestJob {
    outputs_file: PathBuf,
    env_capture: Option<(PathBuf, PathBuf)>,
    files_dir: PathBuf,
    output_root: Option<PathBuf>,
    tree_content_limit: u64,
}

impl HarvestJob {
    fn collect(self) -> (Harvest, Option<CapturedEnv>) {
        let mut harvested = Harvest::default();

        match harvest::read_outputs(&self.outputs_file) {
            Ok(Some(parsed)) if !parsed.outputs.is_empty() => {
                harvested.outputs = Some(parsed.outputs);
            }
            Ok(_) => {}
            Err(err) => harvested.warn(format!("Failed to read block outputs: {}", err.message)),
        }

        let mut captured_env = None;
        if let Some((env_path, pwd_path)) = &self.env_capture {
            match harvest::env::read_capture(env_path, pwd_path) {
                Ok(Some(captured)) => captured_env = Some(captured),
                Ok(None) => tracing::debug!("no environment capture left by script"),
                Err(err) => harvested.warn(format!(
                    "Failed to capture environment changes: {}",
                    err.message
                )),
            }
        }

        if let Some(root) = &self.output_root {
            self.collect_files(root, &mut harvested);
        }
        (harvested, captured_env)
    }

    fn collect_files(&self, root: &Path, harvested: &mut Harvest) {
        let capture = match harvest::capture_files(&self.files_dir, root) {
            Ok(capture) => capture,
            Err(err) => {
                harvested.warn(format!("Failed to capture generated files: {}", err.message));
                return;
            }
        };
        for rejected in &capture.rejected {
            harvested.warn(format!(
                "Skipped generated file '{}': {}",
                rejected.relative_path, rejected.reason
            ));
        }
        harvested.rejected = capture.rejected;
        if capture.captured.is_empty() {
            return;
        }
        match harvest::build_file_tree(root, self.tree_content_limit) {
            Ok(tree) => harvested.file_tree = tree,
            Err(err) => harvested.warn(format!("Failed to list output directory: {}", err.message)),
        }
        harvested.files = Some(capture.captured);
    }
}

/// Forward lines until the run is decided.
async fn supervise(
    out: &mut Emitter<'_>,
    lines: &mut mpsc::Receiver<OutputLine>,
    exit: &mut ExitReport,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Completion {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut lines_open = true;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Completion::Canceled,
            () = &mut deadline => return Completion::DeadlineExceeded,
            line = lines.recv(), if lines_open => match line {
                Some(line) => {
                    if !out.log(line) {
                        tracing::warn!("observer went away, canceling run");
                        return Completion::Canceled;
                    }
                }
                None => lines_open = false,
            },
            report = &mut *exit => return Completion::Exited(report),
        }
    }
}

struct Started {
    scratch: Scratch,
    prepared: PreparedProgram,
    child_env: BTreeMap<String, String>,
    workers: Workers,
    terminator: Terminator,
}

struct Workers {
    lines: mpsc::Receiver<OutputLine>,
    exit: ExitReport,
}

enum Completion {
    Exited(Result<RunnerResult<ProcessExit>, oneshot::error::RecvError>),
    DeadlineExceeded,
    Canceled,
}

#[derive(Default)]
struct Harvest {
    outputs: Option<BlockOutputs>,
    env_diff: Option<EnvDiff>,
    files: Option<Vec<CapturedFile>>,
    file_tree: Vec<FileTreeNode>,
    rejected: Vec<RejectedFile>,
    warnings: Vec<String>,
}

impl Harvest {
    fn warn(&mut self, message: String) {
        tracing::warn!(%message, "harvest problem");
        self.warnings.push(message);
    }
}

/// Session environment, then the request overlay, then the host `PATH` if
/// neither supplied one, then the scratch variables.
fn child_environment(
    mut env: BTreeMap<String, String>,
    overlay: &BTreeMap<String, String>,
    scratch: &Scratch,
) -> BTreeMap<String, String> {
    env.extend(overlay.iter().map(|(key, value)| (key.clone(), value.clone())));
    if !env.contains_key("PATH") {
        if let Ok(path) = std::env::var("PATH") {
            env.insert("PATH".to_string(), path);
        }
    }
    for (key, value) in scratch.env_vars() {
        env.insert(key.to_string(), value);
    }
    env
}

fn spawn_workers(
    outputs: Vec<Box<dyn Read + Send>>,
    mut handle: Box<dyn ProcessHandle>,
    capacity: usize,
) -> RunnerResult<Workers> {
    let (exit_tx, exit_rx) = oneshot::channel();
    let pid = handle.pid();
    thread::Builder::new()
        .name("blockrun-wait".to_string())
        .spawn(move || {
            let report = handle.wait();
            tracing::debug!(?pid, ?report, "process reaped");
            // The run may already have given up on this process.
            let _ = exit_tx.send(report);
        })
        .map_err(|err| RunnerError::io("failed to spawn wait thread", err))?;

    let (line_tx, line_rx) = mpsc::channel(capacity);
    for (index, output) in outputs.into_iter().enumerate() {
        let tx = line_tx.clone();
        thread::Builder::new()
            .name(format!("blockrun-read-{index}"))
            .spawn(move || pump(output, &tx))
            .map_err(|err| RunnerError::io("failed to spawn reader thread", err))?;
    }

    Ok(Workers {
        lines: line_rx,
        exit: exit_rx,
    })
}

/// Read a stream to its end, framing lines into the queue. Stops early when
/// the queue is closed.
fn pump(mut source: Box<dyn Read + Send>, tx: &mpsc::Sender<OutputLine>) {
    let mut framer = LineFramer::new();
    let mut buffer = [0u8; READ_CHUNK];
    loop {
        let read = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                // EIO is how a pty master reports that the slave side closed.
                tracing::debug!(error = %err, "output stream ended");
                break;
            }
        };
        let Some(chunk) = buffer.get(..read) else {
            break;
        };
        for line in framer.push(chunk) {
            if tx.blocking_send(line).is_err() {
                return;
            }
        }
    }
    if let Some(line) = framer.finish() {
        let _ = tx.blocking_send(line);
    }
}

fn exit_code(report: Result<RunnerResult<ProcessExit>, oneshot::error::RecvError>) -> i32 {
    match report {
        Ok(Ok(exit)) => exit.code,
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "wait for child failed");
            1
        }
        Err(_) => {
            tracing::warn!("wait thread ended without reporting");
            1
        }
    }
}

fn launch_failed(run_id: RunId, out: &mut Emitter<'_>, err: &RunnerError) -> RunOutcome {
    tracing::warn!(error = %err, "run could not start");
    let status = crate::classify::classify(Termination::LaunchFailed);
    out.send(RunEvent::Error(ErrorEvent {
        message: err.message.clone(),
    }));
    let mut outcome = RunOutcome::new(run_id, status);
    outcome.launch_error = Some(err.message.clone());
    outcome.observer_lost = out.lost;
    outcome.flush_failures = out.flush_failures;
    outcome
}

fn finish(
    run_id: RunId,
    status: ExitStatus,
    harvested: Harvest,
    request: &RunRequest,
    out: &mut Emitter<'_>,
) -> RunOutcome {
    for warning in &harvested.warnings {
        out.note(format!("Warning: {warning}"));
    }
    out.send(RunEvent::Status(StatusEvent::from(status)));
    if let Some(outputs) = &harvested.outputs {
        out.send(RunEvent::Outputs(OutputsEvent {
            outputs: outputs.clone(),
        }));
    }
    if let Some(files) = &harvested.files {
        out.send(RunEvent::FilesCaptured(FilesCapturedEvent {
            files: files.clone(),
            count: files.len(),
            file_tree: harvested.file_tree.clone(),
            source_block_id: request.block.as_ref().map(|block| block.id.clone()),
            source_block_type: request.block.as_ref().map(|block| block.kind.clone()),
        }));
    }
    out.send(RunEvent::Done);

    let mut outcome = RunOutcome::new(run_id, status);
    outcome.outputs = harvested.outputs;
    outcome.files = harvested.files;
    outcome.env_diff = harvested.env_diff;
    outcome.rejected_files = harvested.rejected;
    outcome.observer_lost = out.lost;
    outcome.flush_failures = out.flush_failures;
    outcome
}

/// `5m0s`, `30s`, `1.5s`, `250ms`.
pub fn describe_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        return format!("{millis}ms");
    }
    let secs = duration.as_secs();
    if secs >= 60 {
        return format!("{}m{}s", secs / 60, secs % 60);
    }
    let tenths = duration.subsec_millis() / 100;
    if tenths == 0 {
        format!("{secs}s")
    } else {
        format!("{secs}.{tenths}s")
    }
}

/// Wraps the sink with the bookkeeping every emission needs.
struct Emitter<'a> {
    sink: &'a mut dyn EventSink,
    lost: bool,
    terminal_sent: bool,
    flush_failures: usize,
}

impl<'a> Emitter<'a> {
    fn new(sink: &'a mut dyn EventSink) -> Self {
        Self {
            sink,
            lost: false,
            terminal_sent: false,
            flush_failures: 0,
        }
    }

    /// Emit and flush. Returns false once the observer is gone.
    fn send(&mut self, event: RunEvent) -> bool {
        if self.lost {
            return false;
        }
        if self.terminal_sent && matches!(event, RunEvent::Log(_)) {
            tracing::debug!("dropping log line after terminal event");
            return true;
        }
        self.terminal_sent |= event.is_terminal();
        if let Err(err) = self.sink.emit(&event) {
            tracing::warn!(error = %err, event = event.name(), "failed to deliver event");
            self.lost = true;
            return false;
        }
        if let Err(err) = self.sink.flush() {
            self.flush_failures += 1;
            tracing::warn!(error = %err, event = event.name(), "flush failed");
        }
        true
    }

    fn log(&mut self, line: OutputLine) -> bool {
        self.send(RunEvent::Log(LogEvent {
            line: line.text,
            timestamp: now_rfc3339(),
            replace: line.replace,
        }))
    }

    /// A line produced by the engine rather than the script.
    fn note(&mut self, text: String) -> bool {
        self.log(OutputLine::new(text, false))
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
