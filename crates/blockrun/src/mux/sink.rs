//! Transports for the outward event stream.

use crate::error::{RunnerError, RunnerResult};
use crate::model::RunEvent;
use std::io::Write;

/// Receives the ordered events of a run.
///
/// An `emit` error means the observer is gone; the run is then canceled.
/// A `flush` error is reported and otherwise ignored.
pub trait EventSink: Send {
    fn emit(&mut self, event: &RunEvent) -> RunnerResult<()>;

    fn flush(&mut self) -> RunnerResult<()>;
}

/// Encode one event as a server-sent-events frame.
///
/// No whitespace follows either field separator; strict streaming clients
/// parse `data:{...}` but not `data: {...}`.
pub fn encode_sse(event: &RunEvent) -> RunnerResult<String> {
    Ok(format!("event:{}\ndata:{}\n\n", event.name(), event.data()?))
}

/// Writes events as server-sent-events frames.
#[derive(Debug)]
pub struct SseWriter<W> {
    writer: W,
}

impl<W: Write + Send> SseWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> EventSink for SseWriter<W> {
    fn emit(&mut self, event: &RunEvent) -> RunnerResult<()> {
        let frame = encode_sse(event)?;
        self.writer
            .write_all(frame.as_bytes())
            .map_err(|err| RunnerError::io("failed to write event", err))
    }

    fn flush(&mut self) -> RunnerResult<()> {
        self.writer
            .flush()
            .map_err(|err| RunnerError::io("failed to flush events", err))
    }
}

/// Keeps events in memory.
#[derive(Clone, Debug, Default)]
pub struct CollectingSink {
    pub events: Vec<RunEvent>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Event names in emission order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events.iter().map(RunEvent::name).collect()
    }

    /// Text of every `log` event in order.
    pub fn log_lines(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                RunEvent::Log(log) => Some(log.line.clone()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn emit(&mut self, event: &RunEvent) -> RunnerResult<()> {
        self.events.push(event.clone());
        Ok(())
    }

    fn flush(&mut self) -> RunnerResult<()> {
        Ok(())
    }
}
