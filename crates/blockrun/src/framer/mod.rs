//! Byte-to-line framing with carriage-return overwrite tracking.
//!
//! [`LineFramer`] turns the raw output of a process into [`OutputLine`]s.
//! A bare `\r` marks the next line as an overwrite of the previous one so a
//! client can redraw progress bars in place; `\n` and `\r\n` start a fresh
//! line. ANSI escape sequences pass through untouched. Use [`strip_ansi`]
//! where plain text is needed.
//!
//! The framer is incremental: chunks may split lines, UTF-8 sequences, or a
//! `\r\n` pair at any byte boundary.

use regex::Regex;
use std::sync::OnceLock;

/// One logical line of output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputLine {
    pub text: String,
    /// The client should overwrite the previously emitted line.
    pub replace: bool,
}

impl OutputLine {
    pub fn new(text: impl Into<String>, replace: bool) -> Self {
        Self {
            text: text.into(),
            replace,
        }
    }
}

/// Stateful framer. Feed it chunks with [`push`](Self::push), then call
/// [`finish`](Self::finish) at end of stream.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
    pending_replace: bool,
    // A `\r` was the last byte seen; whether it starts `\r\n` is unknown yet.
    pending_cr: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return the lines it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<OutputLine> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == b'\n' {
                    self.newline(&mut lines);
                    continue;
                }
                self.overwrite(&mut lines);
            }
            match byte {
                b'\n' => self.newline(&mut lines),
                b'\r' => self.pending_cr = true,
                other => self.buffer.push(other),
            }
        }
        lines
    }

    /// Flush whatever is buffered at end of stream.
    pub fn finish(mut self) -> Option<OutputLine> {
        let mut lines = Vec::new();
        if self.pending_cr {
            self.overwrite(&mut lines);
        }
        if let Some(line) = self.take_line() {
            lines.push(line);
        }
        lines.pop()
    }

    fn newline(&mut self, lines: &mut Vec<OutputLine>) {
        if let Some(line) = self.take_line() {
            lines.push(line);
        }
        self.pending_replace = false;
    }

    fn overwrite(&mut self, lines: &mut Vec<OutputLine>) {
        if let Some(line) = self.take_line() {
            lines.push(line);
        }
        self.pending_replace = true;
    }

    fn take_line(&mut self) -> Option<OutputLine> {
        if self.buffer.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.buffer);
        Some(OutputLine {
            text: String::from_utf8_lossy(&bytes).into_owned(),
            replace: self.pending_replace,
        })
    }
}

/// Frame a complete byte sequence in one call.
pub fn frame_all(bytes: &[u8]) -> Vec<OutputLine> {
    let mut framer = LineFramer::new();
    let mut lines = framer.push(bytes);
    lines.extend(framer.finish());
    lines
}

// CSI with parameter/intermediate/final bytes, OSC up to BEL or ST (or
// unterminated), charset designation, single-letter escapes. The group is
// optional so a lone ESC is removed too.
const ANSI_PATTERN: &str =
    r"\x1b(?:\[[0-?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\)?|[()*+\-./][0-~]?|[a-zA-Z78=>])?";

fn ansi_regex() -> Option<&'static Regex> {
    static ANSI: OnceLock<Option<Regex>> = OnceLock::new();
    ANSI.get_or_init(|| Regex::new(ANSI_PATTERN).ok()).as_ref()
}

/// Remove terminal escape sequences, leaving printable text intact.
///
/// Idempotent: the result never contains an ESC byte.
pub fn strip_ansi(text: &str) -> String {
    if !text.contains('\x1b') {
        return text.to_string();
    }
    match ansi_regex() {
        Some(regex) => regex.replace_all(text, "").into_owned(),
        None => text.replace('\x1b', ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_split_across_chunks_is_a_newline() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"one\r").is_empty());
        let lines = framer.push(b"\ntwo");
        assert_eq!(lines, vec![OutputLine::new("one", false)]);
        assert_eq!(framer.finish(), Some(OutputLine::new("two", false)));
    }

    #[test]
    fn utf8_split_across_chunks_survives() {
        let bytes = "héllo\n".as_bytes();
        let mut framer = LineFramer::new();
        let mut lines = framer.push(&bytes[..2]);
        lines.extend(framer.push(&bytes[2..]));
        assert_eq!(lines, vec![OutputLine::new("héllo", false)]);
    }
}
