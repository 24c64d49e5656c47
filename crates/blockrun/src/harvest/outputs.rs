//! Output Parser: `KEY=VALUE` lines from the outputs artifact.

use crate::error::{RunnerError, RunnerResult};
use crate::model::BlockOutputs;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Result of parsing an outputs artifact.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParsedOutputs {
    pub outputs: BlockOutputs,
    /// 1-based numbers of lines that were skipped.
    pub skipped_lines: Vec<usize>,
}

/// `^[A-Za-z_][A-Za-z0-9_]*$`
pub fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Parse artifact text. Lines are trimmed, blank lines ignored, the key is
/// everything before the first `=`. Later keys overwrite earlier ones.
pub fn parse_outputs(text: &str) -> ParsedOutputs {
    let mut parsed = ParsedOutputs::default();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let line_number = index + 1;
        let Some((key, value)) = line.split_once('=') else {
            tracing::warn!(line = line_number, content = line, "output line has no '='");
            parsed.skipped_lines.push(line_number);
            continue;
        };
        let key = key.trim();
        if !is_valid_key(key) {
            tracing::warn!(line = line_number, key, "invalid output key");
            parsed.skipped_lines.push(line_number);
            continue;
        }
        parsed.outputs.insert(key.to_string(), value.to_string());
    }
    parsed
}

/// Read and parse the artifact. `Ok(None)` when the script never wrote it.
pub fn read_outputs(path: &Path) -> RunnerResult<Option<ParsedOutputs>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(parse_outputs(&String::from_utf8_lossy(&bytes)))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(RunnerError::io("failed to read outputs file", err)),
    }
}
