// Test module - relaxed lint rules
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::indexing_slicing)]
#![allow(missing_docs)]

use blockrun::framer::{frame_all, LineFramer, OutputLine};
use proptest::prelude::*;

fn line(text: &str, replace: bool) -> OutputLine {
    OutputLine::new(text, replace)
}

// ===== Scenarios =====

#[test]
fn progress_bar_overwrites_are_flagged() {
    assert_eq!(
        frame_all(b"A\rB\rC\n"),
        vec![line("A", false), line("B", true), line("C", true)]
    );
}

#[test]
fn newline_after_progress_resets_replace() {
    assert_eq!(
        frame_all(b"10%\r50%\r100%\ndone\n"),
        vec![
            line("10%", false),
            line("50%", true),
            line("100%", true),
            line("done", false),
        ]
    );
}

#[test]
fn crlf_is_a_plain_newline() {
    assert_eq!(
        frame_all(b"one\r\ntwo\r\n"),
        vec![line("one", false), line("two", false)]
    );
}

#[test]
fn bare_carriage_returns_emit_nothing() {
    assert!(frame_all(b"\r\r\r").is_empty());
    assert!(frame_all(b"\n\n\r\n").is_empty());
}

#[test]
fn empty_lines_are_never_emitted() {
    assert_eq!(
        frame_all(b"a\n\n\nb\n"),
        vec![line("a", false), line("b", false)]
    );
}

#[test]
fn trailing_text_is_flushed_at_end_of_stream() {
    assert_eq!(
        frame_all(b"first\nno newline"),
        vec![line("first", false), line("no newline", false)]
    );
}

#[test]
fn trailing_text_after_carriage_return_keeps_replace() {
    assert_eq!(
        frame_all(b"step 1\rstep 2"),
        vec![line("step 1", false), line("step 2", true)]
    );
}

#[test]
fn carriage_return_at_end_of_stream_flushes_buffer() {
    assert_eq!(frame_all(b"abc\r"), vec![line("abc", false)]);
}

#[test]
fn ansi_sequences_are_preserved() {
    assert_eq!(
        frame_all(b"\x1b[32mok\x1b[0m\n"),
        vec![line("\x1b[32mok\x1b[0m", false)]
    );
}

#[test]
fn chunk_boundaries_do_not_change_framing() {
    let input = b"A\rB\r\nC\rD\n";
    let expected = frame_all(input);
    for split in 0..=input.len() {
        let mut framer = LineFramer::new();
        let mut lines = framer.push(&input[..split]);
        lines.extend(framer.push(&input[split..]));
        lines.extend(framer.finish());
        assert_eq!(lines, expected, "split at {split}");
    }
}

// ===== Properties =====

proptest! {
    #[test]
    fn newline_only_streams_split_exactly(
        parts in prop::collection::vec("[a-z0-9 ]{1,12}", 0..20)
    ) {
        let input = parts.iter().map(|p| format!("{p}\n")).collect::<String>();
        let lines = frame_all(input.as_bytes());
        let expected: Vec<OutputLine> = parts.iter().map(|p| line(p, false)).collect();
        prop_assert_eq!(lines, expected);
    }

    #[test]
    fn crlf_matches_lf(parts in prop::collection::vec("[a-z0-9]{0,8}(\r[a-z0-9]{1,8})?", 0..20)) {
        let lf = parts.join("\n");
        let crlf = parts.join("\r\n");
        prop_assert_eq!(frame_all(lf.as_bytes()), frame_all(crlf.as_bytes()));
    }

    #[test]
    fn no_emitted_line_is_empty(
        bytes in prop::collection::vec(prop::sample::select(vec![b'a', b'\r', b'\n']), 0..64)
    ) {
        prop_assert!(frame_all(&bytes).iter().all(|l| !l.text.is_empty()));
    }
}
