// Test module - relaxed lint rules
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::indexing_slicing)]
#![allow(missing_docs)]

use blockrun::harvest::outputs::is_valid_key;
use blockrun::harvest::{parse_outputs, read_outputs};
use std::fs;

#[test]
fn parses_simple_pairs() {
    let parsed = parse_outputs("FOO=bar\nCOUNT=3\n");
    assert_eq!(parsed.outputs.len(), 2);
    assert_eq!(parsed.outputs["FOO"], "bar");
    assert_eq!(parsed.outputs["COUNT"], "3");
    assert!(parsed.skipped_lines.is_empty());
}

#[test]
fn value_keeps_everything_after_first_equals() {
    let parsed = parse_outputs("URL=https://x.test/?a=b&c=d\nEMPTY=\n");
    assert_eq!(parsed.outputs["URL"], "https://x.test/?a=b&c=d");
    assert_eq!(parsed.outputs["EMPTY"], "");
}

#[test]
fn lines_are_trimmed_and_blank_lines_ignored() {
    let parsed = parse_outputs("\n   KEY = value  \n\n\r\nOTHER=x\r\n");
    assert_eq!(parsed.outputs["KEY"], " value");
    assert_eq!(parsed.outputs["OTHER"], "x");
    assert!(parsed.skipped_lines.is_empty());
}

#[test]
fn invalid_lines_are_skipped_with_their_numbers() {
    let parsed = parse_outputs("GOOD=1\nno equals here\n1BAD=2\nBAD-KEY=3\n=4\nALSO_GOOD=5\n");
    assert_eq!(parsed.outputs.len(), 2);
    assert_eq!(parsed.outputs["GOOD"], "1");
    assert_eq!(parsed.outputs["ALSO_GOOD"], "5");
    assert_eq!(parsed.skipped_lines, vec![2, 3, 4, 5]);
}

#[test]
fn later_keys_overwrite_earlier() {
    let parsed = parse_outputs("A=1\nA=2\n");
    assert_eq!(parsed.outputs["A"], "2");
}

#[test]
fn key_validation() {
    assert!(is_valid_key("_private"));
    assert!(is_valid_key("Mixed_Case9"));
    assert!(!is_valid_key(""));
    assert!(!is_valid_key("9lives"));
    assert!(!is_valid_key("with space"));
    assert!(!is_valid_key("dash-ed"));
}

#[test]
fn missing_artifact_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(read_outputs(&dir.path().join("outputs")).unwrap().is_none());
}

#[test]
fn empty_artifact_parses_to_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outputs");
    fs::write(&path, "").unwrap();
    let parsed = read_outputs(&path).unwrap().unwrap();
    assert!(parsed.outputs.is_empty());
}

#[test]
fn invalid_utf8_is_read_lossily() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outputs");
    fs::write(&path, b"NAME=caf\xe9\nOK=yes\n").unwrap();
    let parsed = read_outputs(&path).unwrap().unwrap();
    assert_eq!(parsed.outputs["OK"], "yes");
    assert!(parsed.outputs["NAME"].starts_with("caf"));
}
