// Test module - relaxed lint rules
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::indexing_slicing)]
#![allow(missing_docs)]

use blockrun::harvest::env::{
    capture_into_session, diff_env, is_excluded, merge_capture, parse_env_dump, read_capture,
    CapturedEnv,
};
use blockrun::harvest::SessionEnv;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

fn env_of(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

// ===== Dump parsing =====

#[test]
fn nul_delimited_dump_keeps_newlines_in_values() {
    let env = parse_env_dump("A=1\0MULTI=line one\nline two\0EMPTY=\0");
    assert_eq!(env["A"], "1");
    assert_eq!(env["MULTI"], "line one\nline two");
    assert_eq!(env["EMPTY"], "");
}

#[test]
fn newline_dump_treats_non_assignments_as_continuations() {
    let env = parse_env_dump("A=1\nMULTI=first\nsecond line\nB=x=y\n");
    assert_eq!(env["A"], "1");
    assert_eq!(env["MULTI"], "first\nsecond line");
    assert_eq!(env["B"], "x=y");
}

#[test]
fn empty_dump_parses_to_nothing() {
    assert!(parse_env_dump("").is_empty());
    assert!(parse_env_dump("\n\n").is_empty());
}

// ===== Diffing =====

#[test]
fn diff_reports_added_and_changed_only() {
    let before = env_of(&[("KEEP", "1"), ("CHANGE", "old"), ("GONE", "x")]);
    let after = env_of(&[("KEEP", "1"), ("CHANGE", "new"), ("ADDED", "y")]);
    let diff = diff_env(&before, &after);
    assert_eq!(diff, env_of(&[("ADDED", "y"), ("CHANGE", "new")]));
}

#[test]
fn diff_skips_shell_internals_and_wrapper_state() {
    let before = BTreeMap::new();
    let after = env_of(&[
        ("SHLVL", "2"),
        ("PWD", "/tmp"),
        ("_", "/usr/bin/env"),
        ("BASH_VERSINFO", "5"),
        ("__blockrun_status", "0"),
        ("RUNBOOK_OUTPUT", "/tmp/o"),
        ("GENERATED_FILES", "/tmp/f"),
        ("API_URL", "https://x.test"),
    ]);
    assert_eq!(diff_env(&before, &after), env_of(&[("API_URL", "https://x.test")]));
}

#[test]
fn exclusion_list() {
    assert!(is_excluded("OLDPWD"));
    assert!(is_excluded("BASH_ARGV"));
    assert!(!is_excluded("BASHFUL"));
    assert!(!is_excluded("HOME"));
}

// ===== Capture files =====

#[test]
fn read_capture_requires_a_dump() {
    let dir = tempfile::tempdir().unwrap();
    let env_path = dir.path().join("env");
    let pwd_path = dir.path().join("pwd");
    assert!(read_capture(&env_path, &pwd_path).unwrap().is_none());

    fs::write(&env_path, "").unwrap();
    assert!(read_capture(&env_path, &pwd_path).unwrap().is_none());

    fs::write(&env_path, "A=1\0").unwrap();
    fs::write(&pwd_path, "/srv/app\n").unwrap();
    let captured = read_capture(&env_path, &pwd_path).unwrap().unwrap();
    assert_eq!(captured.env["A"], "1");
    assert_eq!(captured.working_dir, Some(PathBuf::from("/srv/app")));
}

#[test]
fn capture_into_session_merges_diff_and_directory() {
    let dir = tempfile::tempdir().unwrap();
    let env_path = dir.path().join("env");
    let pwd_path = dir.path().join("pwd");
    fs::write(&env_path, "HOME=/home/u\0TOKEN=abc\0SHLVL=3\0").unwrap();
    fs::write(&pwd_path, "/srv/app").unwrap();

    let child_env = env_of(&[("HOME", "/home/u")]);
    let session = SessionEnv::new(child_env.clone(), PathBuf::from("/start"));
    let diff = capture_into_session(&env_path, &pwd_path, &child_env, &session)
        .unwrap()
        .unwrap();

    assert_eq!(diff, env_of(&[("TOKEN", "abc")]));
    assert_eq!(session.get("TOKEN").unwrap().as_deref(), Some("abc"));
    assert_eq!(session.get("SHLVL").unwrap(), None);
    assert_eq!(session.snapshot().unwrap().working_dir, Path::new("/srv/app"));
}

#[test]
fn missing_capture_leaves_session_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let session = SessionEnv::new(env_of(&[("A", "1")]), PathBuf::from("/start"));
    let merged = capture_into_session(
        &dir.path().join("env"),
        &dir.path().join("pwd"),
        &BTreeMap::new(),
        &session,
    )
    .unwrap();
    assert!(merged.is_none());
    assert_eq!(session.metadata().unwrap().execution_count, 0);
}

#[test]
fn merge_capture_keeps_working_dir_when_none_recorded() {
    let child_env = env_of(&[("A", "1")]);
    let session = SessionEnv::new(child_env.clone(), PathBuf::from("/start"));
    let captured = CapturedEnv {
        env: env_of(&[("A", "1"), ("B", "2")]),
        working_dir: None,
    };

    let diff = merge_capture(&captured, &child_env, &session).unwrap();

    assert_eq!(diff, env_of(&[("B", "2")]));
    assert_eq!(session.get("B").unwrap().as_deref(), Some("2"));
    assert_eq!(session.snapshot().unwrap().working_dir, Path::new("/start"));
    assert_eq!(session.metadata().unwrap().execution_count, 1);
}

// ===== Session store =====

#[test]
fn merge_never_removes_keys() {
    let session = SessionEnv::new(env_of(&[("A", "1"), ("B", "2")]), PathBuf::from("/"));
    session.merge(&env_of(&[("B", "3")]), None).unwrap();
    let snapshot = session.snapshot().unwrap();
    assert_eq!(snapshot.env, env_of(&[("A", "1"), ("B", "3")]));
}

#[test]
fn reset_restores_initial_state() {
    let session = SessionEnv::new(env_of(&[("A", "1")]), PathBuf::from("/start"));
    session
        .merge(&env_of(&[("A", "2"), ("NEW", "x")]), Some(Path::new("/elsewhere")))
        .unwrap();
    session.reset().unwrap();

    let snapshot = session.snapshot().unwrap();
    assert_eq!(snapshot.env, env_of(&[("A", "1")]));
    assert_eq!(snapshot.working_dir, PathBuf::from("/start"));
}

#[test]
fn metadata_counts_executions_without_values() {
    let session = SessionEnv::new(env_of(&[("SECRET", "hunter2")]), PathBuf::from("/w"));
    session.merge(&BTreeMap::new(), None).unwrap();
    session.merge(&BTreeMap::new(), None).unwrap();

    let metadata = session.metadata().unwrap();
    assert_eq!(metadata.execution_count, 2);
    assert_eq!(metadata.working_dir, PathBuf::from("/w"));

    let json = serde_json::to_string(&metadata).unwrap();
    assert!(json.contains("executionCount"));
    assert!(json.contains("lastActivity"));
    assert!(!json.contains("hunter2"));
}

#[test]
fn concurrent_merges_are_not_lost() {
    let session = Arc::new(SessionEnv::new(BTreeMap::new(), PathBuf::from("/")));
    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                for i in 0..25 {
                    let key = format!("W{worker}_{i}");
                    let diff = env_of(&[(key.as_str(), "v")]);
                    session.merge(&diff, None).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(session.snapshot().unwrap().env.len(), 200);
    assert_eq!(session.metadata().unwrap().execution_count, 200);
}
