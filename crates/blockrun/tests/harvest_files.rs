// Test module - relaxed lint rules
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::indexing_slicing)]
#![allow(missing_docs)]

use blockrun::harvest::{build_file_tree, capture_files, language_for, OutputRoot};
use blockrun::{ErrorCode, NodeKind};
use std::fs;
use std::path::Path;

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

// ===== Capture =====

#[test]
fn captures_nested_files_preserving_layout() {
    let scratch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write(&scratch.path().join("report.txt"), "hello");
    write(&scratch.path().join("nested/deep/data.json"), "{}");

    let capture = capture_files(scratch.path(), out.path()).unwrap();

    assert!(capture.rejected.is_empty());
    let paths: Vec<_> = capture
        .captured
        .iter()
        .map(|file| file.relative_path.as_str())
        .collect();
    assert_eq!(paths, vec!["nested/deep/data.json", "report.txt"]);
    assert_eq!(capture.captured[1].name, "report.txt");
    assert_eq!(capture.captured[1].size, 5);
    assert_eq!(fs::read_to_string(out.path().join("report.txt")).unwrap(), "hello");
    assert_eq!(
        fs::read_to_string(out.path().join("nested/deep/data.json")).unwrap(),
        "{}"
    );
}

#[test]
fn empty_or_missing_scratch_captures_nothing() {
    let scratch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let root = out.path().join("never-created");

    assert!(capture_files(scratch.path(), &root).unwrap().is_empty());
    assert!(capture_files(&scratch.path().join("missing"), &root)
        .unwrap()
        .is_empty());
    assert!(!root.exists());
}

#[test]
fn overwrites_existing_destination() {
    let scratch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write(&out.path().join("a.txt"), "old");
    write(&scratch.path().join("a.txt"), "new");

    capture_files(scratch.path(), out.path()).unwrap();
    assert_eq!(fs::read_to_string(out.path().join("a.txt")).unwrap(), "new");
}

#[cfg(unix)]
#[test]
fn preserves_permission_bits() {
    use std::os::unix::fs::PermissionsExt;

    let scratch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let script = scratch.path().join("run.sh");
    write(&script, "#!/bin/sh\n");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    capture_files(scratch.path(), out.path()).unwrap();
    let mode = fs::metadata(out.path().join("run.sh"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[cfg(unix)]
#[test]
fn symlinks_are_rejected_and_others_proceed() {
    let scratch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let secret = tempfile::tempdir().unwrap();
    write(&secret.path().join("passwd"), "root:x");
    write(&scratch.path().join("ok.txt"), "fine");
    std::os::unix::fs::symlink(secret.path().join("passwd"), scratch.path().join("leak"))
        .unwrap();

    let capture = capture_files(scratch.path(), out.path()).unwrap();

    assert_eq!(capture.captured.len(), 1);
    assert_eq!(capture.captured[0].relative_path, "ok.txt");
    assert_eq!(capture.rejected.len(), 1);
    assert_eq!(capture.rejected[0].relative_path, "leak");
    assert!(!out.path().join("leak").exists());
}

#[cfg(unix)]
#[test]
fn symlinked_directory_in_output_root_is_not_followed() {
    let scratch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    std::os::unix::fs::symlink(outside.path(), out.path().join("planted")).unwrap();
    write(&scratch.path().join("planted/evil.txt"), "escape");
    write(&scratch.path().join("safe.txt"), "ok");

    let capture = capture_files(scratch.path(), out.path()).unwrap();

    assert_eq!(capture.captured.len(), 1);
    assert_eq!(capture.captured[0].relative_path, "safe.txt");
    assert_eq!(capture.rejected.len(), 1);
    assert_eq!(capture.rejected[0].relative_path, "planted/evil.txt");
    assert!(capture.rejected[0].reason.contains("outside the output root"));
    assert!(!outside.path().join("evil.txt").exists());
}

// ===== File tree =====

#[test]
fn tree_lists_folders_first_then_names() {
    let root = tempfile::tempdir().unwrap();
    write(&root.path().join("b.txt"), "b");
    write(&root.path().join("a.py"), "print(1)");
    write(&root.path().join("zeta/inner.tf"), "resource {}");
    write(&root.path().join("alpha/x.md"), "# x");
    write(&root.path().join(".hidden"), "secret");

    let tree = build_file_tree(root.path(), 1024).unwrap();
    let names: Vec<_> = tree.iter().map(|node| node.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "zeta", "a.py", "b.txt"]);

    assert_eq!(tree[0].kind, NodeKind::Folder);
    assert_eq!(tree[1].children[0].id, "zeta/inner.tf");
    let inner = tree[1].children[0].file.as_ref().unwrap();
    assert_eq!(inner.language, "hcl");
    assert_eq!(inner.content, "resource {}");

    let script = tree[2].file.as_ref().unwrap();
    assert_eq!(script.language, "python");
    assert_eq!(script.size, 8);
}

#[test]
fn tree_omits_content_of_large_or_binary_files() {
    let root = tempfile::tempdir().unwrap();
    write(&root.path().join("big.txt"), "0123456789");
    fs::write(root.path().join("blob.bin"), [0xff, 0xfe, 0x00]).unwrap();

    let tree = build_file_tree(root.path(), 4).unwrap();
    for node in &tree {
        let file = node.file.as_ref().unwrap();
        assert!(file.content.is_empty(), "{}", node.name);
    }
    assert_eq!(tree[0].file.as_ref().unwrap().size, 10);
}

#[test]
fn languages_by_extension_and_name() {
    assert_eq!(language_for("main.RS"), "rust");
    assert_eq!(language_for("deploy.sh"), "bash");
    assert_eq!(language_for("values.yml"), "yaml");
    assert_eq!(language_for("Dockerfile"), "dockerfile");
    assert_eq!(language_for("Makefile"), "makefile");
    assert_eq!(language_for("unknown.xyz"), "text");
    assert_eq!(language_for("README"), "text");
}

// ===== Output root management =====

#[test]
fn inspect_reports_existence_and_file_count() {
    let base = tempfile::tempdir().unwrap();
    let root = OutputRoot::new(base.path().join("out"));

    let report = root.inspect().unwrap();
    assert!(!report.exists);
    assert_eq!(report.file_count, 0);

    write(&base.path().join("out/a.txt"), "a");
    write(&base.path().join("out/nested/b.txt"), "b");
    let report = root.inspect().unwrap();
    assert!(report.exists);
    assert_eq!(report.file_count, 2);
}

#[test]
fn clear_removes_contents_but_keeps_root() {
    let base = tempfile::tempdir().unwrap();
    write(&base.path().join("out/a.txt"), "a");
    write(&base.path().join("out/nested/b.txt"), "b");

    let removed = OutputRoot::new("out").clear(base.path()).unwrap();

    assert_eq!(removed, 2);
    assert!(base.path().join("out").is_dir());
    assert_eq!(fs::read_dir(base.path().join("out")).unwrap().count(), 0);
}

#[test]
fn clear_refuses_roots_outside_base_or_system_directories() {
    let base = tempfile::tempdir().unwrap();

    let err = OutputRoot::new("../elsewhere").clear(base.path()).unwrap_err();
    assert_eq!(err.code, ErrorCode::PathDenied);

    let err = OutputRoot::new("/etc").clear(base.path()).unwrap_err();
    assert_eq!(err.code, ErrorCode::PathDenied);
}

#[test]
fn clear_of_missing_root_is_a_no_op() {
    let base = tempfile::tempdir().unwrap();
    assert_eq!(OutputRoot::new("absent").clear(base.path()).unwrap(), 0);
}
