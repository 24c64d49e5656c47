// Test module - relaxed lint rules
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::indexing_slicing)]
#![allow(missing_docs)]

use blockrun::guard::{
    contains_traversal, is_absolute, is_contained_in, is_system_directory, resolve_within,
    validate_output_root, validate_relative, validate_relative_or_default, PathError,
};
use blockrun::{ErrorCode, RunnerError};
use std::path::{Path, PathBuf};

// ===== Relative path validation =====

#[test]
fn accepts_plain_relative_paths() {
    validate_relative("a/b/c").unwrap();
    validate_relative("report.txt").unwrap();
    validate_relative("./nested/file").unwrap();
}

#[test]
fn rejects_absolute_paths() {
    assert_eq!(
        validate_relative("/a").unwrap_err(),
        PathError::Absolute("/a".to_string())
    );
    assert!(matches!(
        validate_relative("\\server\\share").unwrap_err(),
        PathError::Absolute(_)
    ));
}

#[test]
fn rejects_drive_letter_paths() {
    assert!(is_absolute("C:\\Windows"));
    assert!(is_absolute("d:/data"));
    assert!(matches!(
        validate_relative("C:\\temp").unwrap_err(),
        PathError::Absolute(_)
    ));
}

#[test]
fn rejects_parent_segments() {
    assert!(matches!(
        validate_relative("../a").unwrap_err(),
        PathError::Traversal(_)
    ));
    assert!(matches!(
        validate_relative("a/../../b").unwrap_err(),
        PathError::Traversal(_)
    ));
    assert!(matches!(
        validate_relative("a\\..\\b").unwrap_err(),
        PathError::Traversal(_)
    ));
}

#[test]
fn dots_inside_names_are_not_traversal() {
    assert!(!contains_traversal("foo..bar"));
    assert!(!contains_traversal("..hidden/x"));
    assert!(!contains_traversal("a/b.."));
    validate_relative("foo..bar").unwrap();
}

#[test]
fn empty_path_only_valid_as_default() {
    assert_eq!(validate_relative("").unwrap_err(), PathError::Empty);
    validate_relative_or_default("").unwrap();
    assert!(validate_relative_or_default("/etc").is_err());
}

// ===== Containment =====

#[test]
fn containment_compares_segments_not_prefixes() {
    assert!(!is_contained_in(Path::new("/output"), Path::new("/out")));
    assert!(!is_contained_in(Path::new("/output/file"), Path::new("/out")));
    assert!(is_contained_in(Path::new("/out/file"), Path::new("/out")));
    assert!(is_contained_in(Path::new("/out"), Path::new("/out")));
}

#[test]
fn containment_normalizes_before_comparing() {
    assert!(!is_contained_in(Path::new("/out/../etc"), Path::new("/out")));
    assert!(is_contained_in(Path::new("/out/./a/../b"), Path::new("/out/")));
}

#[test]
fn resolve_within_accepts_paths_that_stay_inside() {
    assert_eq!(
        resolve_within(Path::new("/out"), "a/b/c").unwrap(),
        PathBuf::from("/out/a/b/c")
    );
    assert_eq!(
        resolve_within(Path::new("/out"), "a/../b").unwrap(),
        PathBuf::from("/out/b")
    );
}

#[test]
fn resolve_within_rejects_escapes() {
    assert!(matches!(
        resolve_within(Path::new("/out"), "a/../../b").unwrap_err(),
        PathError::Escapes { .. }
    ));
    assert!(matches!(
        resolve_within(Path::new("/out"), "../a").unwrap_err(),
        PathError::Escapes { .. }
    ));
    assert!(matches!(
        resolve_within(Path::new("/out"), "/a").unwrap_err(),
        PathError::Absolute(_)
    ));
    assert_eq!(
        resolve_within(Path::new("/out"), "").unwrap_err(),
        PathError::Empty
    );
}

// ===== System directories =====

#[test]
fn system_directories_are_recognized() {
    for dir in ["/", "/etc", "/usr/", "/home", "/var", "/root"] {
        assert!(is_system_directory(Path::new(dir)), "{dir}");
    }
    assert!(is_system_directory(Path::new("C:\\")));
    assert!(is_system_directory(Path::new("C:\\Windows")));
    assert!(is_system_directory(Path::new("c:/Program Files")));
    assert!(!is_system_directory(Path::new("/home/user/project/out")));
    assert!(!is_system_directory(Path::new("/etc/../srv/out")));
}

#[test]
fn output_root_must_stay_inside_base() {
    let base = Path::new("/work/project");
    assert_eq!(
        validate_output_root(Path::new("generated"), base).unwrap(),
        PathBuf::from("/work/project/generated")
    );
    assert!(matches!(
        validate_output_root(Path::new("../other"), base).unwrap_err(),
        PathError::Escapes { .. }
    ));
    assert!(matches!(
        validate_output_root(Path::new("/etc"), base).unwrap_err(),
        PathError::SystemDirectory(_)
    ));
}

#[test]
fn path_errors_convert_to_path_denied() {
    let err: RunnerError = validate_relative("../x").unwrap_err().into();
    assert_eq!(err.code, ErrorCode::PathDenied);
    assert!(err.message.contains("'..'"));
    assert_eq!(err.context.unwrap()["path"], "../x");
}
