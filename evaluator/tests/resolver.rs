#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use evaluator::EvalError;
use evaluator::resolver::{DEFAULT_PREFIX, EvaluatorHandle, Resolver, find_executable_in_dirs};

fn stub(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, "#!/bin/sh\ncat\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn resolver(dir: &Path) -> Resolver {
    Resolver::with_search_path(DEFAULT_PREFIX, vec![dir.to_path_buf()])
}

#[test]
fn external_evaluator_wins_over_builtin() {
    let dir = tempfile::tempdir().unwrap();
    stub(dir.path(), "python3");
    let external = stub(dir.path(), "jot-eval-python");

    let handle = resolver(dir.path()).resolve("python").unwrap();
    assert_eq!(handle, EvaluatorHandle::External { path: external });
    assert!(handle.base_args().is_empty());
}

#[test]
fn builtin_used_when_no_external_exists() {
    let dir = tempfile::tempdir().unwrap();
    let bash = stub(dir.path(), "bash");

    let handle = resolver(dir.path()).resolve("bash").unwrap();
    assert_eq!(
        handle,
        EvaluatorHandle::Builtin {
            command: bash,
            args: vec!["-s".to_string()],
        }
    );
}

#[test]
fn builtin_aliases_share_an_interpreter() {
    let dir = tempfile::tempdir().unwrap();
    let sh = stub(dir.path(), "sh");
    let node = stub(dir.path(), "node");
    let mut resolver = resolver(dir.path());

    assert_eq!(resolver.resolve("shell").unwrap().program(), sh);
    assert_eq!(resolver.resolve("sh").unwrap().program(), sh);
    assert_eq!(resolver.resolve("js").unwrap().program(), node);
    assert_eq!(resolver.resolve("JavaScript").unwrap().program(), node);
}

#[test]
fn unknown_language_lists_both_lookups() {
    let dir = tempfile::tempdir().unwrap();
    let err = resolver(dir.path()).resolve("nonexistent-lang").unwrap_err();

    assert!(matches!(&err, EvalError::EvaluatorNotFound { language, .. } if language == "nonexistent-lang"));
    let message = err.to_string();
    assert!(message.contains("jot-eval-nonexistent-lang"), "{}", message);
    assert!(message.contains("built-in"), "{}", message);
    assert!(message.contains("python"), "{}", message);
}

#[test]
fn missing_builtin_interpreter_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = resolver(dir.path()).resolve("ruby").unwrap_err();
    assert!(err.to_string().contains("not installed"), "{}", err);
}

#[test]
fn non_executable_files_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("jot-eval-lisp"), "#!/bin/sh\n").unwrap();
    assert!(resolver(dir.path()).resolve("lisp").is_err());
}

#[test]
fn hits_are_cached_for_the_resolver_lifetime() {
    let dir = tempfile::tempdir().unwrap();
    let path = stub(dir.path(), "jot-eval-lisp");
    let mut resolver = resolver(dir.path());

    let first = resolver.resolve("lisp").unwrap();
    fs::remove_file(&path).unwrap();
    assert_eq!(resolver.resolve("lisp").unwrap(), first);
}

#[test]
fn custom_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let path = stub(dir.path(), "run-lisp");
    let mut resolver = Resolver::with_search_path("run-", vec![dir.path().to_path_buf()]);
    assert_eq!(
        resolver.resolve("lisp").unwrap(),
        EvaluatorHandle::External { path }
    );
}

#[test]
fn find_executable_searches_in_order() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    stub(second.path(), "tool");
    let winner = stub(first.path(), "tool");

    let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
    assert_eq!(find_executable_in_dirs("tool", &dirs), Some(winner));
    assert_eq!(find_executable_in_dirs("", &dirs), None);
}
