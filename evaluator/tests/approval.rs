use std::fs;
use std::path::Path;

use evaluator::EvalError;
use evaluator::approval::{
    ApprovalMode, ApprovalStatus, ApprovalStore, BLOCKS_FILE, FixedAnswer, content_hash,
};
use notebook::block::CodeBlock;

const FILE: &str = "/notes/doc.md";

fn block(doc: &str) -> CodeBlock {
    notebook::scan(doc)
        .into_iter()
        .find(|b| b.directive.is_some())
        .expect("eval block in document")
}

fn named(name: &str, body: &str) -> CodeBlock {
    block(&format!(
        "<eval name=\"{}\" />\n```bash\n{}\n```\n",
        name, body
    ))
}

fn open(data_dir: &Path) -> ApprovalStore {
    ApprovalStore::open(data_dir).expect("open store")
}

#[test]
fn unknown_block_requires_approval() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join(".jot"));
    let status = store
        .check_approval(Path::new(FILE), &named("x", "echo hi"), None)
        .unwrap();
    assert_eq!(status, ApprovalStatus::Required);
    assert!(!status.is_approved());
}

#[test]
fn editing_a_hash_approved_block_goes_stale_but_keeps_the_record() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join(".jot");
    let file = Path::new(FILE);

    let mut store = open(&data);
    store
        .approve_block(file, &named("x", "echo hi"), ApprovalMode::Hash)
        .unwrap();
    assert_eq!(
        store.check_approval(file, &named("x", "echo hi"), None).unwrap(),
        ApprovalStatus::Hash
    );

    let edited = named("x", "echo bye");
    let status = store.check_approval(file, &edited, None).unwrap();
    assert_eq!(status, ApprovalStatus::Stale);
    assert!(matches!(
        status.to_error(file, "x"),
        Some(EvalError::ApprovalStale { .. })
    ));
    assert!(store.block_approval(file, "x").is_some());

    let reopened = open(&data);
    assert_eq!(
        reopened.check_approval(file, &edited, None).unwrap(),
        ApprovalStatus::Stale
    );
}

#[test]
fn approvals_are_per_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open(&dir.path().join(".jot"));
    store
        .approve_block(Path::new(FILE), &named("x", "echo"), ApprovalMode::Hash)
        .unwrap();
    assert_eq!(
        store
            .check_approval(Path::new("/notes/other.md"), &named("x", "echo"), None)
            .unwrap(),
        ApprovalStatus::Required
    );
}

#[test]
fn document_always_approves_every_named_block() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open(&dir.path().join(".jot"));
    let file = Path::new(FILE);
    store.approve_document(file, ApprovalMode::Always).unwrap();

    for name in ["a", "b", "c"] {
        assert_eq!(
            store.check_approval(file, &named(name, "rm -rf /tmp/x"), None).unwrap(),
            ApprovalStatus::Document
        );
    }
}

#[test]
fn document_hash_grant_defers_to_block_records() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open(&dir.path().join(".jot"));
    let file = Path::new(FILE);
    store.approve_document(file, ApprovalMode::Hash).unwrap();

    assert_eq!(
        store.check_approval(file, &named("a", "echo"), None).unwrap(),
        ApprovalStatus::Required
    );
}

#[test]
fn prompt_mode_asks_every_time() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open(&dir.path().join(".jot"));
    let file = Path::new(FILE);
    let b = named("p", "echo hi");
    store.approve_block(file, &b, ApprovalMode::Prompt).unwrap();

    assert_eq!(
        store.check_approval(file, &b, None).unwrap(),
        ApprovalStatus::NeedsConfirmation
    );
    assert_eq!(
        store
            .check_approval(file, &b, Some(&mut FixedAnswer(true)))
            .unwrap(),
        ApprovalStatus::Confirmed
    );
    assert_eq!(
        store
            .check_approval(file, &b, Some(&mut FixedAnswer(false)))
            .unwrap(),
        ApprovalStatus::Declined
    );
}

#[test]
fn always_mode_ignores_content_changes() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open(&dir.path().join(".jot"));
    let file = Path::new(FILE);
    store
        .approve_block(file, &named("a", "echo 1"), ApprovalMode::Always)
        .unwrap();
    assert_eq!(
        store.check_approval(file, &named("a", "echo 2"), None).unwrap(),
        ApprovalStatus::Always
    );
}

#[test]
fn unnamed_directive_cannot_be_checked_or_approved() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open(&dir.path().join(".jot"));
    let b = block("<eval shell=\"bash\" />\n```bash\necho\n```\n");

    assert!(matches!(
        store.check_approval(Path::new(FILE), &b, None),
        Err(EvalError::MissingName { line: 1 })
    ));
    assert!(matches!(
        store.approve_block(Path::new(FILE), &b, ApprovalMode::Hash),
        Err(EvalError::MissingName { .. })
    ));
}

#[test]
fn corrupt_file_fails_closed_and_is_kept_aside() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join(".jot");
    fs::create_dir_all(&data).unwrap();
    fs::write(data.join(BLOCKS_FILE), "{ not json").unwrap();

    let mut store = open(&data);
    let file = Path::new(FILE);
    assert_eq!(
        store.check_approval(file, &named("x", "echo"), None).unwrap(),
        ApprovalStatus::Required
    );

    store
        .approve_block(file, &named("x", "echo"), ApprovalMode::Hash)
        .unwrap();
    assert_eq!(
        fs::read_to_string(data.join("eval_approvals.json.corrupt")).unwrap(),
        "{ not json"
    );
    assert_eq!(open(&data).block_approvals().len(), 1);
}

#[test]
fn records_are_saved_as_json_arrays() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join(".jot");
    let mut store = open(&data);
    store
        .approve_block(Path::new(FILE), &named("x", "echo hi"), ApprovalMode::Hash)
        .unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(data.join(BLOCKS_FILE)).unwrap()).unwrap();
    let records = json.as_array().expect("array");
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record["block_name"], "x");
    assert_eq!(record["mode"], "hash");
    assert_eq!(record["file_path"], FILE);
    assert_eq!(
        record["hash"],
        content_hash(&["echo hi".to_string()]).as_str()
    );
    assert!(record["approved_at"].is_string());
    assert!(!data.join(".eval_approvals.json.tmp").exists());
}

#[test]
fn reapproving_replaces_the_record() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open(&dir.path().join(".jot"));
    let file = Path::new(FILE);
    store
        .approve_block(file, &named("x", "echo 1"), ApprovalMode::Hash)
        .unwrap();
    store
        .approve_block(file, &named("x", "echo 2"), ApprovalMode::Hash)
        .unwrap();

    assert_eq!(store.block_approvals().len(), 1);
    assert_eq!(
        store.check_approval(file, &named("x", "echo 2"), None).unwrap(),
        ApprovalStatus::Hash
    );
}

#[test]
fn revoke_reports_whether_anything_was_removed() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open(&dir.path().join(".jot"));
    let file = Path::new(FILE);
    store
        .approve_block(file, &named("x", "echo"), ApprovalMode::Hash)
        .unwrap();
    store.approve_document(file, ApprovalMode::Always).unwrap();

    assert!(store.revoke_block(file, "x").unwrap());
    assert!(!store.revoke_block(file, "x").unwrap());
    assert!(store.revoke_document(file).unwrap());
    assert!(!store.revoke_document(file).unwrap());
    assert_eq!(
        store.check_approval(file, &named("x", "echo"), None).unwrap(),
        ApprovalStatus::Required
    );
}

#[test]
fn content_hash_is_hex_sha256_of_joined_lines() {
    let hash = content_hash(&["a".to_string(), "b".to_string()]);
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(hash, content_hash(&["a".to_string(), "b".to_string()]));
    assert_ne!(hash, content_hash(&["a b".to_string()]));
    assert_eq!(
        content_hash(&[]),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[test]
fn approval_modes_parse_case_insensitively() {
    assert_eq!("ALWAYS".parse::<ApprovalMode>(), Ok(ApprovalMode::Always));
    assert_eq!("prompt".parse::<ApprovalMode>(), Ok(ApprovalMode::Prompt));
    assert!("trust".parse::<ApprovalMode>().is_err());
}
