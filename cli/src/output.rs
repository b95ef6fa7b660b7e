//! Text and JSON rendering of command results.

use std::ops::Range;
use std::path::Path;

use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use serde::Serialize;

use evaluator::approval::{ApprovalRecord, DocumentApprovalRecord};
use evaluator::engine::{ApprovalChange, BlockStatus, BlockSummary, LoadedDocument, RunReport};
use evaluator::{Engine, EvalError};
use notebook::block::directive::Placement;

pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("error: cannot encode JSON output: {}", e),
    }
}

#[derive(Serialize)]
pub struct ErrorReport<'a> {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    block: Option<&'a str>,
}

impl<'a> ErrorReport<'a> {
    pub fn new(error: &'a EvalError) -> Self {
        ErrorReport {
            error: error.to_string(),
            block: error.block_name(),
        }
    }
}

#[derive(Serialize)]
pub struct Listing<'a> {
    file: &'a Path,
    blocks: Vec<BlockSummary>,
    warnings: Vec<String>,
}

impl<'a> Listing<'a> {
    pub fn new(doc: &'a LoadedDocument, blocks: Vec<BlockSummary>) -> Self {
        Listing {
            file: &doc.path,
            blocks,
            warnings: doc.warnings.iter().map(|w| w.to_string()).collect(),
        }
    }
}

#[derive(Serialize)]
pub struct Approvals<'a> {
    workspace: &'a Path,
    blocks: &'a [ApprovalRecord],
    documents: &'a [DocumentApprovalRecord],
}

impl<'a> Approvals<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Approvals {
            workspace: engine.workspace().root(),
            blocks: engine.store().block_approvals(),
            documents: engine.store().document_approvals(),
        }
    }
}

#[derive(Serialize)]
struct Changes<'a> {
    file: &'a Path,
    action: &'a str,
    changes: &'a [ApprovalChange],
}

pub fn print_run(report: &RunReport) {
    for block in &report.blocks {
        let label = block
            .name
            .clone()
            .unwrap_or_else(|| format!("line {}", block.line));
        let status = match block.status {
            BlockStatus::Succeeded => "ok",
            BlockStatus::Failed => "failed",
            BlockStatus::TimedOut => "timeout",
            BlockStatus::Skipped => "skipped",
            BlockStatus::Error => "error",
        };
        match block.elapsed_ms {
            Some(ms) => eprintln!("{:<8} {} ({}ms)", status, label, ms),
            None => eprintln!("{:<8} {}", status, label),
        }

        // `none` keeps results out of the document, so the terminal is the only place they land.
        if block.placement == Placement::None {
            if let Some(output) = &block.output {
                print!("{}", output);
            }
        }
        if let Some(error) = &block.error {
            eprintln!("         {}", error);
        }
    }

    if report.blocks.is_empty() {
        eprintln!("no eval blocks in {}", report.file.display());
    }
    for attachment in &report.attachments {
        eprintln!("wrote {}", attachment.display());
    }
    if report.patched {
        eprintln!("updated {}", report.file.display());
    }
}

pub fn print_list(blocks: &[BlockSummary]) {
    if blocks.is_empty() {
        println!("no eval blocks");
        return;
    }
    println!(
        "{:<6} {:<20} {:<12} {:<16} {}",
        "LINE", "NAME", "LANGUAGE", "RESULTS", "APPROVAL"
    );
    for block in blocks {
        let approval = match block.approval {
            Some(status) => status.to_string(),
            None => "needs a name".to_string(),
        };
        println!(
            "{:<6} {:<20} {:<12} {:<16} {}",
            block.line,
            block.name.as_deref().unwrap_or("-"),
            block.language,
            block.results,
            approval
        );
    }
}

pub fn print_changes(action: &str, file: &Path, changes: &[ApprovalChange], json: bool) {
    if json {
        print_json(&Changes {
            file,
            action,
            changes,
        });
        return;
    }
    if changes.is_empty() {
        println!("no named eval blocks in {}", file.display());
    }
    for change in changes {
        let subject = match &change.block {
            Some(name) => format!("block '{}'", name),
            None => format!("document {}", file.display()),
        };
        match (change.changed, change.mode) {
            (true, Some(mode)) => println!("{} {} ({})", action, subject, mode),
            (true, None) => println!("{} {}", action, subject),
            (false, _) => println!("no approval for {}", subject),
        }
    }
}

pub fn print_approvals(engine: &Engine) {
    let store = engine.store();
    if store.block_approvals().is_empty() && store.document_approvals().is_empty() {
        println!("no approvals in {}", engine.workspace().root().display());
        return;
    }
    for record in store.document_approvals() {
        println!(
            "{:<7} {} (document, {})",
            record.mode.to_string(),
            record.file_path.display(),
            record.approved_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    for record in store.block_approvals() {
        println!(
            "{:<7} {}#{} ({})",
            record.mode.to_string(),
            record.file_path.display(),
            record.block_name,
            record.approved_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
}

/// Print the document's scanner warnings as diagnostics.
pub fn emit_warnings(color: ColorChoice, doc: &LoadedDocument) {
    if doc.warnings.is_empty() {
        return;
    }
    let mut files = SimpleFiles::new();
    files.add(doc.path.display().to_string(), doc.text.clone());
    let diagnostics: Vec<_> = doc.warnings.iter().map(|w| w.to_diagnostic()).collect();
    emit(color, &files, &diagnostics);
}

/// Print `error`, pointing at the directive it concerns when it can be found.
pub fn emit_error(color: ColorChoice, file: Option<&Path>, error: &EvalError) {
    let located = file
        .and_then(|file| LoadedDocument::load(file).ok())
        .and_then(|doc| directive_span(&doc, error).map(|span| (doc, span)));

    let Some((doc, span)) = located else {
        eprintln!("error: {}", error);
        return;
    };

    let mut files = SimpleFiles::new();
    let file_id = files.add(doc.path.display().to_string(), doc.text.clone());
    let diagnostic = Diagnostic::error()
        .with_message(error.to_string())
        .with_labels(vec![Label::primary(file_id, span)]);
    emit(color, &files, &[diagnostic]);
}

fn directive_span(doc: &LoadedDocument, error: &EvalError) -> Option<Range<usize>> {
    let block = match error {
        EvalError::MissingName { line } => doc
            .notebook
            .evaluable()
            .find(|b| b.directive.as_ref().is_some_and(|d| d.line == *line)),
        EvalError::BlockNotFound { .. } => None,
        _ => doc.notebook.find(error.block_name()?),
    }?;
    block.directive.as_ref().map(|d| d.span.clone())
}

fn emit(color: ColorChoice, files: &SimpleFiles<String, String>, diagnostics: &[Diagnostic<usize>]) {
    let writer = StandardStream::stderr(color);
    let config = term::Config::default();
    for diagnostic in diagnostics {
        let _ = term::emit_to_write_style(&mut writer.lock(), &config, files, diagnostic);
    }
}
