//! One evaluation session over a workspace: scan, gate, run, patch.
//!
//! Blocks run one at a time in document order. The document is rewritten once,
//! after every result has been rendered, and only if at least one result
//! writes to it.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notebook::Notebook;
use notebook::block::CodeBlock;
use notebook::block::directive::{Placement, ResultFormat};
use notebook::parser::Scanner;
use notebook::parser::error::ScanWarning;
use notebook::patch;
use notebook::results::{EvalResult, file_target};
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::approval::{ApprovalMode, ApprovalStatus, ApprovalStore, Confirm};
use crate::config::Config;
use crate::error::EvalError;
use crate::executor::{self, ExecParams, Execution, Outcome};
use crate::resolver::{EvaluatorHandle, Resolver};
use crate::workspace::{CONFIG_FILE, Workspace, write_atomic};

/// A markdown file read from disk and scanned.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// Canonical absolute path; approvals are keyed by it.
    pub path: PathBuf,
    pub text: String,
    pub notebook: Notebook,
    pub warnings: Vec<ScanWarning>,
}

impl LoadedDocument {
    pub fn load(file: &Path) -> Result<Self, EvalError> {
        let read_error = |source| EvalError::Document {
            action: "read",
            path: file.to_path_buf(),
            source,
        };
        let path = fs::canonicalize(file).map_err(read_error)?;
        let text = fs::read_to_string(&path).map_err(read_error)?;
        let (notebook, warnings) = Scanner::new(&text, 0).scan();
        debug!(
            path = %path.display(),
            blocks = notebook.blocks.len(),
            warnings = warnings.len(),
            "scanned document"
        );
        Ok(LoadedDocument {
            path,
            text,
            notebook,
            warnings,
        })
    }

    /// Directory relative paths in the document resolve against.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("/"))
    }

    pub fn find(&self, name: &str) -> Result<&CodeBlock, EvalError> {
        self.notebook
            .find(name)
            .ok_or_else(|| EvalError::BlockNotFound {
                file: self.path.clone(),
                name: name.to_string(),
            })
    }
}

/// Which blocks a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// One block by name. Approval and resolution failures abort the run.
    Named(String),
    /// Every evaluable block that is approved. Others are skipped and reported.
    AllApproved,
}

/// What an approve or revoke call applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Block(String),
    Document,
    /// Every named block currently in the document.
    AllBlocks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Succeeded,
    Failed,
    TimedOut,
    /// Not approved; never started.
    Skipped,
    /// Approved but could not be started.
    Error,
}

#[derive(Debug, Serialize)]
pub struct BlockReport {
    pub name: Option<String>,
    pub line: usize,
    pub language: String,
    pub placement: Placement,
    pub status: BlockStatus,
    /// Captured output. Dropped for `silent` blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(
        serialize_with = "display_error",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<EvalError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u128>,
}

impl BlockReport {
    fn new(block: &CodeBlock, status: BlockStatus) -> Self {
        BlockReport {
            name: block.name().map(str::to_string),
            line: block.start_line,
            language: block.evaluator_language().to_string(),
            placement: block
                .directive
                .as_ref()
                .map(|d| d.results().placement)
                .unwrap_or_default(),
            status,
            output: None,
            error: None,
            elapsed_ms: None,
        }
    }
}

fn display_error<S: Serializer>(error: &Option<EvalError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => s.serialize_str(&error.to_string()),
        None => s.serialize_none(),
    }
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub file: PathBuf,
    pub blocks: Vec<BlockReport>,
    /// Whether the document was rewritten.
    pub patched: bool,
    /// Files written next to the document.
    pub attachments: Vec<PathBuf>,
}

impl RunReport {
    /// True when any block failed, timed out, could not start, or was skipped
    /// for lack of approval. Blocks that did run are still patched in.
    pub fn has_failures(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| b.status != BlockStatus::Succeeded)
    }
}

/// One evaluable block as shown by `list`.
#[derive(Debug, Clone, Serialize)]
pub struct BlockSummary {
    pub name: Option<String>,
    pub line: usize,
    pub language: String,
    /// `None` for unnamed blocks, which cannot be approved.
    pub approval: Option<ApprovalStatus>,
    pub results: String,
}

/// The outcome of one approve or revoke.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalChange {
    /// Block name, or `None` for the document grant.
    pub block: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ApprovalMode>,
    /// False when a revoke found nothing to remove.
    pub changed: bool,
}

/// Owns the per-invocation state: approval store, resolver cache, confirmer.
pub struct Engine {
    workspace: Workspace,
    config: Config,
    store: ApprovalStore,
    resolver: Resolver,
    confirm: Option<Box<dyn Confirm>>,
    default_timeout: Option<Duration>,
}

impl Engine {
    /// Load config and approvals for `workspace`.
    pub fn open(workspace: Workspace) -> Result<Self, EvalError> {
        let config = workspace.config()?;
        let default_timeout =
            config.default_timeout(&workspace.data_dir().join(CONFIG_FILE))?;
        let store = ApprovalStore::open(&workspace.data_dir())?;
        let resolver = Resolver::new(config.eval.evaluator_prefix.clone());
        Ok(Engine {
            workspace,
            config,
            store,
            resolver,
            confirm: None,
            default_timeout,
        })
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Confirmer consulted for `prompt` records. Without one they never pass.
    pub fn with_confirm(mut self, confirm: Box<dyn Confirm>) -> Self {
        self.confirm = Some(confirm);
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ApprovalStore {
        &self.store
    }

    /// Evaluable blocks of `doc` with their approval status. Never prompts.
    pub fn list(&self, doc: &LoadedDocument) -> Vec<BlockSummary> {
        doc.notebook
            .evaluable()
            .map(|block| BlockSummary {
                name: block.name().map(str::to_string),
                line: block.start_line,
                language: block.evaluator_language().to_string(),
                approval: self.store.check_approval(&doc.path, block, None).ok(),
                results: block
                    .directive
                    .as_ref()
                    .map(|d| {
                        let spec = d.results();
                        format!("{} {}", spec.format, spec.placement)
                    })
                    .unwrap_or_default(),
            })
            .collect()
    }

    pub fn run(&mut self, file: &Path, selection: &Selection) -> Result<RunReport, EvalError> {
        let doc = LoadedDocument::load(file)?;
        let mut reports = Vec::new();
        let mut results = Vec::new();

        match selection {
            Selection::Named(name) => {
                let block = doc.find(name)?.clone();
                let (report, result) = self.run_approved(&doc, &block)?;
                reports.push(report);
                results.push(result);
            }
            Selection::AllApproved => {
                let blocks: Vec<CodeBlock> = doc.notebook.evaluable().cloned().collect();
                for block in &blocks {
                    match self.run_approved(&doc, block) {
                        Ok((report, result)) => {
                            reports.push(report);
                            results.push(result);
                        }
                        Err(error) => {
                            let status = if error.is_approval()
                                || matches!(error, EvalError::MissingName { .. })
                            {
                                BlockStatus::Skipped
                            } else {
                                BlockStatus::Error
                            };
                            info!(block = %block.label(), %error, "not running block");
                            let mut report = BlockReport::new(block, status);
                            report.error = Some(error);
                            reports.push(report);
                        }
                    }
                }
            }
        }

        let (patched, attachments) = self.write_results(&doc, &results)?;
        Ok(RunReport {
            file: doc.path,
            blocks: reports,
            patched,
            attachments,
        })
    }

    /// Gate, resolve and execute one block. Errors mean the block never ran.
    fn run_approved(
        &mut self,
        doc: &LoadedDocument,
        block: &CodeBlock,
    ) -> Result<(BlockReport, EvalResult), EvalError> {
        let status = self.check(&doc.path, block)?;
        if let Some(error) = status.to_error(&doc.path, &block.label()) {
            return Err(error);
        }
        check_file_target(block)?;
        let handle = self.resolver.resolve(block.evaluator_language())?;
        let params = ExecParams::from_block(block, doc.dir(), self.default_timeout)?;
        run_block(block, &handle, &params)
    }

    fn check(&mut self, file: &Path, block: &CodeBlock) -> Result<ApprovalStatus, EvalError> {
        let confirm = self
            .confirm
            .as_mut()
            .map(|c| &mut **c as &mut dyn Confirm);
        self.store.check_approval(file, block, confirm)
    }

    /// Patch the document with `results`, writing attachments first.
    fn write_results(
        &self,
        doc: &LoadedDocument,
        results: &[EvalResult],
    ) -> Result<(bool, Vec<PathBuf>), EvalError> {
        let patched = patch::patch(&doc.text, results)?;
        if patched.applied == 0 {
            debug!(path = %doc.path.display(), "no results to write");
            return Ok((false, Vec::new()));
        }

        let mut written = Vec::new();
        for attachment in &patched.attachments {
            let path = doc.dir().join(&attachment.path);
            let write_error = |source| EvalError::Document {
                action: "write",
                path: path.clone(),
                source,
            };
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(write_error)?;
            }
            write_atomic(&path, attachment.contents.as_bytes()).map_err(write_error)?;
            debug!(path = %path.display(), "wrote attachment");
            written.push(path);
        }

        let changed = patched.text != doc.text;
        if changed {
            write_atomic(&doc.path, patched.text.as_bytes()).map_err(|source| {
                EvalError::Document {
                    action: "write",
                    path: doc.path.clone(),
                    source,
                }
            })?;
            info!(path = %doc.path.display(), results = patched.applied, "patched document");
        }
        Ok((changed, written))
    }

    pub fn approve(
        &mut self,
        file: &Path,
        target: &Target,
        mode: Option<ApprovalMode>,
    ) -> Result<Vec<ApprovalChange>, EvalError> {
        let mode = mode.unwrap_or(self.config.eval.default_mode);
        let doc = LoadedDocument::load(file)?;

        match target {
            Target::Document => {
                self.store.approve_document(&doc.path, mode)?;
                Ok(vec![ApprovalChange {
                    block: None,
                    mode: Some(mode),
                    changed: true,
                }])
            }
            Target::Block(name) => {
                let block = doc.find(name)?;
                self.store.approve_block(&doc.path, block, mode)?;
                Ok(vec![ApprovalChange {
                    block: Some(name.clone()),
                    mode: Some(mode),
                    changed: true,
                }])
            }
            Target::AllBlocks => {
                let mut changes = Vec::new();
                for block in doc.notebook.evaluable() {
                    let Some(name) = block.name() else {
                        warn!(line = block.start_line, "skipping unnamed eval block");
                        continue;
                    };
                    self.store.approve_block(&doc.path, block, mode)?;
                    changes.push(ApprovalChange {
                        block: Some(name.to_string()),
                        mode: Some(mode),
                        changed: true,
                    });
                }
                Ok(changes)
            }
        }
    }

    /// Remove grants. Revoking a block name that is no longer in the document
    /// still removes its record.
    pub fn revoke(&mut self, file: &Path, target: &Target) -> Result<Vec<ApprovalChange>, EvalError> {
        let path = fs::canonicalize(file).map_err(|source| EvalError::Document {
            action: "read",
            path: file.to_path_buf(),
            source,
        })?;

        let names: Vec<String> = match target {
            Target::Document => {
                let changed = self.store.revoke_document(&path)?;
                return Ok(vec![ApprovalChange {
                    block: None,
                    mode: None,
                    changed,
                }]);
            }
            Target::Block(name) => vec![name.clone()],
            Target::AllBlocks => self
                .store
                .block_approvals()
                .iter()
                .filter(|r| r.file_path == path)
                .map(|r| r.block_name.clone())
                .collect(),
        };

        names
            .into_iter()
            .map(|name| {
                let changed = self.store.revoke_block(&path, &name)?;
                Ok(ApprovalChange {
                    block: Some(name),
                    mode: None,
                    changed,
                })
            })
            .collect()
    }
}

/// Reject a `file` target outside the document's directory before the block runs.
fn check_file_target(block: &CodeBlock) -> Result<(), EvalError> {
    let Some(directive) = &block.directive else {
        return Ok(());
    };
    let spec = directive.results();
    if spec.format != ResultFormat::File || !spec.placement.writes_document() {
        return Ok(());
    }
    file_target(block)
        .map(|_| ())
        .map_err(|error| EvalError::InvalidParameter {
            name: block.label(),
            key: "file",
            message: error.to_string(),
        })
}

/// Execute one resolved block and turn the outcome into a report and a result.
fn run_block(
    block: &CodeBlock,
    handle: &EvaluatorHandle,
    params: &ExecParams,
) -> Result<(BlockReport, EvalResult), EvalError> {
    info!(block = %block.label(), program = %handle.program().display(), "running block");
    if let Some(directive) = &block.directive {
        let unknown = directive.results().unknown;
        if !unknown.is_empty() {
            warn!(block = %block.label(), tokens = ?unknown, "ignoring unknown results tokens");
        }
    }
    let Execution {
        output,
        outcome,
        elapsed,
    } = executor::execute(handle, &block.source(), params)?;

    let (status, error) = match outcome {
        Outcome::Success => (BlockStatus::Succeeded, None),
        Outcome::Failed { .. } => (
            BlockStatus::Failed,
            Some(EvalError::ExecutionFailure {
                name: block.label(),
                status: outcome.describe(),
                output: output.clone(),
            }),
        ),
        Outcome::TimedOut { limit } => (
            BlockStatus::TimedOut,
            Some(EvalError::ExecutionTimeout {
                name: block.label(),
                limit,
                output: output.clone(),
            }),
        ),
    };

    let result = EvalResult {
        block: block.clone(),
        output: output.clone(),
        error: error.as_ref().map(|_| outcome.describe()),
    };
    let mut report = BlockReport::new(block, status);
    if report.placement != Placement::Silent {
        report.output = Some(output);
    }
    report.error = error;
    report.elapsed_ms = Some(elapsed.as_millis());
    Ok((report, result))
}
