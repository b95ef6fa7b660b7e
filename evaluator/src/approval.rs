//! Persistent approval records gating block execution.
//!
//! Two JSON files in the workspace data directory hold block-level and
//! document-level grants. Both are loaded once and rewritten wholesale on every
//! change.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use notebook::block::CodeBlock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::EvalError;
use crate::workspace::write_atomic;

pub const BLOCKS_FILE: &str = "eval_approvals.json";
pub const DOCUMENTS_FILE: &str = "eval_document_approvals.json";

/// How much trust a grant carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Valid while the block body hashes to the stored value.
    #[default]
    Hash,
    /// Ask interactively before every run.
    Prompt,
    /// Run regardless of content.
    Always,
}

impl fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApprovalMode::Hash => "hash",
            ApprovalMode::Prompt => "prompt",
            ApprovalMode::Always => "always",
        })
    }
}

impl FromStr for ApprovalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hash" => Ok(ApprovalMode::Hash),
            "prompt" => Ok(ApprovalMode::Prompt),
            "always" => Ok(ApprovalMode::Always),
            other => Err(format!(
                "unknown approval mode '{}' (expected hash, prompt or always)",
                other
            )),
        }
    }
}

/// A grant for one named block in one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub hash: String,
    pub mode: ApprovalMode,
    pub file_path: PathBuf,
    pub block_name: String,
    pub approved_at: DateTime<Utc>,
}

/// A grant covering a whole file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentApprovalRecord {
    pub file_path: PathBuf,
    pub mode: ApprovalMode,
    pub approved_at: DateTime<Utc>,
}

/// Result of checking a block against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Covered by a document-level `always` grant.
    Document,
    /// Block record in `hash` mode with a matching hash.
    Hash,
    /// Block record in `always` mode.
    Always,
    /// Block record in `prompt` mode, confirmed just now.
    Confirmed,
    /// Block record in `prompt` mode; no confirmer was available.
    NeedsConfirmation,
    /// Block record in `prompt` mode; the user said no.
    Declined,
    /// No record at all.
    Required,
    /// `hash` record whose hash no longer matches.
    Stale,
}

impl ApprovalStatus {
    pub fn is_approved(self) -> bool {
        matches!(
            self,
            ApprovalStatus::Document
                | ApprovalStatus::Hash
                | ApprovalStatus::Always
                | ApprovalStatus::Confirmed
        )
    }

    /// The error to report when this status blocks a run.
    pub fn to_error(self, file: &Path, name: &str) -> Option<EvalError> {
        match self {
            ApprovalStatus::Stale => Some(EvalError::ApprovalStale {
                file: file.to_path_buf(),
                name: name.to_string(),
            }),
            ApprovalStatus::Required
            | ApprovalStatus::Declined
            | ApprovalStatus::NeedsConfirmation => Some(EvalError::ApprovalRequired {
                file: file.to_path_buf(),
                name: name.to_string(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApprovalStatus::Document => "approved (document)",
            ApprovalStatus::Hash => "approved",
            ApprovalStatus::Always => "approved (always)",
            ApprovalStatus::Confirmed => "approved (confirmed)",
            ApprovalStatus::NeedsConfirmation => "prompt",
            ApprovalStatus::Declined => "declined",
            ApprovalStatus::Required => "unapproved",
            ApprovalStatus::Stale => "stale",
        })
    }
}

/// Interactive confirmation for `prompt` mode.
pub trait Confirm {
    fn confirm(&mut self, file: &Path, block: &CodeBlock) -> io::Result<bool>;
}

/// Confirmer with a fixed answer, for non-interactive runs.
pub struct FixedAnswer(pub bool);

impl Confirm for FixedAnswer {
    fn confirm(&mut self, _file: &Path, _block: &CodeBlock) -> io::Result<bool> {
        Ok(self.0)
    }
}

/// SHA-256 of the block body, lowercase hex.
pub fn content_hash(lines: &[String]) -> String {
    let digest = Sha256::digest(lines.join("\n").as_bytes());
    digest.iter().map(|byte| format!("{:02x}", byte)).collect()
}

/// One record collection and the file backing it.
#[derive(Debug)]
struct RecordFile<T> {
    path: PathBuf,
    records: Vec<T>,
    /// The file existed but could not be parsed.
    corrupt: bool,
}

impl<T: Serialize + DeserializeOwned> RecordFile<T> {
    fn load(path: PathBuf) -> Result<Self, EvalError> {
        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(RecordFile {
                    path,
                    records: Vec::new(),
                    corrupt: false,
                });
            }
            Err(source) => return Err(EvalError::Persistence { path, source }),
        };

        if source.trim().is_empty() {
            return Ok(RecordFile {
                path,
                records: Vec::new(),
                corrupt: false,
            });
        }

        match serde_json::from_str(&source) {
            Ok(records) => Ok(RecordFile {
                path,
                records,
                corrupt: false,
            }),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "approval file is corrupt; treating every block as unapproved");
                Ok(RecordFile {
                    path,
                    records: Vec::new(),
                    corrupt: true,
                })
            }
        }
    }

    fn save(&mut self) -> Result<(), EvalError> {
        let persistence = |path: &Path, source: io::Error| EvalError::Persistence {
            path: path.to_path_buf(),
            source,
        };

        if self.corrupt {
            let backup = self.path.with_extension("json.corrupt");
            fs::rename(&self.path, &backup).map_err(|e| persistence(&self.path, e))?;
            warn!(backup = %backup.display(), "kept corrupt approval file");
            self.corrupt = false;
        }

        let json = serde_json::to_string_pretty(&self.records)
            .map_err(|e| persistence(&self.path, io::Error::other(e)))?;
        write_atomic(&self.path, json.as_bytes()).map_err(|e| persistence(&self.path, e))?;
        debug!(path = %self.path.display(), records = self.records.len(), "saved approvals");
        Ok(())
    }
}

/// Block- and document-level approvals for one workspace.
#[derive(Debug)]
pub struct ApprovalStore {
    blocks: RecordFile<ApprovalRecord>,
    documents: RecordFile<DocumentApprovalRecord>,
}

impl ApprovalStore {
    /// Load both record files from `data_dir`. Missing files are empty.
    pub fn open(data_dir: &Path) -> Result<Self, EvalError> {
        Ok(ApprovalStore {
            blocks: RecordFile::load(data_dir.join(BLOCKS_FILE))?,
            documents: RecordFile::load(data_dir.join(DOCUMENTS_FILE))?,
        })
    }

    pub fn block_approvals(&self) -> &[ApprovalRecord] {
        &self.blocks.records
    }

    pub fn document_approvals(&self) -> &[DocumentApprovalRecord] {
        &self.documents.records
    }

    pub fn document_approval(&self, file: &Path) -> Option<&DocumentApprovalRecord> {
        self.documents.records.iter().find(|r| r.file_path == file)
    }

    pub fn block_approval(&self, file: &Path, name: &str) -> Option<&ApprovalRecord> {
        self.blocks
            .records
            .iter()
            .find(|r| r.file_path == file && r.block_name == name)
    }

    /// Decide whether `block` in `file` may run.
    ///
    /// `prompt` records are only satisfied by `confirm`; with no confirmer they
    /// report [`ApprovalStatus::NeedsConfirmation`].
    pub fn check_approval(
        &self,
        file: &Path,
        block: &CodeBlock,
        confirm: Option<&mut dyn Confirm>,
    ) -> Result<ApprovalStatus, EvalError> {
        let name = require_name(block)?;

        if self
            .document_approval(file)
            .is_some_and(|r| r.mode == ApprovalMode::Always)
        {
            return Ok(ApprovalStatus::Document);
        }

        let Some(record) = self.block_approval(file, name) else {
            return Ok(ApprovalStatus::Required);
        };

        let status = match record.mode {
            ApprovalMode::Always => ApprovalStatus::Always,
            ApprovalMode::Hash => {
                if record.hash == content_hash(&block.source_lines) {
                    ApprovalStatus::Hash
                } else {
                    ApprovalStatus::Stale
                }
            }
            ApprovalMode::Prompt => match confirm {
                Some(confirm) => {
                    if confirm.confirm(file, block).map_err(EvalError::Confirm)? {
                        ApprovalStatus::Confirmed
                    } else {
                        ApprovalStatus::Declined
                    }
                }
                None => ApprovalStatus::NeedsConfirmation,
            },
        };
        debug!(block = name, file = %file.display(), %status, "checked approval");
        Ok(status)
    }

    /// Grant `block`, overwriting any earlier record for the same name.
    pub fn approve_block(
        &mut self,
        file: &Path,
        block: &CodeBlock,
        mode: ApprovalMode,
    ) -> Result<(), EvalError> {
        let name = require_name(block)?.to_string();
        let record = ApprovalRecord {
            hash: content_hash(&block.source_lines),
            mode,
            file_path: file.to_path_buf(),
            block_name: name.clone(),
            approved_at: Utc::now(),
        };
        self.blocks
            .records
            .retain(|r| !(r.file_path == file && r.block_name == name));
        self.blocks.records.push(record);
        self.blocks.save()?;
        info!(block = %name, file = %file.display(), %mode, "approved block");
        Ok(())
    }

    /// Remove the grant for `name`. Returns whether one existed.
    pub fn revoke_block(&mut self, file: &Path, name: &str) -> Result<bool, EvalError> {
        let before = self.blocks.records.len();
        self.blocks
            .records
            .retain(|r| !(r.file_path == file && r.block_name == name));
        if self.blocks.records.len() == before {
            return Ok(false);
        }
        self.blocks.save()?;
        info!(block = name, file = %file.display(), "revoked block approval");
        Ok(true)
    }

    pub fn approve_document(&mut self, file: &Path, mode: ApprovalMode) -> Result<(), EvalError> {
        self.documents.records.retain(|r| r.file_path != file);
        self.documents.records.push(DocumentApprovalRecord {
            file_path: file.to_path_buf(),
            mode,
            approved_at: Utc::now(),
        });
        self.documents.save()?;
        info!(file = %file.display(), %mode, "approved document");
        Ok(())
    }

    pub fn revoke_document(&mut self, file: &Path) -> Result<bool, EvalError> {
        let before = self.documents.records.len();
        self.documents.records.retain(|r| r.file_path != file);
        if self.documents.records.len() == before {
            return Ok(false);
        }
        self.documents.save()?;
        info!(file = %file.display(), "revoked document approval");
        Ok(true)
    }
}

fn require_name(block: &CodeBlock) -> Result<&str, EvalError> {
    block.name().ok_or(EvalError::MissingName {
        line: block
            .directive
            .as_ref()
            .map(|d| d.line)
            .unwrap_or(block.start_line),
    })
}
