use std::io;
use std::path::PathBuf;
use std::time::Duration;

use notebook::patch::PatchError;

/// Everything that can stop a block from running or its results from landing.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// The block was never approved, or an interactive confirmation was declined.
    #[error(
        "block '{name}' in {} is not approved; run `jot eval approve {} --name {name}` after reviewing it",
        .file.display(),
        .file.display()
    )]
    ApprovalRequired { file: PathBuf, name: String },

    /// The block changed since it was approved in `hash` mode.
    #[error(
        "block '{name}' in {} changed since it was approved; review it and run `jot eval approve {} --name {name}` again",
        .file.display(),
        .file.display()
    )]
    ApprovalStale { file: PathBuf, name: String },

    #[error("eval directive on line {line} has no name; add name=\"...\" to approve or run it")]
    MissingName { line: usize },

    #[error("no eval block named '{name}' in {}", .file.display())]
    BlockNotFound { file: PathBuf, name: String },

    #[error(
        "no evaluator for language '{language}'\n  \
         external: no executable named `{external}` on PATH\n  \
         built-in: {builtin}\n\
         to add support, put an executable named `{external}` on PATH that reads the block source on stdin, \
         or set shell=\"...\" on the directive to a supported language"
    )]
    EvaluatorNotFound {
        language: String,
        external: String,
        builtin: String,
    },

    #[error("block '{name}' timed out after {limit:?}")]
    ExecutionTimeout {
        name: String,
        limit: Duration,
        output: String,
    },

    #[error("block '{name}' failed: {status}")]
    ExecutionFailure {
        name: String,
        status: String,
        output: String,
    },

    #[error("invalid {key} on block '{name}': {message}")]
    InvalidParameter {
        name: String,
        key: &'static str,
        message: String,
    },

    #[error("cannot start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("approval store {}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot {action} {}: {source}", .path.display())]
    Document {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read confirmation: {0}")]
    Confirm(#[source] io::Error),

    #[error("invalid config {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },

    #[error(transparent)]
    Patch(#[from] PatchError),
}

impl EvalError {
    /// Name of the block the error is about, if any.
    pub fn block_name(&self) -> Option<&str> {
        match self {
            EvalError::ApprovalRequired { name, .. }
            | EvalError::ApprovalStale { name, .. }
            | EvalError::BlockNotFound { name, .. }
            | EvalError::ExecutionTimeout { name, .. }
            | EvalError::ExecutionFailure { name, .. }
            | EvalError::InvalidParameter { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Output captured before a failure, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            EvalError::ExecutionTimeout { output, .. }
            | EvalError::ExecutionFailure { output, .. } => Some(output),
            _ => None,
        }
    }

    pub fn is_approval(&self) -> bool {
        matches!(
            self,
            EvalError::ApprovalRequired { .. } | EvalError::ApprovalStale { .. }
        )
    }
}
