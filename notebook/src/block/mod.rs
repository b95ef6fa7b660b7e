pub mod directive;

use std::ops::Range;

use serde::Serialize;

use crate::block::directive::EvalDirective;

/// A fenced code region of a markdown document.
/// Blocks are rebuilt on every scan and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeBlock {
    /// 1-based line of the opening fence.
    pub start_line: usize,
    /// 1-based line of the closing fence.
    pub end_line: usize,
    /// First token of the fence info string, verbatim (empty if none).
    pub language: String,
    /// Body lines, fences excluded.
    pub source_lines: Vec<String>,
    /// The eval directive attached to this block. `None` means not evaluable.
    pub directive: Option<EvalDirective>,
    /// Byte span from the opening fence to the end of the closing fence.
    #[serde(skip)]
    pub span: Range<usize>,
}

impl CodeBlock {
    pub fn name(&self) -> Option<&str> {
        self.directive.as_ref().and_then(|d| d.name())
    }

    /// The block body as interpreter input: lines joined by `\n`, newline-terminated.
    pub fn source(&self) -> String {
        let mut source = self.source_lines.join("\n");
        if !source.is_empty() {
            source.push('\n');
        }
        source
    }

    /// Language used to pick an evaluator: the directive's `shell`, else the fence language.
    pub fn evaluator_language(&self) -> &str {
        self.directive
            .as_ref()
            .and_then(|d| d.get("shell"))
            .map(str::trim)
            .filter(|shell| !shell.is_empty())
            .unwrap_or(&self.language)
    }

    /// Human-facing label: the directive name, or `line N`.
    pub fn label(&self) -> String {
        match self.name() {
            Some(name) => name.to_string(),
            None => format!("line {}", self.start_line),
        }
    }
}
