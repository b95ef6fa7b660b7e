//! Rewriting a document with rendered results.
//!
//! Results are inserted after the closing fence of the block that produced
//! them. Every inserted chunk ends with a [`RESULT_END`] marker line, and only
//! marked chunks directly after the fence (separated by blank lines) count as
//! the block's *result region*. `replace` swaps that region out, `append` and
//! `prepend` add around it. Markdown the user wrote after a block is never part
//! of the region. Exactly one blank line surrounds inserted content, which makes
//! a repeated `replace` with the same output byte-identical.
//!
//! Lines outside the spliced region are copied with their original endings;
//! inserted lines use the document's dominant line ending.

use std::fmt;
use std::ops::Range;

use tracing::debug;

use crate::block::CodeBlock;
use crate::block::directive::Placement;
use crate::document::{DocumentNode, RAW_BEGIN, RESULT_END};
use crate::parser::structural::{is_fence_close, parse_fence_open};
use crate::results::{self, Attachment, EvalResult, RenderError, Rendered};

/// How far (in lines) a directive-less block may have moved and still be matched.
pub const ANCHOR_WINDOW: usize = 5;

/// A rewritten document and the files it links to.
#[derive(Debug, Clone)]
pub struct Patched {
    pub text: String,
    pub attachments: Vec<Attachment>,
    /// Number of results inserted.
    pub applied: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatchError {
    /// The block that produced a result is no longer in the document.
    AnchorNotFound { block: String, line: usize },
    Render(RenderError),
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchError::AnchorNotFound { block, line } => write!(
                f,
                "cannot find block '{}' (originally at line {}) to insert its results",
                block, line
            ),
            PatchError::Render(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for PatchError {}

impl From<RenderError> for PatchError {
    fn from(err: RenderError) -> Self {
        PatchError::Render(err)
    }
}

/// Apply every result whose placement writes to the document, in order.
///
/// Nothing is returned unless every result renders and finds its block, so a
/// caller never writes a half-patched document.
pub fn patch(document: &str, results: &[EvalResult]) -> Result<Patched, PatchError> {
    let mut text = document.to_string();
    let mut attachments = Vec::new();
    let mut applied = 0;

    for result in results {
        let Some(directive) = &result.block.directive else {
            continue;
        };
        let placement = directive.results().placement;
        if !placement.writes_document() {
            continue;
        }

        let rendered = results::render(result)?;
        let blocks = crate::scan(&text);
        let anchor = locate(&blocks, &result.block).ok_or_else(|| PatchError::AnchorNotFound {
            block: result.block.label(),
            line: result.block.start_line,
        })?;
        let limit = next_directive(&blocks, anchor.end_line);

        debug!(
            block = %result.block.label(),
            %placement,
            after_line = anchor.end_line,
            "inserting result"
        );
        text = splice(&text, anchor.end_line, limit, &chunk(&rendered), placement);
        attachments.extend(rendered.attachment);
        applied += 1;
    }

    Ok(Patched {
        text,
        attachments,
        applied,
    })
}

/// Find `target` among freshly scanned `blocks`: by name, else by position and body.
fn locate<'a>(blocks: &'a [CodeBlock], target: &CodeBlock) -> Option<&'a CodeBlock> {
    if let Some(name) = target.name() {
        return blocks.iter().find(|block| block.name() == Some(name));
    }
    blocks
        .iter()
        .filter(|block| block.start_line.abs_diff(target.start_line) <= ANCHOR_WINDOW)
        .filter(|block| block.source_lines == target.source_lines)
        .min_by_key(|block| block.start_line.abs_diff(target.start_line))
}

/// 0-based line of the first directive after line `fence_line`, if any.
/// A result region never reaches past it.
fn next_directive(blocks: &[CodeBlock], fence_line: usize) -> Option<usize> {
    blocks
        .iter()
        .filter_map(|block| block.directive.as_ref())
        .map(|directive| directive.line)
        .filter(|&line| line > fence_line)
        .min()
        .map(|line| line - 1)
}

/// The markdown for one result, closed by its marker.
fn chunk(rendered: &Rendered) -> String {
    let mut markdown = rendered.markdown();
    // Raw regions carry their own begin/end pair.
    if !matches!(rendered.node, DocumentNode::Raw(_)) {
        markdown.push('\n');
        markdown.push_str(RESULT_END);
        markdown.push('\n');
    }
    markdown
}

/// Insert `markdown` after line `fence_line` (1-based, the closing fence).
fn splice(
    text: &str,
    fence_line: usize,
    limit: Option<usize>,
    markdown: &str,
    placement: Placement,
) -> String {
    let eol = line_ending(text);
    let raw: Vec<&str> = text.split_inclusive('\n').collect();
    let lines: Vec<&str> = raw.iter().map(|line| strip_eol(line)).collect();
    let anchor = fence_line.min(lines.len());
    let limit = limit.unwrap_or(lines.len()).clamp(anchor, lines.len());
    let chunks = result_region(&lines[..limit], anchor);

    let (keep_until, resume_at) = match (placement, chunks.first(), chunks.last()) {
        (Placement::Append, Some(_), Some(last)) => (last.end, last.end),
        (Placement::Prepend, Some(first), Some(_)) => (anchor, first.start),
        (Placement::Replace, _, Some(last)) => (anchor, last.end),
        _ => (anchor, anchor),
    };
    let rest = skip_blank(&lines, resume_at);

    let mut out = String::with_capacity(text.len() + markdown.len());
    for line in &raw[..keep_until] {
        out.push_str(line);
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push_str(eol);
    }
    out.push_str(eol);
    for line in markdown.lines() {
        out.push_str(line);
        out.push_str(eol);
    }

    if rest < raw.len() {
        out.push_str(eol);
        for line in &raw[rest..] {
            out.push_str(line);
        }
    } else if !text.is_empty() && !text.ends_with('\n') {
        out.truncate(out.len() - eol.len());
    }
    out
}

/// Line ranges (0-based, end-exclusive) of the marked result chunks following `anchor`.
fn result_region(lines: &[&str], anchor: usize) -> Vec<Range<usize>> {
    let mut chunks = Vec::new();
    let mut at = anchor;
    loop {
        let start = skip_blank(lines, at);
        let Some(end) = chunk_end(lines, start) else {
            break;
        };
        chunks.push(start..end);
        at = end;
    }
    chunks
}

/// One past the marker closing the chunk that starts at `start`, or `None`
/// when no result chunk starts there.
fn chunk_end(lines: &[&str], start: usize) -> Option<usize> {
    let first = lines.get(start)?.trim();
    if first == RAW_BEGIN {
        return lines[start + 1..]
            .iter()
            .position(|line| line.trim() == RESULT_END)
            .map(|offset| start + 1 + offset + 1);
    }

    // Content runs to the first blank line or marker outside a fence.
    let mut fence = None;
    let mut at = start;
    while let Some(line) = lines.get(at) {
        match fence {
            Some(open) => {
                if is_fence_close(line, open) {
                    fence = None;
                }
            }
            None if line.trim().is_empty() => break,
            None if line.trim() == RESULT_END => return Some(at + 1),
            None => fence = parse_fence_open(line).map(|(open, _)| open),
        }
        at += 1;
    }
    if fence.is_some() {
        return None;
    }

    let marker = skip_blank(lines, at);
    (lines.get(marker).map(|line| line.trim()) == Some(RESULT_END)).then_some(marker + 1)
}

fn skip_blank(lines: &[&str], from: usize) -> usize {
    let mut at = from;
    while lines.get(at).is_some_and(|line| line.trim().is_empty()) {
        at += 1;
    }
    at
}

/// `\r\n` when most terminated lines use it, else `\n`.
fn line_ending(text: &str) -> &'static str {
    let total = text.matches('\n').count();
    let crlf = text.matches("\r\n").count();
    if crlf > 0 && crlf * 2 >= total { "\r\n" } else { "\n" }
}

fn strip_eol(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}
