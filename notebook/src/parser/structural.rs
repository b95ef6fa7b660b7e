use std::ops::Range;

use tracing::debug;

use crate::block::CodeBlock;
use crate::block::directive::EvalDirective;
use crate::parser::error::{ScanWarning, WarningKind};
use crate::parser::marker;

/// Fences may be indented by at most this many spaces.
const MAX_FENCE_INDENT: usize = 3;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Scan markdown source into its fenced code blocks in one forward pass.
pub fn scan_blocks(source: &str, file_id: usize) -> (Vec<CodeBlock>, Vec<ScanWarning>) {
    let mut state = ScanState::new(file_id);
    for (index, (text, span)) in lines_with_spans(source).enumerate() {
        state.process_line(index + 1, text, span);
    }
    state.finalize()
}

/// Iterate lines without their terminators, paired with the byte span of the full line.
pub(crate) fn lines_with_spans(source: &str) -> impl Iterator<Item = (&str, Range<usize>)> {
    let mut offset = 0;
    source.split_inclusive('\n').map(move |raw| {
        let start = offset;
        offset += raw.len();
        let text = raw.strip_suffix('\n').unwrap_or(raw);
        let text = text.strip_suffix('\r').unwrap_or(text);
        (text, start..offset)
    })
}

// ---------------------------------------------------------------------------
// Fences
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fence {
    pub(crate) ch: char,
    pub(crate) len: usize,
}

/// Recognize an opening fence, returning it with its info string.
pub(crate) fn parse_fence_open(line: &str) -> Option<(Fence, &str)> {
    let rest = strip_fence_indent(line)?;
    let ch = rest.chars().next()?;
    if ch != '`' && ch != '~' {
        return None;
    }
    let len = rest.chars().take_while(|&c| c == ch).count();
    if len < 3 {
        return None;
    }
    let info = rest[len..].trim();
    // Backtick fences cannot carry backticks in their info string.
    if ch == '`' && info.contains('`') {
        return None;
    }
    Some((Fence { ch, len }, info))
}

/// True if `line` closes a block opened with `fence`.
pub(crate) fn is_fence_close(line: &str, fence: Fence) -> bool {
    let Some(rest) = strip_fence_indent(line) else {
        return false;
    };
    let len = rest.chars().take_while(|&c| c == fence.ch).count();
    len >= fence.len && rest[len..].trim().is_empty()
}

fn strip_fence_indent(line: &str) -> Option<&str> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > MAX_FENCE_INDENT {
        return None;
    }
    Some(&line[indent..])
}

fn is_comment_line(trimmed: &str) -> bool {
    trimmed.starts_with("<!--") && trimmed.ends_with("-->")
}

// ---------------------------------------------------------------------------
// Scan state
// ---------------------------------------------------------------------------

struct ScanState {
    file_id: usize,
    blocks: Vec<CodeBlock>,
    warnings: Vec<ScanWarning>,
    /// A directive waiting for its fence.
    pending: Option<EvalDirective>,
    /// The block currently being collected.
    open: Option<OpenBlock>,
}

struct OpenBlock {
    fence: Fence,
    language: String,
    start_line: usize,
    span_start: usize,
    lines: Vec<String>,
    directive: Option<EvalDirective>,
}

impl ScanState {
    fn new(file_id: usize) -> Self {
        ScanState {
            file_id,
            blocks: Vec::new(),
            warnings: Vec::new(),
            pending: None,
            open: None,
        }
    }

    fn process_line(&mut self, line_no: usize, text: &str, span: Range<usize>) {
        if let Some(mut open) = self.open.take() {
            if is_fence_close(text, open.fence) {
                self.blocks.push(CodeBlock {
                    start_line: open.start_line,
                    end_line: line_no,
                    language: open.language,
                    source_lines: open.lines,
                    directive: open.directive,
                    span: open.span_start..span.end,
                });
            } else {
                open.lines.push(text.to_string());
                self.open = Some(open);
            }
            return;
        }

        if let Some((fence, info)) = parse_fence_open(text) {
            let language = info.split_whitespace().next().unwrap_or("").to_string();
            self.open = Some(OpenBlock {
                fence,
                language,
                start_line: line_no,
                span_start: span.start,
                lines: Vec::new(),
                directive: self.pending.take(),
            });
            return;
        }

        let trimmed = text.trim();
        if trimmed.is_empty() || is_comment_line(trimmed) {
            return;
        }

        self.discard_pending();

        if marker::is_marker(trimmed) {
            match marker::parse_marker(trimmed) {
                Ok(params) => {
                    self.pending = Some(EvalDirective {
                        params,
                        line: line_no,
                        span,
                    });
                }
                Err(err) => {
                    debug!(line = line_no, error = %err, "dropping malformed eval directive");
                    self.warnings.push(
                        ScanWarning::new(
                            WarningKind::Malformed,
                            format!("malformed eval directive: {}", err),
                            span,
                            self.file_id,
                        )
                        .with_note("the following code block will not be evaluable"),
                    );
                }
            }
        }
    }

    /// Drop a directive that did not reach a fence.
    fn discard_pending(&mut self) {
        if let Some(directive) = self.pending.take() {
            debug!(line = directive.line, "eval directive is not followed by a code block");
            self.warnings.push(
                ScanWarning::new(
                    WarningKind::Orphaned,
                    "eval directive is not followed by a code block",
                    directive.span,
                    self.file_id,
                )
                .with_note("only blank lines and comments may separate a directive from its fence"),
            );
        }
    }

    fn finalize(mut self) -> (Vec<CodeBlock>, Vec<ScanWarning>) {
        if let Some(open) = self.open.take() {
            debug!(line = open.start_line, "code fence is never closed");
            let span_end = open.span_start + open.fence.len;
            self.warnings.push(ScanWarning::new(
                WarningKind::UnclosedFence,
                "code fence is never closed",
                open.span_start..span_end,
                self.file_id,
            ));
        }
        self.discard_pending();
        (self.blocks, self.warnings)
    }
}
