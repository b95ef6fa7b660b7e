use std::fmt;

/// Opening marker of a raw result region.
pub const RAW_BEGIN: &str = "<!-- jot:result -->";
/// Closes every inserted result; the patcher only ever removes marked chunks.
pub const RESULT_END: &str = "<!-- /jot:result -->";

/// A markdown node produced from captured output.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentNode {
    Paragraph(Vec<InlineNode>),
    CodeBlock {
        language: Option<String>,
        content: String,
    },
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    UnorderedList {
        items: Vec<String>,
    },
    /// Markdown passed through, wrapped in result markers.
    Raw(String),
}

/// Inline elements used by result paragraphs.
#[derive(Debug, Clone, PartialEq)]
pub enum InlineNode {
    Link { dest: String, content: String },
    Image { dest: String, alt: String },
}

impl fmt::Display for DocumentNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentNode::Paragraph(inlines) => {
                for inline in inlines {
                    write!(f, "{}", inline)?;
                }
                writeln!(f)
            }
            DocumentNode::CodeBlock { language, content } => {
                let fence = "`".repeat(fence_len(content));
                write!(f, "{}", fence)?;
                if let Some(lang) = language {
                    write!(f, "{}", lang)?;
                }
                writeln!(f)?;
                write!(f, "{}", content)?;
                if !content.is_empty() && !content.ends_with('\n') {
                    writeln!(f)?;
                }
                writeln!(f, "{}", fence)
            }
            DocumentNode::Table { headers, rows } => {
                write!(f, "|")?;
                for header in headers {
                    write!(f, " {} |", escape_cell(header))?;
                }
                writeln!(f)?;
                write!(f, "|")?;
                for _ in headers {
                    write!(f, "---|")?;
                }
                writeln!(f)?;
                for row in rows {
                    write!(f, "|")?;
                    for cell in row {
                        write!(f, " {} |", escape_cell(cell))?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            }
            DocumentNode::UnorderedList { items } => {
                for item in items {
                    writeln!(f, "- {}", item)?;
                }
                Ok(())
            }
            DocumentNode::Raw(markdown) => {
                writeln!(f, "{}", RAW_BEGIN)?;
                // A literal end marker in the output would cut the region short.
                for line in markdown.lines().filter(|line| line.trim() != RESULT_END) {
                    writeln!(f, "{}", line)?;
                }
                writeln!(f, "{}", RESULT_END)
            }
        }
    }
}

impl fmt::Display for InlineNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InlineNode::Link { dest, content } => write!(f, "[{}]({})", content, dest),
            InlineNode::Image { dest, alt } => write!(f, "![{}]({})", alt, dest),
        }
    }
}

/// Backtick fence long enough that no run inside `content` can close it.
fn fence_len(content: &str) -> usize {
    let mut longest = 0;
    let mut run = 0;
    for c in content.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    (longest + 1).max(3)
}

fn escape_cell(cell: &str) -> String {
    cell.replace('|', "\\|")
}
