//! Rendering captured output into markdown according to a block's `results` parameter.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::block::CodeBlock;
use crate::block::directive::{ResultFormat, ResultsSpec};
use crate::document::{DocumentNode, InlineNode};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp", "bmp"];

/// Outcome of executing one block, as consumed by the patcher.
#[derive(Debug, Clone)]
pub struct EvalResult {
    pub block: CodeBlock,
    /// Captured stdout and stderr.
    pub output: String,
    /// Failure detail shown in the document, if the run failed.
    pub error: Option<String>,
}

/// A file the `file` format asks to be written next to the document.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    /// Path as written in the directive, relative to the document's directory.
    pub path: PathBuf,
    pub contents: String,
}

/// Markdown for one result plus an optional file to write.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub node: DocumentNode,
    pub attachment: Option<Attachment>,
}

impl Rendered {
    pub fn markdown(&self) -> String {
        self.node.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderError {
    /// `results="file"` on a block with neither `file` nor `name`.
    NoFileTarget { line: usize },
    /// The `file` path is absolute or climbs out of the document's directory.
    UnsafeFileTarget { line: usize, path: PathBuf },
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::NoFileTarget { line } => write!(
                f,
                "results=\"file\" on the block at line {} needs a file=\"...\" or name=\"...\" parameter",
                line
            ),
            RenderError::UnsafeFileTarget { line, path } => write!(
                f,
                "file=\"{}\" on the block at line {} must be a relative path inside the document's directory",
                path.display(),
                line
            ),
        }
    }
}

impl std::error::Error for RenderError {}

/// Render `result` in the format its directive asks for.
/// Failed runs always render as a code block so the error stays readable.
pub fn render(result: &EvalResult) -> Result<Rendered, RenderError> {
    let spec = result
        .block
        .directive
        .as_ref()
        .map(|d| d.results())
        .unwrap_or_default();

    if let Some(error) = &result.error {
        let mut content = trim_trailing(&result.output).to_string();
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(&format!("error: {}\n", error));
        return Ok(plain(code_block(None, content)));
    }

    render_output(&result.block, &spec, &result.output)
}

fn render_output(
    block: &CodeBlock,
    spec: &ResultsSpec,
    output: &str,
) -> Result<Rendered, RenderError> {
    let node = match spec.format {
        ResultFormat::Code => code_block(None, terminated(trim_trailing(output))),
        ResultFormat::Html => code_block(Some("html"), terminated(trim_trailing(output))),
        ResultFormat::Verbatim => code_block(Some("text"), terminated(output)),
        ResultFormat::Table => table(output)
            .unwrap_or_else(|| code_block(None, terminated(trim_trailing(output)))),
        ResultFormat::List => {
            let items: Vec<String> = output
                .lines()
                .map(str::trim_end)
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect();
            if items.is_empty() {
                code_block(None, String::new())
            } else {
                DocumentNode::UnorderedList { items }
            }
        }
        ResultFormat::Raw => DocumentNode::Raw(trim_trailing(output).to_string()),
        ResultFormat::File => return file_link(block, output),
    };
    Ok(plain(node))
}

fn plain(node: DocumentNode) -> Rendered {
    Rendered {
        node,
        attachment: None,
    }
}

fn code_block(language: Option<&str>, content: String) -> DocumentNode {
    DocumentNode::CodeBlock {
        language: language.map(str::to_string),
        content,
    }
}

fn trim_trailing(output: &str) -> &str {
    output.trim_end()
}

fn terminated(content: &str) -> String {
    let mut content = content.to_string();
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content
}

/// Build a table from delimited output. The delimiter is sniffed from the
/// first line: tab, then comma, then pipe.
fn table(output: &str) -> Option<DocumentNode> {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect();
    let first = lines.first()?;
    let delimiter = ['\t', ',', '|'].into_iter().find(|d| first.contains(*d))?;

    let mut rows: Vec<Vec<String>> = lines
        .iter()
        .map(|line| split_row(line, delimiter))
        .collect();
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    for row in &mut rows {
        row.resize(width, String::new());
    }

    let headers = rows.remove(0);
    Some(DocumentNode::Table { headers, rows })
}

fn split_row(line: &str, delimiter: char) -> Vec<String> {
    let line = line.trim();
    let line = if delimiter == '|' {
        let line = line.strip_prefix('|').unwrap_or(line);
        line.strip_suffix('|').unwrap_or(line)
    } else {
        line
    };
    line.split(delimiter)
        .map(|cell| cell.trim().to_string())
        .collect()
}

/// Where `results="file"` writes, relative to the document's directory:
/// the `file` parameter, else `<name>.txt`.
pub fn file_target(block: &CodeBlock) -> Result<PathBuf, RenderError> {
    let directive = block.directive.as_ref();
    let line = directive.map(|d| d.line).unwrap_or(block.start_line);
    let target = directive
        .and_then(|d| d.get("file"))
        .map(str::trim)
        .filter(|file| !file.is_empty())
        .map(PathBuf::from)
        .or_else(|| block.name().map(|name| PathBuf::from(format!("{}.txt", name))))
        .ok_or(RenderError::NoFileTarget { line })?;

    if !stays_inside(&target) {
        return Err(RenderError::UnsafeFileTarget { line, path: target });
    }
    Ok(target)
}

/// Lexically: relative, and no `..` climbs above the starting directory.
fn stays_inside(path: &Path) -> bool {
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(up) => depth = up,
                None => return false,
            },
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    depth > 0
}

fn file_link(block: &CodeBlock, output: &str) -> Result<Rendered, RenderError> {
    let target = file_target(block)?;

    let dest = link_dest(&target);
    let label = block
        .name()
        .map(str::to_string)
        .or_else(|| {
            target
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| dest.clone());

    let inline = if is_image(&target) {
        InlineNode::Image { dest, alt: label }
    } else {
        InlineNode::Link {
            dest,
            content: label,
        }
    };

    Ok(Rendered {
        node: DocumentNode::Paragraph(vec![inline]),
        attachment: Some(Attachment {
            path: target,
            contents: output.to_string(),
        }),
    })
}

fn link_dest(path: &Path) -> String {
    let dest = path.to_string_lossy().replace('\\', "/");
    if dest.contains(' ') {
        format!("<{}>", dest)
    } else {
        dest
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}
