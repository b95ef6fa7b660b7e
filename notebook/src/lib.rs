pub mod block;
pub mod document;
pub mod parser;
pub mod patch;
pub mod results;

use crate::block::CodeBlock;

/// A scanned markdown document: every fenced code block, in source order.
#[derive(Debug, Clone)]
pub struct Notebook {
    pub blocks: Vec<CodeBlock>,
    /// The source file ID (for error reporting with codespan-reporting).
    pub source_id: usize,
}

impl Notebook {
    /// Blocks carrying an eval directive.
    pub fn evaluable(&self) -> impl Iterator<Item = &CodeBlock> {
        self.blocks.iter().filter(|block| block.directive.is_some())
    }

    /// First block whose directive is named `name`.
    pub fn find(&self, name: &str) -> Option<&CodeBlock> {
        self.blocks.iter().find(|block| block.name() == Some(name))
    }
}

/// Scan `source` and return its code blocks, dropping scanner warnings.
pub fn scan(source: &str) -> Vec<CodeBlock> {
    let (notebook, _) = parser::Scanner::new(source, 0).scan();
    notebook.blocks
}
