pub mod error;
pub mod marker;
pub(crate) mod structural;

pub use error::ScanWarning;

use crate::Notebook;

/// Scanner entry point.
pub struct Scanner<'a> {
    source: &'a str,
    file_id: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str, file_id: usize) -> Self {
        Scanner { source, file_id }
    }

    /// Scan the source markdown into its code blocks.
    ///
    /// Scanning never fails: malformed or orphaned directives are dropped and
    /// reported as warnings so one bad annotation cannot hide the rest of the
    /// document.
    pub fn scan(&self) -> (Notebook, Vec<ScanWarning>) {
        let (blocks, warnings) = structural::scan_blocks(self.source, self.file_id);
        let notebook = Notebook {
            blocks,
            source_id: self.file_id,
        };
        (notebook, warnings)
    }
}
