use std::io::{self, BufRead, Write};
use std::path::Path;

use evaluator::Confirm;
use notebook::block::CodeBlock;

/// Asks on the terminal before running a `prompt`-mode block.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, file: &Path, block: &CodeBlock) -> io::Result<bool> {
        let mut stderr = io::stderr().lock();
        writeln!(
            stderr,
            "block '{}' in {} needs confirmation:",
            block.label(),
            file.display()
        )?;
        for line in &block.source_lines {
            writeln!(stderr, "  | {}", line)?;
        }
        write!(stderr, "run it? [y/N] ")?;
        stderr.flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(matches!(
            answer.trim().to_ascii_lowercase().as_str(),
            "y" | "yes"
        ))
    }
}
