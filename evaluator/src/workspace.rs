//! Locating the workspace that owns a document, and its private data directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::EvalError;

/// Name of the private per-workspace directory.
pub const DATA_DIR: &str = ".jot";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Workspace { root: root.into() }
    }

    /// The nearest ancestor of `start` holding a `.jot` directory, else `start` itself
    /// (or its parent, when `start` is a file).
    pub fn discover(start: &Path) -> Self {
        let start = if start.is_file() {
            start.parent().unwrap_or(start)
        } else {
            start
        };
        let found = start
            .ancestors()
            .find(|dir| dir.join(DATA_DIR).is_dir())
            .unwrap_or(start);
        Workspace::at(found)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn config(&self) -> Result<Config, EvalError> {
        Config::load(&self.data_dir().join(CONFIG_FILE))
    }
}

/// Replace `path` with `contents` via a temporary sibling and a rename, so a
/// crash never leaves a truncated file behind.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.tmp", file_name));
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}
