//! Mapping a block language to the program that runs it.
//!
//! Lookup order is fixed: an external `jot-eval-<language>` executable on PATH
//! wins over the built-in table, so users can add or override languages without
//! rebuilding.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::EvalError;

/// Default naming convention for external evaluators.
pub const DEFAULT_PREFIX: &str = "jot-eval-";

/// A resolved execution strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluatorHandle {
    /// A user-provided executable found on PATH.
    External { path: PathBuf },
    /// A known interpreter invoked so that it reads its program from stdin.
    Builtin { command: PathBuf, args: Vec<String> },
}

impl EvaluatorHandle {
    pub fn program(&self) -> &Path {
        match self {
            EvaluatorHandle::External { path } => path,
            EvaluatorHandle::Builtin { command, .. } => command,
        }
    }

    /// Arguments placed before any directive `args`.
    pub fn base_args(&self) -> &[String] {
        match self {
            EvaluatorHandle::External { .. } => &[],
            EvaluatorHandle::Builtin { args, .. } => args,
        }
    }
}

struct Builtin {
    languages: &'static [&'static str],
    command: &'static str,
    args: &'static [&'static str],
}

// Only interpreters that read a program on stdin; `go run` needs a file, so Go
// is left to an external evaluator.
const BUILTINS: &[Builtin] = &[
    Builtin {
        languages: &["python", "python3", "py"],
        command: "python3",
        args: &["-"],
    },
    Builtin {
        languages: &["bash"],
        command: "bash",
        args: &["-s"],
    },
    Builtin {
        languages: &["sh", "shell"],
        command: "sh",
        args: &["-s"],
    },
    Builtin {
        languages: &["zsh"],
        command: "zsh",
        args: &["-s"],
    },
    Builtin {
        languages: &["javascript", "js", "node"],
        command: "node",
        args: &["-"],
    },
    Builtin {
        languages: &["ruby", "rb"],
        command: "ruby",
        args: &["-"],
    },
    Builtin {
        languages: &["perl"],
        command: "perl",
        args: &["-"],
    },
];

/// Languages with a built-in interpreter.
pub fn builtin_languages() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().flat_map(|b| b.languages.iter().copied())
}

/// Resolves languages to evaluators, caching hits for the resolver's lifetime.
pub struct Resolver {
    prefix: String,
    search_path: Vec<PathBuf>,
    cache: HashMap<String, EvaluatorHandle>,
}

impl Resolver {
    /// Resolver over the process `PATH`.
    pub fn new(prefix: impl Into<String>) -> Self {
        let search_path = std::env::var_os("PATH")
            .map(|path| std::env::split_paths(&path).collect())
            .unwrap_or_default();
        Resolver::with_search_path(prefix, search_path)
    }

    pub fn with_search_path(prefix: impl Into<String>, search_path: Vec<PathBuf>) -> Self {
        Resolver {
            prefix: prefix.into(),
            search_path,
            cache: HashMap::new(),
        }
    }

    pub fn resolve(&mut self, language: &str) -> Result<EvaluatorHandle, EvalError> {
        let language = language.trim().to_ascii_lowercase();
        if let Some(handle) = self.cache.get(&language) {
            return Ok(handle.clone());
        }

        let external = format!("{}{}", self.prefix, language);
        let handle = if language.is_empty() {
            None
        } else {
            find_executable_in_dirs(&external, &self.search_path)
                .map(|path| EvaluatorHandle::External { path })
        };

        let handle = match handle {
            Some(handle) => handle,
            None => self.builtin(&language, &external)?,
        };

        debug!(%language, program = %handle.program().display(), "resolved evaluator");
        self.cache.insert(language, handle.clone());
        Ok(handle)
    }

    fn builtin(&self, language: &str, external: &str) -> Result<EvaluatorHandle, EvalError> {
        let not_found = |builtin: String| EvalError::EvaluatorNotFound {
            language: language.to_string(),
            external: external.to_string(),
            builtin,
        };

        let Some(builtin) = BUILTINS
            .iter()
            .find(|b| b.languages.iter().any(|l| *l == language))
        else {
            let known: Vec<&str> = builtin_languages().collect();
            return Err(not_found(format!(
                "none for '{}' (built-in languages: {})",
                language,
                known.join(", ")
            )));
        };

        let command = find_executable_in_dirs(builtin.command, &self.search_path).ok_or_else(|| {
            not_found(format!(
                "`{}` is the built-in interpreter but it is not installed on PATH",
                builtin.command
            ))
        })?;

        Ok(EvaluatorHandle::Builtin {
            command,
            args: builtin.args.iter().map(|a| a.to_string()).collect(),
        })
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && (m.permissions().mode() & 0o111 != 0))
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// First executable named `name` in `dirs`.
pub fn find_executable_in_dirs(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    if name.trim().is_empty() {
        return None;
    }
    dirs.iter()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}
