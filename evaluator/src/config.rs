use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::approval::ApprovalMode;
use crate::error::EvalError;
use crate::executor::parse_duration;
use crate::resolver::DEFAULT_PREFIX;

/// Workspace configuration, read from `.jot/config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub eval: EvalConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvalConfig {
    /// External evaluators are looked up as `<prefix><language>` on PATH.
    pub evaluator_prefix: String,

    /// Applied when a directive has no `timeout`.
    pub default_timeout: Option<String>,

    /// Mode used by `approve` when none is given.
    pub default_mode: ApprovalMode,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            evaluator_prefix: DEFAULT_PREFIX.to_string(),
            default_timeout: None,
            default_mode: ApprovalMode::default(),
        }
    }
}

impl Config {
    /// Load `path`; a missing file is the default config.
    pub fn load(path: &Path) -> Result<Config, EvalError> {
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => {
                return Err(EvalError::Config {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                });
            }
        };
        let config: Config = toml::from_str(&source).map_err(|e| EvalError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.default_timeout(path)?;
        Ok(config)
    }

    /// The configured default timeout, validated.
    pub fn default_timeout(&self, path: &Path) -> Result<Option<Duration>, EvalError> {
        self.eval
            .default_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map_err(|message| EvalError::Config {
                path: path.to_path_buf(),
                message: format!("default_timeout: {}", message),
            })
    }
}
