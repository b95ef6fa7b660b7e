//! Running one block through its evaluator.
//!
//! The block source is fed on stdin; stdout and stderr are drained by helper
//! threads into one buffer while the calling thread polls the child against an
//! optional deadline.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notebook::block::CodeBlock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::EvalError;
use crate::resolver::EvaluatorHandle;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long to keep draining pipes after a timed-out process is killed.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Per-run settings derived from a directive.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecParams {
    pub timeout: Option<Duration>,
    pub cwd: PathBuf,
    /// Merged onto the inherited environment.
    pub env: Vec<(String, String)>,
    /// Appended after the evaluator's own arguments.
    pub args: Vec<String>,
}

impl ExecParams {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        ExecParams {
            timeout: None,
            cwd: cwd.into(),
            env: Vec::new(),
            args: Vec::new(),
        }
    }

    /// Read `timeout`, `cwd`, `env` and `args` from the block's directive.
    /// Relative `cwd` values resolve against `doc_dir`.
    pub fn from_block(
        block: &CodeBlock,
        doc_dir: &Path,
        default_timeout: Option<Duration>,
    ) -> Result<Self, EvalError> {
        let mut params = ExecParams::new(doc_dir);
        params.timeout = default_timeout;
        let Some(directive) = &block.directive else {
            return Ok(params);
        };

        let invalid = |key: &'static str, message: String| EvalError::InvalidParameter {
            name: block.label(),
            key,
            message,
        };

        if let Some(timeout) = directive.get("timeout") {
            params.timeout = Some(parse_duration(timeout).map_err(|m| invalid("timeout", m))?);
        }
        if let Some(cwd) = directive.get("cwd").map(str::trim).filter(|c| !c.is_empty()) {
            let cwd = doc_dir.join(cwd);
            if !cwd.is_dir() {
                return Err(invalid(
                    "cwd",
                    format!("{} is not a directory", cwd.display()),
                ));
            }
            params.cwd = cwd;
        }
        if let Some(env) = directive.get("env") {
            params.env = parse_env(env).map_err(|m| invalid("env", m))?;
        }
        if let Some(args) = directive.get("args") {
            params.args = split_args(args).map_err(|m| invalid("args", m))?;
        }
        Ok(params)
    }
}

/// How the interpreter process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// Non-zero exit. `code` is `None` when killed by a signal.
    Failed { code: Option<i32> },
    TimedOut { limit: Duration },
}

impl Outcome {
    pub fn describe(&self) -> String {
        match self {
            Outcome::Success => "succeeded".to_string(),
            Outcome::Failed { code: Some(code) } => format!("exit status {}", code),
            Outcome::Failed { code: None } => "terminated by a signal".to_string(),
            Outcome::TimedOut { limit } => format!("timed out after {:?}", limit),
        }
    }
}

/// Captured output and outcome of one run.
#[derive(Debug, Clone)]
pub struct Execution {
    /// stdout and stderr, in arrival order.
    pub output: String,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

/// Run `source` through `handle`.
///
/// Exit status is reported in the [`Outcome`], not as an error; only failing to
/// start or poll the process is an `Err`.
pub fn execute(
    handle: &EvaluatorHandle,
    source: &str,
    params: &ExecParams,
) -> Result<Execution, EvalError> {
    let program = handle.program();
    let spawn_error = |source: io::Error| EvalError::Spawn {
        program: program.display().to_string(),
        source,
    };

    let mut command = Command::new(program);
    command
        .args(handle.base_args())
        .args(&params.args)
        .current_dir(&params.cwd)
        .envs(params.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let started = Instant::now();
    let mut child = command.spawn().map_err(spawn_error)?;
    debug!(pid = child.id(), program = %program.display(), "spawned evaluator");

    let captured = Arc::new(Mutex::new(Vec::new()));
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(drain(stdout, Arc::clone(&captured)));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(drain(stderr, Arc::clone(&captured)));
    }
    if let Some(mut stdin) = child.stdin.take() {
        let input = source.as_bytes().to_vec();
        thread::spawn(move || {
            if let Err(e) = stdin.write_all(&input) {
                if e.kind() != io::ErrorKind::BrokenPipe {
                    debug!(error = %e, "writing block source to evaluator failed");
                }
            }
        });
    }

    let outcome = loop {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => break Outcome::Success,
            Ok(Some(status)) => break Outcome::Failed {
                code: status.code(),
            },
            Ok(None) => {}
            Err(e) => {
                terminate(&mut child);
                return Err(spawn_error(e));
            }
        }
        if let Some(limit) = params.timeout {
            if started.elapsed() >= limit {
                terminate(&mut child);
                warn!(program = %program.display(), ?limit, "evaluator timed out");
                break Outcome::TimedOut { limit };
            }
        }
        thread::sleep(POLL_INTERVAL);
    };

    match outcome {
        Outcome::TimedOut { .. } => join_within(readers, DRAIN_GRACE),
        _ => {
            for reader in readers {
                let _ = reader.join();
            }
        }
    }

    let output = {
        let bytes = captured.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    };
    let elapsed = started.elapsed();
    debug!(outcome = %outcome.describe(), ?elapsed, bytes = output.len(), "evaluator finished");

    Ok(Execution {
        output,
        outcome,
        elapsed,
    })
}

fn drain(mut pipe: impl Read + Send + 'static, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    })
}

/// Join readers that finish within `grace`; leave the rest detached.
fn join_within(readers: Vec<JoinHandle<()>>, grace: Duration) {
    let deadline = Instant::now() + grace;
    for reader in readers {
        while !reader.is_finished() && Instant::now() < deadline {
            thread::sleep(POLL_INTERVAL);
        }
        if reader.is_finished() {
            let _ = reader.join();
        }
    }
}

/// Kill the child and everything it started, then reap it.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        // SAFETY: killpg only sends a signal; the child leads its own process group.
        unsafe {
            libc::killpg(child.id() as libc::pid_t, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Parse a duration like `200ms`, `10s`, `1m30s` or `1.5h`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let text = input.trim();
    if text.is_empty() {
        return Err("empty duration".to_string());
    }
    if text == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("invalid duration '{}': expected a number", input));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration '{}': bad number", input))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_nanos = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(format!("invalid duration '{}': missing unit", input)),
            unit => {
                return Err(format!(
                    "invalid duration '{}': unknown unit '{}' (use ns, us, ms, s, m or h)",
                    input, unit
                ));
            }
        };
        total += Duration::from_nanos((value * unit_nanos).round() as u64);
        rest = &rest[unit_len..];
    }
    Ok(total)
}

/// Parse `K=V,K2=V2`. Empty entries are skipped.
pub fn parse_env(input: &str) -> Result<Vec<(String, String)>, String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(format!("expected KEY=VALUE, got '{}'", entry)),
        })
        .collect()
}

/// Split a shell-quoted argument string.
pub fn split_args(input: &str) -> Result<Vec<String>, String> {
    shlex::split(input).ok_or_else(|| format!("unbalanced quotes in '{}'", input))
}
