mod confirm;
mod output;

use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use codespan_reporting::term::termcolor::ColorChoice;
use tracing_subscriber::EnvFilter;

use evaluator::engine::LoadedDocument;
use evaluator::{ApprovalMode, Engine, EvalError, Selection, Target, Workspace};

use crate::confirm::StdinConfirm;

const EVAL_SUBCOMMANDS: &[&str] = &["run", "list", "approve", "revoke", "approvals", "help"];

/// Flags that take the next argument as their value.
const VALUE_FLAGS: &[&str] = &["--workspace", "--name", "-n", "--mode", "-m"];

const LOG_ENV: &str = "JOT_LOG";

#[derive(Parser)]
#[command(name = "jot", version, about = "Run code blocks embedded in markdown notes")]
struct Cli {
    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Use this workspace instead of the one found above the document
    #[arg(long, global = true, value_name = "DIR")]
    workspace: Option<PathBuf>,

    /// Log debug detail to stderr (JOT_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate, list and approve <eval> blocks
    #[command(subcommand)]
    Eval(EvalCommand),
}

#[derive(Subcommand)]
enum EvalCommand {
    /// Run one named block, or every approved block
    Run(RunArgs),

    /// List evaluable blocks and their approval status
    List(ListArgs),

    /// Approve one block, every named block, or the whole document
    Approve(ApproveArgs),

    /// Remove approvals
    Revoke(RevokeArgs),

    /// Show every approval recorded in the workspace
    Approvals(ApprovalsArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Markdown document
    file: PathBuf,

    /// Run only this block (it must be approved)
    #[arg(short, long)]
    name: Option<String>,

    /// Print a JSON report instead of text
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args)]
struct ListArgs {
    /// Markdown document
    file: PathBuf,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args)]
struct ApproveArgs {
    /// Markdown document
    file: PathBuf,

    /// Approve only this block
    #[arg(short, long, conflicts_with = "document")]
    name: Option<String>,

    /// Approve the document as a whole
    #[arg(long)]
    document: bool,

    /// hash, prompt or always (defaults to the workspace config, then hash)
    #[arg(short, long)]
    mode: Option<ApprovalMode>,

    #[arg(long)]
    json: bool,
}

#[derive(clap::Args)]
struct RevokeArgs {
    /// Markdown document
    file: PathBuf,

    /// Revoke only this block
    #[arg(short, long, conflicts_with = "document")]
    name: Option<String>,

    /// Revoke the document-level approval
    #[arg(long)]
    document: bool,

    #[arg(long)]
    json: bool,
}

#[derive(clap::Args)]
struct ApprovalsArgs {
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse_from(inject_run(std::env::args().collect()));
    init_tracing(cli.verbose);

    let ctx = Context {
        color: if cli.no_color {
            ColorChoice::Never
        } else {
            ColorChoice::Auto
        },
        workspace: cli.workspace,
    };

    let code = match cli.command {
        Command::Eval(EvalCommand::Run(args)) => ctx.run(args),
        Command::Eval(EvalCommand::List(args)) => ctx.list(args),
        Command::Eval(EvalCommand::Approve(args)) => ctx.approve(args),
        Command::Eval(EvalCommand::Revoke(args)) => ctx.revoke(args),
        Command::Eval(EvalCommand::Approvals(args)) => ctx.approvals(args),
    };
    process::exit(code);
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// `jot eval notes.md` is shorthand for `jot eval run notes.md`: if the first
/// positional after `eval` is not a subcommand, inject `run`.
fn inject_run(mut args: Vec<String>) -> Vec<String> {
    let Some(eval) = next_positional(&args, 1).filter(|&i| args[i] == "eval") else {
        return args;
    };
    if let Some(first) = next_positional(&args, eval + 1) {
        if !EVAL_SUBCOMMANDS.contains(&args[first].as_str()) {
            args.insert(eval + 1, "run".to_string());
        }
    }
    args
}

fn next_positional(args: &[String], from: usize) -> Option<usize> {
    let mut i = from;
    while i < args.len() {
        let arg = &args[i];
        if arg == "--" {
            return (i + 1 < args.len()).then_some(i + 1);
        }
        if !arg.starts_with('-') {
            return Some(i);
        }
        if VALUE_FLAGS.contains(&arg.as_str()) {
            i += 1;
        }
        i += 1;
    }
    None
}

struct Context {
    color: ColorChoice,
    workspace: Option<PathBuf>,
}

impl Context {
    fn engine(&self, near: &Path) -> Result<Engine, EvalError> {
        let start = self.workspace.as_deref().unwrap_or(near);
        let start = fs::canonicalize(start).unwrap_or_else(|_| start.to_path_buf());
        let engine = Engine::open(Workspace::discover(&start))?;
        if io::stdin().is_terminal() {
            Ok(engine.with_confirm(Box::new(StdinConfirm)))
        } else {
            Ok(engine)
        }
    }

    fn fail(&self, file: Option<&Path>, json: bool, error: &EvalError) -> i32 {
        if json {
            output::print_json(&output::ErrorReport::new(error));
        } else {
            output::emit_error(self.color, file, error);
        }
        1
    }

    fn run(&self, args: RunArgs) -> i32 {
        let selection = match args.name {
            Some(name) => Selection::Named(name),
            None => Selection::AllApproved,
        };
        let report = self
            .engine(&args.file)
            .and_then(|mut engine| engine.run(&args.file, &selection));
        match report {
            Ok(report) => {
                if args.json {
                    output::print_json(&report);
                } else {
                    output::print_run(&report);
                }
                if report.has_failures() { 1 } else { 0 }
            }
            Err(error) => self.fail(Some(&args.file), args.json, &error),
        }
    }

    fn list(&self, args: ListArgs) -> i32 {
        let listed = self.engine(&args.file).and_then(|engine| {
            let doc = LoadedDocument::load(&args.file)?;
            let blocks = engine.list(&doc);
            Ok((doc, blocks))
        });
        match listed {
            Ok((doc, blocks)) => {
                if args.json {
                    output::print_json(&output::Listing::new(&doc, blocks));
                } else {
                    output::emit_warnings(self.color, &doc);
                    output::print_list(&blocks);
                }
                0
            }
            Err(error) => self.fail(Some(&args.file), args.json, &error),
        }
    }

    fn approve(&self, args: ApproveArgs) -> i32 {
        let target = target(args.name, args.document);
        let changes = self
            .engine(&args.file)
            .and_then(|mut engine| engine.approve(&args.file, &target, args.mode));
        match changes {
            Ok(changes) => {
                output::print_changes("approved", &args.file, &changes, args.json);
                0
            }
            Err(error) => self.fail(Some(&args.file), args.json, &error),
        }
    }

    fn revoke(&self, args: RevokeArgs) -> i32 {
        let target = target(args.name, args.document);
        let changes = self
            .engine(&args.file)
            .and_then(|mut engine| engine.revoke(&args.file, &target));
        match changes {
            Ok(changes) => {
                output::print_changes("revoked", &args.file, &changes, args.json);
                0
            }
            Err(error) => self.fail(Some(&args.file), args.json, &error),
        }
    }

    fn approvals(&self, args: ApprovalsArgs) -> i32 {
        let cwd = match std::env::current_dir() {
            Ok(cwd) => cwd,
            Err(e) => {
                eprintln!("error: cannot determine the current directory: {}", e);
                return 1;
            }
        };
        match self.engine(&cwd) {
            Ok(engine) => {
                if args.json {
                    output::print_json(&output::Approvals::new(&engine));
                } else {
                    output::print_approvals(&engine);
                }
                0
            }
            Err(error) => self.fail(None, args.json, &error),
        }
    }
}

fn target(name: Option<String>, document: bool) -> Target {
    match name {
        Some(name) => Target::Block(name),
        None if document => Target::Document,
        None => Target::AllBlocks,
    }
}
