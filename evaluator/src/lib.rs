pub mod approval;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod resolver;
pub mod workspace;

pub use approval::{ApprovalMode, ApprovalStatus, ApprovalStore, Confirm, FixedAnswer};
pub use engine::{Engine, LoadedDocument, RunReport, Selection, Target};
pub use error::EvalError;
pub use executor::{ExecParams, Execution, Outcome, execute};
pub use resolver::{EvaluatorHandle, Resolver};
pub use workspace::Workspace;
