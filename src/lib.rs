//! flowrun - A CI/CD workflow engine
//!
//! Workflows are loaded from YAML, expanded into job instances (one per
//! matrix combination) and executed on a bounded worker pool, respecting
//! `needs` dependencies, `if` guards, fail-fast and cancellation.

pub mod action;
pub mod cli;
pub mod core;
pub mod error;
pub mod execution;
pub mod expression;
pub mod persistence;
pub mod secrets;

// Re-export commonly used types
pub use action::{Action, ActionContext, ActionOutput, ActionRegistry, ActionSpec, InputSpec};
pub use core::{ExecutionPlan, JobResult, RunReport, RunStatus, Status, StepResult, TriggerEvent, Workflow};
pub use error::{ActionError, LoadError, StepFailure};
pub use execution::{EngineConfig, ExecutionEngine, ExecutionEvent};
pub use secrets::{EnvSecrets, OutputMasker, SecretProvider, StaticSecrets};
