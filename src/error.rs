//! Error types for workflow loading and step execution

use crate::expression::ExpressionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Fatal problems found while loading a workflow, reported before anything runs
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid expression in {location}: {source}")]
    ExpressionSyntax {
        location: String,
        #[source]
        source: ExpressionError,
    },

    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("job '{job}' needs unknown job '{needed}'")]
    UnknownJob { job: String, needed: String },

    #[error("duplicate job id '{0}'")]
    DuplicateJob(String),

    #[error("duplicate step id '{step}' in job '{job}'")]
    DuplicateStep { job: String, step: String },

    #[error("invalid job '{job}': {reason}")]
    InvalidJob { job: String, reason: String },

    #[error("invalid {step} in job '{job}': {reason}")]
    InvalidStep {
        job: String,
        step: String,
        reason: String,
    },

    #[error("invalid action '{action}': {reason}")]
    InvalidAction { action: String, reason: String },

    #[error("invalid matrix for job '{job}': {reason}")]
    Matrix { job: String, reason: String },

    #[error("failed to parse workflow: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("failed to read workflow: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    pub fn expression(location: impl Into<String>, source: ExpressionError) -> Self {
        LoadError::ExpressionSyntax {
            location: location.into(),
            source,
        }
    }
}

/// Why a step did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The process exited with a non-zero code
    ExitCode(i32),
    Timeout,
    /// The shell or action process could not be started
    Spawn,
    Action,
    /// A required action input was missing
    Input,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::ExitCode(code) => write!(f, "exit code {}", code),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Spawn => write!(f, "spawn error"),
            FailureKind::Action => write!(f, "action error"),
            FailureKind::Input => write!(f, "input error"),
        }
    }
}

/// A failed step, recorded in its result rather than propagated
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StepFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn exit_code(code: i32) -> Self {
        Self::new(
            FailureKind::ExitCode(code),
            format!("process exited with code {}", code),
        )
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("timed out after {:.1}s", after.as_secs_f64()),
        )
    }
}

/// Errors raised by action implementations
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unknown action '{0}'")]
    Unknown(String),

    #[error("missing required input '{0}'")]
    MissingInput(String),

    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Failed(String),
}

impl From<ActionError> for StepFailure {
    fn from(err: ActionError) -> Self {
        let kind = match &err {
            ActionError::MissingInput(_) => FailureKind::Input,
            ActionError::Spawn { .. } => FailureKind::Spawn,
            ActionError::Unknown(_) | ActionError::Failed(_) => FailureKind::Action,
        };
        StepFailure::new(kind, err.to_string())
    }
}
