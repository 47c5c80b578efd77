//! Core domain models for workflows
//!
//! This module defines the workflow model compiled from YAML, the job graph,
//! matrix expansion, the execution plan and the records a run produces.

pub mod config;
pub mod context;
pub mod graph;
pub mod matrix;
pub mod plan;
pub mod state;
pub mod workflow;

pub use context::*;
pub use graph::DependencyGraph;
pub use matrix::{ExcludeMatch, ExpansionPolicy, IncludeMode, Matrix, MatrixBinding};
pub use plan::{ExecutionPlan, JobInstance};
pub use state::*;
pub use workflow::*;
