//! The `${{ }}` expression language
//!
//! Expressions are parsed once when a workflow loads and evaluated many times
//! against a [`Scope`] during the run.

pub mod evaluator;
pub mod lexer;
pub mod parser;

pub use evaluator::{Scope, StatusView, Value};
pub use parser::{parse_condition, Expr, ExprParser, Template};

use thiserror::Error;

/// Malformed expression syntax, with the byte offset where it was detected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at position {position}")]
pub struct ExpressionError {
    pub message: String,
    pub position: usize,
}

impl ExpressionError {
    pub fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }

    /// Rebase the position onto an enclosing string
    pub fn shifted(mut self, offset: usize) -> Self {
        self.position += offset;
        self
    }
}

/// Parse and evaluate a bare expression
pub fn evaluate(expr: &str, scope: &dyn Scope) -> Result<Value, ExpressionError> {
    Ok(ExprParser::parse_str(expr)?.evaluate(scope))
}

/// Replace every `${{ expr }}` in `text` with the string form of its value
pub fn interpolate(text: &str, scope: &dyn Scope) -> Result<String, ExpressionError> {
    Ok(Template::parse(text)?.render(scope))
}
