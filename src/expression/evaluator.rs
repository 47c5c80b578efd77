//! Expression evaluation against a run-time scope

use crate::expression::parser::{BinaryOp, Expr, Function, ReferencePart, Segment, Template};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Result of evaluating an expression
///
/// Lookups of unknown context paths produce `Undefined` rather than an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    #[default]
    Undefined,
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Numeric coercion used when comparing values of different types
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined | Value::Null => 0.0,
            Value::Bool(true) => 1.0,
            Value::Bool(false) => 0.0,
            Value::Number(n) => *n,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
        }
    }

    /// Convert a scalar YAML value; sequences and mappings are rejected
    pub fn from_yaml(value: &serde_yaml::Value) -> Option<Value> {
        match value {
            serde_yaml::Value::Null => Some(Value::Null),
            serde_yaml::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_yaml::Value::Number(n) => n.as_f64().map(Value::Number),
            serde_yaml::Value::String(s) => Some(Value::String(s.clone())),
            _ => None,
        }
    }

    fn same_kind(&self, other: &Value) -> bool {
        matches!(
            (self, other),
            (Value::Bool(_), Value::Bool(_))
                | (Value::Number(_), Value::Number(_))
                | (Value::String(_), Value::String(_))
                | (Value::Null | Value::Undefined, Value::Null | Value::Undefined)
        )
    }

    /// Loose equality: strings compare case-insensitively, mixed types compare as numbers
    pub fn loose_eq(&self, other: &Value) -> bool {
        if self.same_kind(other) {
            return match (self, other) {
                (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
                (Value::Number(a), Value::Number(b)) => a == b,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                _ => true,
            };
        }
        let (a, b) = (self.to_number(), other.to_number());
        !a.is_nan() && !b.is_nan() && a == b
    }

    fn loose_cmp(&self, other: &Value) -> Option<Ordering> {
        if let (Value::String(a), Value::String(b)) = (self, other) {
            return Some(a.to_lowercase().cmp(&b.to_lowercase()));
        }
        self.to_number().partial_cmp(&other.to_number())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined | Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

/// Health of the surrounding job, consulted by the status-check functions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusView {
    /// A predecessor (for job guards) or an earlier step (for step guards) failed
    pub failed: bool,
    /// The run or this job instance has been cancelled
    pub cancelled: bool,
    /// A predecessor was skipped or cancelled without failing
    pub skipped: bool,
}

impl StatusView {
    /// Nothing upstream failed, was cancelled or skipped
    pub fn success(&self) -> bool {
        !self.failed && !self.cancelled && !self.skipped
    }
}

/// Source of context values for evaluation
pub trait Scope {
    /// Resolve `root.path[0].path[1]...`; unknown paths yield `Value::Undefined`
    fn resolve(&self, root: &str, path: &[String]) -> Value;

    fn status(&self) -> StatusView {
        StatusView::default()
    }
}

impl Expr {
    pub fn evaluate(&self, scope: &dyn Scope) -> Value {
        match self {
            Expr::Literal(value) => value.clone(),
            Expr::Reference(reference) => {
                let path: Vec<String> = reference
                    .parts
                    .iter()
                    .map(|part| match part {
                        ReferencePart::Property(name) => name.clone(),
                        ReferencePart::Index(index) => index.evaluate(scope).to_string(),
                    })
                    .collect();
                scope.resolve(&reference.root, &path)
            }
            Expr::Not(inner) => Value::Bool(!inner.evaluate(scope).is_truthy()),
            Expr::Binary { op, left, right } => eval_binary(*op, left, right, scope),
            Expr::Call { function, args } => eval_call(*function, args, scope),
        }
    }
}

fn eval_binary(op: BinaryOp, left: &Expr, right: &Expr, scope: &dyn Scope) -> Value {
    let lhs = left.evaluate(scope);
    match op {
        // `&&` and `||` yield an operand, not a coerced boolean
        BinaryOp::And => {
            if lhs.is_truthy() {
                right.evaluate(scope)
            } else {
                lhs
            }
        }
        BinaryOp::Or => {
            if lhs.is_truthy() {
                lhs
            } else {
                right.evaluate(scope)
            }
        }
        _ => Value::Bool(compare(op, &lhs, &right.evaluate(scope))),
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> bool {
    match op {
        BinaryOp::Eq => lhs.loose_eq(rhs),
        BinaryOp::Ne => !lhs.loose_eq(rhs),
        BinaryOp::Lt => lhs.loose_cmp(rhs) == Some(Ordering::Less),
        BinaryOp::Le => matches!(lhs.loose_cmp(rhs), Some(Ordering::Less | Ordering::Equal)),
        BinaryOp::Gt => lhs.loose_cmp(rhs) == Some(Ordering::Greater),
        BinaryOp::Ge => matches!(
            lhs.loose_cmp(rhs),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        BinaryOp::And | BinaryOp::Or => false,
    }
}

fn eval_call(function: Function, args: &[Expr], scope: &dyn Scope) -> Value {
    let status = scope.status();
    let arg = |i: usize| args[i].evaluate(scope).to_string().to_lowercase();

    match function {
        Function::Contains => Value::Bool(arg(0).contains(&arg(1))),
        Function::StartsWith => Value::Bool(arg(0).starts_with(&arg(1))),
        Function::EndsWith => Value::Bool(arg(0).ends_with(&arg(1))),
        Function::Format => {
            let pattern = args[0].evaluate(scope).to_string();
            let values: Vec<String> = args[1..]
                .iter()
                .map(|a| a.evaluate(scope).to_string())
                .collect();
            Value::String(format_placeholders(&pattern, &values))
        }
        Function::Success => Value::Bool(status.success()),
        Function::Failure => Value::Bool(status.failed && !status.cancelled),
        Function::Always => Value::Bool(true),
        Function::Cancelled => Value::Bool(status.cancelled),
    }
}

/// Replace `{N}` placeholders; `{{` and `}}` are literal braces
fn format_placeholders(pattern: &str, values: &[String]) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        digits.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if chars.peek() == Some(&'}') && !digits.is_empty() {
                    chars.next();
                    let index: usize = digits.parse().unwrap_or(usize::MAX);
                    if let Some(value) = values.get(index) {
                        out.push_str(value);
                    }
                } else {
                    out.push('{');
                    out.push_str(&digits);
                }
            }
            other => out.push(other),
        }
    }
    out
}

impl Template {
    /// Render the template, substituting each marker with its value's string form
    pub fn render(&self, scope: &dyn Scope) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Expr(expr) => out.push_str(&expr.evaluate(scope).to_string()),
            }
        }
        out
    }
}
