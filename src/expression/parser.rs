//! Recursive descent parser producing the expression AST

use crate::expression::lexer::{Lexer, Spanned, Token};
use crate::expression::{ExpressionError, Value};
use std::fmt;

/// Abstract syntax tree for an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),

    /// Context lookup: `matrix.os`, `steps.build.outputs['path']`
    Reference(Reference),

    Call { function: Function, args: Vec<Expr> },

    Not(Box<Expr>),

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    /// Context namespace, lowercased (`github`, `env`, `steps`, ...)
    pub root: String,
    pub parts: Vec<ReferencePart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReferencePart {
    Property(String),
    Index(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        write!(f, "{}", symbol)
    }
}

/// Built-in functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Contains,
    StartsWith,
    EndsWith,
    Format,
    Success,
    Failure,
    Always,
    Cancelled,
}

impl Function {
    /// Look up a function by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "contains" => Some(Function::Contains),
            "startswith" => Some(Function::StartsWith),
            "endswith" => Some(Function::EndsWith),
            "format" => Some(Function::Format),
            "success" => Some(Function::Success),
            "failure" => Some(Function::Failure),
            "always" => Some(Function::Always),
            "cancelled" => Some(Function::Cancelled),
            _ => None,
        }
    }

    /// Whether this function inspects job status
    pub fn is_status_check(self) -> bool {
        matches!(
            self,
            Function::Success | Function::Failure | Function::Always | Function::Cancelled
        )
    }

    fn accepts(self, argc: usize) -> bool {
        match self {
            Function::Contains | Function::StartsWith | Function::EndsWith => argc == 2,
            Function::Format => argc >= 1,
            Function::Success | Function::Failure | Function::Always | Function::Cancelled => {
                argc == 0
            }
        }
    }
}

impl Expr {
    /// True if the expression calls `success()`, `failure()`, `always()` or `cancelled()`
    ///
    /// Guards containing a status check replace the implicit `success()` policy.
    pub fn has_status_check(&self) -> bool {
        match self {
            Expr::Literal(_) => false,
            Expr::Reference(reference) => reference.parts.iter().any(|part| match part {
                ReferencePart::Index(expr) => expr.has_status_check(),
                ReferencePart::Property(_) => false,
            }),
            Expr::Call { function, args } => {
                function.is_status_check() || args.iter().any(Expr::has_status_check)
            }
            Expr::Not(inner) => inner.has_status_check(),
            Expr::Binary { left, right, .. } => left.has_status_check() || right.has_status_check(),
        }
    }
}

pub struct ExprParser {
    tokens: Vec<Spanned>,
    position: usize,
}

impl ExprParser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// Parse a complete expression from a string
    pub fn parse_str(input: &str) -> Result<Expr, ExpressionError> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = Self::new(tokens);
        parser.parse()
    }

    pub fn parse(&mut self) -> Result<Expr, ExpressionError> {
        if self.check(&Token::Eof) {
            return Err(self.error("empty expression"));
        }
        let expr = self.parse_or()?;
        if !self.check(&Token::Eof) {
            return Err(self.error(&format!("unexpected token '{}'", self.peek())));
        }
        Ok(expr)
    }

    // Precedence (lowest to highest):
    // 1. Or: ||
    // 2. And: &&
    // 3. Equality: == !=
    // 4. Comparison: < <= > >=
    // 5. Unary: !
    // 6. Postfix: . [] ()

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.check(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_equality()?;
        while self.check(&Token::And) {
            self.advance();
            let right = self.parse_equality()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinaryOp::Eq,
                Token::Ne => BinaryOp::Ne,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.check(&Token::Not) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        let token = self.peek().clone();
        match token {
            Token::Null => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            Token::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Literal(Value::Number(n)))
            }
            Token::String(s) => {
                self.advance();
                Ok(Expr::Literal(Value::String(s)))
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_or()?;
                self.expect(&Token::RParen, "expected ')'")?;
                Ok(expr)
            }
            Token::Identifier(name) => {
                let start = self.current_position();
                self.advance();
                if self.check(&Token::LParen) {
                    self.parse_call(&name, start)
                } else {
                    self.parse_reference(name)
                }
            }
            other => Err(self.error(&format!("unexpected token '{}'", other))),
        }
    }

    fn parse_call(&mut self, name: &str, start: usize) -> Result<Expr, ExpressionError> {
        let function = Function::from_name(name).ok_or_else(|| {
            ExpressionError::new(format!("unknown function '{}'", name), start)
        })?;
        self.advance(); // (

        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.check(&Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(&Token::RParen, "expected ')' after function arguments")?;

        if !function.accepts(args.len()) {
            return Err(ExpressionError::new(
                format!("wrong number of arguments for '{}': {}", name, args.len()),
                start,
            ));
        }
        Ok(Expr::Call { function, args })
    }

    fn parse_reference(&mut self, root: String) -> Result<Expr, ExpressionError> {
        let mut parts = Vec::new();
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    match self.peek().clone() {
                        Token::Identifier(name) => {
                            self.advance();
                            parts.push(ReferencePart::Property(name));
                        }
                        // `true`, `false` and `null` are valid property names after a dot
                        Token::True | Token::False | Token::Null => {
                            let name = self.peek().to_string();
                            self.advance();
                            parts.push(ReferencePart::Property(name));
                        }
                        other => {
                            return Err(
                                self.error(&format!("expected property name, found '{}'", other))
                            )
                        }
                    }
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_or()?;
                    self.expect(&Token::RBracket, "expected ']'")?;
                    parts.push(ReferencePart::Index(Box::new(index)));
                }
                _ => break,
            }
        }
        Ok(Expr::Reference(Reference {
            root: root.to_ascii_lowercase(),
            parts,
        }))
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.position)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn current_position(&self) -> usize {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map(|s| s.position)
            .unwrap_or(0)
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn expect(&mut self, token: &Token, message: &str) -> Result<(), ExpressionError> {
        if self.check(token) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(message))
        }
    }

    fn error(&self, message: &str) -> ExpressionError {
        ExpressionError::new(message, self.current_position())
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// One piece of an interpolated string
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Expr(Expr),
}

/// A string with embedded `${{ }}` markers, parsed once at load time
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Template {
    pub segments: Vec<Segment>,
}

impl Template {
    /// Split `text` into literal and expression segments
    ///
    /// A `}}` inside a quoted string literal does not close the marker.
    pub fn parse(text: &str) -> Result<Self, ExpressionError> {
        let mut segments = Vec::new();
        let mut rest = text;
        let mut offset = 0;

        while let Some(start) = rest.find("${{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let body_start = start + 3;
            let body_len = find_marker_end(&rest[body_start..]).ok_or_else(|| {
                ExpressionError::new("unterminated '${{' marker", offset + start)
            })?;
            let body = &rest[body_start..body_start + body_len];
            let expr = ExprParser::parse_str(body)
                .map_err(|e| e.shifted(offset + body_start))?;
            segments.push(Segment::Expr(expr));

            let consumed = body_start + body_len + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// Template that renders `text` verbatim, markers included
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::Text(text.into())],
        }
    }

    /// True when the text contained no markers
    pub fn is_literal(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Text(_)))
    }
}

fn find_marker_end(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_string = !in_string,
            b'}' if !in_string && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Parse an `if:` guard, accepting either a bare expression or one wrapped in `${{ }}`
pub fn parse_condition(text: &str) -> Result<Expr, ExpressionError> {
    let trimmed = text.trim();
    if trimmed.starts_with("${{") && trimmed.ends_with("}}") {
        let template = Template::parse(trimmed)?;
        if let [Segment::Expr(expr)] = template.segments.as_slice() {
            return Ok(expr.clone());
        }
    }
    ExprParser::parse_str(trimmed)
}
