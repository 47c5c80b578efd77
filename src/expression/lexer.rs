//! Tokenizer for `${{ }}` expressions

use crate::expression::ExpressionError;
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

/// Token types produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Null,
    True,
    False,
    Number(f64),
    String(String),

    Identifier(String),

    // Operators
    Eq,  // ==
    Ne,  // !=
    Lt,  // <
    Le,  // <=
    Gt,  // >
    Ge,  // >=
    And, // &&
    Or,  // ||
    Not, // !
    Dot,
    Comma,

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Null => write!(f, "null"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Number(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "'{}'", s),
            Token::Identifier(s) => write!(f, "{}", s),
            Token::Eq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::And => write!(f, "&&"),
            Token::Or => write!(f, "||"),
            Token::Not => write!(f, "!"),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Eof => write!(f, "end of expression"),
        }
    }
}

/// A token paired with its byte offset in the source expression
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

pub struct Lexer<'a> {
    chars: Peekable<CharIndices<'a>>,
    len: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
            len: input.len(),
        }
    }

    /// Tokenize the entire input, always ending with `Token::Eof`
    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, ExpressionError> {
        let mut tokens = Vec::new();
        loop {
            let spanned = self.next_token()?;
            let done = spanned.token == Token::Eof;
            tokens.push(spanned);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Spanned, ExpressionError> {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }

        let Some(&(position, ch)) = self.chars.peek() else {
            return Ok(Spanned {
                token: Token::Eof,
                position: self.len,
            });
        };

        let token = match ch {
            '.' => self.single(Token::Dot),
            ',' => self.single(Token::Comma),
            '(' => self.single(Token::LParen),
            ')' => self.single(Token::RParen),
            '[' => self.single(Token::LBracket),
            ']' => self.single(Token::RBracket),
            '=' => {
                self.chars.next();
                self.expect_char('=', position, "expected '==', found single '='")?;
                Token::Eq
            }
            '!' => {
                self.chars.next();
                if self.eat('=') {
                    Token::Ne
                } else {
                    Token::Not
                }
            }
            '<' => {
                self.chars.next();
                if self.eat('=') {
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                self.chars.next();
                if self.eat('=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '&' => {
                self.chars.next();
                self.expect_char('&', position, "expected '&&', found single '&'")?;
                Token::And
            }
            '|' => {
                self.chars.next();
                self.expect_char('|', position, "expected '||', found single '|'")?;
                Token::Or
            }
            '\'' => self.read_string(position)?,
            c if c.is_ascii_digit() || c == '-' => self.read_number(position)?,
            c if c.is_alphabetic() || c == '_' => self.read_identifier(),
            other => {
                return Err(ExpressionError::new(
                    format!("unexpected character '{}'", other),
                    position,
                ))
            }
        };

        Ok(Spanned { token, position })
    }

    fn single(&mut self, token: Token) -> Token {
        self.chars.next();
        token
    }

    fn eat(&mut self, expected: char) -> bool {
        if matches!(self.chars.peek(), Some(&(_, c)) if c == expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn expect_char(
        &mut self,
        expected: char,
        position: usize,
        message: &str,
    ) -> Result<(), ExpressionError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(ExpressionError::new(message, position))
        }
    }

    /// Single-quoted string; a doubled quote (`''`) is an escaped quote
    fn read_string(&mut self, start: usize) -> Result<Token, ExpressionError> {
        self.chars.next();
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some((_, '\'')) => {
                    if self.eat('\'') {
                        value.push('\'');
                    } else {
                        return Ok(Token::String(value));
                    }
                }
                Some((_, c)) => value.push(c),
                None => {
                    return Err(ExpressionError::new("unterminated string literal", start));
                }
            }
        }
    }

    fn read_number(&mut self, start: usize) -> Result<Token, ExpressionError> {
        let mut text = String::new();
        if let Some(&(_, '-')) = self.chars.peek() {
            text.push('-');
            self.chars.next();
        }
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ExpressionError::new(format!("invalid number '{}'", text), start))
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                ident.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        match ident.as_str() {
            "null" => Token::Null,
            "true" => Token::True,
            "false" => Token::False,
            _ => Token::Identifier(ident),
        }
    }
}
