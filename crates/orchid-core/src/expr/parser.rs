//! Condition expression parser.
//!
//! Precedence-climbing over the token stream, producing a typed AST
//! that is evaluated exactly once. Grammar, loosest first:
//!
//! ```text
//! or    := and ( "||" and )*
//! and   := eq ( "&&" eq )*
//! eq    := cmp ( ("===" | "!==" | "==" | "!=") cmp )*
//! cmp   := unary ( (">=" | "<=" | ">" | "<") unary )*
//! unary := "!" unary | "-" unary | postfix
//! postfix := primary ( "." ident | ".length" | ".includes(expr)" | ... )*
//! primary := string | number | true | false | null | undefined
//!          | ident | "(" or ")" | json-array | json-object
//! ```
//!
//! Bracketed JSON literals (placeholder substitution embeds arrays and
//! objects that way) are sliced back out of the input by token span and
//! handed to `serde_json`.

use serde_json::Value;
use std::fmt;

use super::token::{Token, TokenKind, Tokenizer};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Dotted context path, resolved lazily at evaluation.
    Path(String),
    Length(Box<Expr>),
    StrCall {
        recv: Box<Expr>,
        method: StrMethod,
        arg: Box<Expr>,
    },
    Not(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrMethod {
    Includes,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ParseError {
    fn new(message: impl Into<String>) -> Self {
        ParseError {
            message: message.into(),
        }
    }
}

pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let tokens = Tokenizer::tokenize(input).map_err(|err| ParseError::new(err.to_string()))?;
    let mut parser = Parser {
        input,
        tokens,
        pos: 0,
    };
    let expr = parser.parse_expr(0)?;
    if let Some(token) = parser.peek() {
        return Err(ParseError::new(format!(
            "unexpected {} after expression",
            token.kind
        )));
    }
    Ok(expr)
}

fn binding_power(op: BinOp) -> u8 {
    match op {
        BinOp::Or => 1,
        BinOp::And => 2,
        BinOp::StrictEq | BinOp::StrictNe | BinOp::LooseEq | BinOp::LooseNe => 3,
        BinOp::Gt | BinOp::Ge | BinOp::Lt | BinOp::Le => 4,
    }
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), ParseError> {
        match self.advance() {
            Some(token) if &token.kind == kind => Ok(()),
            Some(token) => Err(ParseError::new(format!(
                "expected {kind}, found {}",
                token.kind
            ))),
            None => Err(ParseError::new(format!(
                "expected {kind}, found end of input"
            ))),
        }
    }

    fn peek_binop(&self) -> Option<BinOp> {
        match self.peek().map(|t| &t.kind)? {
            TokenKind::OrOr => Some(BinOp::Or),
            TokenKind::AndAnd => Some(BinOp::And),
            TokenKind::EqEqEq => Some(BinOp::StrictEq),
            TokenKind::NotEqEq => Some(BinOp::StrictNe),
            TokenKind::EqEq => Some(BinOp::LooseEq),
            TokenKind::NotEq => Some(BinOp::LooseNe),
            TokenKind::Gt => Some(BinOp::Gt),
            TokenKind::Ge => Some(BinOp::Ge),
            TokenKind::Lt => Some(BinOp::Lt),
            TokenKind::Le => Some(BinOp::Le),
            _ => None,
        }
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.peek_binop() {
            let bp = binding_power(op);
            if bp < min_bp {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_expr(bp + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Not) => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(TokenKind::Minus) => {
                self.pos += 1;
                match self.parse_unary()? {
                    Expr::Literal(Value::Number(number)) => {
                        let negated = -number.as_f64().unwrap_or(0.0);
                        Ok(Expr::Literal(number_value(negated)))
                    }
                    _ => Err(ParseError::new("`-` applies to numbers only")),
                }
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Dot)) {
            self.pos += 1;
            let segment = match self.advance() {
                Some(token) => token.kind.clone(),
                None => return Err(ParseError::new("expected property after `.`")),
            };
            expr = match segment {
                TokenKind::Ident(name) if name == "length" && !self.at(&TokenKind::LParen) => {
                    Expr::Length(Box::new(expr))
                }
                TokenKind::Ident(name) if str_method(&name).is_some() && self.at(&TokenKind::LParen) => {
                    self.pos += 1;
                    let arg = self.parse_expr(0)?;
                    self.expect(&TokenKind::RParen)?;
                    Expr::StrCall {
                        recv: Box::new(expr),
                        method: str_method(&name).unwrap_or(StrMethod::Includes),
                        arg: Box::new(arg),
                    }
                }
                TokenKind::Ident(name) => match expr {
                    Expr::Path(path) => Expr::Path(format!("{path}.{name}")),
                    _ => return Err(ParseError::new(format!("unexpected property `.{name}`"))),
                },
                TokenKind::Num(index) => match expr {
                    Expr::Path(path) if index.fract() == 0.0 => {
                        Expr::Path(format!("{path}.{}", index as u64))
                    }
                    _ => return Err(ParseError::new("unexpected numeric property access")),
                },
                other => {
                    return Err(ParseError::new(format!(
                        "expected property after `.`, found {other}"
                    )))
                }
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = match self.advance() {
            Some(token) => token.clone(),
            None => return Err(ParseError::new("unexpected end of input")),
        };
        match token.kind {
            TokenKind::Str(text) => Ok(Expr::Literal(Value::String(text))),
            TokenKind::Num(number) => Ok(Expr::Literal(number_value(number))),
            TokenKind::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                _ => Ok(Expr::Path(name)),
            },
            TokenKind::LParen => {
                let expr = self.parse_expr(0)?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => self.parse_json_literal(
                token.span.start,
                TokenKind::LBracket,
                TokenKind::RBracket,
            ),
            TokenKind::LBrace => {
                self.parse_json_literal(token.span.start, TokenKind::LBrace, TokenKind::RBrace)
            }
            other => Err(ParseError::new(format!("unexpected {other}"))),
        }
    }

    /// Slices a balanced `[...]`/`{...}` region out of the raw input and
    /// parses it as JSON. The opening token is already consumed.
    fn parse_json_literal(
        &mut self,
        start: usize,
        open: TokenKind,
        close: TokenKind,
    ) -> Result<Expr, ParseError> {
        let mut depth = 1usize;
        while depth > 0 {
            let token = match self.advance() {
                Some(token) => token,
                None => return Err(ParseError::new("unbalanced literal")),
            };
            if token.kind == open {
                depth += 1;
            } else if token.kind == close {
                depth -= 1;
                if depth == 0 {
                    let end = token.span.end;
                    let raw = &self.input[start..end];
                    let value: Value = serde_json::from_str(raw).map_err(|err| {
                        ParseError::new(format!("invalid literal `{raw}`: {err}"))
                    })?;
                    return Ok(Expr::Literal(value));
                }
            }
        }
        Err(ParseError::new("unbalanced literal"))
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek().map(|t| &t.kind) == Some(kind)
    }
}

fn str_method(name: &str) -> Option<StrMethod> {
    match name {
        "includes" => Some(StrMethod::Includes),
        "startsWith" => Some(StrMethod::StartsWith),
        "endsWith" => Some(StrMethod::EndsWith),
        _ => None,
    }
}

fn number_value(number: f64) -> Value {
    if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        Value::from(number as i64)
    } else {
        serde_json::Number::from_f64(number)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
