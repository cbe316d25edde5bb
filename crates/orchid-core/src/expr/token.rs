//! Condition expression tokenizer.
//!
//! Turns raw condition text (after placeholder substitution) into a
//! flat token stream. Spans index back into the input so the parser can
//! slice embedded JSON literals out verbatim.

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Str(String),
    Num(f64),
    Ident(String),
    Dot,
    Comma,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Not,
    Minus,
    AndAnd,
    OrOr,
    EqEqEq,
    NotEqEq,
    EqEq,
    NotEq,
    Ge,
    Le,
    Gt,
    Lt,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Str(text) => write!(f, "string {text:?}"),
            TokenKind::Num(number) => write!(f, "number {number}"),
            TokenKind::Ident(name) => write!(f, "identifier `{name}`"),
            TokenKind::Dot => write!(f, "`.`"),
            TokenKind::Comma => write!(f, "`,`"),
            TokenKind::Colon => write!(f, "`:`"),
            TokenKind::LParen => write!(f, "`(`"),
            TokenKind::RParen => write!(f, "`)`"),
            TokenKind::LBracket => write!(f, "`[`"),
            TokenKind::RBracket => write!(f, "`]`"),
            TokenKind::LBrace => write!(f, "`{{`"),
            TokenKind::RBrace => write!(f, "`}}`"),
            TokenKind::Not => write!(f, "`!`"),
            TokenKind::Minus => write!(f, "`-`"),
            TokenKind::AndAnd => write!(f, "`&&`"),
            TokenKind::OrOr => write!(f, "`||`"),
            TokenKind::EqEqEq => write!(f, "`===`"),
            TokenKind::NotEqEq => write!(f, "`!==`"),
            TokenKind::EqEq => write!(f, "`==`"),
            TokenKind::NotEq => write!(f, "`!=`"),
            TokenKind::Ge => write!(f, "`>=`"),
            TokenKind::Le => write!(f, "`<=`"),
            TokenKind::Gt => write!(f, "`>`"),
            TokenKind::Lt => write!(f, "`<`"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.position)
    }
}

pub struct Tokenizer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Tokenizer<'a> {
    pub fn tokenize(input: &'a str) -> Result<Vec<Token>, TokenError> {
        let mut tokenizer = Tokenizer {
            input,
            chars: input.char_indices().peekable(),
        };
        let mut tokens = Vec::new();
        while let Some(token) = tokenizer.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Option<Token>, TokenError> {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }

        let (start, c) = match self.chars.peek().copied() {
            Some(pair) => pair,
            None => return Ok(None),
        };

        let token = match c {
            '"' | '\'' => return self.read_string(start, c).map(Some),
            '0'..='9' => return self.read_number(start).map(Some),
            c if is_ident_start(c) => return Ok(Some(self.read_ident(start))),
            '.' => self.single(start, TokenKind::Dot),
            ',' => self.single(start, TokenKind::Comma),
            ':' => self.single(start, TokenKind::Colon),
            '(' => self.single(start, TokenKind::LParen),
            ')' => self.single(start, TokenKind::RParen),
            '[' => self.single(start, TokenKind::LBracket),
            ']' => self.single(start, TokenKind::RBracket),
            '{' => self.single(start, TokenKind::LBrace),
            '}' => self.single(start, TokenKind::RBrace),
            '-' => self.single(start, TokenKind::Minus),
            '&' => self.pair(start, '&', TokenKind::AndAnd, "expected `&&`")?,
            '|' => self.pair(start, '|', TokenKind::OrOr, "expected `||`")?,
            '=' => {
                self.chars.next();
                if !self.eat('=') {
                    return Err(TokenError {
                        message: "expected `==` or `===`".to_string(),
                        position: start,
                    });
                }
                if self.eat('=') {
                    self.token(start, start + 3, TokenKind::EqEqEq)
                } else {
                    self.token(start, start + 2, TokenKind::EqEq)
                }
            }
            '!' => {
                self.chars.next();
                if self.eat('=') {
                    if self.eat('=') {
                        self.token(start, start + 3, TokenKind::NotEqEq)
                    } else {
                        self.token(start, start + 2, TokenKind::NotEq)
                    }
                } else {
                    self.token(start, start + 1, TokenKind::Not)
                }
            }
            '>' => {
                self.chars.next();
                if self.eat('=') {
                    self.token(start, start + 2, TokenKind::Ge)
                } else {
                    self.token(start, start + 1, TokenKind::Gt)
                }
            }
            '<' => {
                self.chars.next();
                if self.eat('=') {
                    self.token(start, start + 2, TokenKind::Le)
                } else {
                    self.token(start, start + 1, TokenKind::Lt)
                }
            }
            other => {
                return Err(TokenError {
                    message: format!("unexpected character `{other}`"),
                    position: start,
                })
            }
        };
        Ok(Some(token))
    }

    fn single(&mut self, start: usize, kind: TokenKind) -> Token {
        self.chars.next();
        Token {
            kind,
            span: Span {
                start,
                end: start + 1,
            },
        }
    }

    fn pair(
        &mut self,
        start: usize,
        second: char,
        kind: TokenKind,
        message: &str,
    ) -> Result<Token, TokenError> {
        self.chars.next();
        if !self.eat(second) {
            return Err(TokenError {
                message: message.to_string(),
                position: start,
            });
        }
        Ok(Token {
            kind,
            span: Span {
                start,
                end: start + 2,
            },
        })
    }

    fn token(&self, start: usize, end: usize, kind: TokenKind) -> Token {
        Token {
            kind,
            span: Span { start, end },
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if matches!(self.chars.peek(), Some((_, c)) if *c == expected) {
            self.chars.next();
            return true;
        }
        false
    }

    fn read_string(&mut self, start: usize, quote: char) -> Result<Token, TokenError> {
        self.chars.next();
        let mut text = String::new();
        loop {
            match self.chars.next() {
                Some((end, c)) if c == quote => {
                    return Ok(Token {
                        kind: TokenKind::Str(text),
                        span: Span {
                            start,
                            end: end + 1,
                        },
                    });
                }
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, 'n')) => text.push('\n'),
                    Some((_, 't')) => text.push('\t'),
                    Some((_, 'r')) => text.push('\r'),
                    Some((_, escaped)) => text.push(escaped),
                    None => {
                        return Err(TokenError {
                            message: "unterminated string".to_string(),
                            position: start,
                        })
                    }
                },
                Some((_, c)) => text.push(c),
                None => {
                    return Err(TokenError {
                        message: "unterminated string".to_string(),
                        position: start,
                    })
                }
            }
        }
    }

    fn read_number(&mut self, start: usize) -> Result<Token, TokenError> {
        let mut end = start;
        let mut prev = '\0';
        let mut seen_dot = false;
        let mut seen_exp = false;
        while let Some((index, c)) = self.chars.peek().copied() {
            let accept = match c {
                '0'..='9' => true,
                '.' if !seen_dot && !seen_exp => {
                    // A trailing `.ident` is property access, not a decimal.
                    let next_is_digit = self.input[index + 1..]
                        .chars()
                        .next()
                        .map(|n| n.is_ascii_digit())
                        .unwrap_or(false);
                    if next_is_digit {
                        seen_dot = true;
                        true
                    } else {
                        false
                    }
                }
                'e' | 'E' if !seen_exp && prev.is_ascii_digit() => {
                    seen_exp = true;
                    true
                }
                '+' | '-' if matches!(prev, 'e' | 'E') => true,
                _ => false,
            };
            if !accept {
                break;
            }
            self.chars.next();
            prev = c;
            end = index + 1;
        }
        let text = &self.input[start..end];
        let number: f64 = text.parse().map_err(|_| TokenError {
            message: format!("invalid number `{text}`"),
            position: start,
        })?;
        Ok(Token {
            kind: TokenKind::Num(number),
            span: Span { start, end },
        })
    }

    fn read_ident(&mut self, start: usize) -> Token {
        let mut end = start;
        while let Some((index, c)) = self.chars.peek().copied() {
            if !is_ident_char(c) {
                break;
            }
            self.chars.next();
            end = index + c.len_utf8();
        }
        let text = &self.input[start..end];
        Token {
            kind: TokenKind::Ident(text.to_string()),
            span: Span { start, end },
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Tokenizer::tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn tokenizes_a_comparison() {
        assert_eq!(
            kinds("memory.count >= 3"),
            vec![
                TokenKind::Ident("memory".into()),
                TokenKind::Dot,
                TokenKind::Ident("count".into()),
                TokenKind::Ge,
                TokenKind::Num(3.0),
            ]
        );
    }

    #[test]
    fn distinguishes_equality_operators() {
        assert_eq!(kinds("a === b"), vec![
            TokenKind::Ident("a".into()),
            TokenKind::EqEqEq,
            TokenKind::Ident("b".into()),
        ]);
        assert_eq!(kinds("a != b")[1], TokenKind::NotEq);
        assert_eq!(kinds("a !== b")[1], TokenKind::NotEqEq);
        assert_eq!(kinds("!a")[0], TokenKind::Not);
    }

    #[test]
    fn strings_keep_escapes_and_operators() {
        assert_eq!(
            kinds(r#""a && b" == 'c\n'"#),
            vec![
                TokenKind::Str("a && b".into()),
                TokenKind::EqEq,
                TokenKind::Str("c\n".into()),
            ]
        );
    }

    #[test]
    fn numbers_parse_floats_and_exponents() {
        assert_eq!(kinds("1.5"), vec![TokenKind::Num(1.5)]);
        assert_eq!(kinds("2e3"), vec![TokenKind::Num(2000.0)]);
        assert_eq!(kinds("1e-2"), vec![TokenKind::Num(0.01)]);
    }

    #[test]
    fn number_followed_by_property_access_splits() {
        assert_eq!(
            kinds("5.length"),
            vec![
                TokenKind::Num(5.0),
                TokenKind::Dot,
                TokenKind::Ident("length".into()),
            ]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Tokenizer::tokenize("\"abc").unwrap_err();
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn lone_ampersand_is_an_error() {
        assert!(Tokenizer::tokenize("a & b").is_err());
    }

    #[test]
    fn spans_index_into_the_input() {
        let tokens = Tokenizer::tokenize("[1, 2]").unwrap();
        assert_eq!(tokens[0].span, Span { start: 0, end: 1 });
        assert_eq!(tokens.last().unwrap().span, Span { start: 5, end: 6 });
    }
}
