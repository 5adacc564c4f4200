//! Attribute Expressions
//!
//! A small boolean language over the connection's attribute map:
//!
//! ```text
//! attrs[':method'] == 'GET' and not attrs[':path'].startswith('/admin')
//! 'user-agent' in attrs or attrs['host'] != 'localhost'
//! ```
//!
//! A bare `attrs['k']` is true when the key is present with a non-empty value.
//! Comparisons against a missing key are false.

use std::collections::HashMap;

use crate::error::ConfigError;

/// Parsed attribute expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrExpr {
    Eq(String, String),
    Ne(String, String),
    Exists(String),
    Truthy(String),
    StartsWith(String, String),
    EndsWith(String, String),
    Not(Box<AttrExpr>),
    And(Box<AttrExpr>, Box<AttrExpr>),
    Or(Box<AttrExpr>, Box<AttrExpr>),
}

impl AttrExpr {
    pub fn eval(&self, attrs: &HashMap<String, String>) -> bool {
        match self {
            AttrExpr::Eq(key, value) => attrs.get(key).is_some_and(|v| v == value),
            AttrExpr::Ne(key, value) => attrs.get(key).is_some_and(|v| v != value),
            AttrExpr::Exists(key) => attrs.contains_key(key),
            AttrExpr::Truthy(key) => attrs.get(key).is_some_and(|v| !v.is_empty()),
            AttrExpr::StartsWith(key, prefix) => attrs.get(key).is_some_and(|v| v.starts_with(prefix.as_str())),
            AttrExpr::EndsWith(key, suffix) => attrs.get(key).is_some_and(|v| v.ends_with(suffix.as_str())),
            AttrExpr::Not(inner) => !inner.eval(attrs),
            AttrExpr::And(a, b) => a.eval(attrs) && b.eval(attrs),
            AttrExpr::Or(a, b) => a.eval(attrs) || b.eval(attrs),
        }
    }
}

/// Compiled attribute matcher
#[derive(Debug, Clone)]
pub struct AttributeMatcher {
    source: String,
    expr: AttrExpr,
}

impl AttributeMatcher {
    pub fn new(source: &str) -> Result<Self, ConfigError> {
        let expr = parse(source).map_err(|reason| ConfigError::InvalidAttributeExpression {
            expr: source.to_string(),
            reason,
        })?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, attrs: &HashMap<String, String>) -> bool {
        self.expr.eval(attrs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    EqEq,
    NotEq,
    Str(String),
    Ident(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '=' | '!' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(format!("expected '=' after '{}'", c));
                }
                tokens.push(if c == '=' { Token::EqEq } else { Token::NotEq });
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(escaped) => value.push(escaped),
                            None => return Err("unterminated escape".to_string()),
                        },
                        Some(ch) if ch == quote => break,
                        Some(ch) => value.push(ch),
                        None => return Err("unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}

/// Deepest expression tree accepted, counting nesting and operator chains
const MAX_DEPTH: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

fn parse(input: &str) -> Result<AttrExpr, String> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser { tokens, pos: 0, depth: 0 };
    let expr = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(format!("unexpected trailing token {:?}", token));
    }
    Ok(expr)
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {:?}, found {:?}", expected, token)),
            None => Err(format!("expected {:?}, found end of expression", expected)),
        }
    }

    fn expect_str(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Token::Str(s)) => Ok(s),
            Some(token) => Err(format!("expected string literal, found {:?}", token)),
            None => Err("expected string literal, found end of expression".to_string()),
        }
    }

    fn descend(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(format!("expression nested deeper than {}", MAX_DEPTH));
        }
        Ok(())
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(id)) if id == keyword)
    }

    fn parse_or(&mut self) -> Result<AttrExpr, String> {
        let mut left = self.parse_and()?;
        let mut chained = 0;
        while self.at_keyword("or") {
            self.pos += 1;
            self.descend()?;
            chained += 1;
            let right = self.parse_and()?;
            left = AttrExpr::Or(Box::new(left), Box::new(right));
        }
        self.depth -= chained;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<AttrExpr, String> {
        let mut left = self.parse_not()?;
        let mut chained = 0;
        while self.at_keyword("and") {
            self.pos += 1;
            self.descend()?;
            chained += 1;
            let right = self.parse_not()?;
            left = AttrExpr::And(Box::new(left), Box::new(right));
        }
        self.depth -= chained;
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<AttrExpr, String> {
        if self.at_keyword("not") {
            self.pos += 1;
            self.descend()?;
            let inner = self.parse_not()?;
            self.depth -= 1;
            return Ok(AttrExpr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<AttrExpr, String> {
        match self.next() {
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            Some(Token::Str(key)) => {
                if !self.at_keyword("in") {
                    return Err("expected 'in' after string literal".to_string());
                }
                self.pos += 1;
                self.expect(Token::Ident("attrs".to_string()))?;
                Ok(AttrExpr::Exists(key))
            }
            Some(Token::Ident(id)) if id == "attrs" => {
                self.expect(Token::LBracket)?;
                let key = self.expect_str()?;
                self.expect(Token::RBracket)?;
                self.parse_access_tail(key)
            }
            Some(token) => Err(format!("unexpected token {:?}", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn parse_access_tail(&mut self, key: String) -> Result<AttrExpr, String> {
        match self.peek() {
            Some(Token::EqEq) => {
                self.pos += 1;
                Ok(AttrExpr::Eq(key, self.expect_str()?))
            }
            Some(Token::NotEq) => {
                self.pos += 1;
                Ok(AttrExpr::Ne(key, self.expect_str()?))
            }
            Some(Token::Dot) => {
                self.pos += 1;
                let method = match self.next() {
                    Some(Token::Ident(method)) => method,
                    other => return Err(format!("expected method name, found {:?}", other)),
                };
                self.expect(Token::LParen)?;
                let arg = self.expect_str()?;
                self.expect(Token::RParen)?;
                match method.as_str() {
                    "startswith" => Ok(AttrExpr::StartsWith(key, arg)),
                    "endswith" => Ok(AttrExpr::EndsWith(key, arg)),
                    other => Err(format!("unsupported method '{}'", other)),
                }
            }
            _ => Ok(AttrExpr::Truthy(key)),
        }
    }
}
