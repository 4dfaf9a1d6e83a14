//! Condition expressions for jobs and steps
//!
//! Conditions are parsed once into a small expression tree and evaluated
//! against the variables of a job instance. Evaluation is permissive:
//! unknown variables are `null`, ordering comparisons against `null` are
//! false, and a condition that failed to parse evaluates to an error the
//! executor treats as false.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors from parsing or evaluating a condition
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),

    #[error("unexpected token '{found}', expected {expected}")]
    UnexpectedToken { found: String, expected: String },

    #[error("unexpected end of expression, expected {0}")]
    UnexpectedEnd(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}' takes {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("condition '{condition}' is invalid: {error}")]
    Invalid {
        condition: String,
        error: Box<ConditionError>,
    },
}

/// Source of variable values for condition evaluation
pub trait VariableSource {
    /// Look up a dotted variable name such as `matrix.os`
    fn lookup(&self, name: &str) -> Option<String>;
}

impl VariableSource for HashMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Runtime value of an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
        }
    }

    fn as_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Number(n) => Some(*n),
            Value::String(s) => s.trim().parse::<f64>().ok(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// Built-in string functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Contains,
    StartsWith,
    EndsWith,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "contains" => Some(Function::Contains),
            "startsWith" => Some(Function::StartsWith),
            "endsWith" => Some(Function::EndsWith),
            _ => None,
        }
    }
}

/// Parsed condition expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Variable(String),
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Call { function: Function, args: Vec<Expr> },
}

impl Expr {
    /// Parse an expression. A surrounding `${{ ... }}` is accepted and stripped.
    pub fn parse(source: &str) -> Result<Expr, ConditionError> {
        let trimmed = source.trim();
        let inner = trimmed
            .strip_prefix("${{")
            .and_then(|s| s.strip_suffix("}}"))
            .unwrap_or(trimmed);

        let tokens = tokenize(inner)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(ConditionError::UnexpectedToken {
                found: token.to_string(),
                expected: "end of expression".to_string(),
            }),
        }
    }

    /// Evaluate to a value. `&&` and `||` short-circuit.
    pub fn eval(&self, vars: &dyn VariableSource) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Variable(name) => vars.lookup(name).map(Value::String).unwrap_or(Value::Null),
            Expr::Compare { op, lhs, rhs } => {
                Value::Bool(compare(*op, &lhs.eval(vars), &rhs.eval(vars)))
            }
            Expr::Not(inner) => Value::Bool(!inner.eval(vars).is_truthy()),
            Expr::And(lhs, rhs) => {
                let left = lhs.eval(vars);
                if !left.is_truthy() {
                    return left;
                }
                rhs.eval(vars)
            }
            Expr::Or(lhs, rhs) => {
                let left = lhs.eval(vars);
                if left.is_truthy() {
                    return left;
                }
                rhs.eval(vars)
            }
            Expr::Call { function, args } => {
                let arg = |i: usize| args.get(i).map(|a| a.eval(vars)).unwrap_or(Value::Null).as_text();
                let haystack = arg(0);
                let needle = arg(1);
                Value::Bool(match function {
                    Function::Contains => haystack.contains(&needle),
                    Function::StartsWith => haystack.starts_with(&needle),
                    Function::EndsWith => haystack.ends_with(&needle),
                })
            }
        }
    }

    /// Collect every variable name referenced by the expression
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Variable(name) => out.push(name),
            Expr::Compare { lhs, rhs, .. } | Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
                lhs.collect_variables(out);
                rhs.collect_variables(out);
            }
            Expr::Not(inner) => inner.collect_variables(out),
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_variables(out);
                }
            }
        }
    }
}

/// `null` equals only `null` and the empty string; ordering involving `null` is false.
fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> bool {
    let either_null = matches!(lhs, Value::Null) || matches!(rhs, Value::Null);

    match op {
        CompareOp::Eq => values_equal(lhs, rhs),
        CompareOp::Ne => !values_equal(lhs, rhs),
        _ if either_null => false,
        _ => {
            let ordering = match (lhs.as_number(), rhs.as_number()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => Some(lhs.as_text().cmp(&rhs.as_text())),
            };
            match ordering {
                Some(ord) => match op {
                    CompareOp::Lt => ord.is_lt(),
                    CompareOp::Le => ord.is_le(),
                    CompareOp::Gt => ord.is_gt(),
                    CompareOp::Ge => ord.is_ge(),
                    CompareOp::Eq | CompareOp::Ne => false,
                },
                None => false,
            }
        }
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => true,
        (Value::Null, other) | (other, Value::Null) => other.as_text().is_empty() && matches!(other, Value::String(_)),
        (Value::Number(_), _) | (_, Value::Number(_)) => match (lhs.as_number(), rhs.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        _ => lhs.as_text() == rhs.as_text(),
    }
}

/// A job or step condition: the source text plus its compiled form
#[derive(Debug, Clone)]
pub struct Condition {
    source: String,
    compiled: Result<Expr, ConditionError>,
}

impl Condition {
    pub fn parse(source: impl Into<String>) -> Self {
        let source = source.into();
        let compiled = Expr::parse(&source);
        Self { source, compiled }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> Option<&Expr> {
        self.compiled.as_ref().ok()
    }

    /// The parse error, if the condition is not well formed
    pub fn error(&self) -> Option<&ConditionError> {
        self.compiled.as_ref().err()
    }

    pub fn evaluate(&self, vars: &dyn VariableSource) -> Result<bool, ConditionError> {
        match &self.compiled {
            Ok(expr) => Ok(expr.eval(vars).is_truthy()),
            Err(error) => Err(ConditionError::Invalid {
                condition: self.source.clone(),
                error: Box::new(error.clone()),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Op(CompareOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "{}", s),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::Num(n) => write!(f, "{}", n),
            Token::Op(op) => write!(f, "{}", op),
            Token::And => f.write_str("&&"),
            Token::Or => f.write_str("||"),
            Token::Not => f.write_str("!"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Comma => f.write_str(","),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, ch) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        match ch {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Eq));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let (op, width) = match (ch, next) {
                    ('<', Some('=')) => (CompareOp::Le, 2),
                    ('>', Some('=')) => (CompareOp::Ge, 2),
                    ('<', _) => (CompareOp::Lt, 1),
                    _ => (CompareOp::Gt, 1),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
            '\'' | '"' => {
                let quote = ch;
                let mut value = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while j < chars.len() {
                    let c = chars[j].1;
                    // '' inside a single-quoted string is an escaped quote
                    if c == quote {
                        if quote == '\'' && chars.get(j + 1).map(|(_, c)| *c) == Some('\'') {
                            value.push('\'');
                            j += 2;
                            continue;
                        }
                        closed = true;
                        break;
                    }
                    value.push(c);
                    j += 1;
                }
                if !closed {
                    return Err(ConditionError::UnterminatedString(offset));
                }
                tokens.push(Token::Str(value));
                i = j + 1;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].1.is_ascii_digit() || chars[j].1 == '.') {
                    j += 1;
                }
                let end = chars.get(j).map(|(o, _)| *o).unwrap_or(input.len());
                let text = &input[offset..end];
                let number = text
                    .parse::<f64>()
                    .map_err(|_| ConditionError::UnexpectedChar { ch: c, offset })?;
                tokens.push(Token::Num(number));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut j = i + 1;
                while j < chars.len() {
                    let c = chars[j].1;
                    if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' {
                        j += 1;
                    } else {
                        break;
                    }
                }
                let end = chars.get(j).map(|(o, _)| *o).unwrap_or(input.len());
                tokens.push(Token::Ident(input[offset..end].to_string()));
                i = j;
            }
            c => return Err(ConditionError::UnexpectedChar { ch: c, offset }),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ConditionError> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ConditionError::UnexpectedToken {
                found: token.to_string(),
                expected: format!("'{}'", expected),
            }),
            None => Err(ConditionError::UnexpectedEnd(format!("'{}'", expected))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut expr = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            expr = Expr::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut expr = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            expr = Expr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConditionError> {
        let lhs = self.parse_primary()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.parse_primary()?;
            return Ok(Expr::Compare {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        let token = self
            .advance()
            .ok_or_else(|| ConditionError::UnexpectedEnd("a value".to_string()))?;

        match token {
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Num(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ if self.peek() == Some(&Token::LParen) => self.parse_call(name),
                _ => Ok(Expr::Variable(name)),
            },
            other => Err(ConditionError::UnexpectedToken {
                found: other.to_string(),
                expected: "a value".to_string(),
            }),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expr, ConditionError> {
        let function =
            Function::from_name(&name).ok_or_else(|| ConditionError::UnknownFunction(name.clone()))?;
        self.expect(Token::LParen)?;

        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;

        if args.len() != 2 {
            return Err(ConditionError::Arity {
                name,
                expected: 2,
                got: args.len(),
            });
        }
        Ok(Expr::Call { function, args })
    }
}
