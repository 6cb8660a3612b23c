//! Parser and evaluator for compiled condition expressions.
//!
//! Supports the DynamoDB condition subset: `attribute_exists(p)`,
//! `attribute_not_exists(p)`, comparisons (`= <> < <= > >=`) between a path
//! and a value placeholder, parentheses, `NOT`, `AND` and `OR` (in that
//! precedence order). Paths are `#name` placeholders or bare names joined by
//! `.` with optional `[n]` indices.

use std::cmp::Ordering;

use serde_json::Value;

use crate::condition::CompiledCondition;
use crate::types::Item;

use super::BackendError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Dot,
    Index(usize),
    Name(String),
    ValueRef(String),
    Op(CmpOp),
    Word(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    Index(usize),
}

#[derive(Debug)]
enum Expr {
    Exists(Vec<Segment>),
    NotExists(Vec<Segment>),
    Compare(Vec<Segment>, CmpOp, Value),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// Evaluate `condition` against the current item (`None` if it does not exist).
///
/// A missing item is evaluated as an empty object, so `attribute_not_exists`
/// passes for it.
pub fn evaluate(condition: &CompiledCondition, item: Option<&Item>) -> Result<bool, BackendError> {
    let tokens = tokenize(&condition.expression)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        condition,
    };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(BackendError::validation(format!(
            "unexpected trailing input in condition expression: {}",
            condition.expression
        )));
    }

    let empty = Item::new();
    Ok(eval(&expr, item.unwrap_or(&empty)))
}

fn tokenize(input: &str) -> Result<Vec<Token>, BackendError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '[' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == ']')
                    .map(|p| start + p)
                    .ok_or_else(|| BackendError::validation("unterminated index in path"))?;
                let digits: String = chars[start..end].iter().collect();
                let index = digits
                    .parse::<usize>()
                    .map_err(|_| BackendError::validation(format!("invalid index [{digits}]")))?;
                tokens.push(Token::Index(index));
                i = end + 1;
            }
            '=' => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += 1;
            }
            '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let (op, width) = match (c, next) {
                    ('<', Some('>')) => (CmpOp::Ne, 2),
                    ('<', Some('=')) => (CmpOp::Le, 2),
                    ('<', _) => (CmpOp::Lt, 1),
                    ('>', Some('=')) => (CmpOp::Ge, 2),
                    _ => (CmpOp::Gt, 1),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
            '#' | ':' => {
                let start = i;
                i += 1;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if word.len() == 1 {
                    return Err(BackendError::validation("empty placeholder"));
                }
                tokens.push(if c == '#' {
                    Token::Name(word)
                } else {
                    Token::ValueRef(word)
                });
            }
            _ if is_word_char(c) => {
                let start = i;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            other => {
                return Err(BackendError::validation(format!(
                    "unexpected character '{other}' in condition expression"
                )));
            }
        }
    }

    Ok(tokens)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

/// Maximum nesting of `NOT` and parentheses in one expression.
const MAX_PARSE_DEPTH: usize = 32;

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    condition: &'a CompiledCondition,
}

impl Parser<'_> {
    fn descend(&mut self) -> Result<(), BackendError> {
        self.depth += 1;
        if self.depth > MAX_PARSE_DEPTH {
            return Err(BackendError::validation(format!(
                "condition expression nesting exceeds maximum of {MAX_PARSE_DEPTH}"
            )));
        }
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn expect(&mut self, expected: Token) -> Result<(), BackendError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(BackendError::validation(format!(
                "expected {expected:?}, found {other:?}"
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, BackendError> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("OR") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, BackendError> {
        let mut left = self.parse_not()?;
        while self.peek_keyword("AND") {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, BackendError> {
        if self.peek_keyword("NOT") {
            self.pos += 1;
            self.descend()?;
            let inner = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, BackendError> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            self.descend()?;
            let inner = self.parse_or()?;
            self.expect(Token::RParen)?;
            self.depth -= 1;
            return Ok(inner);
        }

        if self.peek_keyword("attribute_exists") || self.peek_keyword("attribute_not_exists") {
            let exists = self.peek_keyword("attribute_exists");
            self.pos += 1;
            self.expect(Token::LParen)?;
            let path = self.parse_path()?;
            self.expect(Token::RParen)?;
            return Ok(if exists {
                Expr::Exists(path)
            } else {
                Expr::NotExists(path)
            });
        }

        let path = self.parse_path()?;
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            other => {
                return Err(BackendError::validation(format!(
                    "expected comparison operator, found {other:?}"
                )));
            }
        };
        let value = match self.next() {
            Some(Token::ValueRef(placeholder)) => self
                .condition
                .values
                .get(&placeholder)
                .cloned()
                .ok_or_else(|| {
                    BackendError::validation(format!("undefined value placeholder {placeholder}"))
                })?,
            other => {
                return Err(BackendError::validation(format!(
                    "expected value placeholder, found {other:?}"
                )));
            }
        };
        Ok(Expr::Compare(path, op, value))
    }

    fn parse_path(&mut self) -> Result<Vec<Segment>, BackendError> {
        let mut segments = vec![self.parse_field()?];
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    segments.push(self.parse_field()?);
                }
                Some(Token::Index(i)) => {
                    segments.push(Segment::Index(*i));
                    self.pos += 1;
                }
                _ => return Ok(segments),
            }
        }
    }

    fn parse_field(&mut self) -> Result<Segment, BackendError> {
        match self.next() {
            Some(Token::Name(placeholder)) => self
                .condition
                .names
                .get(&placeholder)
                .map(|name| Segment::Field(name.clone()))
                .ok_or_else(|| {
                    BackendError::validation(format!("undefined name placeholder {placeholder}"))
                }),
            Some(Token::Word(name)) => Ok(Segment::Field(name)),
            other => Err(BackendError::validation(format!(
                "expected attribute path, found {other:?}"
            ))),
        }
    }
}

fn resolve<'a>(item: &'a Item, path: &[Segment]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = match first {
        Segment::Field(name) => item.get(name)?,
        Segment::Index(_) => return None,
    };
    for segment in rest {
        current = match (segment, current) {
            (Segment::Field(name), Value::Object(map)) => map.get(name)?,
            (Segment::Index(i), Value::Array(arr)) => arr.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Compare two JSON values if their types are comparable.
fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            (left == right).then_some(Ordering::Equal)
        }
        _ => None,
    }
}

fn eval(expr: &Expr, item: &Item) -> bool {
    match expr {
        Expr::Exists(path) => resolve(item, path).is_some(),
        Expr::NotExists(path) => resolve(item, path).is_none(),
        Expr::Compare(path, op, value) => {
            let Some(current) = resolve(item, path) else {
                // A missing attribute is only "not equal" to anything.
                return *op == CmpOp::Ne;
            };
            let ordering = compare_values(current, value);
            match op {
                CmpOp::Eq => ordering == Some(Ordering::Equal),
                CmpOp::Ne => ordering != Some(Ordering::Equal),
                CmpOp::Lt => ordering == Some(Ordering::Less),
                CmpOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                CmpOp::Gt => ordering == Some(Ordering::Greater),
                CmpOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            }
        }
        Expr::And(a, b) => eval(a, item) && eval(b, item),
        Expr::Or(a, b) => eval(a, item) || eval(b, item),
        Expr::Not(inner) => !eval(inner, item),
    }
}
