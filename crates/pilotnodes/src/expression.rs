//! Boolean expressions for condition nodes
//!
//! Supported: dotted identifiers resolved against the run context,
//! `== != > < >= <=`, `&& || !`, parentheses and string, number, bool and
//! null literals. Numbers compare as f64. A missing identifier is null, and
//! any ordering comparison involving null is false.

use pilotcore::{template, Value, Variables};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("parse error: {0}")]
    Parse(String),
}

/// Evaluate `expression` and reduce the result to a boolean
///
/// `{{name}}` references are accepted and read as plain identifiers.
pub fn evaluate(expression: &str, variables: &Variables) -> Result<bool, ExpressionError> {
    let normalized = expression.replace("{{", "(").replace("}}", ")");
    let tokens = tokenize(&normalized)?;
    if tokens.is_empty() {
        return Err(ExpressionError::Parse("empty expression".into()));
    }
    let (value, rest) = parse_or(&tokens, variables)?;
    if let Some(token) = rest.first() {
        return Err(ExpressionError::Parse(format!("unexpected token: {:?}", token)));
    }
    Ok(value.is_truthy())
}

/// Check syntax without a context; used during preflight
pub fn parse_check(expression: &str) -> Result<(), ExpressionError> {
    evaluate(expression, &Variables::new()).map(|_| ())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    Op(CompOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CompOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let next = chars.get(i + 1).copied();
        match (chars[i], next) {
            (c, _) if c.is_whitespace() => i += 1,
            ('(', _) => {
                tokens.push(Token::LParen);
                i += 1;
            }
            (')', _) => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ('=', Some('=')) => {
                tokens.push(Token::Op(CompOp::Eq));
                i += 2;
            }
            ('!', Some('=')) => {
                tokens.push(Token::Op(CompOp::Ne));
                i += 2;
            }
            ('!', _) => {
                tokens.push(Token::Not);
                i += 1;
            }
            ('>', Some('=')) => {
                tokens.push(Token::Op(CompOp::Ge));
                i += 2;
            }
            ('>', _) => {
                tokens.push(Token::Op(CompOp::Gt));
                i += 1;
            }
            ('<', Some('=')) => {
                tokens.push(Token::Op(CompOp::Le));
                i += 2;
            }
            ('<', _) => {
                tokens.push(Token::Op(CompOp::Lt));
                i += 1;
            }
            ('&', Some('&')) => {
                tokens.push(Token::And);
                i += 2;
            }
            ('|', Some('|')) => {
                tokens.push(Token::Or);
                i += 2;
            }
            (quote @ ('"' | '\''), _) => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&c| c == quote)
                    .map(|offset| start + offset)
                    .ok_or_else(|| ExpressionError::Parse("unterminated string literal".into()))?;
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            (c, n) if c.is_ascii_digit() || (c == '-' && n.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let number = literal
                    .parse()
                    .map_err(|_| ExpressionError::Parse(format!("invalid number: {}", literal)))?;
                tokens.push(Token::Num(number));
            }
            (c, _) if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '-'))
                {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                tokens.push(match ident.as_str() {
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    "null" => Token::Null,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(ident),
                });
            }
            (other, _) => {
                return Err(ExpressionError::Parse(format!(
                    "unexpected character: {}",
                    other
                )))
            }
        }
    }
    Ok(tokens)
}

type Parsed<'a> = Result<(Value, &'a [Token]), ExpressionError>;

// Precedence, loosest first: ||, &&, !, comparison, primary

fn parse_or<'a>(tokens: &'a [Token], vars: &Variables) -> Parsed<'a> {
    let (mut left, mut rest) = parse_and(tokens, vars)?;
    while rest.first() == Some(&Token::Or) {
        let (right, r) = parse_and(&rest[1..], vars)?;
        left = Value::Bool(left.is_truthy() || right.is_truthy());
        rest = r;
    }
    Ok((left, rest))
}

fn parse_and<'a>(tokens: &'a [Token], vars: &Variables) -> Parsed<'a> {
    let (mut left, mut rest) = parse_not(tokens, vars)?;
    while rest.first() == Some(&Token::And) {
        let (right, r) = parse_not(&rest[1..], vars)?;
        left = Value::Bool(left.is_truthy() && right.is_truthy());
        rest = r;
    }
    Ok((left, rest))
}

fn parse_not<'a>(tokens: &'a [Token], vars: &Variables) -> Parsed<'a> {
    if tokens.first() == Some(&Token::Not) {
        let (value, rest) = parse_not(&tokens[1..], vars)?;
        return Ok((Value::Bool(!value.is_truthy()), rest));
    }
    parse_comparison(tokens, vars)
}

fn parse_comparison<'a>(tokens: &'a [Token], vars: &Variables) -> Parsed<'a> {
    let (left, rest) = parse_primary(tokens, vars)?;
    match rest.first() {
        Some(Token::Op(op)) => {
            let (right, rest) = parse_primary(&rest[1..], vars)?;
            Ok((Value::Bool(compare(&left, &right, *op)), rest))
        }
        _ => Ok((left, rest)),
    }
}

fn parse_primary<'a>(tokens: &'a [Token], vars: &Variables) -> Parsed<'a> {
    let Some((first, rest)) = tokens.split_first() else {
        return Err(ExpressionError::Parse("unexpected end of expression".into()));
    };
    match first {
        Token::Str(s) => Ok((Value::String(s.clone()), rest)),
        Token::Num(n) => Ok((Value::Number(*n), rest)),
        Token::Bool(b) => Ok((Value::Bool(*b), rest)),
        Token::Null => Ok((Value::Null, rest)),
        Token::Ident(path) => Ok((
            template::lookup(vars, path).cloned().unwrap_or(Value::Null),
            rest,
        )),
        Token::LParen => {
            let (value, rest) = parse_or(rest, vars)?;
            match rest.split_first() {
                Some((Token::RParen, rest)) => Ok((value, rest)),
                _ => Err(ExpressionError::Parse("expected ')'".into())),
            }
        }
        other => Err(ExpressionError::Parse(format!(
            "expected value, got {:?}",
            other
        ))),
    }
}

/// Compare two values; mismatched types are unequal and unordered
pub(crate) fn compare(left: &Value, right: &Value, op: CompOp) -> bool {
    if left.is_null() || right.is_null() {
        let both = left.is_null() && right.is_null();
        return match op {
            CompOp::Eq => both,
            CompOp::Ne => !both,
            _ => false,
        };
    }

    let ordering = match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.partial_cmp(r),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Number(l), Value::String(r)) | (Value::String(r), Value::Number(l))
            if r.trim().parse::<f64>().is_ok() =>
        {
            // Form inputs often carry numbers as text
            let parsed = r.trim().parse::<f64>().unwrap_or(f64::NAN);
            let ord = l.partial_cmp(&parsed);
            if matches!(left, Value::String(_)) {
                ord.map(|o| o.reverse())
            } else {
                ord
            }
        }
        (Value::Bool(l), Value::Bool(r)) => {
            return match op {
                CompOp::Eq => l == r,
                CompOp::Ne => l != r,
                _ => false,
            }
        }
        _ => {
            return match op {
                CompOp::Eq => left == right,
                CompOp::Ne => left != right,
                _ => false,
            }
        }
    };

    use std::cmp::Ordering::*;
    match (op, ordering) {
        (CompOp::Eq, Some(o)) => o == Equal,
        (CompOp::Ne, Some(o)) => o != Equal,
        (CompOp::Ne, None) => true,
        (CompOp::Gt, Some(o)) => o == Greater,
        (CompOp::Lt, Some(o)) => o == Less,
        (CompOp::Ge, Some(o)) => o != Less,
        (CompOp::Le, Some(o)) => o != Greater,
        _ => false,
    }
}

/// Operator names accepted in structured `conditions` lists
pub(crate) fn comparison_operator(name: &str) -> Option<CompOp> {
    Some(match name {
        "==" | "eq" | "equals" | "is" => CompOp::Eq,
        "!=" | "ne" | "not_equals" | "is_not" => CompOp::Ne,
        ">" | "gt" | "greater_than" => CompOp::Gt,
        "<" | "lt" | "less_than" => CompOp::Lt,
        ">=" | "ge" | "gte" => CompOp::Ge,
        "<=" | "le" | "lte" => CompOp::Le,
        _ => return None,
    })
}
