//! Filter predicates read from the query string.
//!
//! ```text
//! expression := term ("or" term)*
//! term       := factor ("and" factor)*
//! factor     := "(" expression ")" | property operator value
//! operator   := eq | ne | gt | ge | lt | le | == | != | > | >= | < | <=
//! value      := 'text' | "text" | number | true | false | null
//! ```
//!
//! # Examples
//!
//! ```
//! use hypermap_core::binding::filter::FilterExpression;
//! use serde_json::json;
//!
//! let filter = FilterExpression::parse("age ge 18 and name ne 'Bob'", None)?;
//! assert!(filter.evaluate(&json!({"name": "Ann", "age": 31})));
//! assert!(!filter.evaluate(&json!({"name": "Bob", "age": 31})));
//! # Ok::<(), hypermap_core::Error>(())
//! ```

// Internal imports (std, crate)
use std::cmp::Ordering;
use std::fmt;

use crate::model::ClassInfo;
use crate::{Error, Result};

// External imports (alphabetized)
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^\s*(?:(?P<string>'(?:[^']|'')*'|"(?:[^"\\]|\\.)*")|(?P<number>-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?)|(?P<symbol>==|!=|>=|<=|>|<)|(?P<word>[A-Za-z_][A-Za-z0-9_]*)|(?P<open>\()|(?P<close>\)))"#,
    )
    .expect("token pattern is valid")
});

/// Comparison operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Operator {
    fn from_token(token: &str) -> Option<Self> {
        Some(match token.to_ascii_lowercase().as_str() {
            "eq" | "==" => Self::Eq,
            "ne" | "!=" => Self::Ne,
            "gt" | ">" => Self::Gt,
            "ge" | ">=" => Self::Ge,
            "lt" | "<" => Self::Lt,
            "le" | "<=" => Self::Le,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
        }
    }
}

/// A parsed boolean predicate over an entity.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterExpression {
    Comparison {
        property: String,
        operator: Operator,
        value: JsonValue,
    },
    And(Box<FilterExpression>, Box<FilterExpression>),
    Or(Box<FilterExpression>, Box<FilterExpression>),
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Value(JsonValue),
    Symbol(Operator),
    Word(String),
    Open,
    Close,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = source;
    while !rest.trim_start().is_empty() {
        let caps = TOKEN.captures(rest).ok_or_else(|| {
            Error::conversion(format!("filter: unexpected input at '{}'", rest.trim_start()))
        })?;
        let token = if let Some(m) = caps.name("string") {
            Token::Value(JsonValue::String(unquote(m.as_str())))
        } else if let Some(m) = caps.name("number") {
            let number: JsonValue = serde_json::from_str(m.as_str())
                .map_err(|e| Error::conversion(format!("filter: bad number '{}': {e}", m.as_str())))?;
            Token::Value(number)
        } else if let Some(m) = caps.name("symbol") {
            Token::Symbol(Operator::from_token(m.as_str()).ok_or_else(|| {
                Error::conversion(format!("filter: unknown operator '{}'", m.as_str()))
            })?)
        } else if let Some(m) = caps.name("word") {
            Token::Word(m.as_str().to_string())
        } else if caps.name("open").is_some() {
            Token::Open
        } else {
            Token::Close
        };
        tokens.push(token);
        rest = &rest[caps.get(0).map_or(rest.len(), |m| m.end())..];
    }
    Ok(tokens)
}

fn unquote(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    if quoted.starts_with('\'') {
        inner.replace("''", "'")
    } else {
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => out.extend(chars.next()),
                c => out.push(c),
            }
        }
        out
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    position: usize,
    class: Option<&'a ClassInfo>,
}

impl Parser<'_> {
    fn peek_word(&self, word: &str) -> bool {
        matches!(self.tokens.get(self.position), Some(Token::Word(w)) if w.eq_ignore_ascii_case(word))
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn expression(&mut self) -> Result<FilterExpression> {
        let mut left = self.term()?;
        while self.peek_word("or") {
            self.position += 1;
            left = FilterExpression::Or(Box::new(left), Box::new(self.term()?));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<FilterExpression> {
        let mut left = self.factor()?;
        while self.peek_word("and") {
            self.position += 1;
            left = FilterExpression::And(Box::new(left), Box::new(self.factor()?));
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<FilterExpression> {
        match self.next() {
            Some(Token::Open) => {
                let inner = self.expression()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(Error::conversion("filter: missing ')'")),
                }
            }
            Some(Token::Word(property)) => {
                let property = self.property(&property)?;
                let operator = match self.next() {
                    Some(Token::Symbol(op)) => op,
                    Some(Token::Word(w)) => Operator::from_token(&w).ok_or_else(|| {
                        Error::conversion(format!("filter: unknown operator '{w}'"))
                    })?,
                    _ => {
                        return Err(Error::conversion(format!(
                            "filter: expected an operator after '{property}'"
                        )))
                    }
                };
                let value = match self.next() {
                    Some(Token::Value(value)) => value,
                    Some(Token::Word(w)) => match w.to_ascii_lowercase().as_str() {
                        "true" => JsonValue::Bool(true),
                        "false" => JsonValue::Bool(false),
                        "null" => JsonValue::Null,
                        _ => {
                            return Err(Error::conversion(format!(
                                "filter: '{w}' is not a value, quote text values"
                            )))
                        }
                    },
                    _ => {
                        return Err(Error::conversion(format!(
                            "filter: expected a value after '{property} {}'",
                            operator.as_str()
                        )))
                    }
                };
                Ok(FilterExpression::Comparison {
                    property,
                    operator,
                    value,
                })
            }
            other => Err(Error::conversion(format!(
                "filter: expected a property, found {other:?}"
            ))),
        }
    }

    /// Declared property name, matched case-insensitively.
    fn property(&self, name: &str) -> Result<String> {
        let Some(class) = self.class else {
            return Ok(name.to_string());
        };
        class
            .properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.name.clone())
            .ok_or_else(|| {
                Error::conversion(format!("filter: {} has no property '{name}'", class.name))
            })
    }
}

impl FilterExpression {
    /// Parse a filter; with a class, property names are checked against it.
    pub fn parse(source: &str, class: Option<&ClassInfo>) -> Result<Self> {
        let mut parser = Parser {
            tokens: tokenize(source)?,
            position: 0,
            class,
        };
        if parser.tokens.is_empty() {
            return Err(Error::conversion("filter: expression is empty"));
        }
        let expression = parser.expression()?;
        if let Some(extra) = parser.tokens.get(parser.position) {
            return Err(Error::conversion(format!(
                "filter: unexpected {extra:?} after the expression"
            )));
        }
        Ok(expression)
    }

    /// Whether the entity satisfies the predicate. Missing properties are null.
    pub fn evaluate(&self, entity: &JsonValue) -> bool {
        match self {
            Self::And(l, r) => l.evaluate(entity) && r.evaluate(entity),
            Self::Or(l, r) => l.evaluate(entity) || r.evaluate(entity),
            Self::Comparison {
                property,
                operator,
                value,
            } => {
                let actual = entity.get(property).unwrap_or(&JsonValue::Null);
                let ordering = compare(actual, value);
                match operator {
                    Operator::Eq => ordering == Some(Ordering::Equal),
                    Operator::Ne => ordering != Some(Ordering::Equal),
                    Operator::Gt => ordering == Some(Ordering::Greater),
                    Operator::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                    Operator::Lt => ordering == Some(Ordering::Less),
                    Operator::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                }
            }
        }
    }

    /// Properties referenced by the predicate.
    pub fn properties(&self) -> Vec<&str> {
        match self {
            Self::Comparison { property, .. } => vec![property.as_str()],
            Self::And(l, r) | Self::Or(l, r) => {
                let mut all = l.properties();
                all.extend(r.properties());
                all
            }
        }
    }
}

fn compare(actual: &JsonValue, expected: &JsonValue) -> Option<Ordering> {
    match (actual, expected) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        (JsonValue::Bool(a), JsonValue::Bool(b)) => Some(a.cmp(b)),
        (JsonValue::Null, JsonValue::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Comparison {
                property,
                operator,
                value,
            } => match value {
                JsonValue::String(s) => {
                    write!(f, "{property} {} '{}'", operator.as_str(), s.replace('\'', "''"))
                }
                other => write!(f, "{property} {} {other}", operator.as_str()),
            },
            Self::And(l, r) => {
                for (index, side) in [l, r].into_iter().enumerate() {
                    if index > 0 {
                        f.write_str(" and ")?;
                    }
                    match side.as_ref() {
                        Self::Or(..) => write!(f, "({side})")?,
                        _ => write!(f, "{side}")?,
                    }
                }
                Ok(())
            }
            Self::Or(l, r) => write!(f, "{l} or {r}"),
        }
    }
}
