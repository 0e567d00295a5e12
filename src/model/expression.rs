//! Expressions and Literal Text
//!
//! CWL fields such as `glob`, `stdout`, `valueFrom` and staged file entries
//! accept either plain text or text with embedded `$(...)` / `${...}`
//! expressions. The two are kept apart so that literal text can be escaped
//! and expressions emitted verbatim.
//!
//! Expressions are never evaluated here; they are only checked for balanced
//! delimiters.

use std::fmt;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::{CwlError, Result};

/// Text containing at least one embedded parameter reference or code block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Expression(String);

impl Expression {
    /// Creates an expression, checking that every `$(` and `${` is closed.
    ///
    /// # Example
    ///
    /// ```
    /// use cwlsmith::model::Expression;
    ///
    /// assert!(Expression::new("$(inputs.reads.basename)").is_ok());
    /// assert!(Expression::new("$(inputs.reads").is_err());
    /// assert!(Expression::new("plain text").is_err());
    /// ```
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let blocks = scan_blocks(&text)?;
        if blocks == 0 {
            return Err(CwlError::validation(
                text,
                "expression contains no $(...) or ${...} block",
            ));
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A text field that is either literal or an expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Text {
    Literal(String),
    Expression(Expression),
}

impl Text {
    /// Wraps literal text. Any `$(` inside is escaped on emission.
    pub fn literal(text: impl Into<String>) -> Self {
        Self::Literal(text.into())
    }

    /// Wraps an expression, validating its delimiters.
    pub fn expression(text: impl Into<String>) -> Result<Self> {
        Expression::new(text).map(Self::Expression)
    }

    /// Classifies document text: unescaped blocks make an expression,
    /// anything else is literal with escapes removed.
    pub fn parse(raw: &str) -> Result<Self> {
        if scan_blocks(raw)? > 0 {
            Ok(Self::Expression(Expression(raw.to_string())))
        } else {
            Ok(Self::Literal(unescape(raw)))
        }
    }

    /// Text as written into a document.
    pub fn to_document_string(&self) -> String {
        match self {
            Self::Literal(s) => escape(s),
            Self::Expression(e) => e.0.clone(),
        }
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, Self::Expression(_))
    }

    /// The literal value, if this is not an expression.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Self::Literal(s) => Some(s),
            Self::Expression(_) => None,
        }
    }
}

impl From<&str> for Text {
    fn from(s: &str) -> Self {
        Self::Literal(s.to_string())
    }
}

impl From<String> for Text {
    fn from(s: String) -> Self {
        Self::Literal(s)
    }
}

impl From<Expression> for Text {
    fn from(e: Expression) -> Self {
        Self::Expression(e)
    }
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => f.write_str(s),
            Self::Expression(e) => e.fmt(f),
        }
    }
}

impl Serialize for Text {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_document_string())
    }
}

impl<'de> Deserialize<'de> for Text {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Text::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Escapes `$(` and `${` so the runner reads them literally.
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' && matches!(chars.peek(), Some('(') | Some('{')) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn unescape(s: &str) -> String {
    s.replace("\\$(", "$(").replace("\\${", "${")
}

/// Counts top-level `$(...)` / `${...}` blocks, failing on unclosed ones.
fn scan_blocks(text: &str) -> Result<usize> {
    let chars: Vec<char> = text.chars().collect();
    let mut count = 0;
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                i += 2;
                continue;
            }
            '$' if i + 1 < chars.len() && (chars[i + 1] == '(' || chars[i + 1] == '{') => {
                let close = find_close(&chars, i + 1).ok_or_else(|| {
                    CwlError::validation(text, format!("unclosed expression starting at offset {}", i))
                })?;
                count += 1;
                i = close + 1;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    Ok(count)
}

/// Finds the delimiter matching `chars[open]`, skipping quoted strings.
fn find_close(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = open;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == '\\' {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
        } else {
            match c {
                '\'' | '"' | '`' => quote = Some(c),
                '(' | '{' | '[' => depth += 1,
                ')' | '}' | ']' => {
                    depth = depth.checked_sub(1)?;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }

    None
}
