//! Tokenizer and parser for path expressions.
//!
//! The grammar is small enough for a hand-written scanner:
//!
//! ```text
//! expression := identifier ( '.' identifier | '[' index ']' | '##' identifier )*
//! ```
//!
//! A backslash-escaped dot (`\.`) is part of an identifier rather than a
//! path separator, so fully-qualified names can be embedded in a path.
//! Both the read and the write evaluator share this parse step.

use crate::error::{OpflowError, Result};

/// One access step after the root identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentKind {
    /// `.name` — property read.
    Member(String),
    /// `[index]` — array / list / map lookup; content kept raw until
    /// evaluation, where it is dispatched on the runtime type.
    Index(String),
    /// `##TypeName` — persisted-entity lookup by id value.
    Deref(String),
}

/// A segment with the column it starts at, for error reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// The access kind.
    pub kind: SegmentKind,
    /// Zero-based column of the segment in the source expression.
    pub col: usize,
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    /// The source text, kept for error reporting.
    pub source: String,
    /// The leading identifier, resolved against a root context.
    pub root: String,
    /// Column of the root identifier.
    pub root_col: usize,
    /// The access segments following the root.
    pub segments: Vec<Segment>,
}

fn syntax_error(source: &str, column: usize, cause: impl Into<String>) -> OpflowError {
    OpflowError::ExpressionSyntax {
        expression: source.to_string(),
        column,
        cause: cause.into(),
    }
}

/// Scan an identifier starting at `*pos`, honoring backslash escapes.
fn scan_identifier(source: &str, chars: &[char], pos: &mut usize) -> Result<(String, usize)> {
    let col = *pos;
    let mut out = String::new();
    while *pos < chars.len() {
        match chars[*pos] {
            '\\' => {
                if *pos + 1 >= chars.len() {
                    return Err(syntax_error(source, *pos, "dangling escape"));
                }
                out.push(chars[*pos + 1]);
                *pos += 2;
            }
            '.' | '[' | ']' | '#' => break,
            c => {
                out.push(c);
                *pos += 1;
            }
        }
    }
    if out.is_empty() {
        return Err(syntax_error(source, col, "empty identifier"));
    }
    Ok((out, col))
}

/// Parse a path expression.
pub fn parse(source: &str) -> Result<PathExpr> {
    let chars: Vec<char> = source.chars().collect();
    let mut pos = 0;

    let (root, root_col) = scan_identifier(source, &chars, &mut pos)?;
    let mut segments = Vec::new();

    while pos < chars.len() {
        let col = pos;
        match chars[pos] {
            '.' => {
                pos += 1;
                let (name, _) = scan_identifier(source, &chars, &mut pos)?;
                segments.push(Segment {
                    kind: SegmentKind::Member(name),
                    col,
                });
            }
            '[' => {
                pos += 1;
                let start = pos;
                while pos < chars.len() && chars[pos] != ']' {
                    pos += 1;
                }
                if pos >= chars.len() {
                    return Err(syntax_error(source, col, "unclosed index"));
                }
                let content: String = chars[start..pos].iter().collect();
                if content.is_empty() {
                    return Err(syntax_error(source, col, "empty index"));
                }
                pos += 1;
                segments.push(Segment {
                    kind: SegmentKind::Index(content),
                    col,
                });
            }
            '#' => {
                if pos + 1 < chars.len() && chars[pos + 1] == '#' {
                    pos += 2;
                    let (name, _) = scan_identifier(source, &chars, &mut pos)?;
                    segments.push(Segment {
                        kind: SegmentKind::Deref(name),
                        col,
                    });
                } else {
                    return Err(syntax_error(source, col, "single '#' is not an operator"));
                }
            }
            c => {
                return Err(syntax_error(source, col, format!("unexpected character '{}'", c)));
            }
        }
    }

    Ok(PathExpr {
        source: source.to_string(),
        root,
        root_col,
        segments,
    })
}
