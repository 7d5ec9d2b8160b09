//! Error taxonomy for the compiler (SPEC_FULL.md §7, §11).
//!
//! Mirrors the teacher crate's layering of `ParseError`/`ReplError`
//! (`crates/ouros/src/parse.rs`, `crates/ouros/src/repl_error.rs`): hand-written enums with
//! manual `Display`/`Error` impls and `From` conversions, no `thiserror`/`anyhow` macros.

use std::fmt;

/// A 1-indexed line/column position in the original source, when known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The input text is not syntactically valid Python.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub position: Option<Position>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(pos) => write!(f, "syntax error at {pos}: {}", self.message),
            None => write!(f, "syntax error: {}", self.message),
        }
    }
}

impl std::error::Error for ParseError {}

/// A pass walked into an AST construct it does not transform.
///
/// Carries a short description of the offending node's shape rather than a full value dump,
/// since (unlike the reference implementation's `ast.dump`) the real AST may hold large
/// literals that are not useful to print in full.
#[derive(Debug, Clone)]
pub struct NodeNotSupported {
    pub what: String,
    pub position: Option<Position>,
}

impl NodeNotSupported {
    pub fn new(what: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            position: None,
        }
    }

    pub fn at(what: impl Into<String>, position: Position) -> Self {
        Self {
            what: what.into(),
            position: Some(position),
        }
    }
}

impl fmt::Display for NodeNotSupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(pos) => write!(f, "unsupported construct at {pos}: {}", self.what),
            None => write!(f, "unsupported construct: {}", self.what),
        }
    }
}

impl std::error::Error for NodeNotSupported {}

/// The driver-facing error: unifies every stage's failure behind one `Display`/`Error`
/// surface, the role `ReplError` plays for the teacher's interpreter pipeline.
#[derive(Debug, Clone)]
pub enum CompileError {
    Parse(ParseError),
    NotSupported(NodeNotSupported),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "{e}"),
            Self::NotSupported(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<ParseError> for CompileError {
    fn from(error: ParseError) -> Self {
        Self::Parse(error)
    }
}

impl From<NodeNotSupported> for CompileError {
    fn from(error: NodeNotSupported) -> Self {
        Self::NotSupported(error)
    }
}

pub type Result<T> = std::result::Result<T, NodeNotSupported>;
