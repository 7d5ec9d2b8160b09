//! Identifies definitions opted out of transformation (SPEC_FULL.md §4.1).
//!
//! Grounded on the reference `compiler/transform/identify_ignore.py`: only top-level
//! `class`/`function` definitions are scanned, and only their first body statement is
//! inspected — nested definitions never need to be ignored individually, since an ignored
//! top-level definition is spliced back out verbatim, nested defs and all.

use std::collections::HashSet;

use crate::ast::{Expr, Literal, Module, NodeId, Stmt};

const INCANTATION: &str = "kappa:ignore";

pub type IgnoreSet = HashSet<NodeId>;

/// Returns the set of top-level definitions whose docstring opts them out of every later
/// pass.
pub fn identify_ignore(module: &Module) -> IgnoreSet {
    let mut ignored = IgnoreSet::new();
    for stmt in &module.body {
        match stmt {
            Stmt::FunctionDef(f) if has_ignore_docstring(&f.body) => {
                ignored.insert(f.id);
            }
            Stmt::ClassDef(c) if has_ignore_docstring(&c.body) => {
                ignored.insert(c.id);
            }
            _ => {}
        }
    }
    ignored
}

fn has_ignore_docstring(body: &[Stmt]) -> bool {
    let Some(Stmt::Expr(Expr::Literal(Literal::Str(text)))) = body.first() else {
        return false;
    };
    docstring_value(text).trim_end().ends_with(INCANTATION)
}

/// Strips the surrounding quotes (and string prefix, if any) from a raw Python string
/// literal's source text, without decoding escapes: the incantation is a plain ASCII tail
/// match, so unescaped text is all that's needed.
fn docstring_value(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    let quote_start = bytes
        .iter()
        .position(|b| *b == b'"' || b'\'' == *b)
        .unwrap_or(0);
    let body = &raw[quote_start..];
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if body.len() >= quote.len() * 2 && body.starts_with(quote) && body.ends_with(quote) {
            return &body[quote.len()..body.len() - quote.len()];
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FunctionDef, Params, SrcSpan};

    fn func_with_docstring(id: NodeId, docstring: &str) -> FunctionDef {
        FunctionDef {
            id,
            name: "f".to_string(),
            params: Params::default(),
            body: vec![Stmt::Expr(Expr::Literal(Literal::Str(docstring.to_string())))],
            decorators: Vec::new(),
            src: SrcSpan { start: 0, end: 0 },
        }
    }

    #[test]
    fn marks_function_with_trailing_incantation() {
        let module = Module {
            body: vec![Stmt::FunctionDef(func_with_docstring(
                0,
                "\"\"\"do not touch\nkappa:ignore\"\"\"",
            ))],
        };
        let ignored = identify_ignore(&module);
        assert!(ignored.contains(&0));
    }

    #[test]
    fn ignores_docstring_without_incantation() {
        let module = Module {
            body: vec![Stmt::FunctionDef(func_with_docstring(0, "\"just a docstring\""))],
        };
        assert!(identify_ignore(&module).is_empty());
    }

    #[test]
    fn does_not_scan_functions_without_a_docstring() {
        let mut f = func_with_docstring(0, "\"kappa:ignore\"");
        f.body = vec![Stmt::Pass];
        let module = Module {
            body: vec![Stmt::FunctionDef(f)],
        };
        assert!(identify_ignore(&module).is_empty());
    }
}
