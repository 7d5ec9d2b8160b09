//! Auto-pause inserter (SPEC_FULL.md §4.4), the optional pass behind `--auto-pause`.
//!
//! Grounded on `compiler/transform/auto_pause.py`: every flattened call-assignment gets a
//! voluntary pause check spliced in front of it, itself shaped as a call-assignment so the
//! CPS pass treats it as an ordinary pause point in its own right.

use crate::ast::{assign, Expr, Module, Stmt};
use crate::ignore::IgnoreSet;

/// Inserts a `rt.maybe_pause` check before every call-assignment in `module`, skipping
/// definitions in `ignore`.
pub fn insert_auto_pause(module: Module, ignore: &IgnoreSet) -> Module {
    let mut pass_ = AutoPause { counter: 0 };
    Module {
        body: pass_.insert_in_block(module.body, ignore),
    }
}

struct AutoPause {
    /// A disjoint `__x_pause_{n}` namespace, separate from the flattener's own `__x_{n}`
    /// temporaries so this pass never has to know how many the flattener already used.
    counter: u32,
}

impl AutoPause {
    fn fresh(&mut self) -> String {
        let name = format!("__x_pause_{}", self.counter);
        self.counter += 1;
        name
    }

    fn insert_in_block(&mut self, stmts: Vec<Stmt>, ignore: &IgnoreSet) -> Vec<Stmt> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            self.insert_in_stmt(stmt, ignore, &mut out);
        }
        out
    }

    fn insert_in_stmt(&mut self, stmt: Stmt, ignore: &IgnoreSet, out: &mut Vec<Stmt>) {
        match stmt {
            Stmt::FunctionDef(f) if ignore.contains(&f.id) => out.push(Stmt::FunctionDef(f)),
            Stmt::ClassDef(c) if ignore.contains(&c.id) => out.push(Stmt::ClassDef(c)),
            Stmt::FunctionDef(mut f) => {
                f.body = self.insert_in_block(f.body, ignore);
                out.push(Stmt::FunctionDef(f));
            }
            Stmt::ClassDef(mut c) => {
                c.body = self.insert_in_block(c.body, ignore);
                out.push(Stmt::ClassDef(c));
            }
            Stmt::If { test, body, orelse } => out.push(Stmt::If {
                test,
                body: self.insert_in_block(body, ignore),
                orelse: self.insert_in_block(orelse, ignore),
            }),
            Stmt::While { test, body, orelse } => out.push(Stmt::While {
                test,
                body: self.insert_in_block(body, ignore),
                orelse,
            }),
            Stmt::For { target, iter, body, orelse } => out.push(Stmt::For {
                target,
                iter,
                body: self.insert_in_block(body, ignore),
                orelse,
            }),
            Stmt::Assign { targets, value } if matches!(value, Expr::Call { .. }) => {
                let temp = self.fresh();
                out.push(assign(
                    &temp,
                    Expr::Attribute {
                        value: Box::new(crate::ast::load("rt")),
                        attr: "maybe_pause".to_string(),
                        ctx: crate::ast::Ctx::Load,
                    },
                ));
                out.push(assign(
                    &temp,
                    Expr::Call {
                        func: Box::new(crate::ast::load(temp.clone())),
                        args: Vec::new(),
                        keywords: Vec::new(),
                    },
                ));
                out.push(Stmt::Assign { targets, value });
            }
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::load;
    use std::collections::HashSet;

    #[test]
    fn wraps_call_assignment_with_a_pause_pair() {
        let module = Module {
            body: vec![crate::ast::assign(
                "y",
                Expr::Call {
                    func: Box::new(load("f")),
                    args: vec![],
                    keywords: vec![],
                },
            )],
        };
        let out = insert_auto_pause(module, &HashSet::new());
        assert_eq!(out.body.len(), 4);
        assert!(matches!(out.body[2], Stmt::Assign { .. }));
        match &out.body[3] {
            Stmt::Assign { value, .. } => assert!(matches!(value, Expr::Call { .. })),
            _ => panic!("expected the original call-assignment last"),
        }
    }

    #[test]
    fn leaves_non_call_assignments_untouched() {
        let module = Module {
            body: vec![crate::ast::assign("y", load("x"))],
        };
        let out = insert_auto_pause(module, &HashSet::new());
        assert_eq!(out.body.len(), 1);
    }
}
