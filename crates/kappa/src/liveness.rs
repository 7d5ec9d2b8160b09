//! Backward liveness tracker (SPEC_FULL.md §4.5), grounded on
//! `compiler/transform/liveness.py`'s `LivenessTracker`.
//!
//! The tracker is deliberately a plain value: the CPS pass clones it at every branch point
//! (an `if`'s two arms, a loop's entry) and merges independently-evolved copies back
//! together, rather than mutating one shared instance in place.

use std::collections::HashSet;

use crate::ast::{find_vars_in_expr, find_vars_in_params, find_vars_in_stmt_shallow, Expr, Params, Stmt, VarsByUsage};

/// The set of names that are read before being written on every forward path from the
/// current cursor to wherever the tracker started (a function's end, a module's end).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Liveness {
    pub live: HashSet<String>,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_loads(&mut self, names: impl IntoIterator<Item = String>) {
        self.live.extend(names);
    }

    fn remove_stores(&mut self, names: impl IntoIterator<Item = String>) {
        for name in names {
            self.live.remove(&name);
        }
    }

    fn union(&mut self, other: &Liveness) {
        self.live.extend(other.live.iter().cloned());
    }

    /// Updates liveness for one statement, walked in the reverse direction the tracker
    /// traverses a block (§4.5 "Semantics"). Loop bodies are **not** iterated to a fixpoint;
    /// see DESIGN.md for why that mirrors the original reference implementation's documented
    /// limitation (§9 "While-loop liveness fixpoint").
    pub fn update(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Assign { .. } | Stmt::AugAssign { .. } | Stmt::Assert { .. } | Stmt::Return(_) | Stmt::Expr(_) => {
                let mut usage = VarsByUsage::default();
                find_vars_in_stmt_shallow(stmt, &mut usage);
                self.remove_stores(usage.store.clone());
                self.add_loads(usage.load);
                // A plain-name augmented-assignment target is both read and written: the
                // generic pass above removed it as a store, so it is re-added here. A
                // subscript/attribute target never lands in `usage.store` in the first
                // place (only the base object, itself a load, does), so no re-add is needed.
                if let Stmt::AugAssign { target: Expr::Name { id, .. }, .. } = stmt {
                    self.live.insert(id.clone());
                }
            }
            Stmt::Import(aliases) => {
                for alias in aliases {
                    let bound = alias.asname.clone().unwrap_or_else(|| {
                        alias.name.split('.').next().unwrap_or(&alias.name).to_string()
                    });
                    self.live.remove(&bound);
                }
            }
            Stmt::ImportFrom { names, .. } => {
                for alias in names {
                    let bound = alias.asname.clone().unwrap_or_else(|| alias.name.clone());
                    self.live.remove(&bound);
                }
            }
            Stmt::If { test, body, orelse } => {
                let mut body_live = self.clone();
                body_live.update_block(body);
                let mut else_live = self.clone();
                else_live.update_block(orelse);
                body_live.union(&else_live);
                *self = body_live;
                self.add_test_loads(test);
            }
            Stmt::While { test, body, .. } => {
                // body-liveness ∪ test-loads, no fixpoint (§4.5, §9).
                self.update_block(body);
                self.add_test_loads(test);
            }
            Stmt::For { target, iter, body, .. } => {
                self.update_block(body);
                let mut target_usage = VarsByUsage::default();
                find_vars_in_expr(target, &mut target_usage);
                self.remove_stores(target_usage.store);
                self.add_test_loads(iter);
            }
            Stmt::FunctionDef(f) => self.update_function_def(&f.params, &f.decorators),
            // Class-body liveness is a documented no-op (§9 "Class-body liveness").
            Stmt::ClassDef(_) | Stmt::Break | Stmt::Continue | Stmt::Pass | Stmt::Raise => {}
            Stmt::Try(t) => {
                for handler in t.handlers.iter().rev() {
                    self.update_block(&handler.body);
                }
                self.update_block(&t.body);
            }
        }
    }

    fn add_test_loads(&mut self, test: &Expr) {
        let mut usage = VarsByUsage::default();
        find_vars_in_expr(test, &mut usage);
        self.add_loads(usage.load);
    }

    /// Adds the names an expression loads. Public wrapper around [`Self::add_test_loads`]
    /// for callers outside this module (the CPS pass re-derives a loop's entry liveness from
    /// its test/iterable expression directly, same as this tracker does internally).
    pub fn add_expr_loads(&mut self, expr: &Expr) {
        self.add_test_loads(expr);
    }

    /// Removes the names a `for` target stores into, e.g. when re-deriving the liveness a
    /// loop body should see on entry.
    pub fn remove_target_stores(&mut self, target: &Expr) {
        let mut usage = VarsByUsage::default();
        find_vars_in_expr(target, &mut usage);
        self.remove_stores(usage.store);
    }

    /// Records a continuation capture point from inside a function: body-liveness minus
    /// parameters, plus names loaded by decorators (§4.5).
    fn update_function_def(&mut self, params: &Params, decorators: &[Expr]) {
        let mut param_usage = VarsByUsage::default();
        find_vars_in_params(params, &mut param_usage);
        self.remove_stores(param_usage.param);
        for decorator in decorators {
            self.add_test_loads(decorator);
        }
    }

    /// Walks a block backward, updating liveness one statement at a time.
    pub fn update_block(&mut self, block: &[Stmt]) {
        for stmt in block.iter().rev() {
            self.update(stmt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{assign, load, CmpOp, Ctx};

    #[test]
    fn assignment_removes_store_and_adds_load() {
        let mut liveness = Liveness::new();
        liveness.live.insert("y".to_string());
        liveness.update(&assign("y", load("x")));
        assert!(liveness.live.contains("x"));
        assert!(!liveness.live.contains("y"));
    }

    #[test]
    fn if_join_is_union_of_both_branches_plus_test() {
        let mut liveness = Liveness::new();
        let stmt = Stmt::If {
            test: Expr::Compare {
                left: Box::new(load("cond")),
                ops: vec![CmpOp::Gt],
                comparators: vec![load("bound")],
            },
            body: vec![Stmt::Expr(load("a"))],
            orelse: vec![Stmt::Expr(load("b"))],
        };
        liveness.update(&stmt);
        for name in ["cond", "bound", "a", "b"] {
            assert!(liveness.live.contains(name), "missing {name}");
        }
    }

    #[test]
    fn for_loop_removes_target_and_adds_iterable_loads() {
        let mut liveness = Liveness::new();
        liveness.live.insert("x".to_string());
        let stmt = Stmt::For {
            target: Expr::Name { id: "x".to_string(), ctx: Ctx::Store },
            iter: load("items"),
            body: vec![Stmt::Expr(load("x"))],
            orelse: Vec::new(),
        };
        liveness.update(&stmt);
        assert!(liveness.live.contains("items"));
        assert!(!liveness.live.contains("x"));
    }

    #[test]
    fn class_def_is_a_liveness_no_op() {
        let mut liveness = Liveness::new();
        liveness.live.insert("untouched".to_string());
        liveness.update(&Stmt::ClassDef(crate::ast::ClassDef {
            id: 0,
            name: "C".to_string(),
            bases: vec![],
            keywords: vec![],
            body: vec![],
            decorators: vec![],
            src: crate::ast::SrcSpan { start: 0, end: 0 },
        }));
        assert_eq!(liveness.live.len(), 1);
    }
}
