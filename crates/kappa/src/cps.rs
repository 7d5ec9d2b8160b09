//! CPS transformer (SPEC_FULL.md §4.6), grounded on `compiler/transform/cps.py`'s
//! `CPSTransformerContext`/`CPSTransformer`.
//!
//! The traversal walks every block backward, exactly like [`crate::liveness`]; in fact the
//! two run in lockstep here, since a continuation's captured-variable set is read directly
//! off the liveness tracker at the cursor where the call being wrapped sits.
//!
//! **Tying the knot.** A continuation synthesized for a pause site inside a loop needs to
//! embed "the enclosing loop, already transformed" as the `else` branch of its dummy
//! one-iteration loop (§4.6 point 2) — but that outer loop's transformed body is not known
//! until its own (backward) traversal finishes, which happens *after* the inner pause site
//! has already been visited. Rather than contort the traversal into two passes, each loop
//! hands out a numbered placeholder statement to any continuation built while its body is
//! still being transformed, and patches every placeholder bearing its number, in every
//! continuation class synthesized so far, with the real statement once its own transform
//! returns. `resolve_marker` is the one place that patching happens.

use std::collections::{HashMap, HashSet};

use crate::ast::{
    assign, load, ClassDef, Ctx, Expr, ExceptHandler, FunctionDef, Keyword, Literal, Module, Param,
    Params, Stmt, TryStmt,
};
use crate::error::{NodeNotSupported, Result};
use crate::ignore::IgnoreSet;
use crate::liveness::Liveness;

/// A statement's position in the *tail*: either a real statement that will run next, or a
/// marker standing in for "restart the enclosing loop", resolved once that loop's own
/// transform completes.
#[derive(Debug, Clone)]
enum TailItem {
    Stmt(Stmt),
    LoopMarker(u32),
}

type Tail = Vec<TailItem>;

#[derive(Debug, Clone, Default)]
struct CpsContext {
    enclosing_class: Option<String>,
    enclosing_function: Option<String>,
}

/// Runs the CPS transform over a whole module.
pub fn transform_to_cps(module: Module, ignore: &IgnoreSet, globals: HashSet<String>) -> Result<Module> {
    let mut cps = Cps {
        ignore,
        globals,
        cont_counters: HashMap::new(),
        loop_counter: 0,
        extras: Vec::new(),
    };
    let ctx = CpsContext::default();
    let (body, _tail, _liveness) = cps.transform_block(module.body, Vec::new(), Liveness::new(), &ctx)?;
    let mut full_body = body;
    full_body.extend(cps.extras);
    Ok(Module { body: full_body })
}

struct Cps<'a> {
    ignore: &'a IgnoreSet,
    globals: HashSet<String>,
    cont_counters: HashMap<String, u32>,
    loop_counter: u32,
    extras: Vec<Stmt>,
}

impl<'a> Cps<'a> {
    fn next_cont_index(&mut self, func_name: &str) -> u32 {
        let counter = self.cont_counters.entry(func_name.to_string()).or_insert(0);
        let k = *counter;
        *counter += 1;
        k
    }

    fn next_loop_id(&mut self) -> u32 {
        let id = self.loop_counter;
        self.loop_counter += 1;
        id
    }

    /// Walks `stmts` in reverse, threading a tail and a liveness tracker through, exactly as
    /// §4.6 "Traversal" describes: each statement's replacement and a liveness update
    /// derived from the *original* statement are both prepended before moving to the prior
    /// one.
    fn transform_block(
        &mut self,
        stmts: Vec<Stmt>,
        mut tail: Tail,
        mut liveness: Liveness,
        ctx: &CpsContext,
    ) -> Result<(Vec<Stmt>, Tail, Liveness)> {
        let mut replaced = Vec::new();
        for stmt in stmts.into_iter().rev() {
            let original = stmt.clone();
            let repl = self.transform_stmt(stmt, &tail, &liveness, ctx)?;
            for r in repl.into_iter().rev() {
                tail.insert(0, TailItem::Stmt(r.clone()));
                replaced.insert(0, r);
            }
            liveness.update(&original);
        }
        Ok((replaced, tail, liveness))
    }

    fn transform_stmt(&mut self, stmt: Stmt, tail: &Tail, liveness: &Liveness, ctx: &CpsContext) -> Result<Vec<Stmt>> {
        match stmt {
            Stmt::Assign { targets, value } if is_callable_assignment(&targets, &value, ctx) => {
                let target_name = match &targets[0] {
                    Expr::Name { id, .. } => id.clone(),
                    _ => unreachable!("is_callable_assignment checked for a Name target"),
                };
                let func_name = ctx.enclosing_function.clone().expect("checked by is_callable_assignment");
                let original = Stmt::Assign { targets, value };
                Ok(self.wrap_call_assignment(&func_name, &target_name, original, tail, liveness))
            }
            // Module-level call-assignments, and ones with an unsupported target shape,
            // are left unchanged — pausing is only meaningful inside a function (§4.6 bullet
            // 2, §9 "Return inside nested control").
            Stmt::Assign { targets, value } => Ok(vec![Stmt::Assign { targets, value }]),
            Stmt::If { test, body, orelse } => {
                let (body, _, _) = self.transform_block(body, tail.clone(), liveness.clone(), ctx)?;
                let (orelse, _, _) = self.transform_block(orelse, tail.clone(), liveness.clone(), ctx)?;
                Ok(vec![Stmt::If { test, body, orelse }])
            }
            Stmt::While { test, body, .. } => Ok(vec![self.transform_while(test, body, tail, liveness, ctx)?]),
            Stmt::For { target, iter, body, .. } => {
                Ok(vec![self.transform_for(target, iter, body, tail, liveness, ctx)?])
            }
            Stmt::FunctionDef(f) if self.ignore.contains(&f.id) => Ok(vec![Stmt::FunctionDef(f)]),
            Stmt::FunctionDef(f) => Ok(vec![Stmt::FunctionDef(self.transform_function(f, ctx)?)]),
            Stmt::ClassDef(c) if self.ignore.contains(&c.id) => Ok(vec![Stmt::ClassDef(c)]),
            Stmt::ClassDef(c) => Ok(vec![Stmt::ClassDef(self.transform_class(c, ctx)?)]),
            // Return/break/continue/pass/assert/augassign/import are leaves post-flatten:
            // every expression they carry is already an atom, so there is no call to wrap
            // and nothing further to recurse into (§4.6 "All other statements").
            other => Ok(vec![other]),
        }
    }

    fn transform_function(&mut self, f: FunctionDef, ctx: &CpsContext) -> Result<FunctionDef> {
        reject_nested_defs(&f.body)?;
        let FunctionDef { id, name, params, body, decorators, src } = f;
        let inner_name = match &ctx.enclosing_class {
            Some(class_name) => format!("{class_name}_{name}"),
            None => name.clone(),
        };
        let inner_ctx = CpsContext {
            enclosing_class: ctx.enclosing_class.clone(),
            enclosing_function: Some(inner_name),
        };
        let (body, _, _) = self.transform_block(body, Vec::new(), Liveness::new(), &inner_ctx)?;
        Ok(FunctionDef { id, name, params, body, decorators, src })
    }

    fn transform_class(&mut self, c: ClassDef, ctx: &CpsContext) -> Result<ClassDef> {
        if ctx.enclosing_class.is_some() || ctx.enclosing_function.is_some() {
            return Err(NodeNotSupported::new("nested class definitions are not supported"));
        }
        if c.keywords.iter().any(|k| k.arg.as_deref() == Some("metaclass")) {
            return Err(NodeNotSupported::new("a class with an explicit metaclass is not supported"));
        }
        let ClassDef { id, name, bases, mut keywords, body, decorators, src } = c;
        let inner_ctx = CpsContext {
            enclosing_class: Some(name.clone()),
            enclosing_function: None,
        };
        let mut new_body = Vec::with_capacity(body.len());
        for stmt in body {
            match stmt {
                Stmt::FunctionDef(f) if self.ignore.contains(&f.id) => new_body.push(Stmt::FunctionDef(f)),
                Stmt::FunctionDef(f) => new_body.push(Stmt::FunctionDef(self.transform_function(f, &inner_ctx)?)),
                Stmt::ClassDef(_) => return Err(NodeNotSupported::new("nested class definitions are not supported")),
                other => new_body.push(other),
            }
        }
        // Every user class is tagged so the runtime's construction protocol can catch a
        // pause raised from inside `__init__` (§4.6 "Class definition", §9 "Metaclass...").
        keywords.push(Keyword {
            arg: Some("metaclass".to_string()),
            value: Expr::Attribute {
                value: Box::new(load("rt")),
                attr: "TransformedClassMeta".to_string(),
                ctx: Ctx::Load,
            },
        });
        Ok(ClassDef { id, name, bases, keywords, body: new_body, decorators, src })
    }

    fn transform_while(
        &mut self,
        test: Expr,
        body: Vec<Stmt>,
        tail: &Tail,
        liveness: &Liveness,
        ctx: &CpsContext,
    ) -> Result<Stmt> {
        let marker = self.next_loop_id();
        let mut inner_tail = tail.clone();
        inner_tail.insert(0, TailItem::LoopMarker(marker));
        // Seed the body's entry liveness with a full pass over the (pre-transform) body
        // itself, same as `Liveness::update`'s own `While` arm: a loop body runs more than
        // once, so a name it reads must stay live across the loop's own back-edge even if
        // the post-pause tail never reads it again.
        let mut inner_liveness = liveness.clone();
        inner_liveness.update_block(&body);
        inner_liveness.add_expr_loads(&test);
        let (body, _, _) = self.transform_block(body, inner_tail, inner_liveness, ctx)?;
        let resolved = Stmt::While { test, body, orelse: Vec::new() };
        self.resolve_marker(marker, &resolved);
        Ok(resolved)
    }

    fn transform_for(
        &mut self,
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        tail: &Tail,
        liveness: &Liveness,
        ctx: &CpsContext,
    ) -> Result<Stmt> {
        let marker = self.next_loop_id();
        let mut inner_tail = tail.clone();
        inner_tail.insert(0, TailItem::LoopMarker(marker));
        // Same reasoning as `transform_while`: fold in a full pass over the (pre-transform)
        // body before the target/iterable adjustments, so names the body reads on every
        // iteration stay captured even when the tail after the pause point doesn't need them.
        let mut inner_liveness = liveness.clone();
        inner_liveness.update_block(&body);
        inner_liveness.remove_target_stores(&target);
        inner_liveness.add_expr_loads(&iter);
        let (body, _, _) = self.transform_block(body, inner_tail, inner_liveness, ctx)?;
        let resolved = Stmt::For { target, iter, body, orelse: Vec::new() };
        self.resolve_marker(marker, &resolved);
        Ok(resolved)
    }

    /// Builds the `try`/`except` handoff wrapper around a call-assignment (§4.6 bullet 1)
    /// and the continuation class it raises into.
    fn wrap_call_assignment(
        &mut self,
        func_name: &str,
        result_name: &str,
        original_assign: Stmt,
        tail: &Tail,
        liveness: &Liveness,
    ) -> Vec<Stmt> {
        let k = self.next_cont_index(func_name);
        let class_name = format!("Cont_{func_name}_{k}");
        self.globals.insert(class_name.clone());

        let mut captured: Vec<String> = liveness
            .live
            .iter()
            .filter(|name| name.as_str() != result_name && !self.globals.contains(*name))
            .cloned()
            .collect();
        captured.sort();

        let run_body = build_run_body(tail);
        let mut run_args = vec![
            Param { name: "self".to_string(), annotation: None, default: None },
            Param { name: result_name.to_string(), annotation: None, default: None },
        ];
        run_args.extend(captured.iter().map(|name| Param { name: name.clone(), annotation: None, default: None }));
        let run_method = Stmt::FunctionDef(FunctionDef {
            id: 0,
            name: "run".to_string(),
            params: Params { posonly: Vec::new(), args: run_args, vararg: None, kwonly: Vec::new(), kwarg: None },
            body: if run_body.is_empty() { vec![Stmt::Pass] } else { run_body },
            decorators: Vec::new(),
            src: crate::ast::SrcSpan { start: 0, end: 0 },
        });
        let class_def = Stmt::ClassDef(ClassDef {
            id: 0,
            name: class_name.clone(),
            bases: vec![Expr::Attribute {
                value: Box::new(load("rt")),
                attr: "Continuation".to_string(),
                ctx: Ctx::Load,
            }],
            keywords: Vec::new(),
            body: vec![run_method],
            decorators: Vec::new(),
            src: crate::ast::SrcSpan { start: 0, end: 0 },
        });
        self.extras.push(class_def);

        let continuation_ctor = Expr::Call {
            func: Box::new(load(class_name)),
            args: captured.into_iter().map(load).collect(),
            keywords: Vec::new(),
        };
        let handler_body = vec![
            Stmt::Expr(Expr::Call {
                func: Box::new(Expr::Attribute {
                    value: Box::new(load("cc")),
                    attr: "add_continuation".to_string(),
                    ctx: Ctx::Load,
                }),
                args: vec![continuation_ctor],
                keywords: Vec::new(),
            }),
            Stmt::Raise,
        ];
        vec![Stmt::Try(TryStmt {
            body: vec![original_assign],
            handlers: vec![ExceptHandler {
                exc_type: Some(Expr::Attribute {
                    value: Box::new(load("rt")),
                    attr: "CoordinatorCall".to_string(),
                    ctx: Ctx::Load,
                }),
                name: Some("cc".to_string()),
                body: handler_body,
            }],
        })]
    }

    /// Patches every placeholder tagged `marker`, in every continuation class synthesized
    /// so far, with the now-finished outer loop statement.
    fn resolve_marker(&mut self, marker: u32, resolved: &Stmt) {
        for extra in &mut self.extras {
            substitute_marker(extra, marker, resolved);
        }
    }
}

fn is_callable_assignment(targets: &[Expr], value: &Expr, ctx: &CpsContext) -> bool {
    ctx.enclosing_function.is_some()
        && matches!(value, Expr::Call { .. })
        && targets.len() == 1
        && matches!(targets[0], Expr::Name { .. })
}

/// Rebuilds a continuation's `run()` body from its tail: real statements are copied as-is;
/// a loop marker closes a dummy one-iteration loop over everything accumulated since the
/// last marker, whose `else` is a not-yet-resolved placeholder (§4.6 bullet 2).
fn build_run_body(tail: &[TailItem]) -> Vec<Stmt> {
    let mut out = Vec::new();
    for item in tail {
        match item {
            TailItem::Stmt(s) => out.push(s.clone()),
            TailItem::LoopMarker(marker) => {
                let accumulated = std::mem::take(&mut out);
                out.push(Stmt::For {
                    target: Expr::Name { id: "_".to_string(), ctx: Ctx::Store },
                    iter: Expr::Call {
                        func: Box::new(load("range")),
                        args: vec![Expr::Literal(Literal::Int("1".to_string()))],
                        keywords: Vec::new(),
                    },
                    body: accumulated,
                    orelse: vec![marker_placeholder(*marker)],
                });
            }
        }
    }
    out
}

/// A statement shape no real Python source can produce post-flatten, used as a forward
/// reference to "the enclosing loop, once its own transform finishes" (see module docs).
fn marker_placeholder(marker: u32) -> Stmt {
    Stmt::Expr(Expr::Call {
        func: Box::new(load("__kappa_loop_continuation__")),
        args: vec![Expr::Literal(Literal::Int(marker.to_string()))],
        keywords: Vec::new(),
    })
}

fn marker_id(stmt: &Stmt) -> Option<u32> {
    let Stmt::Expr(Expr::Call { func, args, .. }) = stmt else {
        return None;
    };
    let Expr::Name { id, .. } = &**func else { return None };
    if id != "__kappa_loop_continuation__" {
        return None;
    }
    match args.first() {
        Some(Expr::Literal(Literal::Int(n))) => n.parse().ok(),
        _ => None,
    }
}

fn substitute_marker(stmt: &mut Stmt, marker: u32, resolved: &Stmt) {
    match stmt {
        Stmt::ClassDef(c) => substitute_marker_block(&mut c.body, marker, resolved),
        Stmt::FunctionDef(f) => substitute_marker_block(&mut f.body, marker, resolved),
        Stmt::If { body, orelse, .. } => {
            substitute_marker_block(body, marker, resolved);
            substitute_marker_block(orelse, marker, resolved);
        }
        Stmt::While { body, orelse, .. } => {
            substitute_marker_block(body, marker, resolved);
            substitute_marker_block(orelse, marker, resolved);
        }
        Stmt::For { body, orelse, .. } => {
            substitute_marker_block(body, marker, resolved);
            substitute_marker_block(orelse, marker, resolved);
        }
        Stmt::Try(t) => {
            substitute_marker_block(&mut t.body, marker, resolved);
            for handler in &mut t.handlers {
                substitute_marker_block(&mut handler.body, marker, resolved);
            }
        }
        _ => {}
    }
}

fn substitute_marker_block(block: &mut [Stmt], marker: u32, resolved: &Stmt) {
    for stmt in block.iter_mut() {
        if marker_id(stmt) == Some(marker) {
            *stmt = resolved.clone();
        } else {
            substitute_marker(stmt, marker, resolved);
        }
    }
}

/// Rejects a function body containing a nested `def`/`class` at any depth (§7).
fn reject_nested_defs(stmts: &[Stmt]) -> Result<()> {
    for stmt in stmts {
        match stmt {
            Stmt::FunctionDef(_) | Stmt::ClassDef(_) => {
                return Err(NodeNotSupported::new("nested function/class definitions are not supported"))
            }
            Stmt::If { body, orelse, .. } => {
                reject_nested_defs(body)?;
                reject_nested_defs(orelse)?;
            }
            Stmt::While { body, .. } | Stmt::For { body, .. } => reject_nested_defs(body)?,
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Operator, SrcSpan};

    fn call(name: &str) -> Expr {
        Expr::Call { func: Box::new(load(name)), args: Vec::new(), keywords: Vec::new() }
    }

    #[test]
    fn module_level_call_assignment_is_left_unwrapped() {
        let module = Module { body: vec![assign("x", call("f"))] };
        let out = transform_to_cps(module, &HashSet::new(), HashSet::new()).unwrap();
        assert!(matches!(out.body[0], Stmt::Assign { .. }));
    }

    #[test]
    fn call_assignment_inside_a_function_is_wrapped_and_synthesizes_a_class() {
        let module = Module {
            body: vec![Stmt::FunctionDef(FunctionDef {
                id: 0,
                name: "factorial".to_string(),
                params: Params {
                    posonly: Vec::new(),
                    args: vec![Param { name: "n".to_string(), annotation: None, default: None }],
                    vararg: None,
                    kwonly: Vec::new(),
                    kwarg: None,
                },
                body: vec![
                    assign(
                        "result",
                        Expr::Call {
                            func: Box::new(load("factorial")),
                            args: vec![Expr::BinOp {
                                left: Box::new(load("n")),
                                op: Operator::Sub,
                                right: Box::new(Expr::Literal(Literal::Int("1".to_string()))),
                            }],
                            keywords: Vec::new(),
                        },
                    ),
                    Stmt::Return(Some(Expr::BinOp {
                        left: Box::new(load("n")),
                        op: Operator::Mult,
                        right: Box::new(load("result")),
                    })),
                ],
                decorators: Vec::new(),
                src: SrcSpan { start: 0, end: 0 },
            })],
        };
        let out = transform_to_cps(module, &HashSet::new(), HashSet::new()).unwrap();
        let has_continuation_class = out.body.iter().any(|s| {
            matches!(s, Stmt::ClassDef(c) if c.name == "Cont_factorial_0")
        });
        assert!(has_continuation_class, "expected a Cont_factorial_0 class in {out:?}");
        let function_wraps_call_in_try = match &out.body[0] {
            Stmt::FunctionDef(f) => matches!(f.body[0], Stmt::Try(_)),
            _ => false,
        };
        assert!(function_wraps_call_in_try);
    }

    #[test]
    fn rejects_nested_function_definitions() {
        let f = FunctionDef {
            id: 0,
            name: "outer".to_string(),
            params: Params::default(),
            body: vec![Stmt::FunctionDef(FunctionDef {
                id: 1,
                name: "inner".to_string(),
                params: Params::default(),
                body: vec![Stmt::Pass],
                decorators: Vec::new(),
                src: SrcSpan { start: 0, end: 0 },
            })],
            decorators: Vec::new(),
            src: SrcSpan { start: 0, end: 0 },
        };
        let module = Module { body: vec![Stmt::FunctionDef(f)] };
        assert!(transform_to_cps(module, &HashSet::new(), HashSet::new()).is_err());
    }

    #[test]
    fn class_definition_gets_transformed_class_metaclass() {
        let c = ClassDef {
            id: 0,
            name: "Widget".to_string(),
            bases: Vec::new(),
            keywords: Vec::new(),
            body: vec![Stmt::Pass],
            decorators: Vec::new(),
            src: SrcSpan { start: 0, end: 0 },
        };
        let module = Module { body: vec![Stmt::ClassDef(c)] };
        let out = transform_to_cps(module, &HashSet::new(), HashSet::new()).unwrap();
        match &out.body[0] {
            Stmt::ClassDef(c) => {
                assert!(c.keywords.iter().any(|k| k.arg.as_deref() == Some("metaclass")));
            }
            _ => panic!("expected a class definition"),
        }
    }
}
