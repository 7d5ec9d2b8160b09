//! Flattener: rewrites an AST into three-address form (SPEC_FULL.md §4.3).
//!
//! Grounded on `compiler/transform/flatten.py`'s `Flatten` visitor. The core move
//! throughout is the same one that pass makes: every composite expression is recursively
//! reduced to atoms (a `Name` or a `Literal`), the composite is rebuilt from those atoms and
//! bound to a fresh temporary, and the expression's final value is just a load of that
//! temporary. `Call` nodes get special treatment so a plain `x = f(a, b)` doesn't pick up a
//! pointless extra temporary on top of its own assignment.

use crate::ast::{
    assign, load, BoolOperator, ClassDef, Comprehension, Ctx, Expr, FunctionDef, Keyword, Module,
    Slice, Stmt,
};
use crate::error::{NodeNotSupported, Result};
use crate::ignore::IgnoreSet;

/// Runs the flattener over a whole module.
pub fn flatten_module(module: Module, ignore: &IgnoreSet) -> Result<Module> {
    let mut flattener = Flattener::new(ignore);
    let body = flattener.flatten_block(module.body)?;
    Ok(Module { body })
}

struct Flattener<'a> {
    counter: u32,
    /// Per-loop-level actions to re-run immediately before a `continue`, so the test is
    /// re-evaluated at every iteration boundary exactly as if the host re-entered the loop
    /// header (§4.3 "While loop", invariant #10). `for` loops push an empty entry: the
    /// iterator was already constructed once, so nothing needs redoing on `continue`.
    loop_actions: Vec<Vec<Stmt>>,
    ignore: &'a IgnoreSet,
}

impl<'a> Flattener<'a> {
    fn new(ignore: &'a IgnoreSet) -> Self {
        Self {
            counter: 0,
            loop_actions: Vec::new(),
            ignore,
        }
    }

    fn fresh(&mut self) -> String {
        let name = format!("__x_{}", self.counter);
        self.counter += 1;
        name
    }

    /// Binds a just-built composite expression to a fresh temporary and returns a load of it.
    fn bind_fresh(&mut self, expr: Expr, out: &mut Vec<Stmt>) -> Expr {
        let name = self.fresh();
        out.push(assign(&name, expr));
        load(name)
    }

    fn flatten_block(&mut self, stmts: Vec<Stmt>) -> Result<Vec<Stmt>> {
        let mut out = Vec::new();
        for stmt in stmts {
            self.flatten_stmt(stmt, &mut out)?;
        }
        Ok(out)
    }

    fn flatten_stmt(&mut self, stmt: Stmt, out: &mut Vec<Stmt>) -> Result<()> {
        match stmt {
            Stmt::FunctionDef(f) if self.ignore.contains(&f.id) => {
                out.push(Stmt::FunctionDef(f));
            }
            Stmt::ClassDef(c) if self.ignore.contains(&c.id) => {
                out.push(Stmt::ClassDef(c));
            }
            Stmt::FunctionDef(f) => out.push(Stmt::FunctionDef(self.flatten_function(f)?)),
            Stmt::ClassDef(c) => out.push(Stmt::ClassDef(self.flatten_class(c, out)?)),
            Stmt::Return(value) => {
                let value = value.map(|v| self.flatten_atom(v, out)).transpose()?;
                out.push(Stmt::Return(value));
            }
            Stmt::If { test, body, orelse } => {
                let test = self.flatten_atom(test, out)?;
                let body = self.flatten_block(body)?;
                let orelse = self.flatten_block(orelse)?;
                out.push(Stmt::If { test, body, orelse });
            }
            Stmt::While { test, body, orelse } => {
                if !orelse.is_empty() {
                    return Err(NodeNotSupported::new("while/else is not supported"));
                }
                self.flatten_while(test, body, out)?
            }
            Stmt::For { target, iter, body, orelse } => {
                if !orelse.is_empty() {
                    return Err(NodeNotSupported::new("for/else is not supported"));
                }
                self.flatten_for(target, iter, body, out)?
            }
            Stmt::Break => out.push(Stmt::Break),
            Stmt::Continue => {
                if let Some(actions) = self.loop_actions.last() {
                    out.extend(actions.clone());
                }
                out.push(Stmt::Continue);
            }
            Stmt::Pass => out.push(Stmt::Pass),
            Stmt::Import(aliases) => out.push(Stmt::Import(aliases)),
            Stmt::ImportFrom { module, names, level } => {
                out.push(Stmt::ImportFrom { module, names, level })
            }
            Stmt::Assign { targets, value } => self.flatten_assign(targets, value, out)?,
            Stmt::AugAssign { target, op, value } => {
                let value = self.flatten_atom(value, out)?;
                let target = self.flatten_target(target, out)?;
                out.push(Stmt::AugAssign { target, op, value });
            }
            Stmt::Assert { test, msg } => {
                let test = self.flatten_atom(test, out)?;
                let msg = msg.map(|m| self.flatten_atom(m, out)).transpose()?;
                out.push(Stmt::Assert { test, msg });
            }
            // The flattened program only ever keeps actions, matching `Flatten.visit_Expr`:
            // a bare non-call expression statement has no observable effect and vanishes.
            Stmt::Expr(expr) => {
                self.flatten_atom(expr, out)?;
            }
            Stmt::Try(_) | Stmt::Raise => {
                return Err(NodeNotSupported::new(
                    "try/raise are produced by the CPS pass, not accepted on flattener input",
                ))
            }
        }
        Ok(())
    }

    fn flatten_function(&mut self, f: FunctionDef) -> Result<FunctionDef> {
        for decorator in &f.decorators {
            check_function_decorator(decorator)?;
        }
        let FunctionDef {
            id,
            name,
            params,
            body,
            decorators,
            src,
        } = f;
        let body = self.flatten_block(body)?;
        Ok(FunctionDef {
            id,
            name,
            params,
            body,
            decorators,
            src,
        })
    }

    fn flatten_class(&mut self, c: ClassDef, out: &mut Vec<Stmt>) -> Result<ClassDef> {
        if !c.decorators.is_empty() {
            return Err(NodeNotSupported::new("class decorators are not supported"));
        }
        let ClassDef {
            id,
            name,
            bases,
            keywords,
            body,
            decorators,
            src,
        } = c;
        let bases = bases
            .into_iter()
            .map(|b| self.flatten_atom(b, out))
            .collect::<Result<Vec<_>>>()?;
        let keywords = self.flatten_keywords(keywords, out)?;
        let body = self.flatten_block(body)?;
        Ok(ClassDef {
            id,
            name,
            bases,
            keywords,
            body,
            decorators,
            src,
        })
    }

    fn flatten_while(&mut self, test: Expr, body: Vec<Stmt>, out: &mut Vec<Stmt>) -> Result<()> {
        let mut test_actions = Vec::new();
        let test_atom = self.flatten_atom(test, &mut test_actions)?;
        out.extend(test_actions.clone());
        self.loop_actions.push(test_actions.clone());
        let mut body = self.flatten_block(body)?;
        self.loop_actions.pop();
        body.extend(test_actions);
        out.push(Stmt::While { test: test_atom, body, orelse: Vec::new() });
        Ok(())
    }

    fn flatten_for(
        &mut self,
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        out: &mut Vec<Stmt>,
    ) -> Result<()> {
        let iter_atom = self.flatten_atom(iter, out)?;
        let wrapped = Expr::Call {
            func: Box::new(load("iter")),
            args: vec![iter_atom],
            keywords: Vec::new(),
        };
        let iter_bound = self.bind_fresh(wrapped, out);
        let target = self.flatten_target(target, out)?;
        self.loop_actions.push(Vec::new());
        let body = self.flatten_block(body)?;
        self.loop_actions.pop();
        out.push(Stmt::For {
            target,
            iter: iter_bound,
            body,
            orelse: Vec::new(),
        });
        Ok(())
    }

    fn flatten_assign(&mut self, targets: Vec<Expr>, value: Expr, out: &mut Vec<Stmt>) -> Result<()> {
        match value {
            // A call stays the whole RHS of its assignment; flattening only its operands
            // avoids an extra `tmp = f(...); x = tmp` hop (§4.3 "Call wrapping" contract).
            Expr::Call { .. } => {
                let call = self.flatten_call(value, out)?;
                let targets = targets
                    .into_iter()
                    .map(|t| self.flatten_target(t, out))
                    .collect::<Result<Vec<_>>>()?;
                out.push(Stmt::Assign { targets, value: call });
            }
            other => {
                let value = self.flatten_atom(other, out)?;
                let targets = targets
                    .into_iter()
                    .map(|t| self.flatten_target(t, out))
                    .collect::<Result<Vec<_>>>()?;
                out.push(Stmt::Assign { targets, value });
            }
        }
        Ok(())
    }

    /// Flattens an assignment/`for`-target: a `Name` is already an atom; an `Attribute`'s or
    /// `Subscript`'s *value* is flattened but the node itself is not bound to a fresh name,
    /// since it is the place being written to, not a value being read (§4.3).
    fn flatten_target(&mut self, expr: Expr, out: &mut Vec<Stmt>) -> Result<Expr> {
        match expr {
            Expr::Name { .. } => Ok(expr),
            Expr::Attribute { value, attr, ctx } => {
                let value = Box::new(self.flatten_atom(*value, out)?);
                Ok(Expr::Attribute { value, attr, ctx })
            }
            Expr::Subscript { value, slice, ctx } => {
                let value = Box::new(self.flatten_atom(*value, out)?);
                let slice = Box::new(self.flatten_slice(*slice, out)?);
                Ok(Expr::Subscript { value, slice, ctx })
            }
            Expr::Tuple { elts, ctx } => {
                let elts = elts
                    .into_iter()
                    .map(|e| self.flatten_target(e, out))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expr::Tuple { elts, ctx })
            }
            Expr::List { elts, ctx } => {
                let elts = elts
                    .into_iter()
                    .map(|e| self.flatten_target(e, out))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expr::List { elts, ctx })
            }
            Expr::Starred { value, ctx } => {
                let value = Box::new(self.flatten_target(*value, out)?);
                Ok(Expr::Starred { value, ctx })
            }
            other => Err(NodeNotSupported::new(format!(
                "unsupported assignment target: {other:?}"
            ))),
        }
    }

    fn flatten_slice(&mut self, slice: Slice, out: &mut Vec<Stmt>) -> Result<Slice> {
        match slice {
            Slice::Index(e) => Ok(Slice::Index(self.flatten_atom(e, out)?)),
            Slice::Slice { lower, upper, step } => Ok(Slice::Slice {
                lower: lower.map(|e| self.flatten_atom(e, out)).transpose()?,
                upper: upper.map(|e| self.flatten_atom(e, out)).transpose()?,
                step: step.map(|e| self.flatten_atom(e, out)).transpose()?,
            }),
            Slice::ExtSlice(dims) => Ok(Slice::ExtSlice(
                dims.into_iter()
                    .map(|d| self.flatten_slice(d, out))
                    .collect::<Result<Vec<_>>>()?,
            )),
        }
    }

    fn flatten_keywords(&mut self, keywords: Vec<Keyword>, out: &mut Vec<Stmt>) -> Result<Vec<Keyword>> {
        keywords
            .into_iter()
            .map(|k| {
                Ok(Keyword {
                    arg: k.arg,
                    value: self.flatten_atom(k.value, out)?,
                })
            })
            .collect()
    }

    /// Flattens a `Call`'s callee and arguments without binding the call itself to a
    /// temporary; the caller decides whether the result is assigned directly (statement
    /// position) or further bound (nested expression position).
    fn flatten_call(&mut self, expr: Expr, out: &mut Vec<Stmt>) -> Result<Expr> {
        let Expr::Call { func, args, keywords } = expr else {
            unreachable!("flatten_call called with a non-Call expression");
        };
        let func = Box::new(self.flatten_atom(*func, out)?);
        let args = args
            .into_iter()
            .map(|a| self.flatten_call_arg(a, out))
            .collect::<Result<Vec<_>>>()?;
        let keywords = self.flatten_keywords(keywords, out)?;
        Ok(Expr::Call { func, args, keywords })
    }

    /// Every call argument must end up a literal, a name, or a starred name (§4.3 contract).
    fn flatten_call_arg(&mut self, expr: Expr, out: &mut Vec<Stmt>) -> Result<Expr> {
        match expr {
            Expr::Starred { value, ctx } => {
                let value = self.flatten_atom(*value, out)?;
                if !matches!(value, Expr::Name { .. }) {
                    return Err(NodeNotSupported::new("starred call argument must be a name"));
                }
                Ok(Expr::Starred { value: Box::new(value), ctx })
            }
            other => self.flatten_atom(other, out),
        }
    }

    /// Reduces an expression so every call/subscript/attribute-load/operator argument is a
    /// `Name` or a `Literal` (§4.3). `Tuple`/`List`/`Dict` literals only have their elements
    /// flattened, matching the reference: the literal itself isn't a call-assignment or
    /// pause site, so there's nothing to gain by binding it to a temporary of its own.
    /// `BinOp`/`UnaryOp`/`Compare`/`Call`/subscript-or-attribute-load and the result each get
    /// bound to a fresh temporary instead, per the generic rule in §4.3; `BoolOp` and
    /// `ListComp` follow their own dedicated desugaring rules.
    fn flatten_atom(&mut self, expr: Expr, out: &mut Vec<Stmt>) -> Result<Expr> {
        match expr {
            Expr::Name { .. } | Expr::Literal(_) => Ok(expr),
            // A sequence/dict literal's operands are flattened, but the literal itself is
            // returned unbound: `f([a, b])` becomes `__x = f([a, b])`, not a separate
            // temporary for the list.
            Expr::Tuple { elts, ctx } => {
                let elts = elts
                    .into_iter()
                    .map(|e| self.flatten_atom(e, out))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expr::Tuple { elts, ctx })
            }
            Expr::List { elts, ctx } => {
                let elts = elts
                    .into_iter()
                    .map(|e| self.flatten_atom(e, out))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expr::List { elts, ctx })
            }
            Expr::Dict { keys, values } => {
                // Evaluation order is value, key, value, key, ... (§4.3 "Dict").
                let mut new_keys = Vec::with_capacity(keys.len());
                let mut new_values = Vec::with_capacity(values.len());
                for (key, value) in keys.into_iter().zip(values) {
                    new_values.push(self.flatten_atom(value, out)?);
                    new_keys.push(key.map(|k| self.flatten_atom(k, out)).transpose()?);
                }
                Ok(Expr::Dict {
                    keys: new_keys,
                    values: new_values,
                })
            }
            Expr::Call { .. } => {
                let call = self.flatten_call(expr, out)?;
                Ok(self.bind_fresh(call, out))
            }
            Expr::Attribute { value, attr, ctx } => {
                let value = Box::new(self.flatten_atom(*value, out)?);
                let node = Expr::Attribute { value, attr, ctx };
                match ctx {
                    Ctx::Load => Ok(self.bind_fresh(node, out)),
                    _ => Ok(node),
                }
            }
            Expr::Subscript { value, slice, ctx } => {
                let value = Box::new(self.flatten_atom(*value, out)?);
                let slice = Box::new(self.flatten_slice(*slice, out)?);
                let node = Expr::Subscript { value, slice, ctx };
                match ctx {
                    Ctx::Load => Ok(self.bind_fresh(node, out)),
                    _ => Ok(node),
                }
            }
            Expr::UnaryOp { op, operand } => {
                let operand = Box::new(self.flatten_atom(*operand, out)?);
                Ok(self.bind_fresh(Expr::UnaryOp { op, operand }, out))
            }
            Expr::BinOp { left, op, right } => {
                let left = Box::new(self.flatten_atom(*left, out)?);
                let right = Box::new(self.flatten_atom(*right, out)?);
                Ok(self.bind_fresh(Expr::BinOp { left, op, right }, out))
            }
            Expr::BoolOp { op, values } => self.flatten_boolop(op, values, out),
            Expr::Compare { left, ops, comparators } => {
                let left = Box::new(self.flatten_atom(*left, out)?);
                let comparators = comparators
                    .into_iter()
                    .map(|c| self.flatten_atom(c, out))
                    .collect::<Result<Vec<_>>>()?;
                Ok(self.bind_fresh(Expr::Compare { left, ops, comparators }, out))
            }
            Expr::Starred { .. } => Err(NodeNotSupported::new(
                "starred expressions are only supported as call arguments",
            )),
            Expr::ListComp { elt, generators } => self.flatten_listcomp(*elt, generators, out),
        }
    }

    /// Desugars `and`/`or` into a chain of ifs over a single result variable, preserving
    /// short-circuit evaluation (§4.3 "Boolean op", invariant #9): the result is assigned
    /// unconditionally for the first operand, then every later operand is only reached, and
    /// assigned, if the running result still passes the short-circuit test.
    fn flatten_boolop(&mut self, op: BoolOperator, values: Vec<Expr>, out: &mut Vec<Stmt>) -> Result<Expr> {
        let result = self.fresh();
        let chain = self.boolop_chain(op, values, &result)?;
        out.extend(chain);
        Ok(load(result))
    }

    fn boolop_chain(&mut self, op: BoolOperator, mut values: Vec<Expr>, result: &str) -> Result<Vec<Stmt>> {
        let rest = values.split_off(1);
        let first = values.into_iter().next().expect("BoolOp always has an operand");
        let mut body = Vec::new();
        let atom = self.flatten_atom(first, &mut body)?;
        body.push(assign(result, atom));
        if rest.is_empty() {
            return Ok(body);
        }
        let test = match op {
            BoolOperator::And => load(result),
            BoolOperator::Or => Expr::UnaryOp {
                op: crate::ast::UnaryOperator::Not,
                operand: Box::new(load(result)),
            },
        };
        let inner = self.boolop_chain(op, rest, result)?;
        body.push(Stmt::If {
            test,
            body: inner,
            orelse: Vec::new(),
        });
        Ok(body)
    }

    /// Desugars a list comprehension into `result = []` plus nested `for`/`if` statements
    /// ending in `result.append(elt)`, then flattens that desugared form like any other
    /// statement (§4.3 "List comprehension").
    fn flatten_listcomp(
        &mut self,
        elt: Expr,
        generators: Vec<Comprehension>,
        out: &mut Vec<Stmt>,
    ) -> Result<Expr> {
        if generators.iter().any(|g| g.is_async) {
            return Err(NodeNotSupported::new("asynchronous comprehensions are not supported"));
        }
        let result = self.fresh();
        out.push(assign(&result, Expr::List { elts: Vec::new(), ctx: Ctx::Load }));

        let append = Expr::Call {
            func: Box::new(Expr::Attribute {
                value: Box::new(load(&result)),
                attr: "append".to_string(),
                ctx: Ctx::Load,
            }),
            args: vec![elt],
            keywords: Vec::new(),
        };
        let mut body = vec![Stmt::Expr(append)];
        for gen in generators.into_iter().rev() {
            let mut inner = body;
            for cond in gen.ifs.into_iter().rev() {
                inner = vec![Stmt::If {
                    test: cond,
                    body: inner,
                    orelse: Vec::new(),
                }];
            }
            body = vec![Stmt::For {
                target: gen.target,
                iter: gen.iter,
                body: inner,
                orelse: Vec::new(),
            }];
        }
        let outer_for = body.into_iter().next().expect("at least one generator");
        self.flatten_stmt(outer_for, out)?;
        Ok(load(result))
    }
}

fn check_function_decorator(decorator: &Expr) -> Result<()> {
    let is_bare_on_coordinator = matches!(decorator, Expr::Name { id, .. } if id == "on_coordinator");
    let is_rt_on_coordinator = matches!(
        decorator,
        Expr::Attribute { value, attr, .. }
            if attr == "on_coordinator" && matches!(&**value, Expr::Name { id, .. } if id == "rt")
    );
    if is_bare_on_coordinator || is_rt_on_coordinator {
        Ok(())
    } else {
        Err(NodeNotSupported::new(format!(
            "unsupported function decorator: {decorator:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Operator;
    use std::collections::HashSet;

    fn flatten(stmts: Vec<Stmt>) -> Vec<Stmt> {
        let ignore = HashSet::new();
        flatten_module(Module { body: stmts }, &ignore).expect("flatten should succeed").body
    }

    #[test]
    fn binds_binop_to_a_fresh_temporary() {
        let out = flatten(vec![crate::ast::assign(
            "y",
            Expr::BinOp {
                left: Box::new(load("a")),
                op: Operator::Add,
                right: Box::new(load("b")),
            },
        )]);
        // __x_0 = a + b ; y = __x_0
        assert_eq!(out.len(), 2);
        match &out[0] {
            Stmt::Assign { targets, .. } => match &targets[0] {
                Expr::Name { id, .. } => assert_eq!(id, "__x_0"),
                _ => panic!("expected a name target"),
            },
            _ => panic!("expected an assignment"),
        }
    }

    #[test]
    fn call_assignment_has_no_extra_temporary() {
        let out = flatten(vec![crate::ast::assign(
            "y",
            Expr::Call {
                func: Box::new(load("f")),
                args: vec![],
                keywords: vec![],
            },
        )]);
        assert_eq!(out.len(), 1);
        match &out[0] {
            Stmt::Assign { value, .. } => assert!(matches!(value, Expr::Call { .. })),
            _ => panic!("expected an assignment"),
        }
    }

    #[test]
    fn list_literal_is_not_bound_to_a_temporary() {
        let out = flatten(vec![crate::ast::assign(
            "y",
            Expr::List { elts: vec![load("a"), load("b")], ctx: Ctx::Load },
        )]);
        // y = [a, b], no separate temporary for the list itself.
        assert_eq!(out.len(), 1);
        match &out[0] {
            Stmt::Assign { value, .. } => assert!(matches!(value, Expr::List { .. })),
            _ => panic!("expected an assignment"),
        }
    }

    #[test]
    fn bare_non_call_expression_statement_vanishes() {
        let out = flatten(vec![Stmt::Expr(load("x"))]);
        assert!(out.is_empty());
    }

    #[test]
    fn bare_call_expression_statement_keeps_its_assignment() {
        let out = flatten(vec![Stmt::Expr(Expr::Call {
            func: Box::new(load("f")),
            args: vec![],
            keywords: vec![],
        })]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn while_body_ends_with_its_own_test_actions() {
        let out = flatten(vec![Stmt::While {
            test: Expr::Compare {
                left: Box::new(load("n")),
                ops: vec![crate::ast::CmpOp::Gt],
                comparators: vec![Expr::Literal(crate::ast::Literal::Int("0".to_string()))],
            },
            body: vec![Stmt::Continue],
            orelse: Vec::new(),
        }]);
        match &out[1] {
            Stmt::While { body, .. } => {
                // test actions re-run before the continue, and again at the body's end.
                assert_eq!(body.len(), 3);
                assert!(matches!(body[0], Stmt::Assign { .. }));
                assert!(matches!(body[1], Stmt::Continue));
                assert!(matches!(body[2], Stmt::Assign { .. }));
            }
            _ => panic!("expected a while loop"),
        }
    }

    #[test]
    fn for_loop_wraps_iterable_in_iter_call() {
        let out = flatten(vec![Stmt::For {
            target: crate::ast::Expr::Name {
                id: "x".to_string(),
                ctx: Ctx::Store,
            },
            iter: load("items"),
            body: vec![Stmt::Pass],
            orelse: Vec::new(),
        }]);
        let iter_assign = &out[0];
        match iter_assign {
            Stmt::Assign { value, .. } => match value {
                Expr::Call { func, .. } => assert!(matches!(&**func, Expr::Name { id, .. } if id == "iter")),
                _ => panic!("expected a call"),
            },
            _ => panic!("expected an assignment binding the wrapped iterator"),
        }
    }

    #[test]
    fn rejects_unsupported_class_decorator() {
        let ignore = HashSet::new();
        let module = Module {
            body: vec![Stmt::ClassDef(ClassDef {
                id: 0,
                name: "Widget".to_string(),
                bases: vec![],
                keywords: vec![],
                body: vec![Stmt::Pass],
                decorators: vec![load("some_decorator")],
                src: crate::ast::SrcSpan { start: 0, end: 0 },
            })],
        };
        assert!(flatten_module(module, &ignore).is_err());
    }
}
