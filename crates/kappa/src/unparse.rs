//! Structural printer turning a post-CPS [`Module`] back into Python source
//! (SPEC_FULL.md §4.7, §8 "IgnorePreservation").
//!
//! Grounded on `compiler/transform/do_transform.py`'s use of `astor.to_source`, except this
//! printer is hand-rolled rather than delegating to an unparsing crate: the AST here is
//! already a small, closed grammar (every node a pass could have produced), so a direct
//! recursive-descent printer is the more honest match for what `ruff_python_ast` itself does
//! not provide out of the box for this shape.
//!
//! A top-level definition whose id is in the ignore set is spliced back in verbatim from its
//! original byte span rather than printed structurally, so that a `kappa:ignore`-marked
//! definition survives compilation byte-for-byte (comments, exact spacing, everything).

use crate::ast::{
    Alias, BoolOperator, CmpOp, Comprehension, Expr, FunctionDef, Keyword, Literal, Module,
    Operator, Param, Params, Slice, Stmt, UnaryOperator,
};
use crate::ignore::IgnoreSet;

/// Renders `module` as Python source, splicing ignored top-level definitions in verbatim
/// from `source`.
pub fn unparse_module(module: &Module, source: &str, ignore: &IgnoreSet) -> String {
    let mut printer = Printer { out: String::new(), indent: 0, source, ignore };
    printer.print_block_top_level(&module.body);
    printer.out
}

struct Printer<'a> {
    out: String,
    indent: usize,
    source: &'a str,
    ignore: &'a IgnoreSet,
}

impl<'a> Printer<'a> {
    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn verbatim(&mut self, span: crate::ast::SrcSpan) {
        let text = &self.source[span.start as usize..span.end as usize];
        self.out.push_str(text.trim_end());
        self.out.push('\n');
    }

    fn print_block_top_level(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            match stmt {
                Stmt::FunctionDef(f) if self.ignore.contains(&f.id) => self.verbatim(f.src),
                Stmt::ClassDef(c) if self.ignore.contains(&c.id) => self.verbatim(c.src),
                other => self.print_stmt(other),
            }
            if matches!(stmt, Stmt::FunctionDef(_) | Stmt::ClassDef(_)) {
                self.out.push('\n');
            }
        }
    }

    fn print_block(&mut self, stmts: &[Stmt]) {
        if stmts.is_empty() {
            self.line("pass");
            return;
        }
        for stmt in stmts {
            self.print_stmt(stmt);
        }
    }

    fn print_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::FunctionDef(f) => self.print_function(f),
            Stmt::ClassDef(c) => {
                let bases_and_keywords = join_call_args(&c.bases, &c.keywords, self);
                let header = if bases_and_keywords.is_empty() {
                    format!("class {}:", c.name)
                } else {
                    format!("class {}({}):", c.name, bases_and_keywords)
                };
                for decorator in &c.decorators {
                    let text = self.expr(decorator);
                    self.line(&format!("@{text}"));
                }
                self.line(&header);
                self.indent += 1;
                self.print_block(&c.body);
                self.indent -= 1;
            }
            Stmt::Return(None) => self.line("return"),
            Stmt::Return(Some(e)) => {
                let text = self.expr(e);
                self.line(&format!("return {text}"));
            }
            Stmt::If { test, body, orelse } => {
                let test = self.expr(test);
                self.line(&format!("if {test}:"));
                self.indent += 1;
                self.print_block(body);
                self.indent -= 1;
                if !orelse.is_empty() {
                    self.line("else:");
                    self.indent += 1;
                    self.print_block(orelse);
                    self.indent -= 1;
                }
            }
            Stmt::While { test, body, orelse } => {
                let test = self.expr(test);
                self.line(&format!("while {test}:"));
                self.indent += 1;
                self.print_block(body);
                self.indent -= 1;
                if !orelse.is_empty() {
                    self.line("else:");
                    self.indent += 1;
                    self.print_block(orelse);
                    self.indent -= 1;
                }
            }
            Stmt::For { target, iter, body, orelse } => {
                let target = self.expr(target);
                let iter = self.expr(iter);
                self.line(&format!("for {target} in {iter}:"));
                self.indent += 1;
                self.print_block(body);
                self.indent -= 1;
                if !orelse.is_empty() {
                    self.line("else:");
                    self.indent += 1;
                    self.print_block(orelse);
                    self.indent -= 1;
                }
            }
            Stmt::Break => self.line("break"),
            Stmt::Continue => self.line("continue"),
            Stmt::Pass => self.line("pass"),
            Stmt::Import(aliases) => {
                let text = aliases.iter().map(print_alias).collect::<Vec<_>>().join(", ");
                self.line(&format!("import {text}"));
            }
            Stmt::ImportFrom { module, names, level } => {
                let dots = ".".repeat(*level as usize);
                let module = module.clone().unwrap_or_default();
                let text = names.iter().map(print_alias).collect::<Vec<_>>().join(", ");
                self.line(&format!("from {dots}{module} import {text}"));
            }
            Stmt::Assign { targets, value } => {
                let targets = targets.iter().map(|t| self.expr(t)).collect::<Vec<_>>().join(" = ");
                let value = self.expr(value);
                self.line(&format!("{targets} = {value}"));
            }
            Stmt::AugAssign { target, op, value } => {
                let target = self.expr(target);
                let value = self.expr(value);
                self.line(&format!("{target} {}= {value}", operator_symbol(*op)));
            }
            Stmt::Assert { test, msg } => {
                let test = self.expr(test);
                match msg {
                    Some(m) => {
                        let m = self.expr(m);
                        self.line(&format!("assert {test}, {m}"));
                    }
                    None => self.line(&format!("assert {test}")),
                }
            }
            Stmt::Expr(e) => {
                let text = self.expr(e);
                self.line(&text);
            }
            Stmt::Try(t) => {
                self.line("try:");
                self.indent += 1;
                self.print_block(&t.body);
                self.indent -= 1;
                for handler in &t.handlers {
                    let header = match (&handler.exc_type, &handler.name) {
                        (Some(ty), Some(name)) => format!("except {} as {name}:", self.expr(ty)),
                        (Some(ty), None) => format!("except {}:", self.expr(ty)),
                        (None, _) => "except:".to_string(),
                    };
                    self.line(&header);
                    self.indent += 1;
                    self.print_block(&handler.body);
                    self.indent -= 1;
                }
            }
            Stmt::Raise => self.line("raise"),
        }
    }

    fn print_function(&mut self, f: &FunctionDef) {
        for decorator in &f.decorators {
            let text = self.expr(decorator);
            self.line(&format!("@{text}"));
        }
        let params = print_params(&f.params, self);
        self.line(&format!("def {}({params}):", f.name));
        self.indent += 1;
        self.print_block(&f.body);
        self.indent -= 1;
    }

    fn expr(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Name { id, .. } => id.clone(),
            Expr::Literal(lit) => print_literal(lit),
            Expr::Tuple { elts, .. } => {
                let inner = elts.iter().map(|e| self.expr(e)).collect::<Vec<_>>().join(", ");
                if elts.len() == 1 {
                    format!("({inner},)")
                } else {
                    format!("({inner})")
                }
            }
            Expr::List { elts, .. } => {
                let inner = elts.iter().map(|e| self.expr(e)).collect::<Vec<_>>().join(", ");
                format!("[{inner}]")
            }
            Expr::Dict { keys, values } => {
                let mut parts = Vec::with_capacity(keys.len());
                for (key, value) in keys.iter().zip(values) {
                    let value_text = self.expr(value);
                    match key {
                        Some(k) => {
                            let key_text = self.expr(k);
                            parts.push(format!("{key_text}: {value_text}"));
                        }
                        None => parts.push(format!("**{value_text}")),
                    }
                }
                format!("{{{}}}", parts.join(", "))
            }
            Expr::Call { func, args, keywords } => {
                let func_text = self.expr(func);
                let args_text = join_call_args(args, keywords, self);
                format!("{func_text}({args_text})")
            }
            Expr::Attribute { value, attr, .. } => {
                let value_text = self.paren_if_needed(value);
                format!("{value_text}.{attr}")
            }
            Expr::Subscript { value, slice, .. } => {
                let value_text = self.paren_if_needed(value);
                let slice_text = self.slice(slice);
                format!("{value_text}[{slice_text}]")
            }
            Expr::UnaryOp { op, operand } => {
                let operand_text = self.paren_if_needed(operand);
                format!("{}{operand_text}", unary_symbol(*op))
            }
            Expr::BinOp { left, op, right } => {
                let left_text = self.paren_if_needed(left);
                let right_text = self.paren_if_needed(right);
                format!("{left_text} {} {right_text}", operator_symbol(*op))
            }
            Expr::BoolOp { op, values } => values
                .iter()
                .map(|v| self.paren_if_needed(v))
                .collect::<Vec<_>>()
                .join(boolop_symbol(*op)),
            Expr::Compare { left, ops, comparators } => {
                let mut text = self.paren_if_needed(left);
                for (op, comparator) in ops.iter().zip(comparators) {
                    let comparator_text = self.paren_if_needed(comparator);
                    text.push_str(&format!(" {} {comparator_text}", cmp_symbol(*op)));
                }
                text
            }
            Expr::Starred { value, .. } => {
                let value_text = self.expr(value);
                format!("*{value_text}")
            }
            Expr::ListComp { elt, generators } => {
                let elt_text = self.expr(elt);
                let generators_text = generators.iter().map(|g| self.comprehension(g)).collect::<Vec<_>>().join(" ");
                format!("[{elt_text} {generators_text}]")
            }
        }
    }

    /// Every binary/boolean/comparison/unary operand is wrapped unconditionally rather than
    /// only when precedence actually requires it: simpler than precedence climbing, and a
    /// post-flatten tree rarely nests operators deeply enough for the extra parens to be
    /// noticeable.
    fn paren_if_needed(&mut self, expr: &Expr) -> String {
        let needs_parens = matches!(
            expr,
            Expr::BinOp { .. } | Expr::BoolOp { .. } | Expr::Compare { .. } | Expr::UnaryOp { .. }
        );
        let text = self.expr(expr);
        if needs_parens {
            format!("({text})")
        } else {
            text
        }
    }

    fn slice(&mut self, slice: &Slice) -> String {
        match slice {
            Slice::Index(e) => self.expr(e),
            Slice::Slice { lower, upper, step } => {
                let lower = lower.as_ref().map(|e| self.expr(e)).unwrap_or_default();
                let upper = upper.as_ref().map(|e| self.expr(e)).unwrap_or_default();
                match step {
                    Some(s) => {
                        let step = self.expr(s);
                        format!("{lower}:{upper}:{step}")
                    }
                    None => format!("{lower}:{upper}"),
                }
            }
            Slice::ExtSlice(parts) => parts.iter().map(|p| self.slice(p)).collect::<Vec<_>>().join(", "),
        }
    }

    fn comprehension(&mut self, c: &Comprehension) -> String {
        let target = self.expr(&c.target);
        let iter = self.expr(&c.iter);
        let async_kw = if c.is_async { "async " } else { "" };
        let mut text = format!("{async_kw}for {target} in {iter}");
        for cond in &c.ifs {
            let cond_text = self.expr(cond);
            text.push_str(&format!(" if {cond_text}"));
        }
        text
    }
}

fn join_call_args(args: &[Expr], keywords: &[Keyword], printer: &mut Printer<'_>) -> String {
    let mut parts: Vec<String> = args.iter().map(|a| printer.expr(a)).collect();
    for kw in keywords {
        let value = printer.expr(&kw.value);
        match &kw.arg {
            Some(name) => parts.push(format!("{name}={value}")),
            None => parts.push(format!("**{value}")),
        }
    }
    parts.join(", ")
}

fn print_params(params: &Params, printer: &mut Printer<'_>) -> String {
    let mut parts = Vec::new();
    for p in &params.posonly {
        parts.push(print_param(p, printer));
    }
    if !params.posonly.is_empty() {
        parts.push("/".to_string());
    }
    for p in &params.args {
        parts.push(print_param(p, printer));
    }
    if let Some(vararg) = &params.vararg {
        parts.push(format!("*{}", print_param(vararg, printer)));
    } else if !params.kwonly.is_empty() {
        parts.push("*".to_string());
    }
    for p in &params.kwonly {
        parts.push(print_param(p, printer));
    }
    if let Some(kwarg) = &params.kwarg {
        parts.push(format!("**{}", print_param(kwarg, printer)));
    }
    parts.join(", ")
}

fn print_param(param: &Param, printer: &mut Printer<'_>) -> String {
    let mut text = param.name.clone();
    if let Some(annotation) = &param.annotation {
        text.push_str(&format!(": {}", printer.expr(annotation)));
    }
    if let Some(default) = &param.default {
        text.push_str(&format!(" = {}", printer.expr(default)));
    }
    text
}

fn print_alias(alias: &Alias) -> String {
    match &alias.asname {
        Some(asname) => format!("{} as {asname}", alias.name),
        None => alias.name.clone(),
    }
}

fn print_literal(lit: &Literal) -> String {
    match lit {
        Literal::Int(text) | Literal::Float(text) | Literal::Complex(text) | Literal::Str(text) | Literal::Bytes(text) => {
            text.clone()
        }
        Literal::Bool(true) => "True".to_string(),
        Literal::Bool(false) => "False".to_string(),
        Literal::None => "None".to_string(),
        Literal::Ellipsis => "...".to_string(),
    }
}

fn operator_symbol(op: Operator) -> &'static str {
    match op {
        Operator::Add => "+",
        Operator::Sub => "-",
        Operator::Mult => "*",
        Operator::MatMult => "@",
        Operator::Div => "/",
        Operator::Mod => "%",
        Operator::Pow => "**",
        Operator::LShift => "<<",
        Operator::RShift => ">>",
        Operator::BitOr => "|",
        Operator::BitXor => "^",
        Operator::BitAnd => "&",
        Operator::FloorDiv => "//",
    }
}

fn unary_symbol(op: UnaryOperator) -> &'static str {
    match op {
        UnaryOperator::Not => "not ",
        UnaryOperator::USub => "-",
        UnaryOperator::UAdd => "+",
        UnaryOperator::Invert => "~",
    }
}

fn boolop_symbol(op: BoolOperator) -> &'static str {
    match op {
        BoolOperator::And => " and ",
        BoolOperator::Or => " or ",
    }
}

fn cmp_symbol(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "==",
        CmpOp::NotEq => "!=",
        CmpOp::Lt => "<",
        CmpOp::LtE => "<=",
        CmpOp::Gt => ">",
        CmpOp::GtE => ">=",
        CmpOp::Is => "is",
        CmpOp::IsNot => "is not",
        CmpOp::In => "in",
        CmpOp::NotIn => "not in",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{assign, load};
    use std::collections::HashSet;

    #[test]
    fn prints_a_plain_assignment() {
        let module = Module { body: vec![assign("x", load("y"))] };
        let out = unparse_module(&module, "", &HashSet::new());
        assert_eq!(out, "x = y\n");
    }

    #[test]
    fn prints_if_else() {
        let module = Module {
            body: vec![Stmt::If {
                test: load("cond"),
                body: vec![Stmt::Pass],
                orelse: vec![Stmt::Pass],
            }],
        };
        let out = unparse_module(&module, "", &HashSet::new());
        assert_eq!(out, "if cond:\n    pass\nelse:\n    pass\n");
    }

    #[test]
    fn splices_ignored_function_verbatim() {
        let source = "def f():\n    # keep me\n    return 1\n";
        let f = FunctionDef {
            id: 7,
            name: "f".to_string(),
            params: Params::default(),
            body: vec![Stmt::Return(Some(Expr::Literal(Literal::Int("1".to_string()))))],
            decorators: Vec::new(),
            src: crate::ast::SrcSpan { start: 0, end: source.trim_end().len() as u32 },
        };
        let mut ignore = HashSet::new();
        ignore.insert(7);
        let module = Module { body: vec![Stmt::FunctionDef(f)] };
        let out = unparse_module(&module, source, &ignore);
        assert!(out.contains("# keep me"));
    }
}
