//! Parses Python source with `ruff_python_parser` and lowers the result into this crate's
//! own [`crate::ast`] model.
//!
//! This is the only module that touches `ruff_python_ast` directly, the same split the
//! teacher crate draws between `ruff_python_parser`/`ruff_python_ast` (the parse) and its
//! own `Node`/`Expr` model (everything downstream) in `crates/ouros/src/parse.rs`.

use ruff_python_ast::{self as rast, Expr as RExpr, Stmt as RStmt};
use ruff_python_parser::parse_module;
use ruff_text_size::{Ranged, TextSize};

use crate::ast::*;
use crate::error::{CompileError, NodeNotSupported, ParseError, Position};

pub struct Lowering<'a> {
    source: &'a str,
    next_id: NodeId,
}

fn offset_to_position(source: &str, offset: TextSize) -> Position {
    let offset = usize::from(offset).min(source.len());
    let prefix = &source[..offset];
    let line = prefix.bytes().filter(|&b| b == b'\n').count() as u32 + 1;
    let column = (offset - prefix.rfind('\n').map(|i| i + 1).unwrap_or(0)) as u32 + 1;
    Position { line, column }
}

impl<'a> Lowering<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source, next_id: 0 }
    }

    fn fresh_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn text(&self, range: ruff_text_size::TextRange) -> &'a str {
        &self.source[range]
    }

    fn span(range: ruff_text_size::TextRange) -> SrcSpan {
        SrcSpan {
            start: range.start().into(),
            end: range.end().into(),
        }
    }

    /// Parses a full module from source text.
    pub fn parse_module(source: &str) -> std::result::Result<Module, CompileError> {
        let parsed = parse_module(source).map_err(|e| {
            CompileError::Parse(ParseError {
                message: e.error.to_string(),
                position: Some(offset_to_position(source, e.location.start())),
            })
        })?;
        let module = parsed.into_syntax();
        let mut lowering = Lowering::new(source);
        Ok(Module {
            body: lowering.lower_stmts(module.body)?,
        })
    }

    fn node_not_supported(&self, what: impl Into<String>, range: ruff_text_size::TextRange) -> NodeNotSupported {
        NodeNotSupported::at(what, offset_to_position(self.source, range.start()))
    }

    fn lower_stmts(&mut self, stmts: Vec<RStmt>) -> crate::error::Result<Vec<Stmt>> {
        stmts.into_iter().map(|s| self.lower_stmt(s)).collect()
    }

    fn lower_stmt(&mut self, stmt: RStmt) -> crate::error::Result<Stmt> {
        Ok(match stmt {
            RStmt::FunctionDef(f) => {
                let id = self.fresh_id();
                let src = Self::span(f.range());
                let decorators = f
                    .decorator_list
                    .into_iter()
                    .map(|d| self.lower_expr(d.expression))
                    .collect::<crate::error::Result<Vec<_>>>()?;
                Stmt::FunctionDef(FunctionDef {
                    id,
                    name: f.name.id.to_string(),
                    params: self.lower_params(*f.parameters)?,
                    body: self.lower_stmts(f.body)?,
                    decorators,
                    src,
                })
            }
            RStmt::ClassDef(c) => {
                let id = self.fresh_id();
                let src = Self::span(c.range());
                let (bases, keywords) = match c.arguments {
                    Some(arguments) => {
                        let bases = arguments
                            .args
                            .iter()
                            .map(|a| self.lower_expr(a.clone()))
                            .collect::<crate::error::Result<Vec<_>>>()?;
                        let keywords = arguments
                            .keywords
                            .iter()
                            .map(|k| {
                                Ok(Keyword {
                                    arg: k.arg.as_ref().map(|id| id.id.to_string()),
                                    value: self.lower_expr(k.value.clone())?,
                                })
                            })
                            .collect::<crate::error::Result<Vec<_>>>()?;
                        (bases, keywords)
                    }
                    None => (Vec::new(), Vec::new()),
                };
                let decorators = c
                    .decorator_list
                    .into_iter()
                    .map(|d| self.lower_expr(d.expression))
                    .collect::<crate::error::Result<Vec<_>>>()?;
                Stmt::ClassDef(ClassDef {
                    id,
                    name: c.name.id.to_string(),
                    bases,
                    keywords,
                    body: self.lower_stmts(c.body)?,
                    decorators,
                    src,
                })
            }
            RStmt::Return(r) => Stmt::Return(r.value.map(|v| self.lower_expr(*v)).transpose()?),
            RStmt::If(i) => self.lower_if(i)?,
            RStmt::While(w) => Stmt::While {
                test: self.lower_expr(*w.test)?,
                body: self.lower_stmts(w.body)?,
                orelse: self.lower_stmts(w.orelse)?,
            },
            RStmt::For(f) => Stmt::For {
                target: self.lower_expr(*f.target)?,
                iter: self.lower_expr(*f.iter)?,
                body: self.lower_stmts(f.body)?,
                orelse: self.lower_stmts(f.orelse)?,
            },
            RStmt::Break(_) => Stmt::Break,
            RStmt::Continue(_) => Stmt::Continue,
            RStmt::Pass(_) => Stmt::Pass,
            RStmt::Import(i) => Stmt::Import(
                i.names
                    .into_iter()
                    .map(|a| Alias {
                        name: a.name.id.to_string(),
                        asname: a.asname.map(|n| n.id.to_string()),
                    })
                    .collect(),
            ),
            RStmt::ImportFrom(i) => Stmt::ImportFrom {
                module: i.module.map(|m| m.id.to_string()),
                names: i
                    .names
                    .into_iter()
                    .map(|a| Alias {
                        name: a.name.id.to_string(),
                        asname: a.asname.map(|n| n.id.to_string()),
                    })
                    .collect(),
                level: i.level,
            },
            RStmt::Assign(a) => Stmt::Assign {
                targets: a
                    .targets
                    .into_iter()
                    .map(|t| self.lower_expr(t))
                    .collect::<crate::error::Result<Vec<_>>>()?,
                value: self.lower_expr(*a.value)?,
            },
            RStmt::AugAssign(a) => Stmt::AugAssign {
                target: self.lower_expr(*a.target)?,
                op: lower_operator(a.op),
                value: self.lower_expr(*a.value)?,
            },
            RStmt::Assert(a) => Stmt::Assert {
                test: self.lower_expr(*a.test)?,
                msg: a.msg.map(|m| self.lower_expr(*m)).transpose()?,
            },
            RStmt::Expr(e) => Stmt::Expr(self.lower_expr(*e.value)?),
            // Every other statement kind (`try`, `with`, `match`, `global`, `del`, `raise`,
            // async defs, ...) is outside the accepted input grammar (§4.3). There is no
            // sensible node to hand downstream for these, so lowering rejects them outright
            // instead of inventing a placeholder a later pass would have to notice is fake.
            other => {
                return Err(self.node_not_supported(
                    format!("unsupported statement kind: {:?}", std::mem::discriminant(&other)),
                    other.range(),
                ))
            }
        })
    }

    fn lower_if(&mut self, i: rast::StmtIf) -> crate::error::Result<Stmt> {
        let test = self.lower_expr(*i.test)?;
        let body = self.lower_stmts(i.body)?;
        let orelse = self.lower_elif_chain(i.elif_else_clauses)?;
        Ok(Stmt::If { test, body, orelse })
    }

    /// Desugars ruff's `elif`/`else` clause list into nested `if`/`orelse`, matching the
    /// classic single-`orelse` shape SPEC_FULL.md §3 models (and what `ast.If` gave before
    /// newer parser generations flattened the chain for tooling convenience).
    fn lower_elif_chain(&mut self, mut clauses: Vec<rast::ElifElseClause>) -> crate::error::Result<Vec<Stmt>> {
        if clauses.is_empty() {
            return Ok(Vec::new());
        }
        let clause = clauses.remove(0);
        let body = self.lower_stmts(clause.body)?;
        Ok(match clause.test {
            Some(test) => vec![Stmt::If {
                test: self.lower_expr(test)?,
                body,
                orelse: self.lower_elif_chain(clauses)?,
            }],
            None => body,
        })
    }

    fn lower_params(&mut self, params: rast::Parameters) -> crate::error::Result<Params> {
        Ok(Params {
            posonly: params
                .posonlyargs
                .iter()
                .map(|p| self.lower_param(p))
                .collect::<crate::error::Result<Vec<_>>>()?,
            args: params.args.iter().map(|p| self.lower_param(p)).collect::<crate::error::Result<Vec<_>>>()?,
            vararg: params
                .vararg
                .as_ref()
                .map(|p| {
                    Ok(Param {
                        name: p.name.id.to_string(),
                        annotation: p.annotation.as_ref().map(|a| self.lower_expr((**a).clone())).transpose()?,
                        default: None,
                    })
                })
                .transpose()?,
            kwonly: params.kwonlyargs.iter().map(|p| self.lower_param(p)).collect::<crate::error::Result<Vec<_>>>()?,
            kwarg: params
                .kwarg
                .as_ref()
                .map(|p| {
                    Ok(Param {
                        name: p.name.id.to_string(),
                        annotation: p.annotation.as_ref().map(|a| self.lower_expr((**a).clone())).transpose()?,
                        default: None,
                    })
                })
                .transpose()?,
        })
    }

    fn lower_param(&mut self, p: &rast::ParameterWithDefault) -> crate::error::Result<Param> {
        Ok(Param {
            name: p.parameter.name.id.to_string(),
            annotation: p.parameter.annotation.as_ref().map(|a| self.lower_expr((**a).clone())).transpose()?,
            default: p.default.as_ref().map(|d| self.lower_expr((**d).clone())).transpose()?,
        })
    }

    fn lower_expr(&mut self, expr: RExpr) -> crate::error::Result<Expr> {
        Ok(match expr {
            RExpr::Name(n) => Expr::Name {
                id: n.id.to_string(),
                ctx: lower_ctx(n.ctx),
            },
            RExpr::NumberLiteral(n) => {
                let text = self.text(n.range()).to_owned();
                Expr::Literal(match n.value {
                    rast::Number::Int(_) => Literal::Int(text),
                    rast::Number::Float(_) => Literal::Float(text),
                    rast::Number::Complex { .. } => Literal::Complex(text),
                })
            }
            RExpr::StringLiteral(s) => Expr::Literal(Literal::Str(self.text(s.range()).to_owned())),
            RExpr::BytesLiteral(b) => Expr::Literal(Literal::Bytes(self.text(b.range()).to_owned())),
            RExpr::BooleanLiteral(b) => Expr::Literal(Literal::Bool(b.value)),
            RExpr::NoneLiteral(_) => Expr::Literal(Literal::None),
            RExpr::EllipsisLiteral(_) => Expr::Literal(Literal::Ellipsis),
            RExpr::Tuple(t) => Expr::Tuple {
                elts: t.elts.into_iter().map(|e| self.lower_expr(e)).collect::<crate::error::Result<Vec<_>>>()?,
                ctx: lower_ctx(t.ctx),
            },
            RExpr::List(l) => Expr::List {
                elts: l.elts.into_iter().map(|e| self.lower_expr(e)).collect::<crate::error::Result<Vec<_>>>()?,
                ctx: lower_ctx(l.ctx),
            },
            RExpr::Dict(d) => {
                let mut keys = Vec::new();
                let mut values = Vec::new();
                for item in d.items {
                    keys.push(item.key.map(|k| self.lower_expr(k)).transpose()?);
                    values.push(self.lower_expr(item.value)?);
                }
                Expr::Dict { keys, values }
            }
            RExpr::Call(c) => Expr::Call {
                func: Box::new(self.lower_expr(*c.func)?),
                args: c
                    .arguments
                    .args
                    .into_iter()
                    .map(|a| self.lower_expr(a))
                    .collect::<crate::error::Result<Vec<_>>>()?,
                keywords: c
                    .arguments
                    .keywords
                    .into_iter()
                    .map(|k| {
                        Ok(Keyword {
                            arg: k.arg.map(|id| id.id.to_string()),
                            value: self.lower_expr(k.value)?,
                        })
                    })
                    .collect::<crate::error::Result<Vec<_>>>()?,
            },
            RExpr::Attribute(a) => Expr::Attribute {
                value: Box::new(self.lower_expr(*a.value)?),
                attr: a.attr.id.to_string(),
                ctx: lower_ctx(a.ctx),
            },
            RExpr::Subscript(s) => Expr::Subscript {
                value: Box::new(self.lower_expr(*s.value)?),
                slice: Box::new(self.lower_slice(*s.slice)?),
                ctx: lower_ctx(s.ctx),
            },
            RExpr::UnaryOp(u) => Expr::UnaryOp {
                op: match u.op {
                    rast::UnaryOp::Not => UnaryOperator::Not,
                    rast::UnaryOp::USub => UnaryOperator::USub,
                    rast::UnaryOp::UAdd => UnaryOperator::UAdd,
                    rast::UnaryOp::Invert => UnaryOperator::Invert,
                },
                operand: Box::new(self.lower_expr(*u.operand)?),
            },
            RExpr::BinOp(b) => Expr::BinOp {
                left: Box::new(self.lower_expr(*b.left)?),
                op: lower_operator(b.op),
                right: Box::new(self.lower_expr(*b.right)?),
            },
            RExpr::BoolOp(b) => Expr::BoolOp {
                op: match b.op {
                    rast::BoolOp::And => BoolOperator::And,
                    rast::BoolOp::Or => BoolOperator::Or,
                },
                values: b.values.into_iter().map(|v| self.lower_expr(v)).collect::<crate::error::Result<Vec<_>>>()?,
            },
            RExpr::Compare(c) => Expr::Compare {
                left: Box::new(self.lower_expr(*c.left)?),
                ops: c
                    .ops
                    .iter()
                    .map(|op| match op {
                        rast::CmpOp::Eq => CmpOp::Eq,
                        rast::CmpOp::NotEq => CmpOp::NotEq,
                        rast::CmpOp::Lt => CmpOp::Lt,
                        rast::CmpOp::LtE => CmpOp::LtE,
                        rast::CmpOp::Gt => CmpOp::Gt,
                        rast::CmpOp::GtE => CmpOp::GtE,
                        rast::CmpOp::Is => CmpOp::Is,
                        rast::CmpOp::IsNot => CmpOp::IsNot,
                        rast::CmpOp::In => CmpOp::In,
                        rast::CmpOp::NotIn => CmpOp::NotIn,
                    })
                    .collect(),
                comparators: c
                    .comparators
                    .into_iter()
                    .map(|e| self.lower_expr(e))
                    .collect::<crate::error::Result<Vec<_>>>()?,
            },
            RExpr::Starred(s) => Expr::Starred {
                value: Box::new(self.lower_expr(*s.value)?),
                ctx: lower_ctx(s.ctx),
            },
            RExpr::ListComp(l) => Expr::ListComp {
                elt: Box::new(self.lower_expr(*l.elt)?),
                generators: l
                    .generators
                    .into_iter()
                    .map(|c| self.lower_comprehension(c))
                    .collect::<crate::error::Result<Vec<_>>>()?,
            },
            // Any other expression kind (lambda, f-string, walrus, yield, comprehensions
            // other than list comp, ...) is outside the accepted grammar; reject it rather
            // than smuggle its source text through as a string literal the unparser would
            // happily print back out as if it had been understood.
            other => {
                return Err(self.node_not_supported(
                    format!("unsupported expression kind: {:?}", std::mem::discriminant(&other)),
                    other.range(),
                ))
            }
        })
    }

    fn lower_comprehension(&mut self, c: rast::Comprehension) -> crate::error::Result<Comprehension> {
        Ok(Comprehension {
            target: self.lower_expr(c.target)?,
            iter: self.lower_expr(c.iter)?,
            ifs: c.ifs.into_iter().map(|e| self.lower_expr(e)).collect::<crate::error::Result<Vec<_>>>()?,
            is_async: c.is_async,
        })
    }

    fn lower_slice(&mut self, slice: RExpr) -> crate::error::Result<Slice> {
        Ok(match slice {
            RExpr::Slice(s) => Slice::Slice {
                lower: s.lower.map(|e| self.lower_expr(*e)).transpose()?,
                upper: s.upper.map(|e| self.lower_expr(*e)).transpose()?,
                step: s.step.map(|e| self.lower_expr(*e)).transpose()?,
            },
            RExpr::Tuple(t) if t.elts.iter().any(|e| matches!(e, RExpr::Slice(_))) => Slice::ExtSlice(
                t.elts.into_iter().map(|e| self.lower_slice(e)).collect::<crate::error::Result<Vec<_>>>()?,
            ),
            other => Slice::Index(self.lower_expr(other)?),
        })
    }
}

fn lower_ctx(ctx: rast::ExprContext) -> Ctx {
    match ctx {
        rast::ExprContext::Load => Ctx::Load,
        rast::ExprContext::Store => Ctx::Store,
        rast::ExprContext::Del => Ctx::Del,
        rast::ExprContext::Invalid => Ctx::Load,
    }
}

fn lower_operator(op: rast::Operator) -> Operator {
    match op {
        rast::Operator::Add => Operator::Add,
        rast::Operator::Sub => Operator::Sub,
        rast::Operator::Mult => Operator::Mult,
        rast::Operator::MatMult => Operator::MatMult,
        rast::Operator::Div => Operator::Div,
        rast::Operator::Mod => Operator::Mod,
        rast::Operator::Pow => Operator::Pow,
        rast::Operator::LShift => Operator::LShift,
        rast::Operator::RShift => Operator::RShift,
        rast::Operator::BitOr => Operator::BitOr,
        rast::Operator::BitXor => Operator::BitXor,
        rast::Operator::BitAnd => Operator::BitAnd,
        rast::Operator::FloorDiv => Operator::FloorDiv,
    }
}
