//! Internal AST model used by every compiler pass.
//!
//! This is a deliberately small tagged union mirroring Python's own `ast` module shapes
//! (see the reference `compiler/transform/*.py` passes this crate reimplements), not the
//! full surface of the parser crate used to produce it. [`crate::lower`] is the only module
//! that ever sees the parser's tree; everything downstream works over these types.

use std::collections::HashSet;

/// Stable identity for a top-level `class`/`function` definition.
///
/// Python's `ast` nodes are identified by their `id()` (object identity); this model has no
/// such primitive, so a monotonic counter assigned at lowering time plays the same role.
pub type NodeId = u32;

/// A byte range into the original source text, kept only on top-level definitions so that
/// an ignored definition can be spliced back out verbatim (see `IgnorePreservation` in
/// SPEC_FULL.md §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrcSpan {
    pub start: u32,
    pub end: u32,
}

/// The context a `Name`/`Attribute`/`Subscript` node is used in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ctx {
    Load,
    Store,
    Del,
    Param,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    USub,
    UAdd,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mult,
    MatMult,
    Div,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
    FloorDiv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

/// A literal value.
///
/// Numeric/string/bytes literals store the exact source text they were parsed from (quotes,
/// prefixes and all) rather than a decoded value: this pass never needs to inspect a
/// literal's value, only to move it unchanged to a new position in the tree, so keeping the
/// original text both sidesteps a redundant literal-formatting layer and guarantees the
/// reprinted literal is byte-identical to what the user wrote.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(String),
    Float(String),
    Complex(String),
    Str(String),
    Bytes(String),
    Bool(bool),
    None,
    Ellipsis,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Name {
        id: String,
        ctx: Ctx,
    },
    Literal(Literal),
    Tuple {
        elts: Vec<Expr>,
        ctx: Ctx,
    },
    List {
        elts: Vec<Expr>,
        ctx: Ctx,
    },
    Dict {
        /// `None` key denotes a `**value` unpacking entry.
        keys: Vec<Option<Expr>>,
        values: Vec<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
        ctx: Ctx,
    },
    Subscript {
        value: Box<Expr>,
        slice: Box<Slice>,
        ctx: Ctx,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expr>,
    },
    BinOp {
        left: Box<Expr>,
        op: Operator,
        right: Box<Expr>,
    },
    BoolOp {
        op: BoolOperator,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    Starred {
        value: Box<Expr>,
        ctx: Ctx,
    },
    /// Only ever appears pre-flatten; desugared away by the flattener (§4.3).
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
}

#[derive(Debug, Clone)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
    pub is_async: bool,
}

#[derive(Debug, Clone)]
pub struct Keyword {
    /// `None` denotes `**value`.
    pub arg: Option<String>,
    pub value: Expr,
}

/// A slice operand of a `Subscript`. Mirrors the historical `ast.Index`/`ast.Slice`/
/// `ast.ExtSlice` split named in SPEC_FULL.md §3; modern Python ASTs fold `Index` into a
/// plain expression and `ExtSlice` into a `Tuple`, which is why only two variants carry
/// payload here and a plain index is just `Slice::Index`.
#[derive(Debug, Clone)]
pub enum Slice {
    Index(Expr),
    Slice {
        lower: Option<Expr>,
        upper: Option<Expr>,
        step: Option<Expr>,
    },
    ExtSlice(Vec<Slice>),
}

#[derive(Debug, Clone)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ElseIf {
    pub test: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub id: NodeId,
    pub name: String,
    pub params: Params,
    pub body: Vec<Stmt>,
    /// Either empty, `[on_coordinator]`, or `[rt.on_coordinator]` once accepted by flatten.
    pub decorators: Vec<Expr>,
    pub src: SrcSpan,
}

#[derive(Debug, Clone, Default)]
pub struct Param {
    pub name: String,
    pub annotation: Option<Expr>,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, Default)]
pub struct Params {
    pub posonly: Vec<Param>,
    pub args: Vec<Param>,
    pub vararg: Option<Param>,
    pub kwonly: Vec<Param>,
    pub kwarg: Option<Param>,
}

impl Params {
    /// All parameter names bound by this signature, in the order CPython binds them.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.posonly
            .iter()
            .chain(self.args.iter())
            .chain(self.vararg.iter())
            .chain(self.kwonly.iter())
            .chain(self.kwarg.iter())
            .map(|p| p.name.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub id: NodeId,
    pub name: String,
    pub bases: Vec<Expr>,
    pub keywords: Vec<Keyword>,
    pub body: Vec<Stmt>,
    pub decorators: Vec<Expr>,
    pub src: SrcSpan,
}

/// A single `except` clause. The flattener only ever accepts input without `try`
/// statements (§4.3); this shape exists purely to represent the CPS transform's own
/// generated try/except handoff wrapper (§4.6).
#[derive(Debug, Clone)]
pub struct ExceptHandler {
    pub exc_type: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct TryStmt {
    pub body: Vec<Stmt>,
    pub handlers: Vec<ExceptHandler>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    FunctionDef(FunctionDef),
    ClassDef(ClassDef),
    Return(Option<Expr>),
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        /// Empty on any accepted input (a loop `else` is rejected by the flattener, §4.3);
        /// populated only by the CPS pass's dummy-loop-plus-restart idiom (§4.6).
        orelse: Vec<Stmt>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        /// See `While::orelse`.
        orelse: Vec<Stmt>,
    },
    Break,
    Continue,
    Pass,
    Import(Vec<Alias>),
    ImportFrom {
        module: Option<String>,
        names: Vec<Alias>,
        level: u32,
    },
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        op: Operator,
        value: Expr,
    },
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    /// An expression evaluated for effect. Only ever appears pre-flatten: the flattener
    /// either turns a call into an `Assign` or drops a side-effect-free expression entirely
    /// (matching the reference `Flatten.visit_Expr`).
    Expr(Expr),
    /// Only produced by the CPS transform (§4.6); never accepted on input.
    Try(TryStmt),
    /// Bare re-raise, only produced by the CPS transform.
    Raise,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub body: Vec<Stmt>,
}

// ---------------------------------------------------------------------------------------
// Construction helpers mirroring `transform/util.py`'s `load`/`assign`/`clone_node`.
// ---------------------------------------------------------------------------------------

/// Builds a `Name` node that loads a variable, i.e. `transform/util.py::load`.
pub fn load(name: impl Into<String>) -> Expr {
    Expr::Name {
        id: name.into(),
        ctx: Ctx::Load,
    }
}

fn store(name: impl Into<String>) -> Expr {
    Expr::Name {
        id: name.into(),
        ctx: Ctx::Store,
    }
}

/// Builds `name = value`, i.e. `transform/util.py::assign`.
pub fn assign(name: impl Into<String>, value: Expr) -> Stmt {
    Stmt::Assign {
        targets: vec![store(name)],
        value,
    }
}

/// Groups the names used by a node by their [`Ctx`], mirroring
/// `transform/util.py::find_variables_by_usage`.
#[derive(Debug, Default, Clone)]
pub struct VarsByUsage {
    pub load: HashSet<String>,
    pub store: HashSet<String>,
    pub del: HashSet<String>,
    pub param: HashSet<String>,
}

impl VarsByUsage {
    fn record(&mut self, id: &str, ctx: Ctx) {
        let set = match ctx {
            Ctx::Load => &mut self.load,
            Ctx::Store => &mut self.store,
            Ctx::Del => &mut self.del,
            Ctx::Param => &mut self.param,
        };
        set.insert(id.to_owned());
    }
}

/// Walks an expression, recording every `Name` by its usage context.
pub fn find_vars_in_expr(expr: &Expr, out: &mut VarsByUsage) {
    match expr {
        Expr::Name { id, ctx } => out.record(id, *ctx),
        Expr::Literal(_) => {}
        Expr::Tuple { elts, .. } | Expr::List { elts, .. } => {
            for e in elts {
                find_vars_in_expr(e, out);
            }
        }
        Expr::Dict { keys, values } => {
            for k in keys.iter().flatten() {
                find_vars_in_expr(k, out);
            }
            for v in values {
                find_vars_in_expr(v, out);
            }
        }
        Expr::Call { func, args, keywords } => {
            find_vars_in_expr(func, out);
            for a in args {
                find_vars_in_expr(a, out);
            }
            for kw in keywords {
                find_vars_in_expr(&kw.value, out);
            }
        }
        Expr::Attribute { value, .. } => find_vars_in_expr(value, out),
        Expr::Subscript { value, slice, .. } => {
            find_vars_in_expr(value, out);
            find_vars_in_slice(slice, out);
        }
        Expr::UnaryOp { operand, .. } => find_vars_in_expr(operand, out),
        Expr::BinOp { left, right, .. } => {
            find_vars_in_expr(left, out);
            find_vars_in_expr(right, out);
        }
        Expr::BoolOp { values, .. } => {
            for v in values {
                find_vars_in_expr(v, out);
            }
        }
        Expr::Compare { left, comparators, .. } => {
            find_vars_in_expr(left, out);
            for c in comparators {
                find_vars_in_expr(c, out);
            }
        }
        Expr::Starred { value, .. } => find_vars_in_expr(value, out),
        Expr::ListComp { elt, generators } => {
            find_vars_in_expr(elt, out);
            for comp in generators {
                find_vars_in_expr(&comp.target, out);
                find_vars_in_expr(&comp.iter, out);
                for i in &comp.ifs {
                    find_vars_in_expr(i, out);
                }
            }
        }
    }
}

fn find_vars_in_slice(slice: &Slice, out: &mut VarsByUsage) {
    match slice {
        Slice::Index(e) => find_vars_in_expr(e, out),
        Slice::Slice { lower, upper, step } => {
            for e in [lower, upper, step].into_iter().flatten() {
                find_vars_in_expr(e, out);
            }
        }
        Slice::ExtSlice(dims) => {
            for d in dims {
                find_vars_in_slice(d, out);
            }
        }
    }
}

/// Groups the names used by a parameter list's defaults/annotations by usage, and records
/// every parameter name itself as [`Ctx::Param`].
pub fn find_vars_in_params(params: &Params, out: &mut VarsByUsage) {
    let all = params
        .posonly
        .iter()
        .chain(params.args.iter())
        .chain(params.vararg.iter())
        .chain(params.kwonly.iter())
        .chain(params.kwarg.iter());
    for p in all {
        out.record(&p.name, Ctx::Param);
        if let Some(d) = &p.default {
            find_vars_in_expr(d, out);
        }
        if let Some(a) = &p.annotation {
            find_vars_in_expr(a, out);
        }
    }
}

/// Groups the names used (read) by a single statement's immediate substructure, without
/// recursing into nested blocks. Used by the liveness tracker's `visit_simple_stmt`.
pub fn find_vars_in_stmt_shallow(stmt: &Stmt, out: &mut VarsByUsage) {
    match stmt {
        Stmt::Expr(e) | Stmt::Return(Some(e)) => find_vars_in_expr(e, out),
        Stmt::Return(None) | Stmt::Break | Stmt::Continue | Stmt::Pass | Stmt::Raise => {}
        Stmt::Assert { test, msg } => {
            find_vars_in_expr(test, out);
            if let Some(m) = msg {
                find_vars_in_expr(m, out);
            }
        }
        Stmt::Assign { targets, value } => {
            find_vars_in_expr(value, out);
            for t in targets {
                find_vars_in_expr(t, out);
            }
        }
        Stmt::AugAssign { target, value, .. } => {
            find_vars_in_expr(target, out);
            find_vars_in_expr(value, out);
        }
        // Control-flow / definition statements are handled structurally by each pass; this
        // helper only covers the "simple statement" cases per `transform/liveness.py`.
        _ => {}
    }
}
