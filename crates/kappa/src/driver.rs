//! Wires the passes together into one compile entry point (SPEC_FULL.md §4.7), grounded on
//! `compiler/do_transform.py`'s pipeline function and the teacher's `session_manager.rs`
//! pattern of a single fallible entry point the CLI layer can call without knowing about any
//! individual stage.

use crate::ast::{Alias, Expr, Module, Stmt};
use crate::error::CompileError;
use crate::{auto_pause, cps, flatten, globals, ignore, lower, unparse};

/// Options controlling a single compile (§12).
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Insert an `rt.maybe_pause()` check before every call, not only ones the source marks
    /// explicitly (`--auto-pause`).
    pub auto_pause: bool,
}

/// Runs the full pipeline over `source` and returns the transformed Python source text.
pub fn compile(source: &str, options: CompileOptions) -> Result<String, CompileError> {
    let module = lower::Lowering::parse_module(source)?;

    let ignored = ignore::identify_ignore(&module);
    let global_names = globals::gather_global_names(&module);

    let module = flatten::flatten_module(module, &ignored)?;
    let module = if options.auto_pause { auto_pause::insert_auto_pause(module, &ignored) } else { module };
    let module = cps::transform_to_cps(module, &ignored, global_names)?;
    let module = prepend_runtime_import(module);
    let module = append_handler_epilogue(module);

    Ok(unparse::unparse_module(&module, source, &ignored))
}

/// Every pass after [`crate::ignore::identify_ignore`] emits bare `rt.*` references; this
/// makes sure the name actually resolves when the output runs as a standalone script.
fn prepend_runtime_import(mut module: Module) -> Module {
    let import_rt = Stmt::Import(vec![Alias { name: "rt".to_string(), asname: None }]);
    module.body.insert(0, import_rt);
    module
}

/// `try: rt_handler = rt.lambda_handler(handler) / except NameError: pass` — scripts that
/// never define a `handler` symbol still compile and run standalone (§4.7).
fn append_handler_epilogue(mut module: Module) -> Module {
    let assign_handler = Stmt::Assign {
        targets: vec![crate::ast::load("rt_handler")],
        value: Expr::Call {
            func: Box::new(Expr::Attribute {
                value: Box::new(crate::ast::load("rt")),
                attr: "lambda_handler".to_string(),
                ctx: crate::ast::Ctx::Load,
            }),
            args: vec![crate::ast::load("handler")],
            keywords: Vec::new(),
        },
    };
    let try_stmt = Stmt::Try(crate::ast::TryStmt {
        body: vec![assign_handler],
        handlers: vec![crate::ast::ExceptHandler {
            exc_type: Some(crate::ast::load("NameError")),
            name: None,
            body: vec![Stmt::Pass],
        }],
    });
    module.body.push(try_stmt);
    module
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_trivial_script() {
        let out = compile("x = 1\n", CompileOptions::default()).unwrap();
        assert!(out.contains("import rt"));
        assert!(out.contains("x = 1"));
        assert!(out.contains("rt.lambda_handler"));
    }

    #[test]
    fn rejects_a_syntax_error() {
        let err = compile("def f(:\n", CompileOptions::default());
        assert!(matches!(err, Err(CompileError::Parse(_))));
    }

    #[test]
    fn auto_pause_option_wraps_call_assignments() {
        let source = "def f():\n    y = g()\n    return y\n";
        let out = compile(source, CompileOptions { auto_pause: true }).unwrap();
        assert!(out.contains("maybe_pause"));
    }
}
