//! Gathers module-scope names (SPEC_FULL.md §4.2), grounded on
//! `compiler/transform/gather_globals.py`.

use std::collections::HashSet;

use crate::ast::{find_vars_in_stmt_shallow, Module, Stmt, VarsByUsage};

/// Names available in any Python module before any user code runs, kept as a fixed list
/// supplied at implementation time (§4.2 item 1) rather than introspected at run time, since
/// this compiler never executes the program it transforms.
const BUILTINS: &[&str] = &[
    "abs", "aiter", "anext", "all", "any", "ascii", "bin", "bool", "breakpoint", "bytearray",
    "bytes", "callable", "chr", "classmethod", "compile", "complex", "delattr", "dict", "dir",
    "divmod", "enumerate", "eval", "exec", "filter", "float", "format", "frozenset", "getattr",
    "globals", "hasattr", "hash", "help", "hex", "id", "input", "int", "isinstance", "issubclass",
    "iter", "len", "list", "locals", "map", "max", "memoryview", "min", "next", "object", "oct",
    "open", "ord", "pow", "print", "property", "range", "repr", "reversed", "round", "set",
    "setattr", "slice", "sorted", "staticmethod", "str", "sum", "super", "tuple", "type", "vars",
    "zip", "__import__", "True", "False", "None", "NotImplemented", "Ellipsis", "__debug__",
    "ArithmeticError", "AssertionError", "AttributeError", "BaseException", "BlockingIOError",
    "BrokenPipeError", "BufferError", "BytesWarning", "ChildProcessError", "ConnectionAbortedError",
    "ConnectionError", "ConnectionRefusedError", "ConnectionResetError", "DeprecationWarning",
    "EOFError", "Exception", "FileExistsError", "FileNotFoundError", "FloatingPointError",
    "FutureWarning", "GeneratorExit", "IOError", "ImportError", "ImportWarning", "IndentationError",
    "IndexError", "InterruptedError", "IsADirectoryError", "KeyError", "KeyboardInterrupt",
    "LookupError", "MemoryError", "ModuleNotFoundError", "NameError", "NotADirectoryError",
    "NotImplementedError", "OSError", "OverflowError", "PendingDeprecationWarning",
    "PermissionError", "ProcessLookupError", "RecursionError", "ReferenceError", "ResourceWarning",
    "RuntimeError", "RuntimeWarning", "StopAsyncIteration", "StopIteration", "SyntaxError",
    "SyntaxWarning", "SystemError", "SystemExit", "TabError", "TimeoutError", "TypeError",
    "UnboundLocalError", "UnicodeDecodeError", "UnicodeEncodeError", "UnicodeError",
    "UnicodeTranslateError", "UnicodeWarning", "UserWarning", "ValueError", "Warning",
    "ZeroDivisionError",
];

/// Returns every name visible at module scope: builtins plus whatever the module itself
/// binds at its top level.
///
/// This is a static approximation (§9 "Globals as a static approximation"): a name rebound
/// inside a function is not tracked here, matching the reference implementation's own
/// documented limitation.
pub fn gather_global_names(module: &Module) -> HashSet<String> {
    let mut names: HashSet<String> = BUILTINS.iter().map(|s| s.to_string()).collect();
    for stmt in &module.body {
        match stmt {
            Stmt::FunctionDef(f) => {
                names.insert(f.name.clone());
            }
            Stmt::ClassDef(c) => {
                names.insert(c.name.clone());
            }
            Stmt::Import(aliases) => {
                for a in aliases {
                    names.insert(import_bound_name(a.asname.as_deref(), &a.name));
                }
            }
            Stmt::ImportFrom { names: aliases, .. } => {
                for a in aliases {
                    names.insert(a.asname.clone().unwrap_or_else(|| a.name.clone()));
                }
            }
            other => {
                let mut usage = VarsByUsage::default();
                find_vars_in_stmt_shallow(other, &mut usage);
                names.extend(usage.store);
            }
        }
    }
    names
}

/// A plain `import a.b.c` binds only the head name `a`; `import a.b.c as x` binds `x`.
fn import_bound_name(asname: Option<&str>, dotted: &str) -> String {
    match asname {
        Some(asname) => asname.to_string(),
        None => dotted.split('.').next().unwrap_or(dotted).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Alias, ClassDef, FunctionDef, Params, SrcSpan};

    fn span() -> SrcSpan {
        SrcSpan { start: 0, end: 0 }
    }

    #[test]
    fn includes_builtins() {
        let module = Module { body: vec![] };
        let names = gather_global_names(&module);
        assert!(names.contains("len"));
        assert!(names.contains("print"));
    }

    #[test]
    fn collects_def_class_import_and_assignment_names() {
        let module = Module {
            body: vec![
                Stmt::FunctionDef(FunctionDef {
                    id: 0,
                    name: "handler".to_string(),
                    params: Params::default(),
                    body: vec![Stmt::Pass],
                    decorators: vec![],
                    src: span(),
                }),
                Stmt::ClassDef(ClassDef {
                    id: 1,
                    name: "Widget".to_string(),
                    bases: vec![],
                    keywords: vec![],
                    body: vec![Stmt::Pass],
                    decorators: vec![],
                    src: span(),
                }),
                Stmt::Import(vec![Alias {
                    name: "os.path".to_string(),
                    asname: None,
                }]),
                Stmt::ImportFrom {
                    module: Some("json".to_string()),
                    names: vec![Alias {
                        name: "dumps".to_string(),
                        asname: Some("to_json".to_string()),
                    }],
                    level: 0,
                },
                crate::ast::assign("counter", crate::ast::load("0_placeholder")),
            ],
        };
        let names = gather_global_names(&module);
        assert!(names.contains("handler"));
        assert!(names.contains("Widget"));
        assert!(names.contains("os"));
        assert!(names.contains("to_json"));
        assert!(!names.contains("dumps"));
        assert!(names.contains("counter"));
    }
}
