//! Source-to-source transform turning an imperative Python script into a continuation-
//! passing-style one that can pause and resume across process boundaries (SPEC_FULL.md).
//!
//! This crate does no process I/O of its own; [`driver::compile`] is the one public entry
//! point, mirroring how the teacher crate keeps `ouros` a pure library and leaves files,
//! stdio, and exit codes to `ouros-cli`.

pub mod ast;
pub mod driver;
pub mod error;

mod auto_pause;
mod cps;
mod flatten;
mod globals;
mod ignore;
mod liveness;
mod lower;
mod unparse;

pub use driver::{compile, CompileOptions};
pub use error::CompileError;
