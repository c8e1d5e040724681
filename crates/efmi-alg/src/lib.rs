//! eFMI Algorithm Code front end
//!
//! Parses GALEC-style Algorithm Code, builds a typed AST per file and checks
//! it against its own declarations and a manifest variable table.
//!
//! - `parser`: pest grammar and syntax errors
//! - `builder`: parse tree → [`AlgorithmCodeModule`] (precedence, loop
//!   unrolling, constructor decomposition)
//! - `table`: declared-variable tables with per-element array keys
//! - `check`: declaration, type and condition checks
//!
//! Every parse is independent: the builder returns an owned module and keeps
//! no state between calls.

pub mod ast;
pub mod builder;
pub mod check;
pub mod diagnostics;
pub mod parser;
pub mod table;

pub use ast::{AlgorithmCodeModule, BindingKind, Causality, Expression, FunctionRecord, PrimitiveType};
pub use builder::{build_algorithm_code, build_expression, BuildError};
pub use check::{check_module, is_logical, Scope};
pub use diagnostics::{has_errors, Diagnostic, DiagnosticCode, Severity};
pub use parser::ParseError;
pub use table::{TableMode, VariableEntry, VariableTable};
