//! This module contains the IR model: immutable, structurally shared program
//! terms for types, expressions, statements, and declarations.
//!
//! Terms are created by the frontend and by the evaluator (new terms on each
//! rebuild) and are treated as immutable once shared. Identity is by
//! pointer; equality is structural.

pub mod decl;
pub mod expr;
pub mod stmt;
pub mod types;

pub use decl::{Declaration, Program};
pub use expr::{ExprRef, Expression};
pub use stmt::{Statement, StmtRef};
pub use types::{Type, TypeRef};
