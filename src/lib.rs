//! A compiler core: a flyweight-interned type system, an expression-tree
//! frontend, an IR emitter, and a stack-based bytecode interpreter that
//! doubles as the compile-time evaluation engine.
//!
//! The crate is organized the way `cranelift-codegen` splits concerns
//! across its own submodules, scaled down to a single compilation unit:
//!
//! - [`types`] — the interned type algebra ([`types::Type`], [`types::TypeRegistry`])
//!   and the nominal arena ([`types::nominal`]) for structs/enums/flags/opaques.
//! - [`ast`] — the typed expression tree the emitter consumes.
//! - [`frontend`] — a lexer and parser turning source text into [`ast::Expr`].
//! - [`emitter`] — translates an [`ast::Expr`] into [`ir`].
//! - [`ir`] — the per-function control-flow graph of typed instructions.
//! - [`interp`] — the bytecode interpreter.
//! - [`eval_bridge`] — compile-time constant evaluation and generic function
//!   instantiation, built on top of [`emitter`] and [`interp`].
//! - [`cast`] — the cast lattice used by both [`emitter`] and [`interp`].
//! - [`layout`] — size/alignment computations shared by emission and execution.
//! - [`diagnostics`] — the structured error-reporting contract.
//! - [`error`] — the error types diagnostics and evaluation failures are built from.
//! - [`module`] — ties a [`types::TypeRegistry`], function table, and
//!   [`eval_bridge::EvalBridge`] together into one compilation unit, with an
//!   optional on-disk image format behind the `module-image` feature.

pub mod ast;
pub mod cast;
pub mod diagnostics;
pub mod emitter;
pub mod entity;
pub mod error;
pub mod eval_bridge;
pub mod frontend;
pub mod interp;
pub mod ir;
pub mod layout;
pub mod module;
pub mod types;

pub use emitter::Emitter;
pub use error::{Error, Result};
pub use eval_bridge::EvalBridge;
pub use module::Module;
pub use types::{Type, TypeRegistry};
