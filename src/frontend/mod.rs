//! A minimal lexer and recursive-descent parser turning source text into
//! [`crate::ast::Expr`]/[`crate::ast::Stmt`] trees.
//!
//! The core's own `spec.md` §1 treats the parse tree as an external
//! collaborator — the `ast` module is its stand-in, not something this
//! crate is required to produce from text. This module exists only so
//! `icarusc` has something real to drive `Emitter`/`Interpreter` with;
//! nothing elsewhere in the core depends on it. Grounded on
//! `cranelift-reader`'s `Location`/`ParseError`/`ParseResult` naming
//! (`error.rs`), applied here to a hand-rolled Pratt parser rather than
//! cranelift's `.clif` textual-IR grammar.

pub mod lexer;
pub mod parser;

pub use lexer::{Lexer, Token};
pub use parser::{ParseError, ParseResult, Parser};

/// Parses a complete source unit: one top-level `Expr` (normally a
/// `FunctionLiteral`). `icarusc`'s only consumer so far; nothing stops a
/// future entry point from parsing a sequence of declarations instead.
pub fn parse_expr(source: &str) -> ParseResult<crate::ast::Expr> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_expr_to_end()
}
