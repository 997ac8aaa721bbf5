//! Error kinds propagated by semantic analysis and by the interpreter.
//!
//! Mirrors `spec.md` §7. Unlike `cranelift-codegen` (which hand-rolls
//! `Display`/`std::error::Error` to stay `no_std`-friendly, see
//! `data_value.rs::DataValueCastFailure`), the Icarus core has no `no_std`
//! requirement, so error enums are declared with `thiserror` the way the
//! higher-level `wasmtime` crates do.

use thiserror::Error;

use crate::diagnostics::{Category, Message};
use crate::types::Type;

/// Reasons an [`crate::interp::Interpreter`] run aborted a compile-time
/// evaluation. Never surfaces to the interpreter's own caller as a Rust
/// panic; every abort path returns one of these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvaluationFailure {
    #[error("foreign function signature is not one of the supported shapes")]
    ForeignSignatureUnsupported,
    #[error("accessed a struct/enum/flags type before it was completed")]
    IncompleteStructUse,
    #[error("loaded through a null pointer")]
    NullLoad,
    #[error("division by zero")]
    DivideByZero,
    #[error("generic function specialization's work item was never resolved")]
    WorkItemUnresolved,
    #[error("out of bounds memory access at offset {offset} (region size {size})")]
    OutOfBounds { offset: usize, size: usize },
    #[error("no predecessor pair in a Phi instruction matched the block control arrived from")]
    PhiMismatch,
    #[error("execution path reached a `NOT_YET` marker: {0}")]
    NotYetImplemented(&'static str),
    #[error("compile-time evaluation exceeded its instruction budget")]
    InstructionBudgetExceeded,
    #[error("generic function instantiation expected {expected} type argument(s), found {found}")]
    GenericArityMismatch { expected: usize, found: usize },
}

/// Top-level error type for the core. Each variant corresponds to one of the
/// `spec.md` §7 error kinds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("'{0}' is a reserved keyword")]
    ReservedKeyword(String),
    #[error("right-hand side of member access must be an identifier")]
    AccessRhsNotIdentifier,
    #[error("only declarations are permitted directly inside a struct body")]
    NonDeclarationInStruct,
    #[error("unknown builtin hashtag '#{0}'")]
    UnknownBuiltinHashtag(String),

    #[error("invalid cast from {from} to {to}")]
    InvalidCast { from: Type, to: Type },
    #[error("expression does not denote a type")]
    NotAType,
    #[error("type {0} has no default value")]
    NoDefaultValue(Type),
    #[error("could not infer a concrete type")]
    UninferrableType,
    #[error("values of type {0} and {1} cannot be compared")]
    ComparingIncomparables(Type, Type),
    #[error("type {0} has no member named '{1}'")]
    MissingMember(Type, String),
    #[error("member '{1}' of {0} is not exported")]
    NonExportedMember(Type, String),
    #[error("type {0} has no members")]
    TypeHasNoMembers(Type),
    #[error("member access on {0} is not a constant expression")]
    NonConstantTypeMemberAccess(Type),
    #[error("module member access must be a constant expression")]
    NonConstantModuleMemberAccess,
    #[error("identifier '{0}' is not declared in this module")]
    UndeclaredIdentifierInModule(String),
    #[error("declaration of '{0}' shadows an existing declaration")]
    ShadowingDeclaration(String),
    #[error("cyclic dependency detected while evaluating '{0}'")]
    CyclicDependency(String),
    #[error("return type mismatch: expected {expected}, found {found}")]
    ReturnTypeMismatch { expected: Type, found: Type },
    #[error("assignment has {lhs} left-hand side(s) but {rhs} right-hand side(s)")]
    MismatchedAssignmentCount { lhs: usize, rhs: usize },
    #[error("cannot assign to a constant")]
    AssigningToConstant,
    #[error("cannot dereference a non-pointer type {0}")]
    DereferencingNonPointer(Type),
    #[error("cannot index a non-array type {0}")]
    IndexingNonArray(Type),
    #[error("index must be an integral type, found {0}")]
    InvalidIndexType(Type),
    #[error("tuple index {index} out of bounds (length {length})")]
    IndexingTupleOutOfBounds { index: usize, length: usize },
    #[error("{0} is not callable")]
    NotAFunction(Type),

    #[error("compile-time evaluation failed: {0}")]
    EvaluationFailure(#[from] EvaluationFailure),
}

impl Error {
    /// Category this error is reported under, per `spec.md` §6's
    /// diagnostic sink contract.
    pub fn category(&self) -> Category {
        match self {
            Error::ReservedKeyword(_)
            | Error::AccessRhsNotIdentifier
            | Error::NonDeclarationInStruct
            | Error::UnknownBuiltinHashtag(_) => Category::ParseError,
            Error::AssigningToConstant
            | Error::DereferencingNonPointer(_)
            | Error::IndexingNonArray(_)
            | Error::InvalidIndexType(_)
            | Error::IndexingTupleOutOfBounds { .. } => Category::ValueCategoryError,
            Error::EvaluationFailure(_) => Category::BuildError,
            _ => Category::TypeError,
        }
    }

    /// Converts this error into the structured diagnostic payload that a
    /// `DiagnosticConsumer` receives. Wording is intentionally terse; exact
    /// phrasing is out of scope per `spec.md`'s Non-goals.
    pub fn to_message(&self) -> Message {
        Message {
            category: self.category(),
            name: variant_name(self),
            kind: "error",
            payload: self.to_string(),
        }
    }
}

fn variant_name(err: &Error) -> &'static str {
    match err {
        Error::ReservedKeyword(_) => "reserved-keyword",
        Error::AccessRhsNotIdentifier => "access-rhs-not-identifier",
        Error::NonDeclarationInStruct => "non-declaration-in-struct",
        Error::UnknownBuiltinHashtag(_) => "unknown-builtin-hashtag",
        Error::InvalidCast { .. } => "invalid-cast",
        Error::NotAType => "not-a-type",
        Error::NoDefaultValue(_) => "no-default-value",
        Error::UninferrableType => "uninferrable-type",
        Error::ComparingIncomparables(..) => "comparing-incomparables",
        Error::MissingMember(..) => "missing-member",
        Error::NonExportedMember(..) => "non-exported-member",
        Error::TypeHasNoMembers(_) => "type-has-no-members",
        Error::NonConstantTypeMemberAccess(_) => "non-constant-type-member-access",
        Error::NonConstantModuleMemberAccess => "non-constant-module-member-access",
        Error::UndeclaredIdentifierInModule(_) => "undeclared-identifier-in-module",
        Error::ShadowingDeclaration(_) => "shadowing-declaration",
        Error::CyclicDependency(_) => "cyclic-dependency",
        Error::ReturnTypeMismatch { .. } => "return-type-mismatch",
        Error::MismatchedAssignmentCount { .. } => "mismatched-assignment-count",
        Error::AssigningToConstant => "assigning-to-constant",
        Error::DereferencingNonPointer(_) => "dereferencing-non-pointer",
        Error::IndexingNonArray(_) => "indexing-non-array",
        Error::InvalidIndexType(_) => "invalid-index-type",
        Error::IndexingTupleOutOfBounds { .. } => "indexing-tuple-out-of-bounds",
        Error::NotAFunction(_) => "not-a-function",
        Error::EvaluationFailure(_) => "evaluation-failure",
    }
}

pub type Result<T> = std::result::Result<T, Error>;
