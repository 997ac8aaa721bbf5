//! The diagnostic sink contract (`spec.md` §6).
//!
//! The core never renders a diagnostic itself — that is a collaborator's
//! job — it only produces structured [`Message`]s and hands them to
//! whatever [`DiagnosticConsumer`] the host wired up. This mirrors
//! `wasmtime`'s own split between `wasmtime-environ` (produces structured
//! errors) and a CLI frontend (renders them).

use std::fmt;

/// Coarse category a diagnostic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    TypeError,
    ParseError,
    ValueCategoryError,
    BuildError,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::TypeError => "type-error",
            Category::ParseError => "parse-error",
            Category::ValueCategoryError => "value-category-error",
            Category::BuildError => "build-error",
        };
        f.write_str(s)
    }
}

/// A structured diagnostic message. The core does not interpret these past
/// producing them; the payload is free text (exact wording is a
/// Non-goal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub category: Category,
    pub name: &'static str,
    pub kind: &'static str,
    pub payload: String,
}

/// The sink every diagnostic is routed through. Analogous to
/// `DiagnosticConsumer::Consume` in the original implementation's
/// `diagnostic/consumer/consumer.h`.
pub trait DiagnosticConsumer {
    fn consume(&mut self, message: Message);

    /// True once at least one message whose category name contains
    /// "error" has been consumed, matching the CLI's exit-code contract
    /// in `spec.md` §6.
    fn has_errors(&self) -> bool;
}

/// A `DiagnosticConsumer` that appends every message to a `Vec`, used by
/// tests in place of a real console/JSON renderer (which is explicitly out
/// of scope).
#[derive(Debug, Default)]
pub struct CollectingConsumer {
    pub messages: Vec<Message>,
}

impl CollectingConsumer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiagnosticConsumer for CollectingConsumer {
    fn consume(&mut self, message: Message) {
        self.messages.push(message);
    }

    fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.kind.contains("error"))
    }
}
