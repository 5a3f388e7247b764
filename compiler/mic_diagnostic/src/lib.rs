//! Diagnostics for the Micron compiler.
//!
//! Diagnostics are accumulated values, never panics: every phase pushes
//! into a [`DiagnosticSink`] and keeps going, so one run reports as many
//! independent problems as possible. The first error in a subtree poisons
//! that subtree's result type (`NoType`) which suppresses follow-on noise
//! without touching the sink.
//!
//! User-visible output is one line per diagnostic in the stable format
//! `<file>:<row>:<col>: <message>` on the error stream.

mod emitter;
mod sink;

pub use emitter::TerminalEmitter;
pub use sink::DiagnosticSink;

use std::fmt;

/// Classification of a diagnostic, by compiler phase and failure class.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// Malformed token, unterminated literal.
    Lex,
    /// Grammar mismatch.
    Syntax,
    /// Assignability, arithmetic mismatch, arity mismatch.
    Type,
    /// Duplicate/undefined identifier, visibility violation.
    Scope,
    /// Overflow or division by zero at fold time.
    Const,
    /// Unresolved forward type or procedure.
    Forward,
    /// Import cycle, unreachable file, meta-actual mismatch.
    Module,
    /// Structural IR invariant violated; should be unreachable.
    Emit,
    /// Contract failure, always a compiler bug. Aborts the compilation.
    Internal,
}

impl DiagnosticKind {
    /// Short lowercase tag used in log output.
    pub fn tag(self) -> &'static str {
        match self {
            DiagnosticKind::Lex => "lex",
            DiagnosticKind::Syntax => "syntax",
            DiagnosticKind::Type => "type",
            DiagnosticKind::Scope => "scope",
            DiagnosticKind::Const => "const",
            DiagnosticKind::Forward => "forward",
            DiagnosticKind::Module => "module",
            DiagnosticKind::Emit => "emit",
            DiagnosticKind::Internal => "internal",
        }
    }
}

/// How serious a diagnostic is.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single reported problem, pinned to a source location.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    /// Source path of the module the diagnostic belongs to.
    pub path: String,
    /// 1-based source line; 0 when unknown.
    pub row: u32,
    /// 1-based source column; 0 when unknown.
    pub col: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn error(
        kind: DiagnosticKind,
        path: impl Into<String>,
        row: u32,
        col: u32,
        message: impl Into<String>,
    ) -> Self {
        Diagnostic {
            kind,
            severity: Severity::Error,
            path: path.into(),
            row,
            col,
            message: message.into(),
        }
    }

    pub fn warning(
        kind: DiagnosticKind,
        path: impl Into<String>,
        row: u32,
        col: u32,
        message: impl Into<String>,
    ) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            ..Diagnostic::error(kind, path, row, col, message)
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.severity == Severity::Warning {
            write!(
                f,
                "{}:{}:{}: warning: {}",
                self.path, self.row, self.col, self.message
            )
        } else {
            write!(f, "{}:{}:{}: {}", self.path, self.row, self.col, self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_format() {
        let d = Diagnostic::error(DiagnosticKind::Type, "a/b.mic", 3, 14, "type mismatch");
        assert_eq!(d.to_string(), "a/b.mic:3:14: type mismatch");
    }

    #[test]
    fn test_warning_is_marked() {
        let d = Diagnostic::warning(DiagnosticKind::Scope, "m.mic", 1, 1, "unused label");
        assert_eq!(d.to_string(), "m.mic:1:1: warning: unused label");
    }
}
