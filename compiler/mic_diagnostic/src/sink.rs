//! Accumulating diagnostic sink.
//!
//! Diagnostics are pushed during analysis and flushed once at the end
//! of the run, preserving the deterministic order they were produced
//! in.

use crate::{Diagnostic, DiagnosticKind, Severity};

/// Collects diagnostics for one compilation session.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
    internal: bool,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        DiagnosticSink::default()
    }

    /// Push a diagnostic, keeping the running error count current.
    pub fn report(&mut self, d: Diagnostic) {
        if d.severity == Severity::Error {
            self.error_count += 1;
        }
        if d.kind == DiagnosticKind::Internal {
            self.internal = true;
        }
        self.diagnostics.push(d);
    }

    /// Convenience for the common error case.
    pub fn error(
        &mut self,
        kind: DiagnosticKind,
        path: impl Into<String>,
        row: u32,
        col: u32,
        message: impl Into<String>,
    ) {
        self.report(Diagnostic::error(kind, path, row, col, message));
    }

    /// Number of error-severity diagnostics reported so far.
    ///
    /// Phases snapshot this before a subtree and compare after to decide
    /// whether the subtree analysed cleanly.
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    /// Whether an `Internal` diagnostic was reported. The driver aborts
    /// the compilation when this is set.
    pub fn poisoned(&self) -> bool {
        self.internal
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    /// Drain all diagnostics in report order.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        self.error_count = 0;
        std::mem::take(&mut self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_only_errors() {
        let mut sink = DiagnosticSink::new();
        sink.report(Diagnostic::warning(DiagnosticKind::Scope, "m.mic", 1, 1, "w"));
        sink.error(DiagnosticKind::Type, "m.mic", 2, 5, "e");
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.error_count(), 1);
        assert!(sink.has_errors());
        assert!(!sink.poisoned());
    }

    #[test]
    fn test_internal_poisons() {
        let mut sink = DiagnosticSink::new();
        sink.error(DiagnosticKind::Internal, "m.mic", 0, 0, "contract failure");
        assert!(sink.poisoned());
    }

    #[test]
    fn test_order_is_preserved() {
        let mut sink = DiagnosticSink::new();
        sink.error(DiagnosticKind::Syntax, "a.mic", 1, 1, "first");
        sink.error(DiagnosticKind::Syntax, "a.mic", 9, 1, "second");
        let all = sink.take();
        assert_eq!(all[0].message, "first");
        assert_eq!(all[1].message, "second");
        assert!(sink.is_empty());
    }
}
