//! Terminal rendering of diagnostics.

use crate::Diagnostic;
use std::io::{self, Write};

/// Writes diagnostics one per line to any [`Write`] sink.
pub struct TerminalEmitter<W: Write> {
    writer: W,
}

impl TerminalEmitter<io::Stderr> {
    /// The standard emitter: one line per diagnostic on stderr.
    pub fn stderr() -> Self {
        TerminalEmitter { writer: io::stderr() }
    }
}

impl<W: Write> TerminalEmitter<W> {
    pub fn new(writer: W) -> Self {
        TerminalEmitter { writer }
    }

    /// Emit a single diagnostic. Write failures are ignored; there is
    /// nowhere left to report them.
    pub fn emit(&mut self, d: &Diagnostic) {
        let _ = writeln!(self.writer, "{d}");
    }

    pub fn emit_all<'a>(&mut self, diagnostics: impl IntoIterator<Item = &'a Diagnostic>) {
        for d in diagnostics {
            self.emit(d);
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiagnosticKind;

    #[test]
    fn test_emit_lines() {
        let mut em = TerminalEmitter::new(Vec::new());
        em.emit(&Diagnostic::error(DiagnosticKind::Module, "x.mic", 1, 1, "cycle"));
        em.emit(&Diagnostic::error(DiagnosticKind::Type, "x.mic", 2, 3, "mismatch"));
        let out = String::from_utf8(em.into_inner()).unwrap();
        assert_eq!(out, "x.mic:1:1: cycle\nx.mic:2:3: mismatch\n");
    }
}
