//! Compilation session and the importer seam.

use mic_diagnostic::{DiagnosticKind, DiagnosticSink};
use mic_ir::{AstModel, DeclId, ImportSpec, RowCol, Symbols};

/// State shared by every module compiled in one run: the AST model
/// (types, declarations, module list), the symbol interner and the
/// diagnostic sink. Owned by the driver and threaded through parser and
/// importer so cross-module declaration references stay valid.
pub struct Session {
    pub model: AstModel,
    pub symbols: Symbols,
    pub diags: DiagnosticSink,
}

impl Session {
    pub fn new() -> Self {
        let symbols = Symbols::new();
        let model = AstModel::new(&symbols);
        Session {
            model,
            symbols,
            diags: DiagnosticSink::new(),
        }
    }

    pub fn error(&mut self, kind: DiagnosticKind, path: &str, pos: RowCol, msg: impl Into<String>) {
        self.diags.error(kind, path, pos.line, pos.col, msg);
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

/// Resolves import specs to compiled modules.
///
/// `load_module` may recurse into the parser for not-yet-compiled
/// modules; the session is threaded through so the implementation can
/// run nested compilations against the same model. Returns `None` when
/// the module cannot be provided (unreachable file, failed analysis,
/// cycle); the implementation reports the reason itself, exactly once.
pub trait Importer {
    fn load_module(&mut self, session: &mut Session, spec: &ImportSpec) -> Option<DeclId>;
}
