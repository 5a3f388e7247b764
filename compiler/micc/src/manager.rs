//! Module resolution, caching and compilation order.
//!
//! The manager owns the ordered module list keyed by import spec
//! (dotted path plus meta actuals, compared structurally). A slot is
//! inserted *before* a module is parsed so recursive imports see the
//! in-progress state and report a cycle instead of recursing forever.
//! Distinct meta-actual instantiations of the same source file get a
//! `$<N>` suffix for IR emission.

use mic_diagnostic::{DiagnosticKind, DiagnosticSink};
use mic_ir::{DeclId, ImportSpec, RowCol, Symbol};
use mic_lexer::TokenStream;
use mic_mil::{IlAsmRenderer, InMemRenderer, MilModule};
use mic_parse::{Importer, Parser, Session};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Source file extension for Micron modules.
const SOURCE_EXT: &str = "mic";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SlotState {
    /// Placeholder inserted before parsing; seeing it means a cycle.
    Loading,
    Done,
}

/// One entry of the module list.
pub struct ModuleSlot {
    pub spec: ImportSpec,
    pub path: PathBuf,
    /// `None` for modules that failed to load or analyse.
    pub decl: Option<DeclId>,
    state: SlotState,
}

/// Resolves import specs to compiled modules, caching by spec identity.
#[derive(Default)]
pub struct ModuleManager {
    pub search_paths: Vec<PathBuf>,
    pub slots: Vec<ModuleSlot>,
    /// Emitted IR, in compilation (dependency-first) order.
    pub modules: Vec<MilModule>,
}

impl ModuleManager {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        ModuleManager {
            search_paths,
            slots: Vec::new(),
            modules: Vec::new(),
        }
    }

    fn find(&self, spec: &ImportSpec) -> Option<usize> {
        self.slots.iter().position(|s| s.spec == *spec)
    }

    /// Map a dotted module path to a source file: search directories in
    /// order, then fall back to the directory of the importing module.
    fn to_file(&self, spec: &ImportSpec, symbols: &mic_ir::Symbols) -> Option<PathBuf> {
        let mut rel = PathBuf::new();
        for &part in &spec.path {
            rel.push(symbols.resolve(part));
        }
        rel.set_extension(SOURCE_EXT);

        for dir in &self.search_paths {
            let candidate = dir.join(&rel);
            if candidate.exists() {
                return Some(candidate);
            }
        }
        // relative to the module currently being compiled
        if let Some(current) = self.slots.iter().rev().find(|s| !s.path.as_os_str().is_empty()) {
            if let Some(dir) = current.path.parent() {
                let candidate = dir.join(&rel);
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }
        None
    }

    fn dotted(&self, spec: &ImportSpec, symbols: &mic_ir::Symbols) -> String {
        spec.path
            .iter()
            .map(|&s| symbols.resolve(s))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Number of modules that failed to load or analyse.
    pub fn failed(&self) -> usize {
        self.slots.iter().filter(|s| s.decl.is_none()).count()
    }

    /// Render every compiled module through the textual renderer.
    pub fn render_text<W: Write>(&self, out: W) -> W {
        let mut renderer = IlAsmRenderer::new(out);
        for module in &self.modules {
            module.render(&mut renderer);
        }
        renderer.into_inner()
    }
}

impl Importer for ModuleManager {
    fn load_module(&mut self, session: &mut Session, spec: &ImportSpec) -> Option<DeclId> {
        if let Some(i) = self.find(spec) {
            let slot = &self.slots[i];
            if slot.state == SlotState::Loading {
                let name = self.dotted(spec, &session.symbols);
                let path = slot.path.display().to_string();
                session.error(
                    DiagnosticKind::Module,
                    &path,
                    RowCol::NONE,
                    format!("circular import of module '{name}'"),
                );
                return None;
            }
            return slot.decl;
        }

        let Some(file) = self.to_file(spec, &session.symbols) else {
            let name = self.dotted(spec, &session.symbols);
            session.error(
                DiagnosticKind::Module,
                &name,
                RowCol::NONE,
                format!("cannot find source file of module '{name}'"),
            );
            self.slots.push(ModuleSlot {
                spec: spec.clone(),
                path: PathBuf::new(),
                decl: None,
                state: SlotState::Done,
            });
            return None;
        };

        let suffix = if spec.meta_actuals.is_empty() {
            String::new()
        } else {
            format!("${}", self.slots.len())
        };

        // insert the placeholder first so circular imports see it
        let index = self.slots.len();
        self.slots.push(ModuleSlot {
            spec: spec.clone(),
            path: file.clone(),
            decl: None,
            state: SlotState::Loading,
        });

        let decl = self.parse_one(session, spec, &file, &suffix);

        self.slots[index].decl = decl;
        self.slots[index].state = SlotState::Done;
        if let Some(d) = decl {
            session.model.add_module(d);
        }
        decl
    }
}

impl ModuleManager {
    fn parse_one(
        &mut self,
        session: &mut Session,
        spec: &ImportSpec,
        file: &Path,
        suffix: &str,
    ) -> Option<DeclId> {
        let source = match std::fs::read_to_string(file) {
            Ok(s) => s,
            Err(err) => {
                session.error(
                    DiagnosticKind::Module,
                    &file.display().to_string(),
                    RowCol::NONE,
                    format!("cannot read source file: {err}"),
                );
                return None;
            }
        };
        tracing::info!(file = %file.display(), "compiling");
        let mut scanner = TokenStream::from_source(
            &source,
            file.display().to_string(),
            &session.symbols,
            &mut session.diags,
        );
        let mut renderer = InMemRenderer::new();
        let decl = {
            let importer: &mut dyn Importer = self;
            let parser = Parser::new(session, &mut scanner, &mut renderer, Some(importer));
            parser.run(spec.meta_actuals.clone(), suffix)
        };
        let emitted = renderer.take_modules();
        if decl.is_some() {
            // failed modules keep their slot but emit no IR
            self.modules.extend(emitted);
        }
        decl
    }
}

/// One compilation run: the session plus the module manager.
pub struct Compiler {
    pub session: Session,
    pub manager: ModuleManager,
}

impl Compiler {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Compiler {
            session: Session::new(),
            manager: ModuleManager::new(search_paths),
        }
    }

    /// Compile the main module (and, transitively, its imports). The
    /// main module's own directory is searched first, as if passed with
    /// `-I`. Returns the main module's declaration on success.
    pub fn compile_main(&mut self, main: &Path) -> Option<DeclId> {
        let stem = main
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if stem.is_empty() {
            self.session.error(
                DiagnosticKind::Module,
                &main.display().to_string(),
                RowCol::NONE,
                "main module path has no file name",
            );
            return None;
        }
        if let Some(dir) = main.parent() {
            let dir = if dir.as_os_str().is_empty() {
                PathBuf::from(".")
            } else {
                dir.to_path_buf()
            };
            self.manager.search_paths.insert(0, dir);
        }
        let name: Symbol = self.session.symbols.intern(&stem);
        let spec = ImportSpec::plain(vec![name]);
        self.manager.load_module(&mut self.session, &spec)
    }

    /// Drain accumulated diagnostics.
    pub fn take_diagnostics(&mut self) -> Vec<mic_diagnostic::Diagnostic> {
        self.session.diags.take()
    }

    pub fn diagnostics(&self) -> &DiagnosticSink {
        &self.session.diags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_module_is_one_diagnostic() {
        let mut compiler = Compiler::new(Vec::new());
        let missing = Path::new("no/such/Module.mic");
        assert!(compiler.compile_main(missing).is_none());
        assert_eq!(compiler.session.diags.error_count(), 1);
        assert_eq!(compiler.manager.failed(), 1);
    }
}
