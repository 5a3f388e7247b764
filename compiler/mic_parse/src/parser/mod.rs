//! The recursive-descent parser and its semantic actions.
//!
//! One `Parser` compiles one module: tokens in, declarations into the
//! session's `AstModel`, MIL out through the emitter. Expressions are
//! built as typed trees (auto-casts inserted while checking), then run
//! through the evaluator at statement boundaries, which folds constants
//! and emits code in source order.
//!
//! Submodules:
//! - [`decls`]: declaration sequences, the type grammar, forward
//!   reference resolution, procedures
//! - [`stmt`]: statements and structured control flow
//! - [`expr`]: expression grammar, designators, call checking

mod decls;
mod expr;
mod stmt;

use crate::eval::{self, Evaluator};
use crate::session::{Importer, Session};
use mic_diagnostic::DiagnosticKind;
use mic_ir::{
    ConstValue, Decl, DeclData, DeclFlags, DeclId, DeclKind, ExprArena, ImportSpec, MetaActual,
    RowCol, Symbol, Token, TokenKind, TokenSource, TypeId, Value, ValueMode, Visibility,
};
use mic_mil::{MilEmitter, MilProcKind, MilRenderer};
use rustc_hash::FxHashMap;

/// Builds an `EvalCx` from disjoint parser fields. A macro so the
/// borrows stay field-precise at every use site.
macro_rules! ecx {
    ($p:expr) => {
        crate::eval::EvalCx {
            model: &mut $p.session.model,
            symbols: &$p.session.symbols,
            diags: &mut $p.session.diags,
            out: &mut $p.out,
            path: &$p.path,
            module: $p.module,
        }
    };
}
pub(crate) use ecx;

/// Tokens that resynchronise declaration parsing after an error.
const DECL_SYNC: &[TokenKind] = &[
    TokenKind::Const,
    TokenKind::Type,
    TokenKind::Var,
    TokenKind::Procedure,
    TokenKind::Proc,
    TokenKind::Begin,
    TokenKind::End,
    TokenKind::Import,
    TokenKind::Semi,
    TokenKind::Eof,
];

/// Tokens that resynchronise statement parsing after an error.
const STMT_SYNC: &[TokenKind] = &[
    TokenKind::Semi,
    TokenKind::End,
    TokenKind::Else,
    TokenKind::Elsif,
    TokenKind::Until,
    TokenKind::Bar,
    TokenKind::Finally,
    TokenKind::Eof,
];

struct LabelInfo {
    depth: Vec<u32>,
    pos: RowCol,
}

struct GotoSite {
    name: Symbol,
    depth: Vec<u32>,
    pos: RowCol,
}

pub struct Parser<'a> {
    pub(crate) session: &'a mut Session,
    scanner: &'a mut dyn TokenSource,
    pub(crate) out: MilEmitter<'a>,
    importer: Option<&'a mut dyn Importer>,
    pub(crate) ev: Evaluator,
    pub(crate) arena: ExprArena,
    pub(crate) path: String,

    /// Last consumed token.
    pub(crate) cur: Token,
    /// Lookahead token.
    pub(crate) la: Token,

    pub(crate) module: Option<DeclId>,
    /// Scope chain, innermost last; `[module, proc, nested proc, ...]`.
    pub(crate) scopes: Vec<DeclId>,
    /// `NameRef` placeholders awaiting resolution at section end.
    pub(crate) deferred: Vec<(TypeId, Token)>,

    pub(crate) loop_depth: usize,
    block_path: Vec<u32>,
    next_block_id: u32,
    labels: FxHashMap<Symbol, LabelInfo>,
    gotos: Vec<GotoSite>,
    pub(crate) in_finally: bool,
    /// Return types of enclosing procedures, innermost last.
    pub(crate) proc_ret: Vec<TypeId>,

    meta_actuals: Vec<MetaActual>,
    suffix: String,
    pub(crate) helper_count: u32,
    failed_import: bool,
}

impl<'a> Parser<'a> {
    pub fn new(
        session: &'a mut Session,
        scanner: &'a mut dyn TokenSource,
        renderer: &'a mut dyn MilRenderer,
        importer: Option<&'a mut dyn Importer>,
    ) -> Self {
        let path = scanner.path().to_string();
        let la = scanner.next();
        Parser {
            session,
            scanner,
            out: MilEmitter::new(renderer),
            importer,
            ev: Evaluator::new(),
            arena: ExprArena::new(),
            path,
            cur: Token::eof(RowCol::NONE),
            la,
            module: None,
            scopes: Vec::new(),
            deferred: Vec::new(),
            loop_depth: 0,
            block_path: Vec::new(),
            next_block_id: 0,
            labels: FxHashMap::default(),
            gotos: Vec::new(),
            in_finally: false,
            proc_ret: Vec::new(),
            meta_actuals: Vec::new(),
            suffix: String::new(),
            helper_count: 0,
            failed_import: false,
        }
    }

    /// Compile one module. `meta_actuals` instantiate a parametric
    /// module; `suffix` disambiguates the emitted IR name. Returns the
    /// module declaration on success; `None` when analysis failed (the
    /// diagnostics tell why) or when a sub-module could not be loaded.
    pub fn run(mut self, meta_actuals: Vec<MetaActual>, suffix: &str) -> Option<DeclId> {
        let before = self.session.diags.error_count();
        self.meta_actuals = meta_actuals;
        self.suffix = suffix.to_string();
        tracing::debug!(path = %self.path, "parsing module");
        let module = self.module();
        self.arena.drain();
        let failed =
            self.session.diags.error_count() > before || self.failed_import || module.is_none();
        if failed {
            None
        } else {
            module
        }
    }

    // ---- token plumbing -------------------------------------------------

    pub(crate) fn next(&mut self) {
        self.cur = std::mem::replace(&mut self.la, self.scanner.next());
    }

    pub(crate) fn at(&self, kind: TokenKind) -> bool {
        self.la.kind == kind
    }

    /// Second lookahead token.
    pub(crate) fn peek2(&mut self) -> &Token {
        self.scanner.peek(0)
    }

    pub(crate) fn accept(&mut self, kind: TokenKind) -> bool {
        if self.la.kind == kind {
            self.next();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, kind: TokenKind, place: &str) -> bool {
        if self.accept(kind) {
            return true;
        }
        let msg = format!(
            "expected {} in {place}, found {}",
            kind.describe(),
            self.la.kind.describe()
        );
        self.error(DiagnosticKind::Syntax, self.la.pos, msg);
        false
    }

    pub(crate) fn error(&mut self, kind: DiagnosticKind, pos: RowCol, msg: impl Into<String>) {
        self.session.error(kind, &self.path, pos, msg);
    }

    /// Skip tokens until one of `set`; part of error recovery.
    pub(crate) fn sync(&mut self, set: &[TokenKind]) {
        while !set.contains(&self.la.kind) && self.la.kind != TokenKind::Eof {
            self.next();
        }
    }

    pub(crate) fn sync_decl(&mut self) {
        self.sync(DECL_SYNC);
        while self.at(TokenKind::Semi) {
            self.next();
        }
    }

    pub(crate) fn sync_stmt(&mut self) {
        self.sync(STMT_SYNC);
    }

    // ---- scopes ---------------------------------------------------------

    pub(crate) fn current_scope(&self) -> DeclId {
        *self
            .scopes
            .last()
            .expect("scope chain is never empty while parsing")
    }

    /// Name lookup through the scope chain, ending at the globals.
    pub(crate) fn find_decl(&self, name: Symbol) -> Option<DeclId> {
        for &scope in self.scopes.iter().rev() {
            if let Some(d) = self.session.model.find_member(scope, name) {
                return Some(d);
            }
        }
        self.session.model.find_member(self.session.model.globals(), name)
    }

    /// Add a declaration to the current scope, reporting a duplicate at
    /// the second definition site.
    pub(crate) fn add_decl(&mut self, mut decl: Decl) -> DeclId {
        let scope = self.current_scope();
        if self.session.model.find_member(scope, decl.name).is_some() {
            let name = self.session.symbols.resolve(decl.name);
            let msg = format!("duplicate definition of '{name}'");
            let pos = decl.pos;
            self.error(DiagnosticKind::Scope, pos, msg);
        }
        if decl.pos == RowCol::NONE {
            decl.pos = self.cur.pos;
        }
        self.session.model.new_decl(decl, Some(scope))
    }

    // ---- goto bookkeeping (block-depth discipline) ----------------------

    pub(crate) fn enter_block(&mut self) {
        self.block_path.push(self.next_block_id);
        self.next_block_id += 1;
    }

    pub(crate) fn leave_block(&mut self) {
        self.block_path.pop();
    }

    pub(crate) fn define_label(&mut self, name: Symbol, pos: RowCol) {
        if self.labels.contains_key(&name) {
            let text = self.session.symbols.resolve(name);
            let msg = format!("duplicate label '{text}'");
            self.error(DiagnosticKind::Scope, pos, msg);
            return;
        }
        self.labels.insert(
            name,
            LabelInfo {
                depth: self.block_path.clone(),
                pos,
            },
        );
    }

    pub(crate) fn record_goto(&mut self, name: Symbol, pos: RowCol) {
        self.gotos.push(GotoSite {
            name,
            depth: self.block_path.clone(),
            pos,
        });
    }

    /// End-of-procedure validation: every goto targets a defined label
    /// at equal or ancestor block depth.
    pub(crate) fn check_gotos(&mut self) {
        let gotos = std::mem::take(&mut self.gotos);
        for site in gotos {
            let text = self.session.symbols.resolve(site.name).to_string();
            match self.labels.get(&site.name) {
                None => {
                    self.error(
                        DiagnosticKind::Scope,
                        site.pos,
                        format!("undefined label '{text}'"),
                    );
                }
                Some(info) => {
                    let ancestor = info.depth.len() <= site.depth.len()
                        && site.depth[..info.depth.len()] == info.depth[..];
                    if !ancestor {
                        self.error(
                            DiagnosticKind::Scope,
                            site.pos,
                            format!("goto '{text}' jumps into a nested block"),
                        );
                    }
                }
            }
        }
        self.labels.clear();
        self.block_path.clear();
        self.next_block_id = 0;
    }

    // ---- module ---------------------------------------------------------

    /// `MODULE ident [metaParams] ';' [imports] decls [BEGIN seq] END ident '.'`
    fn module(&mut self) -> Option<DeclId> {
        if !self.expect(TokenKind::Module, "module header") {
            return None;
        }
        if !self.expect(TokenKind::Ident, "module header") {
            return None;
        }
        let name = self.cur.ident();
        let pos = self.cur.pos;

        let mut decl = Decl::new(DeclKind::Module, name, pos);
        decl.visi = Visibility::Public;
        decl.data = DeclData::Module {
            suffix: self.suffix.clone(),
        };
        let module = self.session.model.new_decl(decl, None);
        self.module = Some(module);
        self.scopes.push(module);

        let mil_name = format!("{}{}", self.session.symbols.resolve(name), self.suffix);
        self.out.begin_module(&mil_name, &self.path.clone());

        if self.at(TokenKind::LParen) {
            self.meta_params();
        }
        self.expect(TokenKind::Semi, "module header");

        while self.at(TokenKind::Import) {
            self.import_list();
        }

        self.declaration_sequence();

        if self.accept(TokenKind::Begin) {
            self.out.begin_proc("$begin", false, MilProcKind::ModuleInit);
            self.statement_sequence(&[TokenKind::End, TokenKind::Finally]);
            if self.accept(TokenKind::Finally) {
                self.in_finally = true;
                self.out.finally_();
                self.statement_sequence(&[TokenKind::End]);
                self.in_finally = false;
            }
            self.out.ret_(false);
            self.check_gotos();
            self.out.end_proc();
        }

        self.expect(TokenKind::End, "module");
        if self.expect(TokenKind::Ident, "module trailer") {
            let end_name = self.cur.ident();
            if end_name != name {
                let expected = self.session.symbols.resolve(name);
                let pos = self.cur.pos;
                self.error(
                    DiagnosticKind::Syntax,
                    pos,
                    format!("module trailer must repeat the name '{expected}'"),
                );
            }
        }
        self.expect(TokenKind::Dot, "module trailer");

        self.check_forward_procedures(module);
        self.out.end_module();
        self.scopes.pop();
        Some(module)
    }

    /// `'(' metaSection {';' metaSection} ')'` where a section is
    /// `TYPE idents` or `CONST idents ':' type`. Actuals are bound
    /// positionally; a module without actuals compiles generically.
    fn meta_params(&mut self) {
        self.expect(TokenKind::LParen, "meta parameters");
        let mut index: usize = 0;
        let generic = self.meta_actuals.is_empty();
        loop {
            if self.accept(TokenKind::Type) {
                loop {
                    if !self.expect(TokenKind::Ident, "meta parameter") {
                        break;
                    }
                    let name = self.cur.ident();
                    let pos = self.cur.pos;
                    let ty = if generic {
                        let t = mic_ir::Type::new(
                            mic_ir::TypeKind::Generic {
                                index: index as u32,
                            },
                            pos,
                        );
                        self.session.model.new_type(t)
                    } else {
                        match self.meta_actuals.get(index).cloned() {
                            Some(MetaActual::Type(t)) => t,
                            Some(MetaActual::Const(..)) | None => {
                                self.error(
                                    DiagnosticKind::Module,
                                    pos,
                                    "meta actual mismatch: expecting a type argument",
                                );
                                TypeId::NO_TYPE
                            }
                        }
                    };
                    let mut d = Decl::new(DeclKind::TypeDecl, name, pos);
                    d.ty = ty;
                    if generic {
                        d.flags |= DeclFlags::GENERIC;
                    }
                    let id = self.add_decl(d);
                    if generic {
                        self.session.model.type_mut(ty).decl = Some(id);
                    }
                    index += 1;
                    if !self.accept(TokenKind::Comma) {
                        break;
                    }
                }
            } else if self.accept(TokenKind::Const) {
                let mut names = Vec::new();
                loop {
                    if !self.expect(TokenKind::Ident, "meta parameter") {
                        break;
                    }
                    names.push((self.cur.ident(), self.cur.pos));
                    if !self.accept(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::Colon, "meta parameter");
                let declared = self.type_(true);
                for (name, pos) in names {
                    let actual = self.meta_actuals.get(index).cloned();
                    let (ty, val) = if generic {
                        (declared, ConstValue::None)
                    } else {
                        match actual {
                            Some(MetaActual::Const(v, t)) => {
                                let probe = Value::constant(t, v.clone());
                                if !eval::assignable(&self.session.model, declared, &probe) {
                                    self.error(
                                        DiagnosticKind::Module,
                                        pos,
                                        "meta actual mismatch: incompatible constant",
                                    );
                                }
                                (declared, v)
                            }
                            Some(MetaActual::Type(_)) | None => {
                                self.error(
                                    DiagnosticKind::Module,
                                    pos,
                                    "meta actual mismatch: expecting a constant argument",
                                );
                                (TypeId::NO_TYPE, ConstValue::None)
                            }
                        }
                    };
                    let mut d = Decl::new(DeclKind::ConstDecl, name, pos);
                    d.ty = ty;
                    d.data = DeclData::Const(val);
                    if generic {
                        d.flags |= DeclFlags::GENERIC;
                    }
                    self.add_decl(d);
                    index += 1;
                }
            } else {
                let pos = self.la.pos;
                self.error(DiagnosticKind::Syntax, pos, "expected TYPE or CONST meta section");
                self.sync(&[TokenKind::RParen, TokenKind::Semi, TokenKind::Eof]);
            }
            if !self.accept(TokenKind::Semi) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "meta parameters");
        if !generic && index != self.meta_actuals.len() {
            let pos = self.cur.pos;
            self.error(
                DiagnosticKind::Module,
                pos,
                format!(
                    "module expects {index} meta arguments, got {}",
                    self.meta_actuals.len()
                ),
            );
        }
        if generic && index > 0 {
            if let Some(m) = self.module {
                self.session.model.decl_mut(m).flags |= DeclFlags::GENERIC;
            }
        }
    }

    /// `IMPORT [alias ':='] dotted ['(' metaActuals ')'] {',' ...} ';'`
    fn import_list(&mut self) {
        self.expect(TokenKind::Import, "import list");
        loop {
            self.import();
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Semi, "import list");
    }

    fn import(&mut self) {
        if !self.expect(TokenKind::Ident, "import") {
            self.sync(&[TokenKind::Comma, TokenKind::Semi, TokenKind::Eof]);
            return;
        }
        let first = self.cur.ident();
        let pos = self.cur.pos;

        let mut alias = None;
        let mut path = vec![first];
        if self.accept(TokenKind::Assign) {
            alias = Some(first);
            path.clear();
            if !self.expect(TokenKind::Ident, "import") {
                return;
            }
            path.push(self.cur.ident());
        }
        while self.accept(TokenKind::Dot) {
            if !self.expect(TokenKind::Ident, "import") {
                return;
            }
            path.push(self.cur.ident());
        }

        let mut meta_actuals = Vec::new();
        if self.accept(TokenKind::LParen) {
            if !self.at(TokenKind::RParen) {
                loop {
                    if let Some(actual) = self.meta_actual() {
                        meta_actuals.push(actual);
                    }
                    if !self.accept(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RParen, "import");
        }

        let local_name = alias.unwrap_or_else(|| *path.last().expect("non-empty import path"));
        let spec = ImportSpec {
            path: path.clone(),
            meta_actuals,
        };

        let resolved = match self.importer.as_mut() {
            Some(imp) => imp.load_module(self.session, &spec),
            None => None,
        };
        if resolved.is_none() {
            // the importer has reported the reason already
            self.failed_import = true;
        }

        let dotted = path
            .iter()
            .map(|s| self.session.symbols.resolve(*s))
            .collect::<Vec<_>>()
            .join(".");
        let mil_import = match resolved {
            Some(m) => {
                let cx = ecx!(self);
                cx.module_mil_name(m)
            }
            None => dotted,
        };
        self.out.add_import(&mil_import);

        let mut d = Decl::new(DeclKind::Import, local_name, pos);
        d.data = DeclData::Import { spec, resolved };
        self.add_decl(d);
    }

    /// One compile-time argument of a parametric import: a type name or
    /// a constant expression.
    fn meta_actual(&mut self) -> Option<MetaActual> {
        if self.at(TokenKind::Ident) {
            let name = self.la.ident();
            if let Some(d) = self.find_decl(name) {
                if self.session.model.decl(d).kind == DeclKind::TypeDecl
                    && self.peek2().kind != TokenKind::Dot
                {
                    self.next();
                    return Some(MetaActual::Type(self.session.model.decl(d).ty));
                }
            }
        }
        let (v, _) = self.const_expression(None)?;
        if v.mode == ValueMode::TypeRef {
            return Some(MetaActual::Type(v.ty));
        }
        Some(MetaActual::Const(v.val, v.ty))
    }

    /// FORWARD procedures must be completed within the same module; a
    /// completion clears the flag.
    fn check_forward_procedures(&mut self, module: DeclId) {
        let mut incomplete = Vec::new();
        let members = self.session.model.decl(module).members.clone();
        for d in members {
            let decl = self.session.model.decl(d);
            if decl.kind == DeclKind::Procedure && decl.flags.contains(DeclFlags::FORWARD) {
                incomplete.push((decl.name, decl.pos));
            }
        }
        for (name, pos) in incomplete {
            let text = self.session.symbols.resolve(name);
            let msg = format!("forward procedure '{text}' is never completed");
            self.error(DiagnosticKind::Forward, pos, msg);
        }
    }
}
