//! Declaration sequences, the type grammar and procedures.

use super::{ecx, Parser};
use crate::eval::{self, decl_mil_name};
use mic_diagnostic::DiagnosticKind;
use mic_ir::{
    ConstValue, Decl, DeclData, DeclFlags, DeclId, DeclKind, Quali, RowCol, Symbol, TokenKind,
    Type, TypeId, TypeKind, Visibility,
};
use mic_mil::{MilAggKind, MilConst, MilProcKind, MilQuali, MilTypeDefKind};

impl<'a> Parser<'a> {
    /// `{CONST ... | TYPE ... | VAR ... | PROCEDURE ...}` followed by
    /// deferred-type resolution for the whole sequence.
    pub(crate) fn declaration_sequence(&mut self) {
        loop {
            match self.la.kind {
                TokenKind::Const => {
                    self.next();
                    while self.at(TokenKind::Ident) {
                        self.const_declaration();
                    }
                }
                TokenKind::Type => {
                    self.next();
                    while self.at(TokenKind::Ident) {
                        self.type_declaration();
                    }
                }
                TokenKind::Var => {
                    self.next();
                    while self.at(TokenKind::Ident) {
                        self.variable_declaration();
                    }
                }
                TokenKind::Procedure => {
                    self.procedure_declaration();
                }
                _ => break,
            }
        }
        self.resolve_deferreds();
    }

    /// `ident ['*' | '-']`
    pub(crate) fn identdef(&mut self) -> Option<(Symbol, Visibility, RowCol)> {
        if !self.expect(TokenKind::Ident, "declaration") {
            return None;
        }
        let name = self.cur.ident();
        let pos = self.cur.pos;
        let visi = if self.accept(TokenKind::Star) {
            Visibility::Public
        } else if self.accept(TokenKind::Minus) {
            Visibility::ReadOnly
        } else {
            Visibility::Private
        };
        Some((name, visi, pos))
    }

    // ---- constants ------------------------------------------------------

    fn const_declaration(&mut self) {
        let Some((name, visi, pos)) = self.identdef() else {
            self.sync_decl();
            return;
        };
        if !self.expect(TokenKind::Eq, "constant declaration") {
            self.sync_decl();
            return;
        }
        let (ty, val) = match self.const_expression(None) {
            Some((v, _)) => (v.ty, v.val),
            None => (TypeId::NO_TYPE, ConstValue::None),
        };
        self.expect(TokenKind::Semi, "constant declaration");

        let mut d = Decl::new(DeclKind::ConstDecl, name, pos);
        d.visi = visi;
        d.ty = ty;
        d.data = DeclData::Const(val.clone());
        let id = self.add_decl(d);

        if self.session.model.decl(id).outer == self.module && ty != TypeId::NO_TYPE {
            if let Some(mil) = const_to_mil(&val) {
                let name = self.session.symbols.resolve(name).to_string();
                let q = {
                    let cx = ecx!(self);
                    cx.type_quali(ty)
                };
                self.out.add_const(&q, &name, mil, visi == Visibility::Public);
            }
        }
    }

    // ---- types ----------------------------------------------------------

    fn type_declaration(&mut self) {
        let Some((name, visi, pos)) = self.identdef() else {
            self.sync_decl();
            return;
        };
        if !self.expect(TokenKind::Eq, "type declaration") {
            self.sync_decl();
            return;
        }
        let mut d = Decl::new(DeclKind::TypeDecl, name, pos);
        d.visi = visi;
        let id = self.add_decl(d);

        let t = self.type_(false);
        self.session.model.decl_mut(id).ty = t;
        if !self.session.model.type_(t).is_basic() && self.session.model.type_(t).decl.is_none() {
            self.adopt_type(id, t);
            self.session.model.decl_mut(id).flags |= DeclFlags::OWNS_TYPE;
        }
        self.expect(TokenKind::Semi, "type declaration");
        self.emit_type_decl(id);
        self.check_exposure(id);
    }

    /// Parse a type. With `deanonymize` set, anonymous compound types
    /// get a synthesised module-level `$T<n>` declaration so the IR can
    /// refer to them by name.
    pub(crate) fn type_(&mut self, deanonymize: bool) -> TypeId {
        let t = match self.la.kind {
            TokenKind::Array => self.array_type(),
            TokenKind::Record => self.fields_type(TokenKind::Record),
            TokenKind::Object => self.fields_type(TokenKind::Object),
            TokenKind::Union => self.fields_type(TokenKind::Union),
            TokenKind::Pointer => self.pointer_type(),
            TokenKind::Proc | TokenKind::Procedure => self.proc_type(),
            TokenKind::LParen => self.enumeration(),
            TokenKind::Ident => self.named_type(),
            _ => {
                let pos = self.la.pos;
                let msg = format!("expected a type, found {}", self.la.kind.describe());
                self.error(DiagnosticKind::Syntax, pos, msg);
                TypeId::NO_TYPE
            }
        };
        if deanonymize {
            self.deanonymize(t);
        }
        t
    }

    /// A (possibly qualified) type name. Unknown local names become
    /// `NameRef` placeholders on the deferred list; they must resolve
    /// by the end of the declaration sequence.
    pub(crate) fn named_type(&mut self) -> TypeId {
        if !self.expect(TokenKind::Ident, "type") {
            return TypeId::NO_TYPE;
        }
        let first = self.cur.ident();
        let tok = self.cur.clone();

        // qualified: Import '.' ident
        if let Some(d) = self.find_decl(first) {
            if self.session.model.decl(d).kind == DeclKind::Import && self.at(TokenKind::Dot) {
                self.next();
                if !self.expect(TokenKind::Ident, "qualified type") {
                    return TypeId::NO_TYPE;
                }
                let name = self.cur.ident();
                let pos = self.cur.pos;
                let resolved = match &self.session.model.decl(d).data {
                    DeclData::Import { resolved, .. } => *resolved,
                    _ => None,
                };
                let Some(module) = resolved else {
                    // import failed; poison silently
                    return TypeId::NO_TYPE;
                };
                let Some(target) = self.session.model.find_member(module, name) else {
                    let text = self.session.symbols.resolve(name);
                    let msg = format!("undefined type '{text}' in imported module");
                    self.error(DiagnosticKind::Scope, pos, msg);
                    return TypeId::NO_TYPE;
                };
                let (tkind, tvisi, tty) = {
                    let td = self.session.model.decl(target);
                    (td.kind, td.visi, td.ty)
                };
                if tkind != DeclKind::TypeDecl {
                    let text = self.session.symbols.resolve(name);
                    self.error(DiagnosticKind::Type, pos, format!("'{text}' is not a type"));
                    return TypeId::NO_TYPE;
                }
                if tvisi == Visibility::Private {
                    let text = self.session.symbols.resolve(name);
                    self.error(
                        DiagnosticKind::Scope,
                        pos,
                        format!("type '{text}' is not exported"),
                    );
                    return TypeId::NO_TYPE;
                }
                return tty;
            }
        }

        match self.find_decl(first) {
            Some(d) if self.session.model.decl(d).kind == DeclKind::TypeDecl => {
                self.session.model.decl(d).ty
            }
            Some(d) => {
                let text = self.session.symbols.resolve(self.session.model.decl(d).name);
                let msg = format!("'{text}' is not a type");
                let pos = tok.pos;
                self.error(DiagnosticKind::Type, pos, msg);
                TypeId::NO_TYPE
            }
            None => {
                let t = self.session.model.new_type(Type::new(
                    TypeKind::NameRef {
                        quali: Quali::plain(first),
                        resolved: None,
                    },
                    tok.pos,
                ));
                self.deferred.push((t, tok));
                t
            }
        }
    }

    /// `ARRAY [len] OF type`; no length means an open array.
    fn array_type(&mut self) -> TypeId {
        self.expect(TokenKind::Array, "array type");
        let pos = self.cur.pos;
        let mut len = 0u32;
        if !self.at(TokenKind::Of) {
            if let Some((v, _)) = self.const_expression(None) {
                match v.val.as_u64() {
                    Some(n) if n > 0 && n <= u64::from(u32::MAX) => len = n as u32,
                    _ => {
                        self.error(
                            DiagnosticKind::Const,
                            pos,
                            "array length must be a positive integer constant",
                        );
                    }
                }
            }
        }
        self.expect(TokenKind::Of, "array type");
        let base = self.type_(true);
        self.session
            .model
            .new_type(Type::new(TypeKind::Array { base, len }, pos))
    }

    /// `RECORD|OBJECT|UNION fields END` with `fields` being
    /// `identList ':' type {';' ...}`.
    fn fields_type(&mut self, intro: TokenKind) -> TypeId {
        self.expect(intro, "record type");
        let pos = self.cur.pos;
        let mut fields: Vec<DeclId> = Vec::new();
        while self.at(TokenKind::Ident) {
            let mut names = Vec::new();
            loop {
                match self.identdef() {
                    Some(id) => names.push(id),
                    None => break,
                }
                if !self.accept(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Colon, "field list");
            let ty = self.type_(true);
            for (name, visi, fpos) in names {
                let dup = fields
                    .iter()
                    .any(|&f| self.session.model.decl(f).name == name);
                if dup {
                    let text = self.session.symbols.resolve(name);
                    let msg = format!("duplicate field '{text}'");
                    self.error(DiagnosticKind::Scope, fpos, msg);
                    continue;
                }
                let mut d = Decl::new(DeclKind::Field, name, fpos);
                d.visi = visi;
                d.ty = ty;
                let id = self.session.model.new_decl(d, None);
                fields.push(id);
            }
            if !self.accept(TokenKind::Semi) {
                break;
            }
        }
        self.expect(TokenKind::End, "record type");
        let kind = match intro {
            TokenKind::Record => TypeKind::Record { fields },
            TokenKind::Union => TypeKind::Union { fields },
            _ => TypeKind::Object {
                fields,
                methods: Vec::new(),
            },
        };
        self.session.model.new_type(Type::new(kind, pos))
    }

    /// `POINTER TO type`; the base may be a not-yet-declared name of
    /// this module.
    fn pointer_type(&mut self) -> TypeId {
        self.expect(TokenKind::Pointer, "pointer type");
        let pos = self.cur.pos;
        self.expect(TokenKind::To, "pointer type");
        let base = self.type_(true);
        let base = if base == TypeId::NO_TYPE {
            // a pointer base must never stay NoType
            TypeId::ANY
        } else {
            base
        };
        self.session
            .model
            .new_type(Type::new(TypeKind::Pointer { base }, pos))
    }

    /// `PROC ['(' [VAR] type {',' [VAR] type} ')'] [':' type]`
    fn proc_type(&mut self) -> TypeId {
        self.next(); // PROC or PROCEDURE
        let pos = self.cur.pos;
        let mut params = Vec::new();
        if self.accept(TokenKind::LParen) {
            if !self.at(TokenKind::RParen) {
                loop {
                    let var = self.accept(TokenKind::Var);
                    let ty = self.type_(true);
                    let mut d = Decl::new(DeclKind::ParamDecl, Symbol::EMPTY, self.cur.pos);
                    d.ty = ty;
                    d.data = DeclData::Slot(params.len() as u32);
                    if var {
                        d.flags |= DeclFlags::VAR_PARAM;
                    }
                    params.push(self.session.model.new_decl(d, None));
                    if !self.accept(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RParen, "procedure type");
        }
        let ret = if self.accept(TokenKind::Colon) {
            self.type_(true)
        } else {
            TypeId::NO_TYPE
        };
        self.session
            .model
            .new_type(Type::new(TypeKind::Proc { params, ret }, pos))
    }

    /// `'(' ident {',' ident} ')'` const enumeration; members land in
    /// the enclosing scope with values 0, 1, ...
    fn enumeration(&mut self) -> TypeId {
        self.expect(TokenKind::LParen, "enumeration");
        let pos = self.cur.pos;
        let mut members = Vec::new();
        let mut value = 0i64;
        loop {
            if !self.expect(TokenKind::Ident, "enumeration") {
                break;
            }
            let name = self.cur.ident();
            let mpos = self.cur.pos;
            let mut d = Decl::new(DeclKind::EnumMember, name, mpos);
            d.data = DeclData::EnumMember(value);
            let id = self.add_decl(d);
            members.push(id);
            value += 1;
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "enumeration");
        let t = self
            .session
            .model
            .new_type(Type::new(TypeKind::ConstEnum { members: members.clone() }, pos));
        for m in members {
            self.session.model.decl_mut(m).ty = t;
        }
        t
    }

    /// Give an anonymous compound type a synthesised module-level name
    /// so the emitted IR can refer to it.
    pub(crate) fn deanonymize(&mut self, t: TypeId) {
        if t == TypeId::NO_TYPE {
            return;
        }
        let needs = {
            let ty = self.session.model.type_(t);
            !ty.is_basic()
                && ty.decl.is_none()
                && !matches!(ty.kind, TypeKind::NameRef { .. } | TypeKind::Generic { .. })
        };
        if !needs {
            return;
        }
        self.helper_count += 1;
        let name = self
            .session
            .symbols
            .intern(&format!("$T{}", self.helper_count));
        let pos = self.session.model.type_(t).pos;
        let mut d = Decl::new(DeclKind::TypeDecl, name, pos);
        d.ty = t;
        d.flags |= DeclFlags::OWNS_TYPE | DeclFlags::SYNTHESISED;
        let module = self.module.expect("deanonymize outside module");
        let id = self.session.model.new_decl(d, Some(module));
        self.adopt_type(id, t);
        self.emit_type_decl(id);
    }

    /// Establish single ownership: the type node points back at
    /// its declaration, aggregate fields at the owning type decl.
    fn adopt_type(&mut self, decl: DeclId, t: TypeId) {
        self.session.model.type_mut(t).decl = Some(decl);
        let fields: Vec<DeclId> = match &self.session.model.type_(t).kind {
            TypeKind::Record { fields }
            | TypeKind::Union { fields }
            | TypeKind::Object { fields, .. } => fields.clone(),
            _ => Vec::new(),
        };
        for f in fields {
            self.session.model.decl_mut(f).outer = Some(decl);
        }
    }

    /// Emit the MIL definition of a named type. A declaration that does
    /// not own its type node is an alias and goes out by name.
    fn emit_type_decl(&mut self, id: DeclId) {
        let decl = self.session.model.decl(id);
        let t = decl.ty;
        if t == TypeId::NO_TYPE {
            return;
        }
        let name = self.session.symbols.resolve(decl.name).to_string();
        let public = decl.visi == Visibility::Public;
        if self.session.model.type_(t).decl != Some(id) {
            let q = {
                let cx = ecx!(self);
                cx.type_quali(t)
            };
            self.out.add_type(&name, public, MilTypeDefKind::Alias { base: q });
            return;
        }
        let kind = self.session.model.type_(t).kind.clone();
        match kind {
            TypeKind::Record { fields } | TypeKind::Union { fields } | TypeKind::Object { fields, .. } => {
                let agg = match self.session.model.type_(t).kind {
                    TypeKind::Record { .. } => MilAggKind::Struct,
                    TypeKind::Union { .. } => MilAggKind::Union,
                    _ => MilAggKind::Object,
                };
                self.out.begin_type(&name, public, agg);
                for f in fields {
                    let fd = self.session.model.decl(f);
                    let fname = self.session.symbols.resolve(fd.name).to_string();
                    let fpublic = fd.visi == Visibility::Public;
                    let fty = fd.ty;
                    let q = {
                        let cx = ecx!(self);
                        cx.type_quali(fty)
                    };
                    self.out.add_field(&fname, &q, fpublic);
                }
                self.out.end_type();
            }
            TypeKind::Pointer { base } => {
                let q = {
                    let cx = ecx!(self);
                    cx.type_quali(base)
                };
                self.out
                    .add_type(&name, public, MilTypeDefKind::Pointer { base: q });
            }
            TypeKind::Array { base, len } => {
                let q = {
                    let cx = ecx!(self);
                    cx.type_quali(base)
                };
                self.out
                    .add_type(&name, public, MilTypeDefKind::Array { base: q, len });
            }
            TypeKind::Proc { params, ret } => {
                let (param_qs, ret_q) = {
                    let cx = ecx!(self);
                    let param_qs: Vec<MilQuali> = params
                        .iter()
                        .map(|&p| cx.type_quali(cx.model.decl(p).ty))
                        .collect();
                    let ret_q = if ret == TypeId::NO_TYPE {
                        None
                    } else {
                        Some(cx.type_quali(ret))
                    };
                    (param_qs, ret_q)
                };
                self.out.add_type(
                    &name,
                    public,
                    MilTypeDefKind::ProcType {
                        params: param_qs,
                        ret: ret_q,
                    },
                );
            }
            TypeKind::ConstEnum { members } => {
                let names = members
                    .iter()
                    .map(|&m| self.session.symbols.resolve(self.session.model.decl(m).name).to_string())
                    .collect();
                self.out
                    .add_type(&name, public, MilTypeDefKind::Enum { members: names });
            }
            _ => {
                let q = {
                    let cx = ecx!(self);
                    cx.type_quali(t)
                };
                self.out.add_type(&name, public, MilTypeDefKind::Alias { base: q });
            }
        }
    }

    /// Visibility propagation: a public declaration must not refer
    /// to private named types.
    fn check_exposure(&mut self, id: DeclId) {
        let decl = self.session.model.decl(id);
        if decl.visi != Visibility::Public {
            return;
        }
        let pos = decl.pos;
        let mut referenced: Vec<TypeId> = Vec::new();
        match &self.session.model.type_(decl.ty).kind {
            TypeKind::Pointer { base } => referenced.push(*base),
            TypeKind::Array { base, .. } => referenced.push(*base),
            TypeKind::Record { fields }
            | TypeKind::Union { fields }
            | TypeKind::Object { fields, .. } => {
                for &f in fields {
                    let fd = self.session.model.decl(f);
                    if fd.visi == Visibility::Public {
                        referenced.push(fd.ty);
                    }
                }
            }
            TypeKind::Proc { params, ret } => {
                referenced.push(*ret);
                for &p in params {
                    referenced.push(self.session.model.decl(p).ty);
                }
            }
            _ => {}
        }
        for t in referenced {
            let t = self.session.model.deref(t);
            if let Some(owner) = self.session.model.type_(t).decl {
                let od = self.session.model.decl(owner);
                if od.visi == Visibility::Private && !od.flags.contains(DeclFlags::SYNTHESISED) {
                    let text = self.session.symbols.resolve(od.name);
                    let msg = format!("public declaration exposes private type '{text}'");
                    self.error(DiagnosticKind::Scope, pos, msg);
                }
            }
        }
    }

    // ---- variables ------------------------------------------------------

    fn variable_declaration(&mut self) {
        let mut names = Vec::new();
        loop {
            match self.identdef() {
                Some(id) => names.push(id),
                None => {
                    self.sync_decl();
                    return;
                }
            }
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Colon, "variable declaration");
        let ty = self.type_(true);
        self.expect(TokenKind::Semi, "variable declaration");

        let at_module = Some(self.current_scope()) == self.module;
        for (name, visi, pos) in names {
            let kind = if at_module {
                DeclKind::VarDecl
            } else {
                DeclKind::LocalDecl
            };
            let mut d = Decl::new(kind, name, pos);
            d.visi = visi;
            d.ty = ty;
            if !at_module {
                let scope = self.current_scope();
                let slot = self
                    .session
                    .model
                    .decl(scope)
                    .members
                    .iter()
                    .filter(|&&m| self.session.model.decl(m).kind == DeclKind::LocalDecl)
                    .count() as u32;
                d.data = DeclData::Slot(slot);
            }
            let id = self.add_decl(d);
            if at_module {
                let text = self.session.symbols.resolve(name).to_string();
                let q = {
                    let cx = ecx!(self);
                    cx.type_quali(ty)
                };
                self.out
                    .add_variable(&q, &text, visi == Visibility::Public);
                self.check_exposure(id);
            }
        }
    }

    // ---- deferred type resolution ---------------------------------------

    /// Bind every `NameRef` collected in this declaration sequence;
    /// unresolved entries are `FWD` errors at the referring site.
    pub(crate) fn resolve_deferreds(&mut self) {
        let deferred = std::mem::take(&mut self.deferred);
        for (t, tok) in deferred {
            let name = match &self.session.model.type_(t).kind {
                TypeKind::NameRef {
                    quali,
                    resolved: None,
                } => quali.name,
                _ => continue,
            };
            let target = self.find_decl(name).filter(|&d| {
                self.session.model.decl(d).kind == DeclKind::TypeDecl
            });
            match target {
                Some(d) => {
                    let ty = self.session.model.decl(d).ty;
                    if let TypeKind::NameRef { resolved, .. } =
                        &mut self.session.model.type_mut(t).kind
                    {
                        *resolved = Some(ty);
                    }
                }
                None => {
                    let text = self.session.symbols.resolve(name);
                    let msg = format!("unresolved type '{text}'");
                    self.error(DiagnosticKind::Forward, tok.pos, msg);
                }
            }
        }
    }

    // ---- procedures -----------------------------------------------------

    /// `PROCEDURE ['^'] identdef [formals] ';' (EXTERN ';' | decls
    /// [BEGIN seq] [FINALLY seq] END ident ';')`
    pub(crate) fn procedure_declaration(&mut self) {
        self.expect(TokenKind::Procedure, "procedure declaration");
        let forward = self.accept(TokenKind::Caret);
        let Some((name, visi, pos)) = self.identdef() else {
            self.sync_decl();
            return;
        };

        // completing an earlier FORWARD declaration reuses its slot
        let scope = self.current_scope();
        let previous = self
            .session
            .model
            .find_member(scope, name)
            .filter(|&d| {
                let decl = self.session.model.decl(d);
                decl.kind == DeclKind::Procedure && decl.flags.contains(DeclFlags::FORWARD)
            })
            .filter(|_| !forward);

        let (decl, old_params, old_ret) = match previous {
            Some(prev) => {
                let old = self.session.model.decl(prev).clone();
                let params: Vec<DeclId> = old
                    .members
                    .iter()
                    .copied()
                    .filter(|&m| self.session.model.decl(m).kind == DeclKind::ParamDecl)
                    .collect();
                self.session.model.decl_mut(prev).members.clear();
                (prev, Some(params), old.ty)
            }
            None => {
                let mut d = Decl::new(DeclKind::Procedure, name, pos);
                d.visi = visi;
                d.data = DeclData::Procedure { forward_to: None };
                if forward {
                    d.flags |= DeclFlags::FORWARD;
                }
                (self.add_decl(d), None, TypeId::NO_TYPE)
            }
        };

        self.scopes.push(decl);
        let ret = self.formal_parameters();
        self.session.model.decl_mut(decl).ty = ret;

        if let Some(old_params) = old_params {
            let new_params = self.param_decls(decl);
            let matches = eval::match_formals(&self.session.model, &old_params, &new_params)
                && eval::equal_types(&self.session.model, old_ret, ret);
            if !matches {
                let text = self.session.symbols.resolve(name);
                let msg = format!("completion of forward procedure '{text}' has a different signature");
                self.error(DiagnosticKind::Forward, pos, msg);
            }
            self.session.model.decl_mut(decl).flags.remove(DeclFlags::FORWARD);
        }

        if forward {
            self.expect(TokenKind::Semi, "forward declaration");
            self.scopes.pop();
            return;
        }

        if self.accept(TokenKind::Extern) {
            self.session.model.decl_mut(decl).flags |= DeclFlags::EXTERN;
            self.expect(TokenKind::Semi, "extern procedure");
            self.emit_proc_frame(decl, MilProcKind::Extern);
            self.out.end_proc();
            self.scopes.pop();
            return;
        }
        self.expect(TokenKind::Semi, "procedure header");

        // the deferred list is scoped to a declaration sequence; keep
        // the enclosing section's entries out of this procedure's
        // resolution pass
        let outer_deferred = std::mem::take(&mut self.deferred);
        self.declaration_sequence();
        self.deferred = outer_deferred;

        self.emit_proc_frame(decl, MilProcKind::Normal);
        self.proc_ret.push(ret);
        if self.accept(TokenKind::Begin) {
            self.statement_sequence(&[TokenKind::End, TokenKind::Finally]);
        }
        if self.accept(TokenKind::Finally) {
            self.in_finally = true;
            self.out.finally_();
            self.statement_sequence(&[TokenKind::End]);
            self.in_finally = false;
        }
        self.out.ret_(false);
        self.proc_ret.pop();
        self.check_gotos();
        self.out.end_proc();

        self.expect(TokenKind::End, "procedure");
        if self.expect(TokenKind::Ident, "procedure trailer") && self.cur.ident() != name {
            let expected = self.session.symbols.resolve(name);
            let pos = self.cur.pos;
            self.error(
                DiagnosticKind::Syntax,
                pos,
                format!("procedure trailer must repeat the name '{expected}'"),
            );
        }
        self.expect(TokenKind::Semi, "procedure");
        self.scopes.pop();
    }

    fn param_decls(&self, proc: DeclId) -> Vec<DeclId> {
        self.session
            .model
            .decl(proc)
            .members
            .iter()
            .copied()
            .filter(|&m| self.session.model.decl(m).kind == DeclKind::ParamDecl)
            .collect()
    }

    /// `['(' [FPSection {';' FPSection}] ')'] [':' type]`, with
    /// `FPSection = [VAR] ident {',' ident} ':' type`. Returns the
    /// return type (`NoType` for proper procedures).
    fn formal_parameters(&mut self) -> TypeId {
        let mut slot = 0u32;
        if self.accept(TokenKind::LParen) {
            while self.at(TokenKind::Var) || self.at(TokenKind::Ident) {
                let var = self.accept(TokenKind::Var);
                let mut names = Vec::new();
                loop {
                    if !self.expect(TokenKind::Ident, "parameter list") {
                        break;
                    }
                    names.push((self.cur.ident(), self.cur.pos));
                    if !self.accept(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::Colon, "parameter list");
                let ty = self.type_(true);
                for (name, pos) in names {
                    let mut d = Decl::new(DeclKind::ParamDecl, name, pos);
                    d.ty = ty;
                    d.data = DeclData::Slot(slot);
                    if var {
                        d.flags |= DeclFlags::VAR_PARAM;
                    }
                    slot += 1;
                    self.add_decl(d);
                }
                if !self.accept(TokenKind::Semi) {
                    break;
                }
            }
            self.expect(TokenKind::RParen, "parameter list");
        }
        if self.accept(TokenKind::Colon) {
            self.type_(true)
        } else {
            TypeId::NO_TYPE
        }
    }

    /// Open the MIL procedure and register parameters and locals in
    /// declaration order; slot ids line up with the parse-time `Slot`
    /// assignments.
    fn emit_proc_frame(&mut self, decl: DeclId, kind: MilProcKind) {
        let mil_name = decl_mil_name(&self.session.model, &self.session.symbols, decl);
        let public = self.session.model.decl(decl).visi == Visibility::Public;
        self.out.begin_proc(&mil_name, public, kind);

        let ret = self.session.model.decl(decl).ty;
        if ret != TypeId::NO_TYPE {
            let q = {
                let cx = ecx!(self);
                cx.type_quali(ret)
            };
            self.out.set_return(q);
        }
        let members = self.session.model.decl(decl).members.clone();
        for m in members {
            let d = self.session.model.decl(m);
            let name = self.session.symbols.resolve(d.name).to_string();
            let ty = d.ty;
            match d.kind {
                DeclKind::ParamDecl => {
                    let var = d.flags.contains(DeclFlags::VAR_PARAM);
                    let q = {
                        let cx = ecx!(self);
                        cx.type_quali(ty)
                    };
                    let q = if var {
                        MilQuali::plain(format!("&{q}"))
                    } else {
                        q
                    };
                    self.out.add_param(&name, q);
                }
                DeclKind::LocalDecl => {
                    let q = {
                        let cx = ecx!(self);
                        cx.type_quali(ty)
                    };
                    self.out.add_local(&name, q);
                }
                _ => {}
            }
        }
    }
}

/// Constant payload as a MIL constant item, where representable.
fn const_to_mil(v: &ConstValue) -> Option<MilConst> {
    Some(match v {
        ConstValue::Int(i) => MilConst::Int(*i),
        ConstValue::UInt(u) => MilConst::UInt(*u),
        ConstValue::Real(r) => MilConst::Real(*r),
        ConstValue::Bool(b) => MilConst::Bool(*b),
        ConstValue::Char(c) => MilConst::UInt(u64::from(*c)),
        ConstValue::Str(s) => MilConst::Str(s.clone()),
        ConstValue::Bytes(b) => MilConst::Bytes(b.clone()),
        ConstValue::Set(s) => MilConst::UInt(u64::from(*s)),
        ConstValue::Enum(_, val) => MilConst::Int(*val),
        ConstValue::Nil => MilConst::Nil,
        ConstValue::None => return None,
    })
}
