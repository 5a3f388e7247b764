//! Expression grammar and expression-level checking.
//!
//! Expressions are built bottom-up as typed trees. Checking happens
//! while building: numeric promotion wraps operands in auto-cast nodes,
//! builtin calls go through the dispatcher's `check_args`, procedure
//! calls are matched against their formals. A `TYPE`/`SCOPE` error
//! poisons the node with `NoType`, which every later check treats as
//! already-reported.

use super::{ecx, Parser};
use crate::builtins;
use crate::eval;
use mic_diagnostic::DiagnosticKind;
use mic_ir::{
    BinOp, Builtin, ConstValue, DeclFlags, DeclId, DeclKind, ExprId, ExprKind, RelOp, RowCol,
    SetElem, TokenKind, TokenPayload, TypeId, TypeKind, UnOp, Value, Visibility,
};

impl<'a> Parser<'a> {
    pub(crate) fn poison(&mut self, pos: RowCol) -> ExprId {
        self.arena
            .alloc(ExprKind::Literal(ConstValue::None), TypeId::NO_TYPE, pos)
    }

    /// `SimpleExpression [relation SimpleExpression]`
    pub(crate) fn expression(&mut self, hint: Option<TypeId>) -> ExprId {
        crate::stack::grow(|| self.expression_inner(hint))
    }

    fn expression_inner(&mut self, hint: Option<TypeId>) -> ExprId {
        let mut lhs = self.simple_expression(hint);
        let op = match self.la.kind {
            TokenKind::Eq => Some(RelOp::Eq),
            TokenKind::Neq => Some(RelOp::Neq),
            TokenKind::Lt => Some(RelOp::Lt),
            TokenKind::Leq => Some(RelOp::Leq),
            TokenKind::Gt => Some(RelOp::Gt),
            TokenKind::Geq => Some(RelOp::Geq),
            TokenKind::In => Some(RelOp::In),
            _ => None,
        };
        if let Some(op) = op {
            self.next();
            let pos = self.cur.pos;
            let mut rhs = self.simple_expression(hint);
            let ty = self.relation_type(op, &mut lhs, &mut rhs, pos);
            lhs = self.arena.alloc(ExprKind::Relation { op, lhs, rhs }, ty, pos);
        }
        lhs
    }

    /// `['+'|'-'] term {('+'|'-'|OR) term}`
    fn simple_expression(&mut self, hint: Option<TypeId>) -> ExprId {
        let neg = if self.accept(TokenKind::Minus) {
            Some(self.cur.pos)
        } else {
            let _ = self.accept(TokenKind::Plus);
            None
        };
        let mut lhs = self.term(hint);
        if let Some(pos) = neg {
            let ty = self.unary_type(UnOp::Neg, lhs, pos);
            lhs = self.arena.alloc(ExprKind::Unary { op: UnOp::Neg, arg: lhs }, ty, pos);
        }
        loop {
            let op = match self.la.kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                TokenKind::Or => BinOp::Or,
                _ => break,
            };
            self.next();
            let pos = self.cur.pos;
            let mut rhs = self.term(hint);
            let ty = self.arith_type(op, &mut lhs, &mut rhs, pos);
            lhs = self.arena.alloc(ExprKind::Binary { op, lhs, rhs }, ty, pos);
        }
        lhs
    }

    /// `factor {('*'|'/'|DIV|MOD|'&') factor}`
    fn term(&mut self, hint: Option<TypeId>) -> ExprId {
        let mut lhs = self.factor(hint);
        loop {
            let op = match self.la.kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::FDiv,
                TokenKind::Div => BinOp::IDiv,
                TokenKind::Mod => BinOp::Mod,
                TokenKind::Amp => BinOp::And,
                _ => break,
            };
            self.next();
            let pos = self.cur.pos;
            let mut rhs = self.factor(hint);
            let ty = self.arith_type(op, &mut lhs, &mut rhs, pos);
            lhs = self.arena.alloc(ExprKind::Binary { op, lhs, rhs }, ty, pos);
        }
        lhs
    }

    fn factor(&mut self, hint: Option<TypeId>) -> ExprId {
        let pos = self.la.pos;
        match self.la.kind {
            TokenKind::IntLit => {
                self.next();
                let v = match self.cur.payload {
                    TokenPayload::Int(v) => v,
                    _ => 0,
                };
                let (ty, val) = if v <= i32::MAX as u64 {
                    (TypeId::INT32, ConstValue::Int(v as i64))
                } else if v <= i64::MAX as u64 {
                    (TypeId::INT64, ConstValue::Int(v as i64))
                } else {
                    (TypeId::UINT64, ConstValue::UInt(v))
                };
                self.arena.alloc(ExprKind::Literal(val), ty, pos)
            }
            TokenKind::HexLit => {
                self.next();
                let v = match self.cur.payload {
                    TokenPayload::Int(v) => v,
                    _ => 0,
                };
                let ty = if v <= u64::from(u32::MAX) {
                    TypeId::UINT32
                } else {
                    TypeId::UINT64
                };
                self.arena.alloc(ExprKind::Literal(ConstValue::UInt(v)), ty, pos)
            }
            TokenKind::RealLit => {
                self.next();
                let v = match self.cur.payload {
                    TokenPayload::Real(v) => v,
                    _ => 0.0,
                };
                self.arena
                    .alloc(ExprKind::Literal(ConstValue::Real(v)), TypeId::FLOAT64, pos)
            }
            TokenKind::StrLit => {
                self.next();
                let s = match &self.cur.payload {
                    TokenPayload::Str(s) => s.clone(),
                    _ => String::new(),
                };
                self.arena
                    .alloc(ExprKind::Literal(ConstValue::Str(s)), TypeId::STRING_LIT, pos)
            }
            TokenKind::CharLit => {
                self.next();
                let c = match self.cur.payload {
                    TokenPayload::Char(c) => c,
                    _ => 0,
                };
                self.arena
                    .alloc(ExprKind::Literal(ConstValue::Char(c)), TypeId::CHAR, pos)
            }
            TokenKind::BytesLit => {
                self.next();
                let b = match &self.cur.payload {
                    TokenPayload::Bytes(b) => b.clone(),
                    _ => Vec::new(),
                };
                self.arena.alloc(
                    ExprKind::Literal(ConstValue::Bytes(b)),
                    TypeId::BYTE_ARRAY_LIT,
                    pos,
                )
            }
            TokenKind::True | TokenKind::False => {
                let b = self.at(TokenKind::True);
                self.next();
                self.arena
                    .alloc(ExprKind::Literal(ConstValue::Bool(b)), TypeId::BOOL, pos)
            }
            TokenKind::Nil => {
                self.next();
                self.arena
                    .alloc(ExprKind::Literal(ConstValue::Nil), TypeId::NIL, pos)
            }
            TokenKind::LBrace => self.set_constructor(),
            TokenKind::LParen => {
                self.next();
                let e = self.expression(hint);
                self.expect(TokenKind::RParen, "parenthesised expression");
                e
            }
            TokenKind::Tilde => {
                self.next();
                let arg = self.factor(hint);
                let ty = self.unary_type(UnOp::Not, arg, pos);
                self.arena.alloc(ExprKind::Unary { op: UnOp::Not, arg }, ty, pos)
            }
            TokenKind::Ident => self.designator(),
            _ => {
                let msg = format!("unexpected {} in expression", self.la.kind.describe());
                self.error(DiagnosticKind::Syntax, pos, msg);
                self.next();
                self.poison(pos)
            }
        }
    }

    /// `'{' [elem {',' elem}] '}'` with `elem = expr ['..' expr]`.
    fn set_constructor(&mut self) -> ExprId {
        self.expect(TokenKind::LBrace, "set constructor");
        let pos = self.cur.pos;
        let mut elems = Vec::new();
        if !self.at(TokenKind::RBrace) {
            loop {
                let lo = self.expression(Some(TypeId::UINT32));
                let hi = if self.accept(TokenKind::DotDot) {
                    Some(self.expression(Some(TypeId::UINT32)))
                } else {
                    None
                };
                if !self.session.model.type_(self.session.model.deref(self.arena.ty(lo))).is_integer()
                    && self.arena.ty(lo) != TypeId::NO_TYPE
                {
                    let p = self.arena.get(lo).pos;
                    self.error(DiagnosticKind::Type, p, "set elements must be integers");
                }
                elems.push(SetElem { lo, hi });
                if !self.accept(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBrace, "set constructor");
        self.arena.alloc(ExprKind::SetCtor { elems }, TypeId::SET, pos)
    }

    // ---- designators and calls ------------------------------------------

    /// `qualident {'.' ident | '[' expr ']' | '^' | '(' args ')'}`
    pub(crate) fn designator(&mut self) -> ExprId {
        let mut e = self.qualident_expr();
        loop {
            match self.la.kind {
                TokenKind::Dot => {
                    self.next();
                    if !self.expect(TokenKind::Ident, "field selection") {
                        return self.poison(self.cur.pos);
                    }
                    e = self.select_field(e);
                }
                TokenKind::LBrack => {
                    self.next();
                    let idx = self.expression(Some(TypeId::INT32));
                    self.expect(TokenKind::RBrack, "index expression");
                    e = self.index_into(e, idx);
                }
                TokenKind::Caret => {
                    self.next();
                    let pos = self.cur.pos;
                    let t = self.session.model.deref(self.arena.ty(e));
                    match self.session.model.type_(t).kind {
                        TypeKind::Pointer { base } => {
                            let base = self.session.model.deref(base);
                            e = self.arena.alloc(ExprKind::Deref { lhs: e }, base, pos);
                        }
                        _ if t == TypeId::NO_TYPE => {}
                        _ => {
                            self.error(DiagnosticKind::Type, pos, "dereference of a non-pointer");
                            e = self.poison(pos);
                        }
                    }
                }
                TokenKind::LParen if self.callable(e) => {
                    self.next();
                    let pos = self.cur.pos;
                    let mut args = Vec::new();
                    if !self.at(TokenKind::RParen) {
                        loop {
                            args.push(self.expression(None));
                            if !self.accept(TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RParen, "argument list");
                    e = self.build_call(e, args, pos);
                }
                _ => break,
            }
        }
        e
    }

    /// Whether `(` after this node starts a call (procedures, builtins
    /// and procedure-typed values).
    fn callable(&self, e: ExprId) -> bool {
        match &self.arena.get(e).kind {
            ExprKind::BuiltinCall { .. } | ExprKind::Call { .. } => false,
            ExprKind::DeclRef(d) => matches!(
                self.session.model.decl(*d).kind,
                DeclKind::Procedure | DeclKind::Builtin
            ),
            _ => matches!(
                self.session
                    .model
                    .type_(self.session.model.deref(self.arena.ty(e)))
                    .kind,
                TypeKind::Proc { .. }
            ),
        }
    }

    fn select_field(&mut self, e: ExprId) -> ExprId {
        let name = self.cur.ident();
        let pos = self.cur.pos;
        let mut t = self.session.model.deref(self.arena.ty(e));
        if t == TypeId::NO_TYPE {
            return e;
        }
        let mut base = e;
        // implicit dereference of a pointer to an aggregate
        if let TypeKind::Pointer { base: pointee } = self.session.model.type_(t).kind {
            let pointee = self.session.model.deref(pointee);
            base = self.arena.alloc(ExprKind::Deref { lhs: base }, pointee, pos);
            t = pointee;
        }
        let fields = match &self.session.model.type_(t).kind {
            TypeKind::Record { fields }
            | TypeKind::Union { fields }
            | TypeKind::Object { fields, .. } => fields.clone(),
            _ => {
                self.error(DiagnosticKind::Type, pos, "field selection on a non-record");
                return self.poison(pos);
            }
        };
        let field = fields
            .iter()
            .copied()
            .find(|&f| self.session.model.decl(f).name == name);
        let Some(field) = field else {
            let text = self.session.symbols.resolve(name);
            let msg = format!("record has no field '{text}'");
            self.error(DiagnosticKind::Scope, pos, msg);
            return self.poison(pos);
        };
        // visibility across modules
        let (fvisi, fty) = {
            let fd = self.session.model.decl(field);
            (fd.visi, fd.ty)
        };
        let owner = self.session.model.enclosing_module(field);
        let foreign = owner.is_some() && owner != self.module;
        if foreign && fvisi == Visibility::Private {
            let text = self.session.symbols.resolve(name);
            let msg = format!("field '{text}' is not exported");
            self.error(DiagnosticKind::Scope, pos, msg);
        }
        let fty = self.session.model.deref(fty);
        self.arena.alloc(ExprKind::Select { lhs: base, field }, fty, pos)
    }

    fn index_into(&mut self, e: ExprId, idx: ExprId) -> ExprId {
        let pos = self.cur.pos;
        let mut t = self.session.model.deref(self.arena.ty(e));
        if t == TypeId::NO_TYPE {
            return e;
        }
        let mut base = e;
        if let TypeKind::Pointer { base: pointee } = self.session.model.type_(t).kind {
            let pointee = self.session.model.deref(pointee);
            base = self.arena.alloc(ExprKind::Deref { lhs: base }, pointee, pos);
            t = pointee;
        }
        let Some((elem, _len)) = self.session.model.array_base(t) else {
            self.error(DiagnosticKind::Type, pos, "indexing a non-array");
            return self.poison(pos);
        };
        let it = self.session.model.deref(self.arena.ty(idx));
        if it != TypeId::NO_TYPE && !self.session.model.type_(it).is_integer() {
            self.error(DiagnosticKind::Type, pos, "array index must be an integer");
        }
        self.arena.alloc(
            ExprKind::Index {
                lhs: base,
                index: idx,
            },
            elem,
            pos,
        )
    }

    /// Resolve the leading identifier of a designator, following one
    /// `Import.name` qualification.
    fn qualident_expr(&mut self) -> ExprId {
        if !self.expect(TokenKind::Ident, "expression") {
            return self.poison(self.la.pos);
        }
        let name = self.cur.ident();
        let pos = self.cur.pos;
        let Some(d) = self.find_decl(name) else {
            let text = self.session.symbols.resolve(name);
            let msg = format!("undefined identifier '{text}'");
            self.error(DiagnosticKind::Scope, pos, msg);
            return self.poison(pos);
        };
        if self.session.model.decl(d).kind == DeclKind::Import && self.at(TokenKind::Dot) {
            self.next();
            if !self.expect(TokenKind::Ident, "qualified identifier") {
                return self.poison(pos);
            }
            let member = self.cur.ident();
            let mpos = self.cur.pos;
            let resolved = match &self.session.model.decl(d).data {
                mic_ir::DeclData::Import { resolved, .. } => *resolved,
                _ => None,
            };
            let Some(module) = resolved else {
                return self.poison(mpos);
            };
            let Some(target) = self.session.model.find_member(module, member) else {
                let text = self.session.symbols.resolve(member);
                let msg = format!("undefined identifier '{text}' in imported module");
                self.error(DiagnosticKind::Scope, mpos, msg);
                return self.poison(mpos);
            };
            if self.session.model.decl(target).visi == Visibility::Private {
                let text = self.session.symbols.resolve(member);
                let msg = format!("'{text}' is not exported");
                self.error(DiagnosticKind::Scope, mpos, msg);
                return self.poison(mpos);
            }
            return self.decl_expr(target, mpos);
        }
        self.decl_expr(d, pos)
    }

    fn decl_expr(&mut self, d: DeclId, pos: RowCol) -> ExprId {
        let decl = self.session.model.decl(d);
        match decl.kind {
            DeclKind::TypeDecl => {
                let t = decl.ty;
                self.arena.alloc(ExprKind::TypeRef(t), t, pos)
            }
            DeclKind::Builtin => self.arena.alloc(ExprKind::DeclRef(d), TypeId::NO_TYPE, pos),
            DeclKind::Module | DeclKind::Import => {
                let text = self.session.symbols.resolve(decl.name);
                let msg = format!("'{text}' cannot be used in an expression");
                self.error(DiagnosticKind::Type, pos, msg);
                self.poison(pos)
            }
            _ => {
                let t = self.session.model.deref(decl.ty);
                self.arena.alloc(ExprKind::DeclRef(d), t, pos)
            }
        }
    }

    /// Dispatch a parsed call: builtins through the dispatcher,
    /// everything else through formal matching.
    pub(crate) fn build_call(&mut self, callee: ExprId, mut args: Vec<ExprId>, pos: RowCol) -> ExprId {
        if let ExprKind::DeclRef(d) = self.arena.get(callee).kind {
            if let Some(b) = self.session.model.decl(d).builtin() {
                return self.builtin_call(b, &mut args, pos);
            }
        }
        self.check_call(callee, args, pos)
    }

    pub(crate) fn builtin_call(
        &mut self,
        b: Builtin,
        args: &mut Vec<ExprId>,
        pos: RowCol,
    ) -> ExprId {
        // ASSERT gets its (line, file) arguments synthesised here
        if b == Builtin::Assert && args.len() == 1 {
            let line = self.arena.alloc(
                ExprKind::Literal(ConstValue::Int(i64::from(pos.line))),
                TypeId::INT32,
                pos,
            );
            let file = self.arena.alloc(
                ExprKind::Literal(ConstValue::Str(self.path.clone())),
                TypeId::STRING_LIT,
                pos,
            );
            args.push(line);
            args.push(file);
        }
        let checked = builtins::check_args(
            &self.session.model,
            &mut self.arena,
            &mut self.session.diags,
            &self.path,
            b,
            args,
            pos,
        );
        match checked {
            Some(ret) => self.arena.alloc(
                ExprKind::BuiltinCall {
                    builtin: b,
                    args: args.clone(),
                },
                ret,
                pos,
            ),
            None => self.poison(pos),
        }
    }

    fn check_call(&mut self, callee: ExprId, mut args: Vec<ExprId>, pos: RowCol) -> ExprId {
        let callee_ty = self.arena.ty(callee);
        let callee_decl = match self.arena.get(callee).kind {
            ExprKind::DeclRef(d)
                if self.session.model.decl(d).kind == DeclKind::Procedure =>
            {
                Some(d)
            }
            _ => None,
        };
        if callee_decl.is_none()
            && !matches!(
                self.session
                    .model
                    .type_(self.session.model.deref(callee_ty))
                    .kind,
                TypeKind::Proc { .. }
            )
        {
            if callee_ty != TypeId::NO_TYPE {
                self.error(DiagnosticKind::Type, pos, "called object is not a procedure");
            }
            return self.poison(pos);
        }
        let params = eval::proc_params(&self.session.model, callee_ty, callee_decl);
        let ret = eval::proc_ret(&self.session.model, callee_ty, callee_decl);

        if args.len() != params.len() {
            let msg = format!(
                "expecting {} arguments, got {}",
                params.len(),
                args.len()
            );
            self.error(DiagnosticKind::Type, pos, msg);
            return self.poison(pos);
        }

        for (i, arg) in args.iter_mut().enumerate() {
            let p = params[i];
            let (pty, var) = {
                let pd = self.session.model.decl(p);
                (pd.ty, pd.flags.contains(DeclFlags::VAR_PARAM))
            };
            let aty = self.arena.ty(*arg);
            if aty == TypeId::NO_TYPE {
                continue;
            }
            if var {
                if !self.is_writable(*arg) {
                    let msg = format!("argument {} must be a writable designator", i + 1);
                    let apos = self.arena.get(*arg).pos;
                    self.error(DiagnosticKind::Type, apos, msg);
                } else if !eval::equal_types(&self.session.model, pty, aty) {
                    let msg = format!("argument {} has an incompatible type", i + 1);
                    let apos = self.arena.get(*arg).pos;
                    self.error(DiagnosticKind::Type, apos, msg);
                }
                continue;
            }
            // open array parameters accept any array of the same element
            if let Some((pe, 0)) = self.session.model.array_base(pty) {
                if let Some((ae, _)) = self.session.model.array_base(aty) {
                    if eval::equal_types(&self.session.model, pe, ae) {
                        continue;
                    }
                }
                if pe == TypeId::CHAR && aty == TypeId::STRING_LIT {
                    continue;
                }
            }
            let probe = if self.session.model.is_const_expr(&self.arena, *arg) {
                let mut cx = ecx!(self);
                self.ev.eval(&mut cx, &self.arena, *arg)
            } else {
                Value::runtime(aty)
            };
            if !eval::assignable(&self.session.model, pty, &probe) {
                let msg = format!("argument {} has an incompatible type", i + 1);
                let apos = self.arena.get(*arg).pos;
                self.error(DiagnosticKind::Type, apos, msg);
                continue;
            }
            let pty = self.session.model.deref(pty);
            if self.session.model.type_(pty).is_simple() {
                *arg = self.arena.auto_cast(*arg, pty);
            }
        }

        self.arena.alloc(ExprKind::Call { callee, args }, ret, pos)
    }

    /// Whether a designator may be assigned through (read-only imports
    /// and non-designators may not).
    pub(crate) fn is_writable(&self, e: ExprId) -> bool {
        match &self.arena.get(e).kind {
            ExprKind::DeclRef(d) => {
                let decl = self.session.model.decl(*d);
                match decl.kind {
                    DeclKind::LocalDecl | DeclKind::ParamDecl => true,
                    DeclKind::VarDecl => {
                        let foreign = self.session.model.enclosing_module(*d) != self.module;
                        !(foreign && decl.visi == Visibility::ReadOnly)
                    }
                    _ => false,
                }
            }
            ExprKind::Select { lhs, .. } => self.is_writable(*lhs),
            ExprKind::Index { lhs, .. } => self.is_writable(*lhs),
            ExprKind::Deref { .. } => true,
            _ => false,
        }
    }

    // ---- typing rules ----------------------------------------------------

    /// Numeric promotion for binary arithmetic (§ rules 1-2): integers
    /// promote to at least 32 bits preserving signedness, then to the
    /// wider operand; reals absorb integers; mixed signedness of equal
    /// width is a diagnostic and resolves signed.
    fn arith_type(
        &mut self,
        op: BinOp,
        lhs: &mut ExprId,
        rhs: &mut ExprId,
        pos: RowCol,
    ) -> TypeId {
        let lt = self.session.model.deref(self.arena.ty(*lhs));
        let rt = self.session.model.deref(self.arena.ty(*rhs));
        if lt == TypeId::NO_TYPE || rt == TypeId::NO_TYPE {
            return TypeId::NO_TYPE;
        }
        let (l, r) = {
            let model = &self.session.model;
            (model.type_(lt).clone(), model.type_(rt).clone())
        };

        // booleans: & and OR only
        if l.is_boolean() && r.is_boolean() {
            if matches!(op, BinOp::And | BinOp::Or) {
                return TypeId::BOOL;
            }
            self.error(DiagnosticKind::Type, pos, "operator not defined for booleans");
            return TypeId::NO_TYPE;
        }
        // sets: union, difference, intersection
        if l.is_set() && r.is_set() {
            if matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::And | BinOp::Or) {
                return TypeId::SET;
            }
            self.error(DiagnosticKind::Type, pos, "operator not defined for sets");
            return TypeId::NO_TYPE;
        }
        if !l.is_number() || !r.is_number() {
            self.error(DiagnosticKind::Type, pos, "numeric operands expected");
            return TypeId::NO_TYPE;
        }
        if matches!(op, BinOp::And | BinOp::Or) {
            self.error(DiagnosticKind::Type, pos, "logical operator on numeric operands");
            return TypeId::NO_TYPE;
        }

        // reals absorb; mixed 32/64 promotes to 64
        if l.is_real() || r.is_real() {
            if matches!(op, BinOp::IDiv | BinOp::Mod) {
                self.error(DiagnosticKind::Type, pos, "integer operator on real operands");
                return TypeId::NO_TYPE;
            }
            let target = if lt == TypeId::FLOAT32 && rt == TypeId::FLOAT32 {
                TypeId::FLOAT32
            } else {
                TypeId::FLOAT64
            };
            *lhs = self.arena.auto_cast(*lhs, target);
            *rhs = self.arena.auto_cast(*rhs, target);
            return target;
        }

        // integers: widen to >= 32 preserving signedness, then to the
        // wider operand
        let lw = self.session.model.width(lt).max(32);
        let rw = self.session.model.width(rt).max(32);
        let w = lw.max(rw);
        let (lu, ru) = (l.is_uint(), r.is_uint());
        let target = if lu && ru {
            mic_ir::AstModel::uint_type(w)
        } else {
            if lu != ru {
                self.error(
                    DiagnosticKind::Type,
                    pos,
                    "mixed signed and unsigned operands",
                );
            }
            mic_ir::AstModel::int_type(w)
        };
        *lhs = self.arena.auto_cast(*lhs, target);
        *rhs = self.arena.auto_cast(*rhs, target);
        target
    }

    fn unary_type(&mut self, op: UnOp, arg: ExprId, pos: RowCol) -> TypeId {
        let t = self.session.model.deref(self.arena.ty(arg));
        if t == TypeId::NO_TYPE {
            return TypeId::NO_TYPE;
        }
        let ty = self.session.model.type_(t).clone();
        match op {
            UnOp::Neg if ty.is_real() => t,
            UnOp::Neg if ty.is_int() => {
                mic_ir::AstModel::int_type(self.session.model.width(t).max(32))
            }
            UnOp::Neg if ty.is_uint() => {
                self.error(DiagnosticKind::Type, pos, "cannot negate an unsigned value");
                TypeId::NO_TYPE
            }
            UnOp::Not if ty.is_boolean() || ty.is_set() => t,
            _ => {
                self.error(DiagnosticKind::Type, pos, "invalid operand for unary operator");
                TypeId::NO_TYPE
            }
        }
    }

    /// Typing of relations; operands are promoted alike, the result is
    /// `BOOL`.
    fn relation_type(
        &mut self,
        op: RelOp,
        lhs: &mut ExprId,
        rhs: &mut ExprId,
        pos: RowCol,
    ) -> TypeId {
        let lt = self.session.model.deref(self.arena.ty(*lhs));
        let rt = self.session.model.deref(self.arena.ty(*rhs));
        if lt == TypeId::NO_TYPE || rt == TypeId::NO_TYPE {
            return TypeId::NO_TYPE;
        }
        if op == RelOp::In {
            let ok = self.session.model.type_(lt).is_integer()
                && self.session.model.type_(rt).is_set();
            if !ok {
                self.error(DiagnosticKind::Type, pos, "IN expects an integer and a set");
                return TypeId::NO_TYPE;
            }
            *lhs = self.arena.auto_cast(*lhs, TypeId::UINT32);
            return TypeId::BOOL;
        }

        let (l, r) = {
            let model = &self.session.model;
            (model.type_(lt).clone(), model.type_(rt).clone())
        };
        // numbers compare after the usual promotion
        if l.is_number() && r.is_number() {
            let _ = self.arith_type(BinOp::Add, lhs, rhs, pos);
            return TypeId::BOOL;
        }
        // chars, with one-char string literals adapting
        if matches!(l.kind, TypeKind::Char) || matches!(r.kind, TypeKind::Char) {
            if lt == TypeId::STRING_LIT {
                *lhs = self.arena.auto_cast(*lhs, TypeId::CHAR);
            }
            if rt == TypeId::STRING_LIT {
                *rhs = self.arena.auto_cast(*rhs, TypeId::CHAR);
            }
            let lc = self.session.model.deref(self.arena.ty(*lhs));
            let rc = self.session.model.deref(self.arena.ty(*rhs));
            if lc == TypeId::CHAR && rc == TypeId::CHAR {
                return TypeId::BOOL;
            }
        }
        // equality-only domains
        let eq_only = matches!(op, RelOp::Eq | RelOp::Neq);
        if l.is_boolean() && r.is_boolean() && eq_only {
            return TypeId::BOOL;
        }
        if l.is_set() && r.is_set() && eq_only {
            return TypeId::BOOL;
        }
        if matches!(l.kind, TypeKind::ConstEnum { .. }) && lt == rt {
            return TypeId::BOOL;
        }
        let l_ptrish = l.is_pointer() || matches!(l.kind, TypeKind::Nil | TypeKind::Proc { .. });
        let r_ptrish = r.is_pointer() || matches!(r.kind, TypeKind::Nil | TypeKind::Proc { .. });
        if l_ptrish && r_ptrish && eq_only {
            return TypeId::BOOL;
        }
        self.error(DiagnosticKind::Type, pos, "operands cannot be compared");
        TypeId::NO_TYPE
    }

    // ---- constant expressions -------------------------------------------

    /// Parse and fold a constant expression. `None` when it is not
    /// constant or folding failed (diagnostics already out).
    pub(crate) fn const_expression(&mut self, hint: Option<TypeId>) -> Option<(Value, ExprId)> {
        let e = self.expression(hint);
        let pos = self.arena.get(e).pos;
        if self.arena.ty(e) == TypeId::NO_TYPE {
            return None;
        }
        if !self.session.model.is_const_expr(&self.arena, e) {
            self.error(DiagnosticKind::Const, pos, "constant expression expected");
            return None;
        }
        let v = {
            let mut cx = ecx!(self);
            self.ev.eval(&mut cx, &self.arena, e)
        };
        if v.is_none() {
            return None;
        }
        Some((v, e))
    }
}
