//! Statements and structured control flow.
//!
//! Statements parse their expressions into trees first, then drive the
//! evaluator and emitter, so address computations, operand code and
//! store opcodes come out in stack order.

use super::{ecx, Parser};
use crate::eval::{self, mil_size_of};
use mic_diagnostic::DiagnosticKind;
use mic_ir::{
    DeclFlags, DeclId, DeclKind, ExprId, ExprKind, RowCol, TokenKind, TypeId, TypeKind, Value,
    ValueMode,
};
use rustc_hash::FxHashSet;

/// Tokens that can follow a statement; used to spot a missing
/// expression after RETURN.
const STMT_END: &[TokenKind] = &[
    TokenKind::Semi,
    TokenKind::End,
    TokenKind::Else,
    TokenKind::Elsif,
    TokenKind::Until,
    TokenKind::Bar,
    TokenKind::Finally,
    TokenKind::Eof,
];

impl<'a> Parser<'a> {
    pub(crate) fn statement_sequence(&mut self, terminators: &[TokenKind]) {
        loop {
            while self.accept(TokenKind::Semi) {}
            if terminators.contains(&self.la.kind) || self.at(TokenKind::Eof) {
                break;
            }
            let before = (self.la.kind, self.la.pos);
            self.statement();
            // recovery must make progress; skip a token the statement
            // parser refused to touch
            if (self.la.kind, self.la.pos) == before && !terminators.contains(&self.la.kind) {
                self.next();
            }
        }
    }

    fn statement(&mut self) {
        match self.la.kind {
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::Repeat => self.repeat_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Loop => self.loop_statement(),
            TokenKind::Case => self.case_statement(),
            TokenKind::Exit => self.exit_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::Goto => self.goto_statement(),
            TokenKind::Ident => {
                if self.peek2().kind == TokenKind::Colon {
                    // statement label
                    self.next();
                    let name = self.cur.ident();
                    let pos = self.cur.pos;
                    self.next(); // ':'
                    self.define_label(name, pos);
                    let text = self.session.symbols.resolve(name).to_string();
                    self.out.label_(&text);
                } else {
                    self.assignment_or_call();
                }
            }
            _ => {
                let pos = self.la.pos;
                let msg = format!("unexpected {} in statement", self.la.kind.describe());
                self.error(DiagnosticKind::Syntax, pos, msg);
                self.sync_stmt();
            }
        }
    }

    // ---- assignment and calls -------------------------------------------

    fn assignment_or_call(&mut self) {
        let lhs = self.designator();
        if self.accept(TokenKind::Assign) {
            let pos = self.cur.pos;
            let target = self.arena.ty(lhs);
            let rhs = self.expression(Some(target));
            self.emit_assign(lhs, rhs, pos);
        } else {
            self.emit_call_statement(lhs);
        }
    }

    /// Check assignment compatibility and bring the value to the exact
    /// target type on the IR stack. Widened intermediates narrow back
    /// with an explicit `conv`.
    fn assign_value(&mut self, target: TypeId, v: &mut Value, pos: RowCol) {
        let ok = eval::assignable(&self.session.model, target, v);
        let same_int_class = {
            let model = &self.session.model;
            let l = model.type_(model.deref(target)).clone();
            let r = model.type_(model.deref(v.ty)).clone();
            (l.is_int() && r.is_int()) || (l.is_uint() && r.is_uint())
        };
        if !ok && !(same_int_class && v.mode == ValueMode::Val) {
            if target != TypeId::NO_TYPE && v.ty != TypeId::NO_TYPE && !v.is_none() {
                self.error(DiagnosticKind::Type, pos, "incompatible assignment");
            }
            return;
        }
        let mut cx = ecx!(self);
        self.ev.coerce_to(&mut cx, v, target);
        self.ev.push_mil_stack(&mut cx, v, pos);
    }

    fn emit_assign(&mut self, lhs: ExprId, rhs: ExprId, pos: RowCol) {
        let target = self.arena.ty(lhs);
        if target == TypeId::NO_TYPE {
            // still evaluate for diagnostics inside the rhs
            let mut cx = ecx!(self);
            let _ = self.ev.eval(&mut cx, &self.arena, rhs);
            return;
        }
        if !self.is_writable(lhs) {
            self.error(DiagnosticKind::Scope, pos, "cannot assign to this designator");
            return;
        }
        let lhs_kind = self.arena.get(lhs).kind.clone();
        match lhs_kind {
            ExprKind::DeclRef(d) => self.assign_to_decl(d, target, rhs, pos),
            ExprKind::Select { lhs: rec, field } => {
                {
                    let mut cx = ecx!(self);
                    self.ev.eval_addr(&mut cx, &self.arena, rec);
                }
                let mut v = {
                    let mut cx = ecx!(self);
                    self.ev.eval(&mut cx, &self.arena, rhs)
                };
                self.assign_value(target, &mut v, pos);
                let q = {
                    let cx = ecx!(self);
                    cx.decl_quali(field)
                };
                self.out.stfld_(q);
            }
            ExprKind::Index { lhs: arr, index } => {
                {
                    let mut cx = ecx!(self);
                    self.ev.eval_addr(&mut cx, &self.arena, arr);
                    let mut idx = self.ev.eval(&mut cx, &self.arena, index);
                    self.ev.push_mil_stack(&mut cx, &mut idx, pos);
                }
                let mut v = {
                    let mut cx = ecx!(self);
                    self.ev.eval(&mut cx, &self.arena, rhs)
                };
                self.assign_value(target, &mut v, pos);
                let q = {
                    let cx = ecx!(self);
                    cx.type_quali(target)
                };
                self.out.stelem_(q);
            }
            ExprKind::Deref { lhs: ptr } => {
                {
                    let mut cx = ecx!(self);
                    let mut p = self.ev.eval(&mut cx, &self.arena, ptr);
                    self.ev.push_mil_stack(&mut cx, &mut p, pos);
                }
                let mut v = {
                    let mut cx = ecx!(self);
                    self.ev.eval(&mut cx, &self.arena, rhs)
                };
                self.assign_value(target, &mut v, pos);
                let size = mil_size_of(&self.session.model, target);
                self.out.stind_(size);
            }
            _ => {
                self.error(DiagnosticKind::Type, pos, "cannot assign to this expression");
            }
        }
    }

    fn assign_to_decl(&mut self, d: DeclId, target: TypeId, rhs: ExprId, pos: RowCol) {
        let (kind, slot, var_param) = {
            let decl = self.session.model.decl(d);
            (
                decl.kind,
                decl.slot(),
                decl.flags.contains(DeclFlags::VAR_PARAM),
            )
        };
        match kind {
            DeclKind::LocalDecl => {
                let mut v = {
                    let mut cx = ecx!(self);
                    self.ev.eval(&mut cx, &self.arena, rhs)
                };
                self.assign_value(target, &mut v, pos);
                self.out.stloc_(slot);
            }
            DeclKind::ParamDecl if !var_param => {
                let mut v = {
                    let mut cx = ecx!(self);
                    self.ev.eval(&mut cx, &self.arena, rhs)
                };
                self.assign_value(target, &mut v, pos);
                self.out.starg_(slot);
            }
            DeclKind::ParamDecl => {
                // VAR parameter: store through the passed address
                self.out.ldarg_(slot);
                let mut v = {
                    let mut cx = ecx!(self);
                    self.ev.eval(&mut cx, &self.arena, rhs)
                };
                self.assign_value(target, &mut v, pos);
                let size = mil_size_of(&self.session.model, target);
                self.out.stind_(size);
            }
            DeclKind::VarDecl => {
                let mut v = {
                    let mut cx = ecx!(self);
                    self.ev.eval(&mut cx, &self.arena, rhs)
                };
                self.assign_value(target, &mut v, pos);
                let q = {
                    let cx = ecx!(self);
                    cx.decl_quali(d)
                };
                self.out.stvar_(q);
            }
            _ => {
                self.error(DiagnosticKind::Type, pos, "cannot assign to this designator");
            }
        }
    }

    fn emit_call_statement(&mut self, e: ExprId) {
        let pos = self.arena.get(e).pos;
        let kind = self.arena.get(e).kind.clone();
        match kind {
            ExprKind::Call { .. } => {
                let v = {
                    let mut cx = ecx!(self);
                    self.ev.eval(&mut cx, &self.arena, e)
                };
                if v.ty != TypeId::NO_TYPE {
                    // discarded function result
                    self.out.pop_();
                }
            }
            ExprKind::BuiltinCall { builtin, .. } => {
                if !builtin.is_procedure() {
                    self.error(
                        DiagnosticKind::Type,
                        pos,
                        "function call cannot be used as a statement",
                    );
                    return;
                }
                let mut cx = ecx!(self);
                let _ = self.ev.eval(&mut cx, &self.arena, e);
            }
            ExprKind::DeclRef(d) => {
                let dk = self.session.model.decl(d).kind;
                match dk {
                    DeclKind::Procedure => {
                        // parameterless call without parentheses
                        let call = self.check_call_stmt(e, pos);
                        if let Some(call) = call {
                            self.emit_call_statement(call);
                        }
                    }
                    DeclKind::Builtin => {
                        let b = self.session.model.decl(d).builtin().expect("builtin decl");
                        let mut args = Vec::new();
                        let node = self.builtin_call(b, &mut args, pos);
                        if self.arena.ty(node) != TypeId::NO_TYPE
                            || matches!(self.arena.get(node).kind, ExprKind::BuiltinCall { .. })
                        {
                            self.emit_call_statement(node);
                        }
                    }
                    _ => {
                        if self.arena.ty(e) != TypeId::NO_TYPE {
                            self.error(DiagnosticKind::Syntax, pos, "expression is not a statement");
                        }
                    }
                }
            }
            ExprKind::Literal(_) if self.arena.ty(e) == TypeId::NO_TYPE => {
                // poisoned designator; already reported
            }
            _ => {
                self.error(DiagnosticKind::Syntax, pos, "expression is not a statement");
            }
        }
    }

    /// Wrap a bare procedure reference into a zero-argument call.
    fn check_call_stmt(&mut self, callee: ExprId, pos: RowCol) -> Option<ExprId> {
        let node = self.build_call(callee, Vec::new(), pos);
        (self.arena.ty(node) != TypeId::NO_TYPE
            || matches!(self.arena.get(node).kind, ExprKind::Call { .. }))
        .then_some(node)
    }

    // ---- conditions ------------------------------------------------------

    /// Parse, check and materialise a boolean condition.
    fn condition(&mut self) {
        let e = self.expression(Some(TypeId::BOOL));
        let t = self.session.model.deref(self.arena.ty(e));
        if t != TypeId::NO_TYPE && t != TypeId::BOOL {
            let pos = self.arena.get(e).pos;
            self.error(DiagnosticKind::Type, pos, "boolean expression expected");
        }
        let pos = self.arena.get(e).pos;
        let mut cx = ecx!(self);
        let mut v = self.ev.eval(&mut cx, &self.arena, e);
        self.ev.push_mil_stack(&mut cx, &mut v, pos);
    }

    // ---- structured statements ------------------------------------------

    fn if_statement(&mut self) {
        self.expect(TokenKind::If, "if statement");
        self.out.if_();
        self.condition();
        self.expect(TokenKind::Then, "if statement");
        self.out.then_();
        self.enter_block();
        self.statement_sequence(&[TokenKind::Elsif, TokenKind::Else, TokenKind::End]);
        self.leave_block();
        let mut ends = 1;
        while self.accept(TokenKind::Elsif) {
            self.out.else_();
            self.out.if_();
            self.condition();
            self.expect(TokenKind::Then, "if statement");
            self.out.then_();
            self.enter_block();
            self.statement_sequence(&[TokenKind::Elsif, TokenKind::Else, TokenKind::End]);
            self.leave_block();
            ends += 1;
        }
        if self.accept(TokenKind::Else) {
            self.out.else_();
            self.enter_block();
            self.statement_sequence(&[TokenKind::End]);
            self.leave_block();
        }
        self.expect(TokenKind::End, "if statement");
        for _ in 0..ends {
            self.out.end_();
        }
    }

    fn while_statement(&mut self) {
        self.expect(TokenKind::While, "while statement");
        self.out.while_();
        self.condition();
        self.expect(TokenKind::Do, "while statement");
        self.out.do_();
        self.loop_depth += 1;
        self.enter_block();
        self.statement_sequence(&[TokenKind::End]);
        self.leave_block();
        self.loop_depth -= 1;
        self.expect(TokenKind::End, "while statement");
        self.out.end_();
    }

    /// REPEAT lowers onto `loop` with a conditional `exit` at the end.
    fn repeat_statement(&mut self) {
        self.expect(TokenKind::Repeat, "repeat statement");
        self.out.loop_();
        self.loop_depth += 1;
        self.enter_block();
        self.statement_sequence(&[TokenKind::Until]);
        self.leave_block();
        self.expect(TokenKind::Until, "repeat statement");
        self.condition();
        self.out.if_();
        self.out.then_();
        self.out.exit_();
        self.out.end_();
        self.loop_depth -= 1;
        self.out.end_();
    }

    fn loop_statement(&mut self) {
        self.expect(TokenKind::Loop, "loop statement");
        self.out.loop_();
        self.loop_depth += 1;
        self.enter_block();
        self.statement_sequence(&[TokenKind::End]);
        self.leave_block();
        self.loop_depth -= 1;
        self.expect(TokenKind::End, "loop statement");
        self.out.end_();
    }

    fn exit_statement(&mut self) {
        self.expect(TokenKind::Exit, "exit statement");
        let pos = self.cur.pos;
        if self.loop_depth == 0 {
            self.error(DiagnosticKind::Syntax, pos, "EXIT outside of a loop");
            return;
        }
        self.out.exit_();
    }

    /// `FOR ident ':=' lo TO hi [BY const] DO seq END`, lowered to a
    /// `while` with a compiler temp holding the limit.
    fn for_statement(&mut self) {
        self.expect(TokenKind::For, "for statement");
        if !self.expect(TokenKind::Ident, "for statement") {
            self.sync_stmt();
            return;
        }
        let name = self.cur.ident();
        let pos = self.cur.pos;
        let ctrl = self.find_decl(name).filter(|&d| {
            matches!(
                self.session.model.decl(d).kind,
                DeclKind::LocalDecl | DeclKind::VarDecl | DeclKind::ParamDecl
            )
        });
        let Some(ctrl) = ctrl else {
            let text = self.session.symbols.resolve(name);
            let msg = format!("undefined control variable '{text}'");
            self.error(DiagnosticKind::Scope, pos, msg);
            self.sync_stmt();
            return;
        };
        let ctrl_decl = self.session.model.decl(ctrl);
        let ty = self.session.model.deref(ctrl_decl.ty);
        if ctrl_decl.flags.contains(DeclFlags::VAR_PARAM) {
            self.error(
                DiagnosticKind::Type,
                pos,
                "a VAR parameter cannot be a FOR control variable",
            );
            self.sync_stmt();
            return;
        }
        if !self.session.model.type_(ty).is_integer() {
            self.error(DiagnosticKind::Type, pos, "FOR control variable must be an integer");
        }
        let wide = self.session.model.width(ty) > 32;

        self.expect(TokenKind::Assign, "for statement");
        let lo = self.expression(Some(ty));
        let mut v = {
            let mut cx = ecx!(self);
            self.ev.eval(&mut cx, &self.arena, lo)
        };
        self.assign_value(ty, &mut v, pos);
        self.store_decl(ctrl);

        self.expect(TokenKind::To, "for statement");
        let hi = self.expression(Some(ty));
        self.ev.temps += 1;
        let tmp = {
            let q = {
                let cx = ecx!(self);
                cx.type_quali(ty)
            };
            self.out.add_local(&format!("$for{}", self.ev.temps), q)
        };
        let mut limit = {
            let mut cx = ecx!(self);
            self.ev.eval(&mut cx, &self.arena, hi)
        };
        self.assign_value(ty, &mut limit, pos);
        self.out.stloc_(tmp);

        let step = if self.accept(TokenKind::By) {
            match self.const_expression(Some(TypeId::INT32)) {
                Some((v, _)) => {
                    let s = v.val.as_i64().unwrap_or(0);
                    if s == 0 {
                        self.error(DiagnosticKind::Const, self.cur.pos, "FOR step must not be zero");
                        1
                    } else {
                        s
                    }
                }
                None => 1,
            }
        } else {
            1
        };
        self.expect(TokenKind::Do, "for statement");

        self.out.while_();
        self.load_decl(ctrl);
        self.out.ldloc_(tmp);
        if step > 0 {
            self.out.cgt_();
        } else {
            self.out.clt_();
        }
        self.out.ldc_i4(0);
        self.out.ceq_();
        self.out.do_();
        self.loop_depth += 1;
        self.enter_block();
        self.statement_sequence(&[TokenKind::End]);
        self.leave_block();
        self.loop_depth -= 1;
        // advance the control variable
        self.load_decl(ctrl);
        if wide {
            self.out.ldc_i8(step);
        } else {
            self.out.ldc_i4(step as i32);
        }
        self.out.add_();
        self.store_decl(ctrl);
        self.out.end_();
        self.expect(TokenKind::End, "for statement");
    }

    /// `CASE expr OF labels ':' seq {'|' ...} [ELSE seq] END`
    fn case_statement(&mut self) {
        self.expect(TokenKind::Case, "case statement");
        let e = self.expression(None);
        let t = self.session.model.deref(self.arena.ty(e));
        let valid = t == TypeId::NO_TYPE
            || self.session.model.type_(t).is_integer()
            || t == TypeId::CHAR
            || matches!(self.session.model.type_(t).kind, TypeKind::ConstEnum { .. });
        if !valid {
            let pos = self.arena.get(e).pos;
            self.error(
                DiagnosticKind::Type,
                pos,
                "CASE selector must be an integer, character or enumeration",
            );
        }
        self.expect(TokenKind::Of, "case statement");

        self.out.switch_();
        {
            let pos = self.arena.get(e).pos;
            let mut cx = ecx!(self);
            let mut v = self.ev.eval(&mut cx, &self.arena, e);
            self.ev.push_mil_stack(&mut cx, &mut v, pos);
        }

        let mut seen: FxHashSet<i64> = FxHashSet::default();
        loop {
            // cases may be empty
            if self.at(TokenKind::Ident)
                || self.at(TokenKind::IntLit)
                || self.at(TokenKind::HexLit)
                || self.at(TokenKind::CharLit)
                || self.at(TokenKind::Minus)
            {
                let labels = self.case_labels(&mut seen);
                self.expect(TokenKind::Colon, "case");
                self.out.case_(labels);
                self.enter_block();
                self.statement_sequence(&[TokenKind::Bar, TokenKind::Else, TokenKind::End]);
                self.leave_block();
            }
            if !self.accept(TokenKind::Bar) {
                break;
            }
        }
        if self.accept(TokenKind::Else) {
            self.out.else_();
            self.enter_block();
            self.statement_sequence(&[TokenKind::End]);
            self.leave_block();
        }
        self.expect(TokenKind::End, "case statement");
        self.out.end_();
    }

    /// `labelRange {',' labelRange}` with duplicate detection.
    fn case_labels(&mut self, seen: &mut FxHashSet<i64>) -> Vec<i64> {
        let mut labels = Vec::new();
        loop {
            let lo = self.case_label();
            let hi = if self.accept(TokenKind::DotDot) {
                self.case_label()
            } else {
                lo
            };
            if let (Some(lo), Some(hi)) = (lo, hi) {
                if lo > hi {
                    self.error(DiagnosticKind::Const, self.cur.pos, "empty case label range");
                }
                for v in lo..=hi.max(lo) {
                    if !seen.insert(v) {
                        self.error(
                            DiagnosticKind::Type,
                            self.cur.pos,
                            format!("duplicate case label {v}"),
                        );
                    }
                    labels.push(v);
                }
            }
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        labels
    }

    fn case_label(&mut self) -> Option<i64> {
        let (v, _) = self.const_expression(None)?;
        match v.val.as_i64() {
            Some(i) => Some(i),
            None => {
                self.error(
                    DiagnosticKind::Type,
                    self.cur.pos,
                    "case label must be an integer, character or enumeration constant",
                );
                None
            }
        }
    }

    fn return_statement(&mut self) {
        self.expect(TokenKind::Return, "return statement");
        let pos = self.cur.pos;
        if self.in_finally {
            self.error(
                DiagnosticKind::Syntax,
                pos,
                "RETURN is not allowed inside FINALLY",
            );
        }
        let ret_ty = self.proc_ret.last().copied().unwrap_or(TypeId::NO_TYPE);
        let has_expr = !STMT_END.contains(&self.la.kind);
        if has_expr {
            let e = self.expression(Some(ret_ty));
            if ret_ty == TypeId::NO_TYPE {
                self.error(DiagnosticKind::Type, pos, "procedure returns no value");
            }
            let mut v = {
                let mut cx = ecx!(self);
                self.ev.eval(&mut cx, &self.arena, e)
            };
            self.assign_value(ret_ty, &mut v, pos);
            self.out.ret_(true);
        } else {
            if ret_ty != TypeId::NO_TYPE {
                self.error(DiagnosticKind::Type, pos, "missing return value");
            }
            self.out.ret_(false);
        }
    }

    fn goto_statement(&mut self) {
        self.expect(TokenKind::Goto, "goto statement");
        if !self.expect(TokenKind::Ident, "goto statement") {
            return;
        }
        let name = self.cur.ident();
        let pos = self.cur.pos;
        self.record_goto(name, pos);
        let text = self.session.symbols.resolve(name).to_string();
        self.out.goto_(&text);
    }

    // ---- decl load/store helpers ----------------------------------------

    fn load_decl(&mut self, d: DeclId) {
        let (kind, slot, var_param, ty) = {
            let decl = self.session.model.decl(d);
            (
                decl.kind,
                decl.slot(),
                decl.flags.contains(DeclFlags::VAR_PARAM),
                decl.ty,
            )
        };
        match kind {
            DeclKind::LocalDecl => self.out.ldloc_(slot),
            DeclKind::ParamDecl => {
                self.out.ldarg_(slot);
                if var_param {
                    let size = mil_size_of(&self.session.model, ty);
                    self.out.ldind_(size);
                }
            }
            DeclKind::VarDecl => {
                let q = {
                    let cx = ecx!(self);
                    cx.decl_quali(d)
                };
                self.out.ldvar_(q);
            }
            _ => {}
        }
    }

    fn store_decl(&mut self, d: DeclId) {
        let (kind, slot) = {
            let decl = self.session.model.decl(d);
            (decl.kind, decl.slot())
        };
        match kind {
            DeclKind::LocalDecl => self.out.stloc_(slot),
            DeclKind::ParamDecl => self.out.starg_(slot),
            DeclKind::VarDecl => {
                let q = {
                    let cx = ecx!(self);
                    cx.decl_quali(d)
                };
                self.out.stvar_(q);
            }
            _ => {}
        }
    }
}
