//! The MIL emitter.
//!
//! A thin, checked shell over a [`MilRenderer`]: module framing and
//! declarations are forwarded, procedure bodies are buffered into a
//! [`MilProcedure`] and handed over on `end_proc`. The emitter enforces
//! the structural invariants:
//!
//! - every opcode is emitted inside an open procedure,
//! - structured blocks nest properly and close in LIFO order,
//! - `exit` only occurs inside a loop block,
//! - `finally` starts at block depth zero, once.
//!
//! Violations are compiler bugs and trip debug assertions.

use crate::module::MilAggKind;
use crate::{
    MilConst, MilLocal, MilOp, MilProcKind, MilProcedure, MilQuali, MilRenderer, MilSize,
    MilTypeDefKind,
};
use smallvec::SmallVec;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Block {
    If { seen_then: bool, seen_else: bool },
    While { seen_do: bool },
    Loop,
    Switch { seen_else: bool },
}

pub struct MilEmitter<'r> {
    out: &'r mut dyn MilRenderer,
    module_open: bool,
    proc: Option<MilProcedure>,
    blocks: SmallVec<[Block; 8]>,
    in_finally: bool,
}

impl<'r> MilEmitter<'r> {
    pub fn new(out: &'r mut dyn MilRenderer) -> Self {
        MilEmitter {
            out,
            module_open: false,
            proc: None,
            blocks: SmallVec::new(),
            in_finally: false,
        }
    }

    // ---- module framing -------------------------------------------------

    pub fn begin_module(&mut self, name: &str, source: &str) {
        debug_assert!(!self.module_open, "nested module");
        self.module_open = true;
        self.out.begin_module(name, source);
    }

    pub fn end_module(&mut self) {
        debug_assert!(self.module_open && self.proc.is_none());
        self.module_open = false;
        self.out.end_module();
    }

    pub fn add_import(&mut self, path: &str) {
        debug_assert!(self.module_open && self.proc.is_none());
        self.out.add_import(path);
    }

    pub fn add_variable(&mut self, ty: &MilQuali, name: &str, public: bool) {
        debug_assert!(self.module_open && self.proc.is_none());
        self.out.add_variable(ty, name, public);
    }

    pub fn add_const(&mut self, ty: &MilQuali, name: &str, value: MilConst, public: bool) {
        debug_assert!(self.module_open && self.proc.is_none());
        self.out.add_const(ty, name, value, public);
    }

    pub fn begin_type(&mut self, name: &str, public: bool, kind: MilAggKind) {
        debug_assert!(self.module_open && self.proc.is_none());
        self.out.begin_type(name, public, kind);
    }

    pub fn add_field(&mut self, name: &str, ty: &MilQuali, public: bool) {
        self.out.add_field(name, ty, public);
    }

    pub fn end_type(&mut self) {
        self.out.end_type();
    }

    pub fn add_type(&mut self, name: &str, public: bool, kind: MilTypeDefKind) {
        debug_assert!(self.module_open && self.proc.is_none());
        self.out.add_type(name, public, kind);
    }

    // ---- procedures -----------------------------------------------------

    pub fn begin_proc(&mut self, name: &str, public: bool, kind: MilProcKind) {
        debug_assert!(self.module_open, "procedure outside module");
        debug_assert!(self.proc.is_none(), "nested procedure emission");
        let mut p = MilProcedure::new(name, kind);
        p.public = public;
        self.proc = Some(p);
        self.in_finally = false;
    }

    pub fn set_return(&mut self, ty: MilQuali) {
        self.proc_mut().ret = Some(ty);
    }

    pub fn add_param(&mut self, name: &str, ty: MilQuali) -> u32 {
        let p = self.proc_mut();
        debug_assert!(p.body.is_empty(), "parameter after body start");
        p.params.push(MilLocal {
            name: name.to_string(),
            ty,
        });
        (p.params.len() - 1) as u32
    }

    pub fn add_local(&mut self, name: &str, ty: MilQuali) -> u32 {
        let p = self.proc_mut();
        p.locals.push(MilLocal {
            name: name.to_string(),
            ty,
        });
        (p.locals.len() - 1) as u32
    }

    pub fn end_proc(&mut self) {
        debug_assert!(self.blocks.is_empty(), "unclosed block at end of procedure");
        let p = self.proc.take().expect("end_proc without begin_proc");
        self.out.add_procedure(p);
    }

    /// Whether a procedure body is currently open.
    pub fn in_proc(&self) -> bool {
        self.proc.is_some()
    }

    fn proc_mut(&mut self) -> &mut MilProcedure {
        self.proc.as_mut().expect("no open procedure")
    }

    fn op(&mut self, op: MilOp) {
        debug_assert!(self.proc.is_some(), "opcode outside procedure");
        self.proc_mut().body.push(op);
    }

    // ---- arithmetic -----------------------------------------------------

    pub fn add_(&mut self) {
        self.op(MilOp::Add);
    }

    pub fn sub_(&mut self) {
        self.op(MilOp::Sub);
    }

    pub fn mul_(&mut self) {
        self.op(MilOp::Mul);
    }

    pub fn div_(&mut self) {
        self.op(MilOp::Div);
    }

    pub fn rem_(&mut self) {
        self.op(MilOp::Rem);
    }

    pub fn neg_(&mut self) {
        self.op(MilOp::Neg);
    }

    pub fn and_(&mut self) {
        self.op(MilOp::And);
    }

    pub fn or_(&mut self) {
        self.op(MilOp::Or);
    }

    pub fn xor_(&mut self) {
        self.op(MilOp::Xor);
    }

    pub fn not_(&mut self) {
        self.op(MilOp::Not);
    }

    pub fn shl_(&mut self) {
        self.op(MilOp::Shl);
    }

    pub fn shr_(&mut self) {
        self.op(MilOp::Shr);
    }

    pub fn sar_(&mut self) {
        self.op(MilOp::Sar);
    }

    pub fn ceq_(&mut self) {
        self.op(MilOp::Ceq);
    }

    pub fn cgt_(&mut self) {
        self.op(MilOp::Cgt);
    }

    pub fn clt_(&mut self) {
        self.op(MilOp::Clt);
    }

    // ---- constants ------------------------------------------------------

    pub fn ldc_i4(&mut self, v: i32) {
        self.op(MilOp::LdcI4(v));
    }

    pub fn ldc_i8(&mut self, v: i64) {
        self.op(MilOp::LdcI8(v));
    }

    pub fn ldc_r4(&mut self, v: f32) {
        self.op(MilOp::LdcR4(v));
    }

    pub fn ldc_r8(&mut self, v: f64) {
        self.op(MilOp::LdcR8(v));
    }

    pub fn ldstr_(&mut self, s: &str) {
        self.op(MilOp::LdStr(s.to_string()));
    }

    pub fn ldnull_(&mut self) {
        self.op(MilOp::LdNull);
    }

    // ---- memory ---------------------------------------------------------

    pub fn ldloc_(&mut self, i: u32) {
        self.op(MilOp::LdLoc(i));
    }

    pub fn stloc_(&mut self, i: u32) {
        self.op(MilOp::StLoc(i));
    }

    pub fn ldloca_(&mut self, i: u32) {
        self.op(MilOp::LdLocA(i));
    }

    pub fn ldarg_(&mut self, i: u32) {
        self.op(MilOp::LdArg(i));
    }

    pub fn starg_(&mut self, i: u32) {
        self.op(MilOp::StArg(i));
    }

    pub fn ldarga_(&mut self, i: u32) {
        self.op(MilOp::LdArgA(i));
    }

    pub fn ldvar_(&mut self, q: MilQuali) {
        self.op(MilOp::LdVar(q));
    }

    pub fn stvar_(&mut self, q: MilQuali) {
        self.op(MilOp::StVar(q));
    }

    pub fn ldvara_(&mut self, q: MilQuali) {
        self.op(MilOp::LdVarA(q));
    }

    pub fn ldfld_(&mut self, q: MilQuali) {
        self.op(MilOp::LdFld(q));
    }

    pub fn stfld_(&mut self, q: MilQuali) {
        self.op(MilOp::StFld(q));
    }

    pub fn ldflda_(&mut self, q: MilQuali) {
        self.op(MilOp::LdFldA(q));
    }

    pub fn ldind_(&mut self, s: MilSize) {
        self.op(MilOp::LdInd(s));
    }

    pub fn stind_(&mut self, s: MilSize) {
        self.op(MilOp::StInd(s));
    }

    pub fn ldelem_(&mut self, q: MilQuali) {
        self.op(MilOp::LdElem(q));
    }

    pub fn stelem_(&mut self, q: MilQuali) {
        self.op(MilOp::StElem(q));
    }

    pub fn ldelema_(&mut self, q: MilQuali) {
        self.op(MilOp::LdElemA(q));
    }

    pub fn newobj_(&mut self, q: MilQuali) {
        self.op(MilOp::NewObj(q));
    }

    pub fn newarr_(&mut self, q: MilQuali) {
        self.op(MilOp::NewArr(q));
    }

    pub fn free_(&mut self) {
        self.op(MilOp::Free);
    }

    pub fn ptroff_(&mut self, q: MilQuali) {
        self.op(MilOp::PtrOff(q));
    }

    pub fn ldproc_(&mut self, q: MilQuali) {
        self.op(MilOp::LdProc(q));
    }

    pub fn calli_(&mut self, args: u32, has_ret: bool) {
        self.op(MilOp::CallI { args, has_ret });
    }

    pub fn conv_(&mut self, s: MilSize) {
        self.op(MilOp::Conv(s));
    }

    pub fn dup_(&mut self) {
        self.op(MilOp::Dup);
    }

    pub fn pop_(&mut self) {
        self.op(MilOp::Pop);
    }

    // ---- structured control ---------------------------------------------

    pub fn if_(&mut self) {
        self.blocks.push(Block::If {
            seen_then: false,
            seen_else: false,
        });
        self.op(MilOp::If);
    }

    pub fn then_(&mut self) {
        match self.blocks.last_mut() {
            Some(Block::If { seen_then, .. }) if !*seen_then => *seen_then = true,
            other => debug_assert!(false, "then outside if: {other:?}"),
        }
        self.op(MilOp::Then);
    }

    pub fn else_(&mut self) {
        match self.blocks.last_mut() {
            Some(Block::If {
                seen_then: true,
                seen_else,
            }) if !*seen_else => *seen_else = true,
            Some(Block::Switch { seen_else }) if !*seen_else => *seen_else = true,
            other => debug_assert!(false, "else outside if/switch: {other:?}"),
        }
        self.op(MilOp::Else);
    }

    pub fn while_(&mut self) {
        self.blocks.push(Block::While { seen_do: false });
        self.op(MilOp::While);
    }

    pub fn do_(&mut self) {
        match self.blocks.last_mut() {
            Some(Block::While { seen_do }) if !*seen_do => *seen_do = true,
            other => debug_assert!(false, "do outside while: {other:?}"),
        }
        self.op(MilOp::Do);
    }

    pub fn loop_(&mut self) {
        self.blocks.push(Block::Loop);
        self.op(MilOp::Loop);
    }

    pub fn switch_(&mut self) {
        self.blocks.push(Block::Switch { seen_else: false });
        self.op(MilOp::Switch);
    }

    pub fn case_(&mut self, labels: Vec<i64>) {
        debug_assert!(
            matches!(self.blocks.last(), Some(Block::Switch { seen_else: false })),
            "case outside switch"
        );
        self.op(MilOp::Case(labels));
    }

    pub fn exit_(&mut self) {
        debug_assert!(
            self.blocks
                .iter()
                .any(|b| matches!(b, Block::Loop | Block::While { .. })),
            "exit outside loop"
        );
        self.op(MilOp::Exit);
    }

    pub fn end_(&mut self) {
        let block = self.blocks.pop();
        match block {
            Some(Block::If { seen_then, .. }) => {
                debug_assert!(seen_then, "if block closed without then")
            }
            Some(Block::While { seen_do }) => {
                debug_assert!(seen_do, "while block closed without do")
            }
            Some(Block::Loop | Block::Switch { .. }) => {}
            None => debug_assert!(false, "end without open block"),
        }
        self.op(MilOp::End);
    }

    pub fn label_(&mut self, name: &str) {
        self.op(MilOp::Label(name.to_string()));
    }

    pub fn goto_(&mut self, name: &str) {
        self.op(MilOp::Goto(name.to_string()));
    }

    pub fn call_(&mut self, callee: MilQuali, args: u32, has_ret: bool) {
        self.op(MilOp::Call {
            callee,
            args,
            has_ret,
        });
    }

    pub fn ret_(&mut self, has_val: bool) {
        self.op(MilOp::Ret { has_val });
    }

    pub fn finally_(&mut self) {
        debug_assert!(
            self.blocks.is_empty() && !self.in_finally,
            "finally inside block or repeated"
        );
        self.in_finally = true;
        self.op(MilOp::Finally);
    }

    /// Whether the emitter is inside the finally section.
    pub fn in_finally(&self) -> bool {
        self.in_finally
    }

    /// Current structured-block depth; used by tests and the parser's
    /// goto bookkeeping.
    pub fn block_depth(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemRenderer, MilItem};

    /// Renderer that mirrors begin/end calls onto a shadow stack, so
    /// tests can prove the emitter's pairing discipline.
    #[derive(Default)]
    struct ShadowRenderer {
        stack: Vec<&'static str>,
        max_depth: usize,
        procedures: usize,
    }

    impl MilRenderer for ShadowRenderer {
        fn begin_module(&mut self, _: &str, _: &str) {
            self.stack.push("module");
            self.max_depth = self.max_depth.max(self.stack.len());
        }
        fn end_module(&mut self) {
            assert_eq!(self.stack.pop(), Some("module"));
        }
        fn add_import(&mut self, _: &str) {}
        fn add_variable(&mut self, _: &MilQuali, _: &str, _: bool) {
            assert_eq!(self.stack.last(), Some(&"module"));
        }
        fn add_const(&mut self, _: &MilQuali, _: &str, _: MilConst, _: bool) {}
        fn begin_type(&mut self, _: &str, _: bool, _: MilAggKind) {
            self.stack.push("type");
        }
        fn add_field(&mut self, _: &str, _: &MilQuali, _: bool) {
            assert_eq!(self.stack.last(), Some(&"type"));
        }
        fn end_type(&mut self) {
            assert_eq!(self.stack.pop(), Some("type"));
        }
        fn add_type(&mut self, _: &str, _: bool, _: MilTypeDefKind) {}
        fn add_procedure(&mut self, _: MilProcedure) {
            assert_eq!(self.stack.last(), Some(&"module"));
            self.procedures += 1;
        }
    }

    #[test]
    fn test_shadow_stack_balance() {
        let mut shadow = ShadowRenderer::default();
        let mut e = MilEmitter::new(&mut shadow);
        e.begin_module("M", "");
        e.begin_type("R", false, MilAggKind::Struct);
        e.add_field("x", &MilQuali::plain("int32"), false);
        e.end_type();
        e.begin_proc("f", false, MilProcKind::Normal);
        e.ret_(false);
        e.end_proc();
        e.end_module();
        assert!(shadow.stack.is_empty());
        assert_eq!(shadow.procedures, 1);
    }

    #[test]
    fn test_structured_blocks_lifo() {
        let mut r = InMemRenderer::new();
        let mut e = MilEmitter::new(&mut r);
        e.begin_module("M", "");
        e.begin_proc("f", false, MilProcKind::Normal);
        e.if_();
        e.ldc_i4(1);
        e.then_();
        e.while_();
        e.ldc_i4(0);
        e.do_();
        e.exit_();
        e.end_(); // while
        e.else_();
        e.end_(); // if
        assert_eq!(e.block_depth(), 0);
        e.end_proc();
        e.end_module();
        let modules = r.take_modules();
        let MilItem::Proc(p) = &modules[0].items[0] else {
            panic!("expected proc");
        };
        let ends = p.body.iter().filter(|op| matches!(op, MilOp::End)).count();
        assert_eq!(ends, 2);
    }

    #[test]
    #[should_panic(expected = "unclosed block")]
    #[cfg(debug_assertions)]
    fn test_unclosed_block_trips() {
        let mut r = InMemRenderer::new();
        let mut e = MilEmitter::new(&mut r);
        e.begin_module("M", "");
        e.begin_proc("f", false, MilProcKind::Normal);
        e.if_();
        e.end_proc();
    }

    #[test]
    fn test_locals_get_stable_ids() {
        let mut r = InMemRenderer::new();
        let mut e = MilEmitter::new(&mut r);
        e.begin_module("M", "");
        e.begin_proc("f", false, MilProcKind::Normal);
        assert_eq!(e.add_param("a", MilQuali::plain("int32")), 0);
        assert_eq!(e.add_param("b", MilQuali::plain("int32")), 1);
        assert_eq!(e.add_local("t", MilQuali::plain("int32")), 0);
        e.end_proc();
        e.end_module();
    }
}
