//! Renderer strategy.
//!
//! The emitter talks to a [`MilRenderer`]; what happens to the module is
//! the renderer's business. [`InMemRenderer`] assembles `MilModule`
//! trees for later passes, [`IlAsmRenderer`] writes the textual
//! exchange format. A native backend plugs in behind the same trait.

use crate::module::MilAggKind;
use crate::{
    MilConst, MilField, MilItem, MilModule, MilOp, MilProcedure, MilQuali, MilTypeDefKind,
};
use std::io::Write;

/// Capability set the emitter (and `MilModule::render`) drives.
pub trait MilRenderer {
    fn begin_module(&mut self, name: &str, source: &str);
    fn end_module(&mut self);
    fn add_import(&mut self, path: &str);
    fn add_variable(&mut self, ty: &MilQuali, name: &str, public: bool);
    fn add_const(&mut self, ty: &MilQuali, name: &str, value: MilConst, public: bool);
    fn begin_type(&mut self, name: &str, public: bool, kind: MilAggKind);
    fn add_field(&mut self, name: &str, ty: &MilQuali, public: bool);
    fn end_type(&mut self);
    /// Non-aggregate type definitions (pointer, array, alias, enum,
    /// procedure type).
    fn add_type(&mut self, name: &str, public: bool, kind: MilTypeDefKind);
    fn add_procedure(&mut self, proc: MilProcedure);
}

// ---- in-memory ----------------------------------------------------------

/// Builds `MilModule` trees.
#[derive(Debug, Default)]
pub struct InMemRenderer {
    modules: Vec<MilModule>,
    current: Option<MilModule>,
    open_type: Option<(String, bool, MilAggKind, Vec<MilField>)>,
}

impl InMemRenderer {
    pub fn new() -> Self {
        InMemRenderer::default()
    }

    /// Finished modules, in emission order.
    pub fn take_modules(&mut self) -> Vec<MilModule> {
        debug_assert!(self.current.is_none(), "take_modules inside open module");
        std::mem::take(&mut self.modules)
    }

    fn module(&mut self) -> &mut MilModule {
        self.current.as_mut().expect("no open module")
    }
}

impl MilRenderer for InMemRenderer {
    fn begin_module(&mut self, name: &str, source: &str) {
        debug_assert!(self.current.is_none(), "nested module");
        self.current = Some(MilModule {
            name: name.to_string(),
            source: source.to_string(),
            ..MilModule::default()
        });
    }

    fn end_module(&mut self) {
        let m = self.current.take().expect("end_module without begin");
        self.modules.push(m);
    }

    fn add_import(&mut self, path: &str) {
        self.module().imports.push(path.to_string());
    }

    fn add_variable(&mut self, ty: &MilQuali, name: &str, public: bool) {
        let item = MilItem::Var {
            name: name.to_string(),
            ty: ty.clone(),
            public,
        };
        self.module().items.push(item);
    }

    fn add_const(&mut self, ty: &MilQuali, name: &str, value: MilConst, public: bool) {
        let item = MilItem::Const {
            name: name.to_string(),
            ty: ty.clone(),
            value,
            public,
        };
        self.module().items.push(item);
    }

    fn begin_type(&mut self, name: &str, public: bool, kind: MilAggKind) {
        debug_assert!(self.open_type.is_none(), "nested begin_type");
        self.open_type = Some((name.to_string(), public, kind, Vec::new()));
    }

    fn add_field(&mut self, name: &str, ty: &MilQuali, public: bool) {
        let open = self.open_type.as_mut().expect("add_field outside type");
        open.3.push(MilField {
            name: name.to_string(),
            ty: ty.clone(),
            public,
        });
    }

    fn end_type(&mut self) {
        let (name, public, kind, fields) = self.open_type.take().expect("end_type without begin");
        let kind = match kind {
            MilAggKind::Struct => MilTypeDefKind::Struct { fields },
            MilAggKind::Union => MilTypeDefKind::Union { fields },
            MilAggKind::Object => MilTypeDefKind::Object { fields },
        };
        self.module().items.push(MilItem::Type { name, public, kind });
    }

    fn add_type(&mut self, name: &str, public: bool, kind: MilTypeDefKind) {
        let item = MilItem::Type {
            name: name.to_string(),
            public,
            kind,
        };
        self.module().items.push(item);
    }

    fn add_procedure(&mut self, proc: MilProcedure) {
        self.module().items.push(MilItem::Proc(proc));
    }
}

// ---- textual ------------------------------------------------------------

/// Writes the whitespace-delimited textual IR.
pub struct IlAsmRenderer<W: Write> {
    out: W,
    indent: usize,
    open_module: Option<String>,
}

impl<W: Write> IlAsmRenderer<W> {
    pub fn new(out: W) -> Self {
        IlAsmRenderer {
            out,
            indent: 0,
            open_module: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        let _ = writeln!(self.out, "{:indent$}{text}", "", indent = self.indent * 2);
    }

    fn pub_mark(public: bool) -> &'static str {
        if public {
            "*"
        } else {
            ""
        }
    }

    fn render_ops(&mut self, proc: &MilProcedure) {
        for op in &proc.body {
            match op {
                MilOp::Then | MilOp::Else | MilOp::Do | MilOp::Case(_) | MilOp::Finally => {
                    self.indent = self.indent.saturating_sub(1);
                }
                MilOp::End => self.indent = self.indent.saturating_sub(1),
                _ => {}
            }
            let text = render_op(op, proc);
            self.line(&text);
            match op {
                MilOp::If
                | MilOp::While
                | MilOp::Loop
                | MilOp::Switch
                | MilOp::Then
                | MilOp::Else
                | MilOp::Do
                | MilOp::Case(_)
                | MilOp::Finally => self.indent += 1,
                _ => {}
            }
        }
    }
}

fn render_const_list(items: &[i64]) -> String {
    items
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn local_name(proc: &MilProcedure, idx: u32) -> String {
    proc.locals
        .get(idx as usize)
        .map(|l| l.name.clone())
        .unwrap_or_else(|| idx.to_string())
}

fn arg_name(proc: &MilProcedure, idx: u32) -> String {
    proc.params
        .get(idx as usize)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| idx.to_string())
}

fn render_op(op: &MilOp, proc: &MilProcedure) -> String {
    match op {
        MilOp::Add => "add".into(),
        MilOp::Sub => "sub".into(),
        MilOp::Mul => "mul".into(),
        MilOp::Div => "div".into(),
        MilOp::Rem => "rem".into(),
        MilOp::Neg => "neg".into(),
        MilOp::And => "and".into(),
        MilOp::Or => "or".into(),
        MilOp::Xor => "xor".into(),
        MilOp::Not => "not".into(),
        MilOp::Shl => "shl".into(),
        MilOp::Shr => "shr".into(),
        MilOp::Sar => "sar".into(),
        MilOp::Ceq => "ceq".into(),
        MilOp::Cgt => "cgt".into(),
        MilOp::Clt => "clt".into(),
        MilOp::LdcI4(v) => format!("ldc_i4 {v}"),
        MilOp::LdcI8(v) => format!("ldc_i8 {v}"),
        MilOp::LdcR4(v) => format!("ldc_r4 {v}"),
        MilOp::LdcR8(v) => format!("ldc_r8 {v}"),
        MilOp::LdStr(s) => format!("ldstr \"{s}\""),
        MilOp::LdNull => "ldnull".into(),
        MilOp::LdLoc(i) => format!("ldloc {}", local_name(proc, *i)),
        MilOp::StLoc(i) => format!("stloc {}", local_name(proc, *i)),
        MilOp::LdLocA(i) => format!("ldlocaddr {}", local_name(proc, *i)),
        MilOp::LdArg(i) => format!("ldarg {}", arg_name(proc, *i)),
        MilOp::StArg(i) => format!("starg {}", arg_name(proc, *i)),
        MilOp::LdArgA(i) => format!("ldargaddr {}", arg_name(proc, *i)),
        MilOp::LdVar(q) => format!("ldvar {q}"),
        MilOp::StVar(q) => format!("stvar {q}"),
        MilOp::LdVarA(q) => format!("ldvaraddr {q}"),
        MilOp::LdFld(q) => format!("ldfld {q}"),
        MilOp::StFld(q) => format!("stfld {q}"),
        MilOp::LdFldA(q) => format!("ldfldaddr {q}"),
        MilOp::LdInd(s) => format!("ldind {s}"),
        MilOp::StInd(s) => format!("stind {s}"),
        MilOp::LdElem(q) => format!("ldelem {q}"),
        MilOp::StElem(q) => format!("stelem {q}"),
        MilOp::LdElemA(q) => format!("ldelemaddr {q}"),
        MilOp::NewObj(q) => format!("newobj {q}"),
        MilOp::NewArr(q) => format!("newarr {q}"),
        MilOp::Free => "free".into(),
        MilOp::PtrOff(q) => format!("ptroff {q}"),
        MilOp::LdProc(q) => format!("ldproc {q}"),
        MilOp::CallI { args, .. } => format!("calli {args}"),
        MilOp::Conv(s) => format!("conv {s}"),
        MilOp::Dup => "dup".into(),
        MilOp::Pop => "pop".into(),
        MilOp::If => "if".into(),
        MilOp::Then => "then".into(),
        MilOp::Else => "else".into(),
        MilOp::While => "while".into(),
        MilOp::Do => "do".into(),
        MilOp::Loop => "loop".into(),
        MilOp::Switch => "switch".into(),
        MilOp::Case(labels) => format!("case {}", render_const_list(labels)),
        MilOp::End => "end".into(),
        MilOp::Exit => "exit".into(),
        MilOp::Label(l) => format!("label {l}"),
        MilOp::Goto(l) => format!("goto {l}"),
        MilOp::Call { callee, .. } => format!("call {callee}"),
        MilOp::Ret { .. } => "ret".into(),
        MilOp::Finally => "finally".into(),
    }
}

impl<W: Write> MilRenderer for IlAsmRenderer<W> {
    fn begin_module(&mut self, name: &str, source: &str) {
        if source.is_empty() {
            self.line(&format!("module {name}"));
        } else {
            self.line(&format!("module {name} // {source}"));
        }
        self.open_module = Some(name.to_string());
        self.indent += 1;
    }

    fn end_module(&mut self) {
        self.indent -= 1;
        let name = self.open_module.take().unwrap_or_default();
        self.line(&format!("end module {name}"));
    }

    fn add_import(&mut self, path: &str) {
        self.line(&format!("import {path}"));
    }

    fn add_variable(&mut self, ty: &MilQuali, name: &str, public: bool) {
        let mark = Self::pub_mark(public);
        self.line(&format!("var {name}{mark}: {ty}"));
    }

    fn add_const(&mut self, ty: &MilQuali, name: &str, value: MilConst, public: bool) {
        let mark = Self::pub_mark(public);
        self.line(&format!("const {name}{mark}: {ty} = {value}"));
    }

    fn begin_type(&mut self, name: &str, public: bool, kind: MilAggKind) {
        let mark = Self::pub_mark(public);
        let tag = match kind {
            MilAggKind::Struct => "struct",
            MilAggKind::Union => "union",
            MilAggKind::Object => "object",
        };
        self.line(&format!("type {name}{mark} = {tag}"));
        self.indent += 1;
    }

    fn add_field(&mut self, name: &str, ty: &MilQuali, public: bool) {
        let mark = Self::pub_mark(public);
        self.line(&format!("field {name}{mark}: {ty}"));
    }

    fn end_type(&mut self) {
        self.indent -= 1;
        self.line("end");
    }

    fn add_type(&mut self, name: &str, public: bool, kind: MilTypeDefKind) {
        let mark = Self::pub_mark(public);
        let body = match &kind {
            MilTypeDefKind::Pointer { base } => format!("pointer to {base}"),
            MilTypeDefKind::Array { base, len } => {
                if *len == 0 {
                    format!("array of {base}")
                } else {
                    format!("array {len} of {base}")
                }
            }
            MilTypeDefKind::Alias { base } => base.to_string(),
            MilTypeDefKind::Enum { members } => format!("enum {}", members.join(" ")),
            MilTypeDefKind::ProcType { params, ret } => {
                let params = params
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                match ret {
                    Some(r) => format!("proc ({params}): {r}"),
                    None => format!("proc ({params})"),
                }
            }
            _ => unreachable!("aggregates go through begin_type"),
        };
        self.line(&format!("type {name}{mark} = {body}"));
    }

    fn add_procedure(&mut self, proc: MilProcedure) {
        let mark = Self::pub_mark(proc.public);
        let params = proc
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty))
            .collect::<Vec<_>>()
            .join("; ");
        let head = match (&proc.ret, proc.kind) {
            (Some(r), _) => format!("proc {}{mark}({params}): {r}", proc.name),
            (None, crate::MilProcKind::ModuleInit) => format!("proc {}{mark}() init", proc.name),
            (None, crate::MilProcKind::Extern) => format!("proc {}{mark}({params}) extern", proc.name),
            (None, _) => format!("proc {}{mark}({params})", proc.name),
        };
        self.line(&head);
        self.indent += 1;
        for local in &proc.locals {
            let text = format!("local {}: {}", local.name, local.ty);
            self.line(&text);
        }
        if proc.kind != crate::MilProcKind::Extern {
            self.line("begin");
            self.indent += 1;
            self.render_ops(&proc);
            self.indent -= 1;
            self.line("end");
        }
        self.indent -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MilProcKind;
    use crate::MilSize;

    #[test]
    fn test_inmem_collects_items() {
        let mut r = InMemRenderer::new();
        r.begin_module("M", "M.mic");
        r.add_variable(&MilQuali::plain("uint8"), "a", false);
        r.begin_type("R", true, MilAggKind::Struct);
        r.add_field("x", &MilQuali::qualified("M", "P"), true);
        r.end_type();
        r.end_module();
        let modules = r.take_modules();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name, "M");
        assert_eq!(modules[0].items.len(), 2);
    }

    #[test]
    fn test_text_renderer_ops() {
        let mut proc = MilProcedure::new("f", MilProcKind::Normal);
        proc.locals.push(crate::MilLocal {
            name: "i".into(),
            ty: MilQuali::plain("int32"),
        });
        proc.body = vec![
            MilOp::LdLocA(0),
            MilOp::Dup,
            MilOp::LdInd(MilSize::I4),
            MilOp::LdcI4(2),
            MilOp::Add,
            MilOp::StInd(MilSize::I4),
        ];
        let mut r = IlAsmRenderer::new(Vec::new());
        r.begin_module("M", "");
        r.add_procedure(proc);
        r.end_module();
        let text = String::from_utf8(r.into_inner()).unwrap();
        for needle in [
            "ldlocaddr i",
            "dup",
            "ldind I4",
            "ldc_i4 2",
            "add",
            "stind I4",
        ] {
            assert!(text.contains(needle), "missing {needle} in:\n{text}");
        }
    }

    #[test]
    fn test_replay_matches_stream() {
        let mut inmem = InMemRenderer::new();
        inmem.begin_module("M", "");
        inmem.add_import("B");
        inmem.add_const(&MilQuali::plain("int32"), "c", MilConst::Int(42), false);
        inmem.end_module();
        let modules = inmem.take_modules();

        let mut text = IlAsmRenderer::new(Vec::new());
        modules[0].render(&mut text);
        let out = String::from_utf8(text.into_inner()).unwrap();
        assert!(out.contains("module M"));
        assert!(out.contains("import B"));
        assert!(out.contains("const c: int32 = 42"));
    }
}
