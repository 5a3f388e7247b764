//! The compile-time evaluator.
//!
//! Walks typed expression trees, folding constant subtrees and emitting
//! MIL for everything else. Constants ride along as [`Value`]s and are
//! only materialised (`ldc_*`) right before an operation that needs
//! them on the IR operand stack, so folding is exact and emission order
//! matches evaluation order.
//!
//! Folding uses wrap-around semantics at the result width so compile
//! time agrees with the runtime bit for bit; division by zero at fold
//! time is a hard `CONST` error. Floating folds use IEEE-754 double and
//! never trap.

use crate::builtins;
use mic_diagnostic::{DiagnosticKind, DiagnosticSink};
use mic_ir::{
    AstModel, BinOp, ConstValue, DeclFlags, DeclId, DeclKind, ExprArena, ExprId, ExprKind, RelOp,
    RowCol, Symbols, TypeId, TypeKind, UnOp, Value, ValueMode,
};
use mic_mil::{MilEmitter, MilQuali, MilSize};

/// Everything an evaluation step needs besides the evaluator itself.
/// Built by the parser from disjoint borrows of its own fields.
pub(crate) struct EvalCx<'a, 'e> {
    pub model: &'a mut AstModel,
    pub symbols: &'a Symbols,
    pub diags: &'a mut DiagnosticSink,
    pub out: &'a mut MilEmitter<'e>,
    pub path: &'a str,
    /// The module being compiled; `None` only in unit tests.
    pub module: Option<DeclId>,
}

impl<'a, 'e> EvalCx<'a, 'e> {
    pub fn error(&mut self, kind: DiagnosticKind, pos: RowCol, msg: impl Into<String>) {
        self.diags.error(kind, self.path, pos.line, pos.col, msg);
    }

    /// MIL name of a module declaration (source name plus any
    /// instantiation suffix recorded by the import manager).
    pub fn module_mil_name(&self, module: DeclId) -> String {
        let d = self.model.decl(module);
        let mut name = self.symbols.resolve(d.name).to_string();
        if let mic_ir::DeclData::Module { suffix } = &d.data {
            name.push_str(suffix);
        }
        name
    }

    /// MIL reference for a declaration: plain inside the current
    /// module, `Module.name` across modules; fields qualify with their
    /// record type's name.
    pub fn decl_quali(&self, d: DeclId) -> MilQuali {
        let decl = self.model.decl(d);
        if decl.kind == DeclKind::Field {
            if let Some(owner) = decl.outer {
                return MilQuali::qualified(
                    self.symbols.resolve(self.model.decl(owner).name).to_string(),
                    self.symbols.resolve(decl.name).to_string(),
                );
            }
        }
        let name = decl_mil_name(self.model, self.symbols, d);
        match self.model.enclosing_module(d) {
            Some(m) if Some(m) != self.module => {
                MilQuali::qualified(self.module_mil_name(m), name)
            }
            _ => MilQuali::plain(name),
        }
    }

    /// MIL type reference. Basic types map to their lowercase MIL
    /// names; named types are qualified like declarations; unresolved
    /// same-module forward references go out by name.
    pub fn type_quali(&self, t: TypeId) -> MilQuali {
        let t = self.model.deref(t);
        let ty = self.model.type_(t);
        if let TypeKind::NameRef { quali, .. } = &ty.kind {
            // unresolved, known-to-come: refer by source name
            return match quali.module {
                Some(m) => MilQuali::qualified(
                    self.symbols.resolve(m).to_string(),
                    self.symbols.resolve(quali.name).to_string(),
                ),
                None => MilQuali::plain(self.symbols.resolve(quali.name).to_string()),
            };
        }
        if ty.is_basic() {
            return MilQuali::plain(basic_mil_name(t));
        }
        match ty.decl {
            Some(d) => self.decl_quali(d),
            None => MilQuali::plain("$anon"),
        }
    }
}

/// MIL name of a declaration; nested procedures flatten to
/// `outer$inner`.
pub(crate) fn decl_mil_name(model: &AstModel, symbols: &Symbols, d: DeclId) -> String {
    let decl = model.decl(d);
    let mut name = symbols.resolve(decl.name).to_string();
    if decl.kind == DeclKind::Procedure {
        let mut outer = decl.outer;
        while let Some(o) = outer {
            let od = model.decl(o);
            if od.kind != DeclKind::Procedure {
                break;
            }
            name = format!("{}${}", symbols.resolve(od.name), name);
            outer = od.outer;
        }
    }
    name
}

/// Lowercase MIL name of a basic type.
pub(crate) fn basic_mil_name(t: TypeId) -> &'static str {
    match t {
        TypeId::BOOL => "bool",
        TypeId::CHAR => "char",
        TypeId::INT8 => "int8",
        TypeId::INT16 => "int16",
        TypeId::INT32 => "int32",
        TypeId::INT64 => "int64",
        TypeId::UINT8 => "uint8",
        TypeId::UINT16 => "uint16",
        TypeId::UINT32 => "uint32",
        TypeId::UINT64 => "uint64",
        TypeId::FLOAT32 => "float32",
        TypeId::FLOAT64 => "float64",
        TypeId::INTPTR => "intptr",
        TypeId::DBLINTPTR => "dblintptr",
        TypeId::SET => "set",
        TypeId::STRING_LIT => "str",
        TypeId::BYTE_ARRAY_LIT => "bytes",
        TypeId::NIL => "nil",
        TypeId::ANY => "any",
        _ => "void",
    }
}

/// Operand size used by `conv`, `ldind`/`stind` and element access.
pub(crate) fn mil_size_of(model: &AstModel, t: TypeId) -> MilSize {
    let t = model.deref(t);
    match model.type_(t).kind {
        TypeKind::Int8 => MilSize::I1,
        TypeKind::Int16 => MilSize::I2,
        TypeKind::Int32 => MilSize::I4,
        TypeKind::Int64 => MilSize::I8,
        TypeKind::Uint8 | TypeKind::Char | TypeKind::Bool => MilSize::U1,
        TypeKind::Uint16 => MilSize::U2,
        TypeKind::Uint32 | TypeKind::Set => MilSize::U4,
        TypeKind::Uint64 => MilSize::U8,
        TypeKind::Float32 => MilSize::R4,
        TypeKind::Float64 => MilSize::R8,
        TypeKind::ConstEnum { .. } => MilSize::I4,
        TypeKind::IntPtr
        | TypeKind::DblIntPtr
        | TypeKind::Pointer { .. }
        | TypeKind::Proc { .. } => MilSize::IntPtr,
        _ => MilSize::I4,
    }
}

// ---- structural type equality -------------------------------------------

/// Structural equality, used only where the data model allows it:
/// procedure signature compatibility and literal/array matching.
pub(crate) fn equal_types(model: &AstModel, a: TypeId, b: TypeId) -> bool {
    let a = model.deref(a);
    let b = model.deref(b);
    if a == b {
        return true;
    }
    match (&model.type_(a).kind, &model.type_(b).kind) {
        (TypeKind::Pointer { base: ab }, TypeKind::Pointer { base: bb }) => {
            equal_types(model, *ab, *bb)
        }
        (
            TypeKind::Array { base: ab, len: al },
            TypeKind::Array { base: bb, len: bl },
        ) => al == bl && equal_types(model, *ab, *bb),
        (
            TypeKind::Proc {
                params: ap,
                ret: ar,
            },
            TypeKind::Proc {
                params: bp,
                ret: br,
            },
        ) => match_formals(model, ap, bp) && equal_types(model, *ar, *br),
        _ => false,
    }
}

/// Parameter-list compatibility: arity, modes and types (structural).
pub(crate) fn match_formals(model: &AstModel, a: &[DeclId], b: &[DeclId]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).all(|(&pa, &pb)| {
        let da = model.decl(pa);
        let db = model.decl(pb);
        da.flags.contains(DeclFlags::VAR_PARAM) == db.flags.contains(DeclFlags::VAR_PARAM)
            && equal_types(model, da.ty, db.ty)
    })
}

/// Parameter declarations of a procedure declaration or procedure type.
pub(crate) fn proc_params(model: &AstModel, callee_ty: TypeId, callee_decl: Option<DeclId>) -> Vec<DeclId> {
    if let Some(d) = callee_decl {
        let decl = model.decl(d);
        if decl.kind == DeclKind::Procedure {
            return decl
                .members
                .iter()
                .copied()
                .filter(|&m| model.decl(m).kind == DeclKind::ParamDecl)
                .collect();
        }
    }
    match &model.type_(model.deref(callee_ty)).kind {
        TypeKind::Proc { params, .. } => params.clone(),
        _ => Vec::new(),
    }
}

/// Return type of a procedure declaration or procedure type.
pub(crate) fn proc_ret(model: &AstModel, callee_ty: TypeId, callee_decl: Option<DeclId>) -> TypeId {
    if let Some(d) = callee_decl {
        let decl = model.decl(d);
        if decl.kind == DeclKind::Procedure {
            return decl.ty;
        }
    }
    match model.type_(model.deref(callee_ty)).kind {
        TypeKind::Proc { ret, .. } => ret,
        _ => TypeId::NO_TYPE,
    }
}

// ---- assignment compatibility --------------------------------------------

/// Whether a constant value fits the numeric range of `target`.
pub(crate) fn fits(model: &AstModel, target: TypeId, val: &ConstValue) -> bool {
    let t = model.deref(target);
    let ty = model.type_(t);
    if ty.is_real() {
        return val.as_f64().is_some();
    }
    let w = model.width(t);
    if ty.is_uint() {
        return match val.as_u64() {
            Some(v) => w >= 64 || v <= (1u64 << w) - 1,
            None => false,
        };
    }
    if ty.is_int() {
        return match val.as_i64() {
            Some(v) => {
                w >= 64 || ((-(1i64 << (w - 1)))..(1i64 << (w - 1))).contains(&v)
            }
            None => false,
        };
    }
    if matches!(ty.kind, TypeKind::Char) {
        return matches!(val.as_u64(), Some(v) if v <= 255);
    }
    false
}

/// Assignment compatibility of a value to a target type.
///
/// Poisoned operands (`NoType`) are always compatible so one error does
/// not cascade.
pub(crate) fn assignable(model: &AstModel, lhs: TypeId, rhs: &Value) -> bool {
    if lhs == TypeId::NO_TYPE || rhs.ty == TypeId::NO_TYPE || rhs.is_none() {
        return true;
    }
    let l = model.deref(lhs);
    let r = model.deref(rhs.ty);
    if l == r {
        return true;
    }
    let lt = model.type_(l);
    let rt = model.type_(r);

    if lt.is_number() && rt.is_number() {
        let same_class =
            (lt.is_int() && rt.is_int()) || (lt.is_uint() && rt.is_uint()) || (lt.is_real() && rt.is_real());
        if same_class && model.width(r) <= model.width(l) {
            return true;
        }
        if rhs.is_const() && fits(model, l, &rhs.val) {
            return true;
        }
        return false;
    }
    // single-char string literal into CHAR
    if matches!(lt.kind, TypeKind::Char) {
        if let ConstValue::Str(s) = &rhs.val {
            return s.len() == 1;
        }
        return false;
    }
    // string literal into char array (terminator included)
    if let Some(len) = model.char_array(l) {
        if model.pointer_base(l).is_none() {
            if let ConstValue::Str(s) = &rhs.val {
                return len == 0 || (s.len() as u32) < len;
            }
        }
    }
    // byte-array literal into array of uint8
    if let Some((base, len)) = model.array_base(l) {
        if base == TypeId::UINT8 {
            if let ConstValue::Bytes(b) = &rhs.val {
                return len == 0 || b.len() as u32 <= len;
            }
        }
    }
    // pointers
    if let TypeKind::Pointer { base: lb } = lt.kind {
        if matches!(rt.kind, TypeKind::Nil) {
            return true;
        }
        if let TypeKind::Pointer { base: rb } = rt.kind {
            let lb = model.deref(lb);
            let rb = model.deref(rb);
            if lb == rb {
                return true;
            }
            // pointer to open array from pointer to fixed array
            if let (Some((le, 0)), Some((re, _))) =
                (model.array_base(lb), model.array_base(rb))
            {
                return equal_types(model, le, re);
            }
        }
        return false;
    }
    if matches!(lt.kind, TypeKind::IntPtr) {
        return rt.is_pointer() || matches!(rt.kind, TypeKind::Nil | TypeKind::Proc { .. });
    }
    // procedure types
    if let TypeKind::Proc {
        params: lp,
        ret: lr,
    } = &lt.kind
    {
        if matches!(rt.kind, TypeKind::Nil) {
            return true;
        }
        if rhs.mode == ValueMode::ProcRef {
            if let ConstValue::Enum(d, _) = rhs.val {
                let rp = proc_params(model, rhs.ty, Some(d));
                let rr = proc_ret(model, rhs.ty, Some(d));
                return match_formals(model, lp, &rp) && equal_types(model, *lr, rr);
            }
        }
        if let TypeKind::Proc {
            params: rp,
            ret: rr,
        } = &rt.kind
        {
            return match_formals(model, lp, rp) && equal_types(model, *lr, *rr);
        }
        return false;
    }
    // const-enum member into its enum type
    if matches!(lt.kind, TypeKind::ConstEnum { .. }) {
        if let ConstValue::Enum(member, _) = rhs.val {
            return model.deref(model.decl(member).ty) == l;
        }
        return false;
    }
    false
}

// ---- constant folding ----------------------------------------------------

/// Wrap a signed value to `width` bits.
pub(crate) fn wrap_i(v: i64, width: u32) -> i64 {
    if width >= 64 {
        return v;
    }
    let shift = 64 - width;
    (v << shift) >> shift
}

/// Wrap an unsigned value to `width` bits.
pub(crate) fn wrap_u(v: u64, width: u32) -> u64 {
    if width >= 64 {
        return v;
    }
    v & ((1u64 << width) - 1)
}

fn fold_binary(
    model: &AstModel,
    op: BinOp,
    ty: TypeId,
    lhs: &Value,
    rhs: &Value,
) -> Result<ConstValue, String> {
    let t = model.deref(ty);
    let kind = &model.type_(t).kind;
    match kind {
        TypeKind::Float32 | TypeKind::Float64 => {
            let a = lhs.val.as_f64().ok_or("numeric operand expected")?;
            let b = rhs.val.as_f64().ok_or("numeric operand expected")?;
            let r = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::FDiv => a / b,
                _ => return Err("operator not defined for real operands".into()),
            };
            Ok(ConstValue::Real(r))
        }
        TypeKind::Set => {
            let a = lhs.val.as_u64().ok_or("set operand expected")? as u32;
            let b = rhs.val.as_u64().ok_or("set operand expected")? as u32;
            let r = match op {
                BinOp::Add | BinOp::Or => a | b,
                BinOp::Mul | BinOp::And => a & b,
                BinOp::Sub => a & !b,
                _ => return Err("operator not defined for set operands".into()),
            };
            Ok(ConstValue::Set(r))
        }
        TypeKind::Bool => {
            let (ConstValue::Bool(a), ConstValue::Bool(b)) = (&lhs.val, &rhs.val) else {
                return Err("boolean operands expected".into());
            };
            let r = match op {
                BinOp::And => *a && *b,
                BinOp::Or => *a || *b,
                _ => return Err("operator not defined for boolean operands".into()),
            };
            Ok(ConstValue::Bool(r))
        }
        k if matches!(
            k,
            TypeKind::Uint8 | TypeKind::Uint16 | TypeKind::Uint32 | TypeKind::Uint64
        ) =>
        {
            let w = model.width(t);
            let a = lhs.val.as_u64().ok_or("unsigned operand expected")?;
            let b = rhs.val.as_u64().ok_or("unsigned operand expected")?;
            let r = match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::FDiv | BinOp::IDiv => {
                    if b == 0 {
                        return Err("division by zero".into());
                    }
                    a / b
                }
                BinOp::Mod => {
                    if b == 0 {
                        return Err("division by zero".into());
                    }
                    a % b
                }
                _ => return Err("operator not defined for integer operands".into()),
            };
            Ok(ConstValue::UInt(wrap_u(r, w)))
        }
        _ => {
            let w = model.width(t).max(32);
            let a = lhs.val.as_i64().ok_or("integer operand expected")?;
            let b = rhs.val.as_i64().ok_or("integer operand expected")?;
            let r = match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::FDiv | BinOp::IDiv => {
                    if b == 0 {
                        return Err("division by zero".into());
                    }
                    a.wrapping_div(b)
                }
                BinOp::Mod => {
                    if b == 0 {
                        return Err("division by zero".into());
                    }
                    a.wrapping_rem(b)
                }
                _ => return Err("operator not defined for integer operands".into()),
            };
            Ok(ConstValue::Int(wrap_i(r, w)))
        }
    }
}

fn fold_relation(model: &AstModel, op: RelOp, lhs: &Value, rhs: &Value) -> Result<bool, String> {
    if op == RelOp::In {
        let bit = lhs.val.as_u64().ok_or("integer element expected")?;
        let set = rhs.val.as_u64().ok_or("set operand expected")?;
        if bit > 31 {
            return Err("set element out of range 0..31".into());
        }
        return Ok(set & (1 << bit) != 0);
    }
    let lt = model.type_(model.deref(lhs.ty));
    let ord = if lt.is_real() {
        let a = lhs.val.as_f64().ok_or("numeric operand expected")?;
        let b = rhs.val.as_f64().ok_or("numeric operand expected")?;
        a.partial_cmp(&b)
    } else if lt.is_uint() || lt.is_set() {
        Some(
            lhs.val
                .as_u64()
                .ok_or("constant operand expected")?
                .cmp(&rhs.val.as_u64().ok_or("constant operand expected")?),
        )
    } else if let (Some(a), Some(b)) = (lhs.val.as_i64(), rhs.val.as_i64()) {
        Some(a.cmp(&b))
    } else {
        // nil = nil, bool = bool
        match (&lhs.val, &rhs.val) {
            (ConstValue::Nil, ConstValue::Nil) => Some(std::cmp::Ordering::Equal),
            (ConstValue::Bool(a), ConstValue::Bool(b)) => Some(a.cmp(b)),
            _ => return Err("constant operands expected".into()),
        }
    };
    let Some(ord) = ord else {
        // NaN comparisons
        return Ok(matches!(op, RelOp::Neq));
    };
    Ok(match op {
        RelOp::Eq => ord.is_eq(),
        RelOp::Neq => !ord.is_eq(),
        RelOp::Lt => ord.is_lt(),
        RelOp::Leq => ord.is_le(),
        RelOp::Gt => ord.is_gt(),
        RelOp::Geq => ord.is_ge(),
        RelOp::In => unreachable!(),
    })
}

// ---- the evaluator -------------------------------------------------------

/// Compile-time operand stack plus the tree-walking logic.
#[derive(Default)]
pub struct Evaluator {
    pub stack: Vec<Value>,
    /// Counter for compiler-synthesised temp locals.
    pub(crate) temps: u32,
}

impl Evaluator {
    pub fn new() -> Self {
        Evaluator::default()
    }

    pub fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    pub fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or_else(Value::none)
    }

    // ---- materialisation ------------------------------------------------

    /// Emit a constant onto the IR operand stack and demote the value to
    /// `Val`. No-op for anything already runtime.
    pub(crate) fn push_mil_stack(&mut self, cx: &mut EvalCx, v: &mut Value, pos: RowCol) {
        if v.mode == ValueMode::ProcRef {
            if let ConstValue::Enum(d, _) = v.val {
                let q = cx.decl_quali(d);
                cx.out.ldproc_(q);
            }
            v.mode = ValueMode::Val;
            v.val = ConstValue::None;
            return;
        }
        if !v.is_const() {
            return;
        }
        let t = cx.model.deref(v.ty);
        let wide = cx.model.width(t) > 32;
        match &v.val {
            ConstValue::Int(i) => {
                if wide {
                    cx.out.ldc_i8(*i);
                } else {
                    cx.out.ldc_i4(*i as i32);
                }
            }
            ConstValue::UInt(u) => {
                if wide {
                    cx.out.ldc_i8(*u as i64);
                } else {
                    cx.out.ldc_i4(*u as u32 as i32);
                }
            }
            ConstValue::Real(r) => {
                if t == TypeId::FLOAT32 {
                    cx.out.ldc_r4(*r as f32);
                } else {
                    cx.out.ldc_r8(*r);
                }
            }
            ConstValue::Bool(b) => cx.out.ldc_i4(i32::from(*b)),
            ConstValue::Char(c) => cx.out.ldc_i4(i32::from(*c)),
            ConstValue::Set(s) => cx.out.ldc_i4(*s as i32),
            ConstValue::Enum(_, val) => cx.out.ldc_i4(*val as i32),
            ConstValue::Str(s) => {
                let s = s.clone();
                cx.out.ldstr_(&s);
            }
            ConstValue::Nil => cx.out.ldnull_(),
            ConstValue::Bytes(_) => {
                cx.error(
                    DiagnosticKind::Type,
                    pos,
                    "byte-array literal has no runtime representation",
                );
            }
            ConstValue::None => {}
        }
        v.mode = ValueMode::Val;
        v.val = ConstValue::None;
    }

    /// Convert the value to `target`: constants are re-tagged in place,
    /// runtime values get a `conv` opcode.
    pub(crate) fn coerce_to(&mut self, cx: &mut EvalCx, v: &mut Value, target: TypeId) {
        let target = cx.model.deref(target);
        if target == TypeId::NO_TYPE || v.ty == TypeId::NO_TYPE || cx.model.deref(v.ty) == target {
            v.ty = if v.ty == TypeId::NO_TYPE { v.ty } else { target };
            return;
        }
        match v.mode {
            ValueMode::Const => {
                let tk = &cx.model.type_(target).kind;
                let converted = match tk {
                    TypeKind::Float32 | TypeKind::Float64 => {
                        v.val.as_f64().map(ConstValue::Real)
                    }
                    TypeKind::Uint8 | TypeKind::Uint16 | TypeKind::Uint32 | TypeKind::Uint64 => {
                        let w = cx.model.width(target);
                        v.val
                            .bits()
                            .map(|b| ConstValue::UInt(wrap_u(b, w)))
                    }
                    TypeKind::Int8 | TypeKind::Int16 | TypeKind::Int32 | TypeKind::Int64 => {
                        let w = cx.model.width(target);
                        v.val
                            .bits()
                            .map(|b| ConstValue::Int(wrap_i(b as i64, w)))
                    }
                    TypeKind::Char => match &v.val {
                        ConstValue::Str(s) if s.len() == 1 => {
                            Some(ConstValue::Char(s.as_bytes()[0]))
                        }
                        _ => v.val.as_u64().map(|b| ConstValue::Char(b as u8)),
                    },
                    TypeKind::Set => v.val.as_u64().map(|b| ConstValue::Set(b as u32)),
                    _ => Some(v.val.clone()),
                };
                match converted {
                    Some(val) => {
                        v.val = val;
                        v.ty = target;
                    }
                    None => {
                        v.mode = ValueMode::None;
                        v.ty = TypeId::NO_TYPE;
                    }
                }
            }
            ValueMode::Val => {
                let from = mil_size_of(cx.model, v.ty);
                let to = mil_size_of(cx.model, target);
                if from != to {
                    cx.out.conv_(to);
                }
                v.ty = target;
            }
            _ => v.ty = target,
        }
    }

    // ---- operators ------------------------------------------------------

    /// Binary arithmetic. Operands are already promoted to `ty` by the
    /// parse-time auto-casts; fold if both are constants, emit otherwise.
    pub(crate) fn binary(
        &mut self,
        cx: &mut EvalCx,
        op: BinOp,
        mut lhs: Value,
        mut rhs: Value,
        ty: TypeId,
        pos: RowCol,
    ) -> Value {
        if lhs.is_none() || rhs.is_none() || ty == TypeId::NO_TYPE {
            return Value::none();
        }
        if lhs.is_const() && rhs.is_const() {
            return match fold_binary(cx.model, op, ty, &lhs, &rhs) {
                Ok(val) => Value::constant(ty, val),
                Err(msg) => {
                    cx.error(DiagnosticKind::Const, pos, msg);
                    Value::none()
                }
            };
        }
        self.push_mil_stack(cx, &mut lhs, pos);
        self.push_mil_stack(cx, &mut rhs, pos);
        let t = cx.model.deref(ty);
        let is_set = cx.model.type_(t).is_set();
        match op {
            BinOp::Add if is_set => cx.out.or_(),
            BinOp::Mul if is_set => cx.out.and_(),
            BinOp::Sub if is_set => {
                cx.out.not_();
                cx.out.and_();
            }
            BinOp::And if is_set => cx.out.and_(),
            BinOp::Or if is_set => cx.out.or_(),
            BinOp::Add => cx.out.add_(),
            BinOp::Sub => cx.out.sub_(),
            BinOp::Mul => cx.out.mul_(),
            BinOp::FDiv | BinOp::IDiv => cx.out.div_(),
            BinOp::Mod => cx.out.rem_(),
            BinOp::And | BinOp::Or => {
                // boolean &/OR are short-circuited in eval(); reaching
                // here means a type error already reported
            }
        }
        Value::runtime(ty)
    }

    pub(crate) fn unary(
        &mut self,
        cx: &mut EvalCx,
        op: UnOp,
        mut v: Value,
        ty: TypeId,
        pos: RowCol,
    ) -> Value {
        if v.is_none() || ty == TypeId::NO_TYPE {
            return Value::none();
        }
        if v.is_const() {
            let t = cx.model.deref(ty);
            let kind = &cx.model.type_(t).kind;
            let folded = match (op, kind) {
                (UnOp::Neg, TypeKind::Float32 | TypeKind::Float64) => {
                    v.val.as_f64().map(|f| ConstValue::Real(-f))
                }
                (UnOp::Neg, _) => v
                    .val
                    .as_i64()
                    .map(|i| ConstValue::Int(wrap_i(i.wrapping_neg(), cx.model.width(t).max(32)))),
                (UnOp::Not, TypeKind::Bool) => match v.val {
                    ConstValue::Bool(b) => Some(ConstValue::Bool(!b)),
                    _ => None,
                },
                (UnOp::Not, TypeKind::Set) => {
                    v.val.as_u64().map(|s| ConstValue::Set(!(s as u32)))
                }
                (UnOp::Not, _) => None,
            };
            return match folded {
                Some(val) => Value::constant(ty, val),
                None => {
                    cx.error(DiagnosticKind::Type, pos, "invalid operand for unary operator");
                    Value::none()
                }
            };
        }
        match op {
            UnOp::Neg => cx.out.neg_(),
            UnOp::Not => {
                let t = cx.model.deref(ty);
                if cx.model.type_(t).is_set() {
                    cx.out.not_();
                } else {
                    cx.out.ldc_i4(0);
                    cx.out.ceq_();
                }
            }
        }
        Value::runtime(ty)
    }

    /// Relational operator; operands are promoted alike. Yields `BOOL`.
    pub(crate) fn relation(
        &mut self,
        cx: &mut EvalCx,
        op: RelOp,
        mut lhs: Value,
        mut rhs: Value,
        pos: RowCol,
    ) -> Value {
        if lhs.is_none() || rhs.is_none() {
            return Value::none();
        }
        if lhs.is_const() && rhs.is_const() {
            return match fold_relation(cx.model, op, &lhs, &rhs) {
                Ok(b) => Value::constant(TypeId::BOOL, ConstValue::Bool(b)),
                Err(msg) => {
                    cx.error(DiagnosticKind::Const, pos, msg);
                    Value::none()
                }
            };
        }
        self.push_mil_stack(cx, &mut lhs, pos);
        self.push_mil_stack(cx, &mut rhs, pos);
        match op {
            RelOp::Eq => cx.out.ceq_(),
            RelOp::Neq => {
                cx.out.ceq_();
                cx.out.ldc_i4(0);
                cx.out.ceq_();
            }
            RelOp::Lt => cx.out.clt_(),
            RelOp::Gt => cx.out.cgt_(),
            RelOp::Leq => {
                cx.out.cgt_();
                cx.out.ldc_i4(0);
                cx.out.ceq_();
            }
            RelOp::Geq => {
                cx.out.clt_();
                cx.out.ldc_i4(0);
                cx.out.ceq_();
            }
            RelOp::In => {
                // lowered specially in eval(); unreachable via this path
                debug_assert!(false, "IN handled in eval");
            }
        }
        Value::runtime(TypeId::BOOL)
    }

    // ---- tree walking ---------------------------------------------------

    /// Evaluate an expression as an rvalue. Constants fold; runtime
    /// subexpressions leave exactly one operand on the IR stack.
    pub(crate) fn eval(&mut self, cx: &mut EvalCx, arena: &ExprArena, e: ExprId) -> Value {
        crate::stack::grow(|| self.eval_inner(cx, arena, e))
    }

    fn eval_inner(&mut self, cx: &mut EvalCx, arena: &ExprArena, e: ExprId) -> Value {
        let node = arena.get(e).clone();
        let pos = node.pos;
        match node.kind {
            ExprKind::Literal(val) => Value::constant(node.ty, val),
            ExprKind::TypeRef(t) => Value {
                mode: ValueMode::TypeRef,
                ty: t,
                val: ConstValue::None,
            },
            ExprKind::DeclRef(d) => self.eval_decl_ref(cx, d, node.ty),
            ExprKind::AutoCast { arg } => {
                let mut v = self.eval(cx, arena, arg);
                self.coerce_to(cx, &mut v, node.ty);
                v
            }
            ExprKind::Select { lhs, field } => {
                let base = self.eval_addr(cx, arena, lhs);
                if base.is_none() {
                    return Value::none();
                }
                let q = cx.decl_quali(field);
                cx.out.ldfld_(q);
                Value::runtime(node.ty)
            }
            ExprKind::Index { lhs, index } => {
                let base = self.eval_addr(cx, arena, lhs);
                if base.is_none() {
                    return Value::none();
                }
                let mut idx = self.eval(cx, arena, index);
                self.push_mil_stack(cx, &mut idx, pos);
                let q = cx.type_quali(node.ty);
                cx.out.ldelem_(q);
                Value::runtime(node.ty)
            }
            ExprKind::Deref { lhs } => {
                let mut ptr = self.eval(cx, arena, lhs);
                self.push_mil_stack(cx, &mut ptr, pos);
                if ptr.is_none() {
                    return Value::none();
                }
                let size = mil_size_of(cx.model, node.ty);
                if cx.model.type_(cx.model.deref(node.ty)).is_structured() {
                    // address of the aggregate is the value; loads happen
                    // at the field/element level
                } else {
                    cx.out.ldind_(size);
                }
                Value::runtime(node.ty)
            }
            ExprKind::Unary { op, arg } => {
                let v = self.eval(cx, arena, arg);
                self.unary(cx, op, v, node.ty, pos)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let bool_op = node.ty == TypeId::BOOL && matches!(op, BinOp::And | BinOp::Or);
                if bool_op {
                    return self.eval_short_circuit(cx, arena, op, lhs, rhs, pos);
                }
                let mut lv = self.eval(cx, arena, lhs);
                if lv.is_const() && !cx.model.is_const_expr(arena, rhs) {
                    self.push_mil_stack(cx, &mut lv, pos);
                }
                let rv = self.eval(cx, arena, rhs);
                self.binary(cx, op, lv, rv, node.ty, pos)
            }
            ExprKind::Relation { op, lhs, rhs } => {
                if op == RelOp::In {
                    return self.eval_in(cx, arena, lhs, rhs, pos);
                }
                let mut lv = self.eval(cx, arena, lhs);
                if lv.is_const() && !cx.model.is_const_expr(arena, rhs) {
                    self.push_mil_stack(cx, &mut lv, pos);
                }
                let rv = self.eval(cx, arena, rhs);
                self.relation(cx, op, lv, rv, pos)
            }
            ExprKind::Call { callee, args } => self.eval_call(cx, arena, callee, &args, pos),
            ExprKind::BuiltinCall { builtin, args } => {
                builtins::call(self, cx, arena, builtin, &args, node.ty, pos)
            }
            ExprKind::SetCtor { ref elems } => self.eval_set_ctor(cx, arena, elems, pos),
        }
    }

    fn eval_decl_ref(&mut self, cx: &mut EvalCx, d: DeclId, ty: TypeId) -> Value {
        let decl = cx.model.decl(d);
        match decl.kind {
            DeclKind::ConstDecl => match &decl.data {
                mic_ir::DeclData::Const(val) => Value::constant(ty, val.clone()),
                _ => Value::none(),
            },
            DeclKind::EnumMember => {
                let val = match decl.data {
                    mic_ir::DeclData::EnumMember(v) => v,
                    _ => 0,
                };
                Value::constant(ty, ConstValue::Enum(d, val))
            }
            DeclKind::VarDecl => {
                let q = cx.decl_quali(d);
                cx.out.ldvar_(q);
                Value::runtime(ty)
            }
            DeclKind::LocalDecl => {
                let slot = decl.slot();
                cx.out.ldloc_(slot);
                Value::runtime(ty)
            }
            DeclKind::ParamDecl => {
                let slot = decl.slot();
                let var_param = decl.flags.contains(DeclFlags::VAR_PARAM);
                cx.out.ldarg_(slot);
                if var_param {
                    let size = mil_size_of(cx.model, ty);
                    cx.out.ldind_(size);
                }
                Value::runtime(ty)
            }
            DeclKind::Procedure => Value {
                mode: ValueMode::ProcRef,
                ty,
                val: ConstValue::Enum(d, 0),
            },
            _ => Value::none(),
        }
    }

    /// Boolean `&` / `OR` with short-circuit lowering through structured
    /// `if` blocks that leave the result on the stack.
    fn eval_short_circuit(
        &mut self,
        cx: &mut EvalCx,
        arena: &ExprArena,
        op: BinOp,
        lhs: ExprId,
        rhs: ExprId,
        pos: RowCol,
    ) -> Value {
        let lv = self.eval(cx, arena, lhs);
        if lv.is_const() && cx.model.is_const_expr(arena, rhs) {
            let rv = self.eval(cx, arena, rhs);
            return self.binary(cx, op, lv, rv, TypeId::BOOL, pos);
        }
        // constant lhs still decides statically
        if let Value {
            mode: ValueMode::Const,
            val: ConstValue::Bool(b),
            ..
        } = lv
        {
            return match (op, b) {
                (BinOp::And, false) => Value::constant(TypeId::BOOL, ConstValue::Bool(false)),
                (BinOp::Or, true) => Value::constant(TypeId::BOOL, ConstValue::Bool(true)),
                _ => self.eval(cx, arena, rhs),
            };
        }
        cx.out.if_();
        cx.out.then_();
        match op {
            BinOp::And => {
                let mut rv = self.eval(cx, arena, rhs);
                self.push_mil_stack(cx, &mut rv, pos);
                cx.out.else_();
                cx.out.ldc_i4(0);
            }
            BinOp::Or => {
                cx.out.ldc_i4(1);
                cx.out.else_();
                let mut rv = self.eval(cx, arena, rhs);
                self.push_mil_stack(cx, &mut rv, pos);
            }
            _ => unreachable!(),
        }
        cx.out.end_();
        Value::runtime(TypeId::BOOL)
    }

    /// `x IN s` bit test: `((1 << x) & s) # 0`.
    fn eval_in(
        &mut self,
        cx: &mut EvalCx,
        arena: &ExprArena,
        lhs: ExprId,
        rhs: ExprId,
        pos: RowCol,
    ) -> Value {
        if cx.model.is_const_expr(arena, lhs) && cx.model.is_const_expr(arena, rhs) {
            let lv = self.eval(cx, arena, lhs);
            let rv = self.eval(cx, arena, rhs);
            return match fold_relation(cx.model, RelOp::In, &lv, &rv) {
                Ok(b) => Value::constant(TypeId::BOOL, ConstValue::Bool(b)),
                Err(msg) => {
                    cx.error(DiagnosticKind::Const, pos, msg);
                    Value::none()
                }
            };
        }
        cx.out.ldc_i4(1);
        let mut lv = self.eval(cx, arena, lhs);
        self.push_mil_stack(cx, &mut lv, pos);
        cx.out.shl_();
        let mut rv = self.eval(cx, arena, rhs);
        self.push_mil_stack(cx, &mut rv, pos);
        cx.out.and_();
        cx.out.ldc_i4(0);
        cx.out.ceq_();
        cx.out.ldc_i4(0);
        cx.out.ceq_();
        Value::runtime(TypeId::BOOL)
    }

    fn eval_set_ctor(
        &mut self,
        cx: &mut EvalCx,
        arena: &ExprArena,
        elems: &[mic_ir::SetElem],
        pos: RowCol,
    ) -> Value {
        let all_const = elems.iter().all(|el| {
            cx.model.is_const_expr(arena, el.lo)
                && el.hi.map_or(true, |h| cx.model.is_const_expr(arena, h))
        });
        if all_const {
            let mut bits = 0u32;
            for el in elems {
                let lo = self.eval(cx, arena, el.lo);
                let lo = match lo.val.as_u64() {
                    Some(v) if v <= 31 => v as u32,
                    _ => {
                        cx.error(DiagnosticKind::Const, pos, "set element out of range 0..31");
                        return Value::none();
                    }
                };
                let hi = match el.hi {
                    None => lo,
                    Some(h) => {
                        let hv = self.eval(cx, arena, h);
                        match hv.val.as_u64() {
                            Some(v) if v <= 31 && v as u32 >= lo => v as u32,
                            _ => {
                                cx.error(
                                    DiagnosticKind::Const,
                                    pos,
                                    "invalid set range",
                                );
                                return Value::none();
                            }
                        }
                    }
                };
                for b in lo..=hi {
                    bits |= 1 << b;
                }
            }
            return Value::constant(TypeId::SET, ConstValue::Set(bits));
        }
        // runtime set: or together single-bit masks; ranges must be const
        cx.out.ldc_i4(0);
        for el in elems {
            if el.hi.is_some() {
                cx.error(
                    DiagnosticKind::Type,
                    pos,
                    "set ranges require constant bounds",
                );
                return Value::none();
            }
            cx.out.ldc_i4(1);
            let mut lv = self.eval(cx, arena, el.lo);
            self.push_mil_stack(cx, &mut lv, pos);
            cx.out.shl_();
            cx.out.or_();
        }
        Value::runtime(TypeId::SET)
    }

    fn eval_call(
        &mut self,
        cx: &mut EvalCx,
        arena: &ExprArena,
        callee: ExprId,
        args: &[ExprId],
        pos: RowCol,
    ) -> Value {
        let callee_node = arena.get(callee).clone();
        let callee_decl = match callee_node.kind {
            ExprKind::DeclRef(d) if cx.model.decl(d).kind == DeclKind::Procedure => Some(d),
            _ => None,
        };
        let params = proc_params(cx.model, callee_node.ty, callee_decl);
        let ret = proc_ret(cx.model, callee_node.ty, callee_decl);

        for (i, &a) in args.iter().enumerate() {
            let var_param = params
                .get(i)
                .map(|&p| cx.model.decl(p).flags.contains(DeclFlags::VAR_PARAM))
                .unwrap_or(false);
            if var_param {
                self.eval_addr(cx, arena, a);
            } else {
                let mut v = self.eval(cx, arena, a);
                self.push_mil_stack(cx, &mut v, pos);
            }
        }

        let has_ret = ret != TypeId::NO_TYPE;
        match callee_decl {
            Some(d) => {
                let q = cx.decl_quali(d);
                cx.out.call_(q, args.len() as u32, has_ret);
            }
            None => {
                let mut f = self.eval(cx, arena, callee);
                self.push_mil_stack(cx, &mut f, pos);
                cx.out.calli_(args.len() as u32, has_ret);
            }
        }
        if has_ret {
            Value::runtime(ret)
        } else {
            Value {
                mode: ValueMode::Val,
                ty: TypeId::NO_TYPE,
                val: ConstValue::None,
            }
        }
    }

    /// Evaluate a designator to an address on the IR stack (`Ref`).
    pub(crate) fn eval_addr(&mut self, cx: &mut EvalCx, arena: &ExprArena, e: ExprId) -> Value {
        let node = arena.get(e).clone();
        let pos = node.pos;
        match node.kind {
            ExprKind::DeclRef(d) => {
                let decl = cx.model.decl(d);
                match decl.kind {
                    DeclKind::VarDecl => {
                        let q = cx.decl_quali(d);
                        cx.out.ldvara_(q);
                    }
                    DeclKind::LocalDecl => cx.out.ldloca_(decl.slot()),
                    DeclKind::ParamDecl => {
                        if decl.flags.contains(DeclFlags::VAR_PARAM) {
                            cx.out.ldarg_(decl.slot());
                        } else {
                            cx.out.ldarga_(decl.slot());
                        }
                    }
                    _ => {
                        cx.error(DiagnosticKind::Type, pos, "designator is not addressable");
                        return Value::none();
                    }
                }
                Value {
                    mode: ValueMode::Ref,
                    ty: node.ty,
                    val: ConstValue::None,
                }
            }
            ExprKind::Select { lhs, field } => {
                let base = self.eval_addr(cx, arena, lhs);
                if base.is_none() {
                    return Value::none();
                }
                let q = cx.decl_quali(field);
                cx.out.ldflda_(q);
                Value {
                    mode: ValueMode::Ref,
                    ty: node.ty,
                    val: ConstValue::None,
                }
            }
            ExprKind::Index { lhs, index } => {
                let base = self.eval_addr(cx, arena, lhs);
                if base.is_none() {
                    return Value::none();
                }
                let mut idx = self.eval(cx, arena, index);
                self.push_mil_stack(cx, &mut idx, pos);
                let q = cx.type_quali(node.ty);
                cx.out.ldelema_(q);
                Value {
                    mode: ValueMode::Ref,
                    ty: node.ty,
                    val: ConstValue::None,
                }
            }
            ExprKind::Deref { lhs } => {
                let mut ptr = self.eval(cx, arena, lhs);
                self.push_mil_stack(cx, &mut ptr, pos);
                if ptr.is_none() {
                    return Value::none();
                }
                Value {
                    mode: ValueMode::Ref,
                    ty: node.ty,
                    val: ConstValue::None,
                }
            }
            ExprKind::AutoCast { arg } => self.eval_addr(cx, arena, arg),
            _ => {
                cx.error(DiagnosticKind::Type, pos, "designator expected");
                Value::none()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_semantics() {
        assert_eq!(wrap_u(0x1_0000_0001, 32), 1);
        assert_eq!(wrap_i(i64::from(i32::MAX) + 1, 32), i64::from(i32::MIN));
        assert_eq!(wrap_i(-1, 8), -1);
        assert_eq!(wrap_u(0x1FF, 8), 0xFF);
    }

    #[test]
    fn test_fold_is_pure() {
        let symbols = Symbols::new();
        let model = AstModel::new(&symbols);
        let a = Value::constant(TypeId::INT32, ConstValue::Int(7));
        let b = Value::constant(TypeId::INT32, ConstValue::Int(5));
        let r1 = fold_binary(&model, BinOp::Mul, TypeId::INT32, &a, &b).unwrap();
        let r2 = fold_binary(&model, BinOp::Mul, TypeId::INT32, &a, &b).unwrap();
        assert_eq!(r1, r2);
        assert_eq!(r1, ConstValue::Int(35));
    }

    #[test]
    fn test_fold_division_by_zero() {
        let symbols = Symbols::new();
        let model = AstModel::new(&symbols);
        let a = Value::constant(TypeId::INT32, ConstValue::Int(1));
        let b = Value::constant(TypeId::INT32, ConstValue::Int(0));
        assert!(fold_binary(&model, BinOp::FDiv, TypeId::INT32, &a, &b).is_err());
        assert!(fold_binary(&model, BinOp::Mod, TypeId::INT32, &a, &b).is_err());
        // real folds never trap
        let fa = Value::constant(TypeId::FLOAT64, ConstValue::Real(1.0));
        let fb = Value::constant(TypeId::FLOAT64, ConstValue::Real(0.0));
        let folded = fold_binary(&model, BinOp::FDiv, TypeId::FLOAT64, &fa, &fb).unwrap();
        assert_eq!(folded, ConstValue::Real(f64::INFINITY));
    }

    #[test]
    fn test_fold_relation_in() {
        let symbols = Symbols::new();
        let model = AstModel::new(&symbols);
        let e = Value::constant(TypeId::UINT32, ConstValue::UInt(3));
        let s = Value::constant(TypeId::SET, ConstValue::Set(0b1000));
        assert_eq!(fold_relation(&model, RelOp::In, &e, &s), Ok(true));
        let s0 = Value::constant(TypeId::SET, ConstValue::Set(0));
        assert_eq!(fold_relation(&model, RelOp::In, &e, &s0), Ok(false));
    }

    #[test]
    fn test_equal_types_structural() {
        let symbols = Symbols::new();
        let mut model = AstModel::new(&symbols);
        let a1 = model.new_type(mic_ir::Type::new(
            TypeKind::Array {
                base: TypeId::CHAR,
                len: 8,
            },
            RowCol::NONE,
        ));
        let a2 = model.new_type(mic_ir::Type::new(
            TypeKind::Array {
                base: TypeId::CHAR,
                len: 8,
            },
            RowCol::NONE,
        ));
        let a3 = model.new_type(mic_ir::Type::new(
            TypeKind::Array {
                base: TypeId::CHAR,
                len: 9,
            },
            RowCol::NONE,
        ));
        assert!(equal_types(&model, a1, a2));
        assert!(!equal_types(&model, a1, a3));
    }
}
