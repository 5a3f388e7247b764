//! Built-in functions and procedures.
//!
//! Two phases per call site, mirroring the evaluator split:
//!
//! 1. [`check_args`] at parse time validates arity and types, widens
//!    integer operands by inserting auto-cast nodes, and determines the
//!    result type.
//! 2. [`call`] at evaluation time runs the arguments through the
//!    evaluator stack (left to right, addresses for lvalue positions),
//!    folds constant-only calls and otherwise emits the lowering.
//!
//! [`requires_lvalue`] tells the parser which positional arguments must
//! be designators.

use crate::eval::{mil_size_of, wrap_i, EvalCx, Evaluator};
use mic_diagnostic::{DiagnosticKind, DiagnosticSink};
use mic_ir::{
    AstModel, Builtin, ConstValue, DeclKind, ExprArena, ExprId, ExprKind, RowCol, TypeId,
    TypeKind, Value, ValueMode,
};
use mic_mil::{MilQuali, MilSize};

/// Positional arguments that must be parsed as lvalue designators.
pub fn requires_lvalue(builtin: Builtin, arg: usize) -> bool {
    matches!(
        builtin,
        Builtin::New | Builtin::Inc | Builtin::Dec | Builtin::Excl | Builtin::Incl | Builtin::Pcall
    ) && arg == 0
}

// ---- phase (a): checkArgs ------------------------------------------------

struct CheckCx<'a> {
    model: &'a AstModel,
    arena: &'a mut ExprArena,
    diags: &'a mut DiagnosticSink,
    path: &'a str,
    pos: RowCol,
}

impl<'a> CheckCx<'a> {
    fn err(&mut self, msg: impl Into<String>) -> TypeId {
        self.diags
            .error(DiagnosticKind::Type, self.path, self.pos.line, self.pos.col, msg);
        TypeId::NO_TYPE
    }

    fn ty(&self, e: ExprId) -> TypeId {
        self.model.deref(self.arena.ty(e))
    }

    fn arity(&mut self, args: &[ExprId], n: usize) -> bool {
        if args.len() != n {
            self.err(format!("expecting {n} arguments"));
            return false;
        }
        true
    }

    fn arity_range(&mut self, args: &[ExprId], lo: usize, hi: usize) -> bool {
        if args.len() < lo || args.len() > hi {
            self.err(format!("expecting {lo} to {hi} arguments"));
            return false;
        }
        true
    }

    fn is_designator(&self, e: ExprId) -> bool {
        match &self.arena.get(e).kind {
            ExprKind::Select { .. } | ExprKind::Index { .. } | ExprKind::Deref { .. } => true,
            ExprKind::DeclRef(d) => matches!(
                self.model.decl(*d).kind,
                DeclKind::VarDecl | DeclKind::LocalDecl | DeclKind::ParamDecl
            ),
            _ => false,
        }
    }

    /// Widen an unsigned operand to at least 32 bits.
    fn widen_uint(&mut self, e: ExprId) -> ExprId {
        let t = self.ty(e);
        if self.model.width(t) < 32 {
            self.arena.auto_cast(e, TypeId::UINT32)
        } else {
            e
        }
    }
}

/// Validate a builtin call, possibly rewriting `args` with auto-casts,
/// and yield the result type (`NoType` for proper procedures). `None`
/// means the call was rejected; a diagnostic has been reported and the
/// caller poisons the node.
#[allow(clippy::too_many_lines)]
pub fn check_args(
    model: &AstModel,
    arena: &mut ExprArena,
    diags: &mut DiagnosticSink,
    path: &str,
    builtin: Builtin,
    args: &mut Vec<ExprId>,
    pos: RowCol,
) -> Option<TypeId> {
    // a poisoned argument suppresses all further checking
    if args.iter().any(|&a| arena.ty(a) == TypeId::NO_TYPE) {
        return None;
    }
    let before = diags.error_count();
    let mut cx = CheckCx {
        model,
        arena,
        diags,
        path,
        pos,
    };
    let cx = &mut cx;
    let ret = check_args_inner(cx, builtin, args);
    if cx.diags.error_count() > before {
        None
    } else {
        Some(ret)
    }
}

#[allow(clippy::too_many_lines)]
fn check_args_inner(cx: &mut CheckCx, builtin: Builtin, args: &mut Vec<ExprId>) -> TypeId {
    match builtin {
        Builtin::Abs => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            let t = cx.ty(args[0]);
            if !cx.model.type_(t).is_number() {
                return cx.err("expecting numeric argument");
            }
            t
        }
        Builtin::Odd => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            if !cx.model.type_(cx.ty(args[0])).is_integer() {
                return cx.err("expecting integer argument");
            }
            TypeId::BOOL
        }
        Builtin::Cap => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            if cx.ty(args[0]) != TypeId::CHAR {
                return cx.err("expecting character argument");
            }
            TypeId::CHAR
        }
        Builtin::BitAnd | Builtin::BitOr | Builtin::BitXor => {
            if !cx.arity(args, 2) {
                return TypeId::NO_TYPE;
            }
            if !cx.model.type_(cx.ty(args[0])).is_uint() {
                return cx.err("expecting unsigned first argument");
            }
            if !cx.model.type_(cx.ty(args[1])).is_uint() {
                return cx.err("expecting unsigned second argument");
            }
            args[0] = cx.widen_uint(args[0]);
            args[1] = cx.widen_uint(args[1]);
            let (w0, w1) = (cx.model.width(cx.ty(args[0])), cx.model.width(cx.ty(args[1])));
            if w0 < w1 {
                args[0] = cx.arena.auto_cast(args[0], cx.ty(args[1]));
            } else if w1 < w0 {
                args[1] = cx.arena.auto_cast(args[1], cx.ty(args[0]));
            }
            cx.ty(args[0])
        }
        Builtin::BitNot => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            if !cx.model.type_(cx.ty(args[0])).is_uint() {
                return cx.err("expecting unsigned integer");
            }
            args[0] = cx.widen_uint(args[0]);
            cx.ty(args[0])
        }
        Builtin::BitShl | Builtin::BitShr | Builtin::BitAsr => {
            if !cx.arity(args, 2) {
                return TypeId::NO_TYPE;
            }
            if !cx.model.type_(cx.ty(args[0])).is_uint() {
                return cx.err("expecting unsigned first argument");
            }
            if !cx.model.type_(cx.ty(args[1])).is_uint() {
                return cx.err("expecting unsigned second argument");
            }
            args[0] = cx.widen_uint(args[0]);
            args[1] = cx.widen_uint(args[1]);
            cx.ty(args[0])
        }
        Builtin::Bits | Builtin::Size => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            let t = cx.ty(args[0]);
            if cx.model.size_of(t).is_none() {
                return cx.err("type has no size");
            }
            TypeId::UINT32
        }
        Builtin::Cast => {
            if !cx.arity(args, 2) {
                return TypeId::NO_TYPE;
            }
            let &ExprKind::TypeRef(target) = &cx.arena.get(args[1]).kind else {
                return cx.err("expecting a type as second argument");
            };
            let target = cx.model.deref(target);
            let src = cx.ty(args[0]);
            let (st, tt) = (cx.model.type_(src), cx.model.type_(target));
            if !st.is_simple() || !tt.is_simple() {
                return cx.err("CAST requires scalar operands");
            }
            if st.is_real() != tt.is_real() {
                return cx.err("cannot reinterpret between integer and floating types");
            }
            // const enums are stored as 32-bit integers
            let eff = |t: TypeId, ty: &mic_ir::Type| {
                if matches!(ty.kind, TypeKind::ConstEnum { .. }) {
                    32
                } else {
                    cx.model.width(t)
                }
            };
            if eff(src, st) != eff(target, tt) {
                return cx.err("CAST requires types of identical width");
            }
            target
        }
        Builtin::Chr => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            if !cx.model.type_(cx.ty(args[0])).is_integer() {
                return cx.err("expecting integer argument");
            }
            TypeId::CHAR
        }
        Builtin::Default => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            cx.ty(args[0])
        }
        Builtin::Floor => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            if !cx.model.type_(cx.ty(args[0])).is_real() {
                return cx.err("expecting real argument");
            }
            TypeId::INT64
        }
        Builtin::Flt => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            if !cx.model.type_(cx.ty(args[0])).is_integer() {
                return cx.err("expecting integer argument");
            }
            TypeId::FLOAT64
        }
        Builtin::Getenv => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            if !cx.model.is_text(cx.ty(args[0])) {
                return cx.err("expecting string argument");
            }
            TypeId::INTPTR
        }
        Builtin::Len => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            let t = cx.ty(args[0]);
            let arr = cx.model.pointer_base(t).unwrap_or(t);
            match cx.model.type_(arr).kind {
                TypeKind::Array { len, .. } if len > 0 => TypeId::UINT32,
                _ => cx.err("function only applicable to non-open arrays"),
            }
        }
        Builtin::Long => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            let t = cx.ty(args[0]);
            let ty = cx.model.type_(t);
            let w = cx.model.width(t);
            if ty.is_int() && w < 64 {
                AstModel::int_type(w * 2)
            } else if ty.is_uint() && w < 64 {
                AstModel::uint_type(w * 2)
            } else if t == TypeId::FLOAT32 {
                TypeId::FLOAT64
            } else {
                cx.err("no longer form of this type")
            }
        }
        Builtin::Short => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            let t = cx.ty(args[0]);
            let ty = cx.model.type_(t);
            let w = cx.model.width(t);
            if ty.is_int() && w > 8 {
                AstModel::int_type(w / 2)
            } else if ty.is_uint() && w > 8 {
                AstModel::uint_type(w / 2)
            } else if t == TypeId::FLOAT64 {
                TypeId::FLOAT32
            } else {
                cx.err("no shorter form of this type")
            }
        }
        Builtin::Max | Builtin::Min => {
            if !cx.arity_range(args, 1, 2) {
                return TypeId::NO_TYPE;
            }
            if args.len() == 1 {
                let t = cx.ty(args[0]);
                if !cx.model.type_(t).is_number() {
                    return cx.err("expecting a numeric type");
                }
                return t;
            }
            let (a, b) = (cx.ty(args[0]), cx.ty(args[1]));
            let (at, bt) = (cx.model.type_(a), cx.model.type_(b));
            if !at.is_number() || !bt.is_number() {
                return cx.err("expecting numeric arguments");
            }
            // widen to the larger operand
            if cx.model.width(a) >= cx.model.width(b) {
                args[1] = cx.arena.auto_cast(args[1], a);
                a
            } else {
                args[0] = cx.arena.auto_cast(args[0], b);
                b
            }
        }
        Builtin::Ord => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            let t = cx.ty(args[0]);
            match cx.model.type_(t).kind {
                TypeKind::Char | TypeKind::Bool | TypeKind::ConstEnum { .. } => TypeId::INT32,
                TypeKind::Set => TypeId::UINT32,
                _ => cx.err("expecting character, boolean, set or enumeration"),
            }
        }
        Builtin::Signed => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            let t = cx.ty(args[0]);
            let ty = cx.model.type_(t);
            if ty.is_uint() {
                AstModel::int_type(cx.model.width(t))
            } else if ty.is_int() {
                t
            } else {
                cx.err("expecting integer argument")
            }
        }
        Builtin::Unsigned => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            let t = cx.ty(args[0]);
            let ty = cx.model.type_(t);
            if ty.is_int() {
                AstModel::uint_type(cx.model.width(t))
            } else if ty.is_uint() {
                t
            } else {
                cx.err("expecting integer argument")
            }
        }
        Builtin::Strlen => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            match &cx.arena.get(args[0]).kind {
                ExprKind::Literal(ConstValue::Str(_)) => TypeId::UINT32,
                _ => cx.err("expecting a string literal"),
            }
        }
        Builtin::Vararg => {
            cx.arity_range(args, 2, 3);
            cx.err("VARARG is not supported on this target")
        }
        Builtin::Varargs => {
            cx.arity(args, 0);
            cx.err("VARARGS is not supported on this target")
        }

        // proper procedures
        Builtin::Assert => {
            // parser has synthesised (line, file)
            if !cx.arity(args, 3) {
                return TypeId::NO_TYPE;
            }
            if cx.ty(args[0]) != TypeId::BOOL {
                return cx.err("expecting boolean first argument");
            }
            TypeId::NO_TYPE
        }
        Builtin::Inc | Builtin::Dec => {
            if !cx.arity_range(args, 1, 2) {
                return TypeId::NO_TYPE;
            }
            if !cx.is_designator(args[0]) {
                return cx.err("cannot write to first argument");
            }
            let t = cx.ty(args[0]);
            let ty = cx.model.type_(t);
            let is_enum = matches!(ty.kind, TypeKind::ConstEnum { .. });
            let is_ptr = matches!(ty.kind, TypeKind::Pointer { .. });
            if !ty.is_integer() && !is_enum && !is_ptr {
                return cx.err("invalid argument types");
            }
            if args.len() == 2 {
                if is_enum {
                    return cx.err("second argument not supported for const enumerations");
                }
                if !cx.model.type_(cx.ty(args[1])).is_integer() {
                    return cx.err("expecting integer step");
                }
            }
            TypeId::NO_TYPE
        }
        Builtin::Dispose => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            match cx.model.pointer_base(cx.ty(args[0])) {
                Some(base)
                    if cx.model.type_(base).is_structured() =>
                {
                    TypeId::NO_TYPE
                }
                _ => cx.err("argument must be a pointer to record or array"),
            }
        }
        Builtin::Excl | Builtin::Incl => {
            if !cx.arity(args, 2) {
                return TypeId::NO_TYPE;
            }
            if !cx.is_designator(args[0]) || cx.ty(args[0]) != TypeId::SET {
                return cx.err("expecting writable set as first argument");
            }
            if !cx.model.type_(cx.ty(args[1])).is_integer() {
                return cx.err("expecting integer element");
            }
            TypeId::NO_TYPE
        }
        Builtin::Halt => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            if !cx.model.type_(cx.ty(args[0])).is_integer() {
                return cx.err("expecting integer argument");
            }
            TypeId::NO_TYPE
        }
        Builtin::New => {
            if !cx.arity_range(args, 1, 2) {
                return TypeId::NO_TYPE;
            }
            if !cx.is_designator(args[0]) {
                return cx.err("cannot write to first argument");
            }
            let Some(base) = cx.model.pointer_base(cx.ty(args[0])) else {
                return cx.err("first argument must be a pointer to record or array");
            };
            match cx.model.type_(base).kind {
                TypeKind::Record { .. } | TypeKind::Object { .. } | TypeKind::Union { .. } => {
                    if args.len() != 1 {
                        cx.err("expecting one argument");
                    }
                }
                TypeKind::Array { len, .. } => {
                    if len > 0 && args.len() != 1 {
                        cx.err("cannot dynamically set array length for non-open array");
                    } else if len == 0 {
                        if args.len() != 2 {
                            cx.err("expecting two arguments, the second as the explicit length");
                        } else if !cx.model.type_(cx.ty(args[1])).is_integer() {
                            cx.err("expecting integer length");
                        }
                    }
                }
                _ => {
                    cx.err("first argument must be a pointer to record or array");
                }
            }
            TypeId::NO_TYPE
        }
        Builtin::Pcall => {
            if args.len() < 2 {
                return cx.err("expecting at least two arguments");
            }
            if !cx.is_designator(args[0]) {
                return cx.err("cannot write to first argument");
            }
            TypeId::NO_TYPE
        }
        Builtin::Print | Builtin::Println => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            let t = cx.ty(args[0]);
            if !cx.model.type_(t).is_simple() && !cx.model.is_text(t) {
                return cx.err("expecting one argument of basic or char array type");
            }
            TypeId::NO_TYPE
        }
        Builtin::Raise => {
            if !cx.arity(args, 1) {
                return TypeId::NO_TYPE;
            }
            if !cx.model.type_(cx.ty(args[0])).is_pointer() {
                return cx.err("expecting pointer argument");
            }
            TypeId::NO_TYPE
        }
        Builtin::Setenv => {
            if !cx.arity(args, 2) {
                return TypeId::NO_TYPE;
            }
            if !cx.model.is_text(cx.ty(args[0])) || !cx.model.is_text(cx.ty(args[1])) {
                return cx.err("expecting string arguments");
            }
            TypeId::NO_TYPE
        }
    }
}

// ---- phase (b): emission -------------------------------------------------

fn no_value() -> Value {
    Value {
        mode: ValueMode::Val,
        ty: TypeId::NO_TYPE,
        val: ConstValue::None,
    }
}

/// Fold-time helpers for type-level builtins.
fn const_of_type(cx: &mut EvalCx, t: TypeId, pos: RowCol) -> Option<ConstValue> {
    let t = cx.model.deref(t);
    let kind = cx.model.type_(t).kind.clone();
    Some(match kind {
        TypeKind::Bool => ConstValue::Bool(false),
        TypeKind::Char => ConstValue::Char(0),
        TypeKind::Set => ConstValue::Set(0),
        TypeKind::Float32 | TypeKind::Float64 => ConstValue::Real(0.0),
        k if matches!(
            k,
            TypeKind::Uint8 | TypeKind::Uint16 | TypeKind::Uint32 | TypeKind::Uint64
        ) =>
        {
            ConstValue::UInt(0)
        }
        TypeKind::Int8 | TypeKind::Int16 | TypeKind::Int32 | TypeKind::Int64 => ConstValue::Int(0),
        TypeKind::Pointer { .. } | TypeKind::Proc { .. } | TypeKind::IntPtr | TypeKind::Nil => {
            ConstValue::Nil
        }
        TypeKind::ConstEnum { ref members } => match members.first() {
            Some(&m) => {
                let v = match cx.model.decl(m).data {
                    mic_ir::DeclData::EnumMember(v) => v,
                    _ => 0,
                };
                ConstValue::Enum(m, v)
            }
            None => ConstValue::Int(0),
        },
        _ => {
            cx.error(DiagnosticKind::Type, pos, "type has no default value");
            return None;
        }
    })
}

fn numeric_limit(cx: &mut EvalCx, t: TypeId, max: bool, pos: RowCol) -> Option<ConstValue> {
    let t = cx.model.deref(t);
    let ty = cx.model.type_(t);
    let w = cx.model.width(t);
    if ty.is_uint() {
        let hi = if w >= 64 { u64::MAX } else { (1u64 << w) - 1 };
        return Some(ConstValue::UInt(if max { hi } else { 0 }));
    }
    if ty.is_int() {
        let hi = if w >= 64 { i64::MAX } else { (1i64 << (w - 1)) - 1 };
        let lo = if w >= 64 { i64::MIN } else { -(1i64 << (w - 1)) };
        return Some(ConstValue::Int(if max { hi } else { lo }));
    }
    if t == TypeId::FLOAT32 {
        return Some(ConstValue::Real(if max {
            f64::from(f32::MAX)
        } else {
            f64::from(f32::MIN)
        }));
    }
    if t == TypeId::FLOAT64 {
        return Some(ConstValue::Real(if max { f64::MAX } else { f64::MIN }));
    }
    cx.error(DiagnosticKind::Type, pos, "expecting a numeric type");
    None
}

/// Evaluate the arguments of a builtin call onto the evaluator stack.
/// Constants are pre-materialised as soon as a later argument needs the
/// IR stack, so operand order is preserved.
fn eval_args(
    ev: &mut Evaluator,
    cx: &mut EvalCx,
    arena: &ExprArena,
    builtin: Builtin,
    args: &[ExprId],
    pos: RowCol,
) {
    for (i, &a) in args.iter().enumerate() {
        let mut v = if requires_lvalue(builtin, i) {
            ev.eval_addr(cx, arena, a)
        } else if let &ExprKind::TypeRef(t) = &arena.get(a).kind {
            Value {
                mode: ValueMode::TypeRef,
                ty: t,
                val: ConstValue::None,
            }
        } else {
            ev.eval(cx, arena, a)
        };
        if v.is_const()
            && args[i + 1..]
                .iter()
                .any(|&later| !cx.model.is_const_expr(arena, later))
        {
            ev.push_mil_stack(cx, &mut v, pos);
        }
        ev.push(v);
    }
}

/// Emit (or fold) a builtin call. `ret` is the result type computed by
/// [`check_args`]; the returned value is the synthesised result (a
/// no-value for proper procedures).
#[allow(clippy::too_many_lines)]
pub(crate) fn call(
    ev: &mut Evaluator,
    cx: &mut EvalCx,
    arena: &ExprArena,
    builtin: Builtin,
    args: &[ExprId],
    ret: TypeId,
    pos: RowCol,
) -> Value {
    if ret == TypeId::NO_TYPE && !builtin.is_procedure() {
        // check_args failed; poison
        return Value::none();
    }

    // type-level builtins never evaluate their argument
    match builtin {
        Builtin::Len => {
            let t = cx.model.deref(arena.ty(args[0]));
            let arr = cx.model.pointer_base(t).unwrap_or(t);
            let len = match cx.model.type_(arr).kind {
                TypeKind::Array { len, .. } => len,
                _ => 0,
            };
            return Value::constant(ret, ConstValue::UInt(u64::from(len)));
        }
        Builtin::Size | Builtin::Bits => {
            let t = arena.ty(args[0]);
            let size = cx.model.size_of(t).unwrap_or(0);
            let v = if builtin == Builtin::Size { size } else { size * 8 };
            return Value::constant(ret, ConstValue::UInt(v));
        }
        Builtin::Default => {
            return match const_of_type(cx, ret, pos) {
                Some(val) => Value::constant(ret, val),
                None => Value::none(),
            };
        }
        Builtin::Strlen => {
            if let ExprKind::Literal(ConstValue::Str(s)) = &arena.get(args[0]).kind {
                return Value::constant(ret, ConstValue::UInt(s.len() as u64));
            }
            return Value::none();
        }
        Builtin::Max | Builtin::Min if args.len() == 1 => {
            let t = match &arena.get(args[0]).kind {
                ExprKind::TypeRef(t) => *t,
                _ => arena.ty(args[0]),
            };
            return match numeric_limit(cx, t, builtin == Builtin::Max, pos) {
                Some(val) => Value::constant(ret, val),
                None => Value::none(),
            };
        }
        _ => {}
    }

    eval_args(ev, cx, arena, builtin, args, pos);

    match builtin {
        Builtin::BitAnd | Builtin::BitOr | Builtin::BitXor => bit_arith(ev, cx, builtin, ret, pos),
        Builtin::BitNot => {
            let v = ev.pop();
            if v.is_const() {
                let w = cx.model.width(ret);
                let b = v.val.as_u64().unwrap_or(0);
                return Value::constant(ret, ConstValue::UInt(!b & mask(w)));
            }
            cx.out.not_();
            Value::runtime(ret)
        }
        Builtin::BitShl | Builtin::BitShr | Builtin::BitAsr => bit_shift(ev, cx, builtin, ret, pos),
        Builtin::Abs => {
            let v = ev.pop();
            let t = cx.model.deref(ret);
            let ty_is_real = cx.model.type_(t).is_real();
            if v.is_const() {
                let val = if ty_is_real {
                    ConstValue::Real(v.val.as_f64().unwrap_or(0.0).abs())
                } else if cx.model.type_(t).is_uint() {
                    v.val.clone()
                } else {
                    ConstValue::Int(v.val.as_i64().unwrap_or(0).wrapping_abs())
                };
                return Value::constant(ret, val);
            }
            if cx.model.type_(t).is_uint() {
                return Value::runtime(ret);
            }
            cx.out.dup_();
            if ty_is_real {
                cx.out.ldc_r8(0.0);
            } else if cx.model.width(t) > 32 {
                cx.out.ldc_i8(0);
            } else {
                cx.out.ldc_i4(0);
            }
            cx.out.clt_();
            cx.out.if_();
            cx.out.then_();
            cx.out.neg_();
            cx.out.else_();
            cx.out.end_();
            Value::runtime(ret)
        }
        Builtin::Odd => {
            let mut v = ev.pop();
            if v.is_const() {
                let odd = v.val.as_i64().unwrap_or(0) & 1 == 1;
                return Value::constant(TypeId::BOOL, ConstValue::Bool(odd));
            }
            ev.push_mil_stack(cx, &mut v, pos);
            cx.out.ldc_i4(1);
            cx.out.and_();
            cx.out.ldc_i4(1);
            cx.out.ceq_();
            Value::runtime(TypeId::BOOL)
        }
        Builtin::Cap => {
            let v = ev.pop();
            match &v.val {
                ConstValue::Char(c) if v.is_const() => {
                    Value::constant(TypeId::CHAR, ConstValue::Char(c.to_ascii_uppercase()))
                }
                _ => {
                    cx.error(
                        DiagnosticKind::Type,
                        pos,
                        "CAP requires a constant argument on this target",
                    );
                    Value::none()
                }
            }
        }
        Builtin::Floor => {
            let v = ev.pop();
            if v.is_const() {
                let r = v.val.as_f64().unwrap_or(0.0);
                return Value::constant(ret, ConstValue::Int(r.floor() as i64));
            }
            cx.out.conv_(MilSize::I8);
            Value::runtime(ret)
        }
        Builtin::Chr | Builtin::Ord | Builtin::Flt | Builtin::Long | Builtin::Short
        | Builtin::Signed | Builtin::Unsigned => {
            let mut v = ev.pop();
            ev.coerce_to(cx, &mut v, ret);
            v.ty = ret;
            v
        }
        Builtin::Cast => {
            let _target = ev.pop();
            let mut v = ev.pop();
            if v.is_const() {
                let bits = v.val.bits().unwrap_or(0);
                let t = cx.model.deref(ret);
                let ty = cx.model.type_(t);
                let w = cx.model.width(t);
                let val = if ty.is_uint() || ty.is_set() {
                    if ty.is_set() {
                        ConstValue::Set(bits as u32)
                    } else {
                        ConstValue::UInt(bits & mask(w))
                    }
                } else if ty.is_real() {
                    if t == TypeId::FLOAT32 {
                        ConstValue::Real(f64::from(f32::from_bits(bits as u32)))
                    } else {
                        ConstValue::Real(f64::from_bits(bits))
                    }
                } else if matches!(ty.kind, TypeKind::Char) {
                    ConstValue::Char(bits as u8)
                } else if matches!(ty.kind, TypeKind::Bool) {
                    ConstValue::Bool(bits != 0)
                } else {
                    ConstValue::Int(wrap_i(bits as i64, w.max(32)))
                };
                return Value::constant(ret, val);
            }
            let from = mil_size_of(cx.model, v.ty);
            let to = mil_size_of(cx.model, ret);
            if from != to {
                cx.out.conv_(to);
            }
            v.ty = ret;
            v
        }
        Builtin::Max | Builtin::Min => {
            let b = ev.pop();
            let a = ev.pop();
            if a.is_const() && b.is_const() {
                let take_a = match (a.val.as_f64(), b.val.as_f64()) {
                    (Some(x), Some(y)) => {
                        if builtin == Builtin::Max {
                            x >= y
                        } else {
                            x <= y
                        }
                    }
                    _ => true,
                };
                return if take_a {
                    Value::constant(ret, a.val)
                } else {
                    Value::constant(ret, b.val)
                };
            }
            cx.error(
                DiagnosticKind::Type,
                pos,
                "MAX and MIN require constant arguments on this target",
            );
            Value::none()
        }
        Builtin::Getenv => {
            let mut v = ev.pop();
            ev.push_mil_stack(cx, &mut v, pos);
            cx.out.call_(MilQuali::runtime("getenv"), 1, true);
            Value::runtime(TypeId::INTPTR)
        }
        Builtin::Setenv => {
            let mut val = ev.pop();
            let mut name = ev.pop();
            ev.push_mil_stack(cx, &mut name, pos);
            ev.push_mil_stack(cx, &mut val, pos);
            cx.out.call_(MilQuali::runtime("setenv"), 2, false);
            no_value()
        }
        Builtin::Halt => {
            let mut v = ev.pop();
            ev.push_mil_stack(cx, &mut v, pos);
            ev.coerce_to(cx, &mut v, TypeId::INT32);
            cx.out.call_(MilQuali::runtime("halt"), 1, false);
            no_value()
        }
        Builtin::Raise => {
            let mut v = ev.pop();
            ev.push_mil_stack(cx, &mut v, pos);
            cx.out.call_(MilQuali::runtime("raise"), 1, false);
            no_value()
        }
        Builtin::Assert => assert_(ev, cx, pos),
        Builtin::Inc | Builtin::Dec => inc_dec(ev, cx, args.len(), builtin == Builtin::Inc, pos),
        Builtin::Incl | Builtin::Excl => incl_excl(ev, cx, builtin == Builtin::Incl, pos),
        Builtin::New => new_(ev, cx, args.len(), pos),
        Builtin::Dispose => {
            let mut v = ev.pop();
            ev.push_mil_stack(cx, &mut v, pos);
            cx.out.free_();
            no_value()
        }
        Builtin::Print | Builtin::Println => print_(ev, cx, builtin == Builtin::Println, pos),
        Builtin::Pcall => {
            let n = args.len() as u32;
            // constants left on the evaluator stack trail all runtime
            // code, so materialising them in source order is safe
            let mut vals: Vec<Value> = (0..n).map(|_| ev.pop()).collect();
            vals.reverse();
            for v in &mut vals {
                ev.push_mil_stack(cx, v, pos);
            }
            cx.out.call_(MilQuali::runtime("pcall"), n, false);
            no_value()
        }
        Builtin::Vararg | Builtin::Varargs => Value::none(),
        Builtin::Len
        | Builtin::Size
        | Builtin::Bits
        | Builtin::Default
        | Builtin::Strlen => unreachable!("handled above"),
    }
}

fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

fn bit_arith(ev: &mut Evaluator, cx: &mut EvalCx, b: Builtin, ret: TypeId, pos: RowCol) -> Value {
    let mut rhs = ev.pop();
    let mut lhs = ev.pop();
    if lhs.is_const() && rhs.is_const() {
        let w = cx.model.width(ret);
        let a = lhs.val.as_u64().unwrap_or(0);
        let c = rhs.val.as_u64().unwrap_or(0);
        let r = match b {
            Builtin::BitAnd => a & c,
            Builtin::BitOr => a | c,
            Builtin::BitXor => a ^ c,
            _ => unreachable!(),
        };
        return Value::constant(ret, ConstValue::UInt(r & mask(w)));
    }
    ev.push_mil_stack(cx, &mut lhs, pos);
    ev.push_mil_stack(cx, &mut rhs, pos);
    match b {
        Builtin::BitAnd => cx.out.and_(),
        Builtin::BitOr => cx.out.or_(),
        Builtin::BitXor => cx.out.xor_(),
        _ => unreachable!(),
    }
    Value::runtime(ret)
}

fn bit_shift(ev: &mut Evaluator, cx: &mut EvalCx, b: Builtin, ret: TypeId, pos: RowCol) -> Value {
    let mut rhs = ev.pop();
    let mut lhs = ev.pop();
    if lhs.is_const() && rhs.is_const() {
        let w = cx.model.width(ret);
        let a = lhs.val.as_u64().unwrap_or(0);
        let sh = (rhs.val.as_u64().unwrap_or(0) % u64::from(w)) as u32;
        let r = match b {
            Builtin::BitShl => a << sh,
            Builtin::BitShr => a >> sh,
            Builtin::BitAsr => {
                let signed = wrap_i(a as i64, w);
                (signed >> sh) as u64
            }
            _ => unreachable!(),
        };
        return Value::constant(ret, ConstValue::UInt(r & mask(w)));
    }
    ev.push_mil_stack(cx, &mut lhs, pos);
    ev.push_mil_stack(cx, &mut rhs, pos);
    match b {
        Builtin::BitShl => cx.out.shl_(),
        Builtin::BitShr => cx.out.shr_(),
        Builtin::BitAsr => cx.out.sar_(),
        _ => unreachable!(),
    }
    Value::runtime(ret)
}

fn assert_(ev: &mut Evaluator, cx: &mut EvalCx, pos: RowCol) -> Value {
    let mut file = ev.pop();
    let mut line = ev.pop();
    let mut cond = ev.pop();
    ev.push_mil_stack(cx, &mut cond, pos);
    ev.push_mil_stack(cx, &mut line, pos);
    ev.push_mil_stack(cx, &mut file, pos);
    cx.out.call_(MilQuali::runtime("assert"), 3, false);
    no_value()
}

fn inc_dec(ev: &mut Evaluator, cx: &mut EvalCx, nargs: usize, inc: bool, pos: RowCol) -> Value {
    let step = if nargs == 2 { Some(ev.pop()) } else { None };
    let what = ev.pop();
    // a runtime step is saved to a temp so the address stays on top
    let step_tmp = match &step {
        Some(s) if !s.is_const() => {
            let tmp = cx.out.add_local(&format!("$t{}", ev.temps), MilQuali::plain("int32"));
            ev.temps += 1;
            cx.out.stloc_(tmp);
            Some(tmp)
        }
        _ => None,
    };

    let t = cx.model.deref(what.ty);
    if cx.model.type_(t).is_integer() {
        let wide = cx.model.width(t) > 32;
        let size = mil_size_of(cx.model, t);
        cx.out.dup_();
        cx.out.ldind_(size);
        match (&step, step_tmp) {
            (Some(s), None) => {
                let v = s.val.as_i64().unwrap_or(1);
                if wide {
                    cx.out.ldc_i8(v);
                } else {
                    cx.out.ldc_i4(v as i32);
                }
            }
            (Some(_), Some(tmp)) => {
                cx.out.ldloc_(tmp);
                if wide {
                    cx.out.conv_(MilSize::I8);
                }
            }
            (None, _) => {
                if wide {
                    cx.out.ldc_i8(1);
                } else {
                    cx.out.ldc_i4(1);
                }
            }
        }
        if inc {
            cx.out.add_();
        } else {
            cx.out.sub_();
        }
        cx.out.stind_(size);
        return no_value();
    }
    match cx.model.type_(t).kind.clone() {
        TypeKind::ConstEnum { .. } => {
            cx.out.dup_();
            cx.out.ldind_(MilSize::I4);
            cx.out.ldc_i4(1);
            if inc {
                cx.out.add_();
            } else {
                cx.out.sub_();
            }
            cx.out.stind_(MilSize::I4);
        }
        TypeKind::Pointer { base } => {
            cx.out.dup_();
            cx.out.ldind_(MilSize::IntPtr);
            match (&step, step_tmp) {
                (Some(s), None) => cx.out.ldc_i4(s.val.as_i64().unwrap_or(1) as i32),
                (Some(_), Some(tmp)) => cx.out.ldloc_(tmp),
                (None, _) => cx.out.ldc_i4(1),
            }
            if !inc {
                cx.out.neg_();
            }
            let q = cx.type_quali(base);
            cx.out.ptroff_(q);
            cx.out.stind_(MilSize::IntPtr);
        }
        _ => {
            cx.error(DiagnosticKind::Type, pos, "invalid argument types");
        }
    }
    no_value()
}

fn incl_excl(ev: &mut Evaluator, cx: &mut EvalCx, incl: bool, pos: RowCol) -> Value {
    let elem = ev.pop();
    let _set_addr = ev.pop();
    // a runtime element sits above the set address; park it in a temp
    let elem_tmp = if elem.is_const() {
        None
    } else {
        let tmp = cx.out.add_local(&format!("$t{}", ev.temps), MilQuali::plain("uint32"));
        ev.temps += 1;
        cx.out.stloc_(tmp);
        Some(tmp)
    };
    cx.out.dup_();
    cx.out.ldind_(MilSize::U4);
    match elem_tmp {
        None => {
            let bit = elem.val.as_u64().unwrap_or(0);
            if bit > 31 {
                cx.error(DiagnosticKind::Const, pos, "set element out of range 0..31");
                return no_value();
            }
            cx.out.ldc_i4((1u32 << bit) as i32);
        }
        Some(tmp) => {
            cx.out.ldc_i4(1);
            cx.out.ldloc_(tmp);
            cx.out.shl_();
        }
    }
    if incl {
        cx.out.or_();
    } else {
        cx.out.not_();
        cx.out.and_();
    }
    cx.out.stind_(MilSize::U4);
    no_value()
}

fn new_(ev: &mut Evaluator, cx: &mut EvalCx, nargs: usize, pos: RowCol) -> Value {
    let len = if nargs == 2 { Some(ev.pop()) } else { None };
    let what = ev.pop();
    let Some(base) = cx.model.pointer_base(what.ty) else {
        return no_value();
    };
    let base_kind = cx.model.type_(base).kind.clone();
    match base_kind {
        TypeKind::Record { .. } | TypeKind::Object { .. } | TypeKind::Union { .. } => {
            let q = cx.type_quali(base);
            cx.out.newobj_(q);
            cx.out.stind_(MilSize::IntPtr);
        }
        TypeKind::Array { base: elem, len: fixed } if fixed > 0 => {
            cx.out.ldc_i4(fixed as i32);
            let q = cx.type_quali(elem);
            cx.out.newarr_(q);
            cx.out.stind_(MilSize::IntPtr);
        }
        TypeKind::Array { base: elem, .. } => {
            if let Some(mut l) = len {
                ev.push_mil_stack(cx, &mut l, pos);
            }
            let q = cx.type_quali(elem);
            cx.out.newarr_(q);
            cx.out.stind_(MilSize::IntPtr);
        }
        _ => {}
    }
    no_value()
}

fn print_(ev: &mut Evaluator, cx: &mut EvalCx, ln: bool, pos: RowCol) -> Value {
    let mut v = ev.pop();
    ev.push_mil_stack(cx, &mut v, pos);
    let t = cx.model.deref(v.ty);
    let ty_kind = cx.model.type_(t).kind.clone();
    match ty_kind {
        TypeKind::ConstEnum { .. } => {
            cx.out.conv_(MilSize::I8);
            cx.out.call_(MilQuali::runtime("printI8"), 1, false);
        }
        _ if cx.model.type_(t).is_int() => {
            if t != TypeId::INT64 {
                cx.out.conv_(MilSize::I8);
            }
            cx.out.call_(MilQuali::runtime("printI8"), 1, false);
        }
        _ if cx.model.type_(t).is_uint() => {
            if t != TypeId::UINT64 {
                cx.out.conv_(MilSize::U8);
            }
            cx.out.call_(MilQuali::runtime("printU8"), 1, false);
        }
        _ if cx.model.type_(t).is_real() => {
            if t != TypeId::FLOAT64 {
                cx.out.conv_(MilSize::R8);
            }
            cx.out.call_(MilQuali::runtime("printF8"), 1, false);
        }
        TypeKind::Char => {
            cx.out.call_(MilQuali::runtime("printCh"), 1, false);
        }
        TypeKind::Bool => {
            cx.out.call_(MilQuali::runtime("printBool"), 1, false);
        }
        TypeKind::Set => {
            cx.out.call_(MilQuali::runtime("printSet"), 1, false);
        }
        _ if cx.model.is_text(t) => {
            cx.out.call_(MilQuali::runtime("printStr"), 1, false);
        }
        _ => {
            cx.error(
                DiagnosticKind::Type,
                pos,
                "given type not supported with PRINT or PRINTLN",
            );
        }
    }
    if ln {
        cx.out.ldc_i4(0xA);
        cx.out.call_(MilQuali::runtime("printCh"), 1, false);
    }
    no_value()
}
