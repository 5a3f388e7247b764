//! The per-compilation AST model.
//!
//! Owns the type and declaration arenas, the global scope (basic types
//! and builtins) and the list of compiled modules. One `AstModel` exists
//! per compilation session so that cross-module declaration references
//! stay valid; everything is dropped together at session end.

use crate::{
    Builtin, Decl, DeclData, DeclId, DeclKind, Expr, ExprArena, ExprId, ExprKind, RowCol, Symbol,
    Symbols, Type, TypeId, TypeKind, Visibility,
};

/// Basic types exposed by name in the global scope.
const NAMED_BASICS: &[(&str, TypeId)] = &[
    ("BOOL", TypeId::BOOL),
    ("CHAR", TypeId::CHAR),
    ("INT8", TypeId::INT8),
    ("INT16", TypeId::INT16),
    ("INT32", TypeId::INT32),
    ("INT64", TypeId::INT64),
    ("UINT8", TypeId::UINT8),
    ("UINT16", TypeId::UINT16),
    ("UINT32", TypeId::UINT32),
    ("UINT64", TypeId::UINT64),
    ("FLOAT32", TypeId::FLOAT32),
    ("FLOAT64", TypeId::FLOAT64),
    ("SET", TypeId::SET),
    ("INTPTR", TypeId::INTPTR),
];

pub struct AstModel {
    types: Vec<Type>,
    decls: Vec<Decl>,
    globals: DeclId,
    modules: Vec<DeclId>,
}

impl AstModel {
    /// Create a model with the basic-type registry and the global scope
    /// seeded (one canonical type node per basic kind, one declaration
    /// per named basic type and per builtin).
    pub fn new(symbols: &Symbols) -> Self {
        let mut model = AstModel {
            types: Vec::with_capacity(64),
            decls: Vec::with_capacity(64),
            globals: DeclId(0),
            modules: Vec::new(),
        };

        for kind in [
            TypeKind::NoType,
            TypeKind::Any,
            TypeKind::Nil,
            TypeKind::Bool,
            TypeKind::Char,
            TypeKind::Int8,
            TypeKind::Int16,
            TypeKind::Int32,
            TypeKind::Int64,
            TypeKind::Uint8,
            TypeKind::Uint16,
            TypeKind::Uint32,
            TypeKind::Uint64,
            TypeKind::Float32,
            TypeKind::Float64,
            TypeKind::IntPtr,
            TypeKind::DblIntPtr,
            TypeKind::Set,
            TypeKind::StringLit,
            TypeKind::ByteArrayLit,
        ] {
            model.types.push(Type::new(kind, RowCol::NONE));
        }
        debug_assert_eq!(model.types.len() as u32, TypeId::BASIC_COUNT);

        let globals = Decl::new(DeclKind::Module, symbols.intern("<globals>"), RowCol::NONE);
        model.decls.push(globals);

        for &(name, ty) in NAMED_BASICS {
            let mut d = Decl::new(DeclKind::TypeDecl, symbols.intern(name), RowCol::NONE);
            d.ty = ty;
            d.visi = Visibility::Public;
            d.outer = Some(model.globals);
            let id = model.push_decl(d);
            model.decls[0].members.push(id);
        }
        for &b in Builtin::ALL {
            let mut d = Decl::new(DeclKind::Builtin, symbols.intern(b.name()), RowCol::NONE);
            d.visi = Visibility::Public;
            d.outer = Some(model.globals);
            d.data = DeclData::Builtin(b);
            let id = model.push_decl(d);
            model.decls[0].members.push(id);
        }

        model
    }

    // ---- arenas ---------------------------------------------------------

    fn push_decl(&mut self, d: Decl) -> DeclId {
        let id = u32::try_from(self.decls.len())
            .unwrap_or_else(|_| panic!("declaration arena exceeded u32::MAX nodes"));
        self.decls.push(d);
        DeclId(id)
    }

    pub fn new_type(&mut self, ty: Type) -> TypeId {
        if let TypeKind::Pointer { base } = ty.kind {
            debug_assert!(base != TypeId::NO_TYPE, "pointer base must be set");
        }
        let id = u32::try_from(self.types.len())
            .unwrap_or_else(|_| panic!("type arena exceeded u32::MAX nodes"));
        self.types.push(ty);
        TypeId(id)
    }

    /// Allocate a declaration and link it into `outer`'s member list.
    /// Duplicate detection is the caller's job (it has the position of
    /// the second definition).
    pub fn new_decl(&mut self, mut d: Decl, outer: Option<DeclId>) -> DeclId {
        d.outer = outer;
        let id = self.push_decl(d);
        if let Some(scope) = outer {
            self.decls[scope.index()].members.push(id);
        }
        id
    }

    #[inline]
    pub fn type_(&self, id: TypeId) -> &Type {
        &self.types[id.index()]
    }

    #[inline]
    pub fn type_mut(&mut self, id: TypeId) -> &mut Type {
        &mut self.types[id.index()]
    }

    #[inline]
    pub fn decl(&self, id: DeclId) -> &Decl {
        &self.decls[id.index()]
    }

    #[inline]
    pub fn decl_mut(&mut self, id: DeclId) -> &mut Decl {
        &mut self.decls[id.index()]
    }

    pub fn globals(&self) -> DeclId {
        self.globals
    }

    // ---- modules --------------------------------------------------------

    pub fn add_module(&mut self, module: DeclId) {
        debug_assert_eq!(self.decl(module).kind, DeclKind::Module);
        self.modules.push(module);
    }

    pub fn modules(&self) -> &[DeclId] {
        &self.modules
    }

    pub fn find_module_by_name(&self, name: Symbol) -> Option<DeclId> {
        self.modules
            .iter()
            .copied()
            .find(|&m| self.decl(m).name == name)
    }

    // ---- scopes ---------------------------------------------------------

    /// Look a name up in one scope; names are unique within it.
    pub fn find_member(&self, scope: DeclId, name: Symbol) -> Option<DeclId> {
        self.decl(scope)
            .members
            .iter()
            .copied()
            .find(|&d| self.decl(d).name == name)
    }

    // ---- type helpers ---------------------------------------------------

    /// Follow `NameRef` links to the underlying type. Unresolved refs
    /// yield themselves; callers treat them as opaque.
    pub fn deref(&self, mut t: TypeId) -> TypeId {
        loop {
            match self.type_(t).kind {
                TypeKind::NameRef {
                    resolved: Some(next),
                    ..
                } => t = next,
                _ => return t,
            }
        }
    }

    /// Base type of a pointer, `NameRef`-transparent on both sides.
    pub fn pointer_base(&self, t: TypeId) -> Option<TypeId> {
        match self.type_(self.deref(t)).kind {
            TypeKind::Pointer { base } => Some(self.deref(base)),
            _ => None,
        }
    }

    /// Element type and declared length of an array (`len == 0`: open).
    pub fn array_base(&self, t: TypeId) -> Option<(TypeId, u32)> {
        match self.type_(self.deref(t)).kind {
            TypeKind::Array { base, len } => Some((self.deref(base), len)),
            _ => None,
        }
    }

    /// Char array, directly or behind one pointer; yields the length.
    pub fn char_array(&self, t: TypeId) -> Option<u32> {
        let t = self.deref(t);
        let inner = self.pointer_base(t).unwrap_or(t);
        match self.array_base(inner) {
            Some((base, len)) if base == TypeId::CHAR => Some(len),
            _ => None,
        }
    }

    /// Text: a char scalar, a string literal or a char array.
    pub fn is_text(&self, t: TypeId) -> bool {
        let t = self.deref(t);
        self.type_(t).is_text_scalar() || self.char_array(t).is_some()
    }

    /// Numeric bit width after `NameRef` resolution.
    pub fn width(&self, t: TypeId) -> u32 {
        self.type_(self.deref(t)).width()
    }

    /// The signed integer type of a given bit width.
    pub fn int_type(width: u32) -> TypeId {
        match width {
            8 => TypeId::INT8,
            16 => TypeId::INT16,
            32 => TypeId::INT32,
            _ => TypeId::INT64,
        }
    }

    /// The unsigned integer type of a given bit width.
    pub fn uint_type(width: u32) -> TypeId {
        match width {
            8 => TypeId::UINT8,
            16 => TypeId::UINT16,
            32 => TypeId::UINT32,
            _ => TypeId::UINT64,
        }
    }

    /// Storage size in bytes; `None` for open arrays, literals and other
    /// sizeless types. Layout is packed; the backend may align.
    pub fn size_of(&self, t: TypeId) -> Option<u64> {
        let t = self.deref(t);
        let ty = self.type_(t);
        match &ty.kind {
            TypeKind::Bool | TypeKind::Char | TypeKind::Int8 | TypeKind::Uint8 => Some(1),
            TypeKind::Int16 | TypeKind::Uint16 => Some(2),
            TypeKind::Int32 | TypeKind::Uint32 | TypeKind::Float32 | TypeKind::Set => Some(4),
            TypeKind::Int64 | TypeKind::Uint64 | TypeKind::Float64 | TypeKind::IntPtr => Some(8),
            TypeKind::DblIntPtr => Some(16),
            TypeKind::Pointer { .. } | TypeKind::Proc { .. } => Some(8),
            TypeKind::ConstEnum { .. } => Some(4),
            TypeKind::Array { base, len } if *len > 0 => {
                self.size_of(*base).map(|s| s * u64::from(*len))
            }
            TypeKind::Record { fields } | TypeKind::Object { fields, .. } => {
                let mut total = 0;
                for &f in fields {
                    total += self.size_of(self.decl(f).ty)?;
                }
                Some(total)
            }
            TypeKind::Union { fields } => {
                let mut max = 0;
                for &f in fields {
                    max = max.max(self.size_of(self.decl(f).ty)?);
                }
                Some(max)
            }
            _ => None,
        }
    }

    /// Name of a type through its owning declaration, if named.
    pub fn type_name(&self, t: TypeId) -> Option<Symbol> {
        let decl = self.type_(t).decl?;
        let d = self.decl(decl);
        match d.kind {
            DeclKind::TypeDecl => Some(d.name),
            _ => None,
        }
    }

    /// The module a declaration ultimately belongs to.
    pub fn enclosing_module(&self, mut d: DeclId) -> Option<DeclId> {
        loop {
            let decl = self.decl(d);
            if decl.kind == DeclKind::Module && d != self.globals {
                return Some(d);
            }
            d = decl.outer?;
        }
    }

    // ---- constness ------------------------------------------------------

    /// Structural constness: whether evaluating `e` can fold without
    /// emitting code. Type-based builtins (LEN, SIZE, BITS, DEFAULT,
    /// MIN/MAX over a type) are const regardless of their argument.
    pub fn is_const_expr(&self, arena: &ExprArena, e: ExprId) -> bool {
        let Expr { kind, ty, .. } = arena.get(e);
        match kind {
            ExprKind::Literal(_) | ExprKind::TypeRef(_) => true,
            ExprKind::DeclRef(d) => matches!(
                self.decl(*d).kind,
                DeclKind::ConstDecl | DeclKind::EnumMember
            ),
            ExprKind::AutoCast { arg } => self.is_const_expr(arena, *arg),
            ExprKind::Unary { arg, .. } => self.is_const_expr(arena, *arg),
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Relation { lhs, rhs, .. } => {
                self.is_const_expr(arena, *lhs) && self.is_const_expr(arena, *rhs)
            }
            ExprKind::SetCtor { elems } => elems.iter().all(|el| {
                self.is_const_expr(arena, el.lo)
                    && el.hi.map_or(true, |hi| self.is_const_expr(arena, hi))
            }),
            ExprKind::BuiltinCall { builtin, args } => match builtin {
                Builtin::Len => {
                    let arg = args.first().map(|&a| arena.ty(a)).unwrap_or(*ty);
                    let arr = self.pointer_base(arg).unwrap_or_else(|| self.deref(arg));
                    matches!(self.type_(arr).kind, TypeKind::Array { len, .. } if len > 0)
                }
                Builtin::Size | Builtin::Bits | Builtin::Default => true,
                Builtin::Min | Builtin::Max if args.len() == 1 => true,
                _ => {
                    builtin.may_fold()
                        && args.iter().all(|&a| self.is_const_expr(arena, a))
                }
            },
            ExprKind::Select { .. }
            | ExprKind::Index { .. }
            | ExprKind::Deref { .. }
            | ExprKind::Call { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> (Symbols, AstModel) {
        let syms = Symbols::new();
        let model = AstModel::new(&syms);
        (syms, model)
    }

    #[test]
    fn test_globals_seeded() {
        let (syms, model) = fresh();
        let bool_decl = model.find_member(model.globals(), syms.intern("BOOL")).unwrap();
        assert_eq!(model.decl(bool_decl).ty, TypeId::BOOL);
        let len = model.find_member(model.globals(), syms.intern("LEN")).unwrap();
        assert_eq!(model.decl(len).builtin(), Some(Builtin::Len));
    }

    #[test]
    fn test_name_ref_deref() {
        let (syms, mut model) = fresh();
        let quali = crate::Quali::plain(syms.intern("R"));
        let nref = model.new_type(Type::new(
            TypeKind::NameRef {
                quali,
                resolved: None,
            },
            RowCol::NONE,
        ));
        // unresolved: deref yields the placeholder itself
        assert_eq!(model.deref(nref), nref);
        if let TypeKind::NameRef { resolved, .. } = &mut model.type_mut(nref).kind {
            *resolved = Some(TypeId::INT32);
        }
        assert_eq!(model.deref(nref), TypeId::INT32);
    }

    #[test]
    fn test_size_of_array_and_record() {
        let (syms, mut model) = fresh();
        let arr = model.new_type(Type::new(
            TypeKind::Array {
                base: TypeId::INT32,
                len: 10,
            },
            RowCol::NONE,
        ));
        assert_eq!(model.size_of(arr), Some(40));

        let f1 = model.new_decl(
            {
                let mut d = Decl::new(DeclKind::Field, syms.intern("x"), RowCol::NONE);
                d.ty = TypeId::INT64;
                d
            },
            None,
        );
        let rec = model.new_type(Type::new(TypeKind::Record { fields: vec![f1] }, RowCol::NONE));
        assert_eq!(model.size_of(rec), Some(8));
        let open = model.new_type(Type::new(
            TypeKind::Array {
                base: TypeId::INT32,
                len: 0,
            },
            RowCol::NONE,
        ));
        assert_eq!(model.size_of(open), None);
    }

    #[test]
    fn test_char_array_detection() {
        let (_syms, mut model) = fresh();
        let arr = model.new_type(Type::new(
            TypeKind::Array {
                base: TypeId::CHAR,
                len: 16,
            },
            RowCol::NONE,
        ));
        assert_eq!(model.char_array(arr), Some(16));
        assert!(model.is_text(arr));
        let ptr = model.new_type(Type::new(TypeKind::Pointer { base: arr }, RowCol::NONE));
        assert_eq!(model.char_array(ptr), Some(16));
    }
}
