//! Declarations.
//!
//! Declarations form a tree: modules contain types, constants, variables
//! and procedures; records contain fields; procedures contain parameters
//! and locals. Within one scope names are unique.

use crate::{Builtin, ConstValue, RowCol, Symbol, TypeId};

/// Handle into the declaration arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct DeclId(pub(crate) u32);

impl DeclId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Debug for DeclId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeclId({})", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeclKind {
    Module,
    TypeDecl,
    ConstDecl,
    Import,
    Field,
    VarDecl,
    LocalDecl,
    ParamDecl,
    Procedure,
    /// Entry in the global scope for a built-in function or procedure.
    Builtin,
    /// Const-enum member.
    EnumMember,
}

/// Export marker on a declared identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Visibility {
    Private,
    ReadOnly,
    Public,
}

bitflags::bitflags! {
    /// Attribute bits on a declaration.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct DeclFlags: u16 {
        /// Forward procedure awaiting its completion.
        const FORWARD = 1 << 0;
        /// Externally implemented procedure; no body.
        const EXTERN = 1 << 1;
        /// Module compiled without meta actuals.
        const GENERIC = 1 << 2;
        /// This declaration owns its (anonymous) type node.
        const OWNS_TYPE = 1 << 3;
        /// VAR (by-reference) parameter.
        const VAR_PARAM = 1 << 4;
        /// Compiler-synthesised helper (temps, anonymous type names).
        const SYNTHESISED = 1 << 5;
    }
}

/// Compile-time argument of a parametric module import.
#[derive(Clone, Debug, PartialEq)]
pub enum MetaActual {
    Const(ConstValue, TypeId),
    Type(TypeId),
}

/// Identity of a module: dotted path plus meta actuals, compared
/// structurally.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportSpec {
    pub path: Vec<Symbol>,
    pub meta_actuals: Vec<MetaActual>,
}

impl ImportSpec {
    pub fn plain(path: Vec<Symbol>) -> Self {
        ImportSpec {
            path,
            meta_actuals: Vec::new(),
        }
    }
}

/// Per-kind payload.
#[derive(Clone, Debug, Default)]
pub enum DeclData {
    #[default]
    None,
    /// Module: instantiation suffix for IR emission (`$<N>` for
    /// parametric instances, empty otherwise).
    Module { suffix: String },
    /// Folded constant of a `ConstDecl`.
    Const(ConstValue),
    /// Import: the import spec and, once loaded, the imported module.
    Import {
        spec: ImportSpec,
        resolved: Option<DeclId>,
    },
    /// Emitter-assigned slot of a local or parameter.
    Slot(u32),
    /// Procedure link to its completing declaration when FORWARD.
    Procedure { forward_to: Option<DeclId> },
    Builtin(Builtin),
    /// Integer value of a const-enum member.
    EnumMember(i64),
}

/// One declaration node.
#[derive(Clone, Debug)]
pub struct Decl {
    pub kind: DeclKind,
    pub name: Symbol,
    pub visi: Visibility,
    pub ty: TypeId,
    pub pos: RowCol,
    /// Enclosing scope declaration.
    pub outer: Option<DeclId>,
    /// Scope members in declaration order: module members, record
    /// fields, procedure parameters-then-locals.
    pub members: Vec<DeclId>,
    pub flags: DeclFlags,
    pub data: DeclData,
}

impl Decl {
    pub fn new(kind: DeclKind, name: Symbol, pos: RowCol) -> Self {
        Decl {
            kind,
            name,
            visi: Visibility::Private,
            ty: TypeId::NO_TYPE,
            pos,
            outer: None,
            members: Vec::new(),
            flags: DeclFlags::default(),
            data: DeclData::None,
        }
    }

    pub fn is_public(&self) -> bool {
        self.visi == Visibility::Public
    }

    /// Emitter slot, for locals and parameters.
    pub fn slot(&self) -> u32 {
        match self.data {
            DeclData::Slot(n) => n,
            _ => 0,
        }
    }

    pub fn builtin(&self) -> Option<Builtin> {
        match self.data {
            DeclData::Builtin(b) => Some(b),
            _ => None,
        }
    }
}
