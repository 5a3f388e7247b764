//! Expression nodes.
//!
//! Expressions live in their own arena, separate from types and
//! declarations: they are only needed between parsing a statement and
//! emitting its code, and the arena is drained once a module has been
//! generated. Nodes are typed at parse time; constant folding happens
//! later in the evaluator.

use crate::{Builtin, ConstValue, DeclId, RowCol, TypeId};

/// Handle into an [`ExprArena`].
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ExprId(u32);

impl ExprId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Debug for ExprId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExprId({})", self.0)
    }
}

/// Binary arithmetic and logic operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// `/`, real division.
    FDiv,
    /// `DIV`, integer division.
    IDiv,
    Mod,
    /// `&`, short-circuit boolean and; set intersection on sets.
    And,
    /// `OR`; set union on sets.
    Or,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    /// `~`, boolean negation; set complement on sets.
    Not,
}

/// Relational operators; all yield `BOOL`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Neq,
    Lt,
    Leq,
    Gt,
    Geq,
    /// Set membership.
    In,
}

/// One element of a set constructor, either a single bit or a range.
#[derive(Copy, Clone, Debug)]
pub struct SetElem {
    pub lo: ExprId,
    pub hi: Option<ExprId>,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Literal(ConstValue),
    /// Reference to a resolved declaration (variable, constant,
    /// parameter, procedure, enum member).
    DeclRef(DeclId),
    /// Record/object field selection.
    Select { lhs: ExprId, field: DeclId },
    Index { lhs: ExprId, index: ExprId },
    /// Pointer dereference `p^`.
    Deref { lhs: ExprId },
    Unary { op: UnOp, arg: ExprId },
    Binary { op: BinOp, lhs: ExprId, rhs: ExprId },
    Relation { op: RelOp, lhs: ExprId, rhs: ExprId },
    /// Procedure call; `callee` is a designator.
    Call { callee: ExprId, args: Vec<ExprId> },
    BuiltinCall { builtin: Builtin, args: Vec<ExprId> },
    /// Implicit conversion inserted during type checking; the target is
    /// the node's own type.
    AutoCast { arg: ExprId },
    /// A type in expression position (CAST, SIZE, DEFAULT, meta actuals).
    TypeRef(TypeId),
    SetCtor { elems: Vec<SetElem> },
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: TypeId,
    pub pos: RowCol,
}

/// Arena for expression nodes, drained after code generation.
#[derive(Debug, Default)]
pub struct ExprArena {
    nodes: Vec<Expr>,
}

impl ExprArena {
    pub fn new() -> Self {
        ExprArena::default()
    }

    pub fn alloc(&mut self, kind: ExprKind, ty: TypeId, pos: RowCol) -> ExprId {
        let id = u32::try_from(self.nodes.len())
            .unwrap_or_else(|_| panic!("expression arena exceeded u32::MAX nodes"));
        self.nodes.push(Expr { kind, ty, pos });
        ExprId(id)
    }

    #[inline]
    pub fn get(&self, id: ExprId) -> &Expr {
        &self.nodes[id.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.nodes[id.index()]
    }

    #[inline]
    pub fn ty(&self, id: ExprId) -> TypeId {
        self.nodes[id.index()].ty
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop all nodes; handles become invalid.
    pub fn drain(&mut self) {
        self.nodes.clear();
    }

    /// Wrap `arg` in an auto-cast to `target`. No-op if already typed so.
    pub fn auto_cast(&mut self, arg: ExprId, target: TypeId) -> ExprId {
        if self.ty(arg) == target {
            return arg;
        }
        let pos = self.get(arg).pos;
        self.alloc(ExprKind::AutoCast { arg }, target, pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_drain() {
        let mut arena = ExprArena::new();
        let a = arena.alloc(
            ExprKind::Literal(ConstValue::Int(1)),
            TypeId::INT32,
            RowCol::NONE,
        );
        assert_eq!(arena.ty(a), TypeId::INT32);
        arena.drain();
        assert!(arena.is_empty());
    }

    #[test]
    fn test_auto_cast_skips_same_type() {
        let mut arena = ExprArena::new();
        let a = arena.alloc(
            ExprKind::Literal(ConstValue::UInt(1)),
            TypeId::UINT32,
            RowCol::NONE,
        );
        assert_eq!(arena.auto_cast(a, TypeId::UINT32), a);
        let widened = arena.auto_cast(a, TypeId::UINT64);
        assert_ne!(widened, a);
        assert_eq!(arena.ty(widened), TypeId::UINT64);
    }
}
