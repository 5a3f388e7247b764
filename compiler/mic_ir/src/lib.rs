//! Core data structures for the Micron compiler:
//! - `RowCol` source positions
//! - `Symbol` interned identifiers and the per-compilation interner
//! - `Token` and `TokenKind` for lexer output
//! - the type graph, declaration tree and expression arena (`AstModel`)
//! - compile-time `Value`s carried on the evaluator stack
//!
//! # Design
//!
//! - **Intern everything**: identifiers become `Symbol(u32)` with
//!   pointer-equality semantics.
//! - **Flatten everything**: types, declarations and expressions live in
//!   arenas and are referenced by `u32` handles (`TypeId`, `DeclId`,
//!   `ExprId`); no `Box` cycles. Cyclic shapes (pointer bases, forward
//!   references) are expressed through handles and by-name `NameRef`
//!   placeholders that the parser resolves at section boundaries.
//! - Arenas belong to one compilation session and are dropped together.

/// Compile-time assertion that a type has a specific size.
#[macro_export]
macro_rules! static_assert_size {
    ($ty:ty, $size:expr) => {
        const _: [(); $size] = [(); ::std::mem::size_of::<$ty>()];
    };
}

mod builtin;
mod decl;
mod expr;
mod model;
mod span;
mod symbol;
mod token;
mod types;
mod value;

pub use builtin::Builtin;
pub use decl::{Decl, DeclData, DeclFlags, DeclId, DeclKind, ImportSpec, MetaActual, Visibility};
pub use expr::{BinOp, Expr, ExprArena, ExprId, ExprKind, RelOp, SetElem, UnOp};
pub use model::AstModel;
pub use span::RowCol;
pub use symbol::{Symbol, Symbols};
pub use token::{Token, TokenKind, TokenPayload, TokenSource};
pub use types::{Quali, Type, TypeId, TypeKind};
pub use value::{ConstValue, Value, ValueMode};
