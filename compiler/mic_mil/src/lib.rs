//! MIL, the Micron intermediate language.
//!
//! MIL is a CIL-like stack machine with explicit operand sizes,
//! structured control flow and module-qualified names. This crate holds
//! the op set, the in-memory module tree, the [`MilEmitter`] that
//! enforces structural invariants while code is produced, and the
//! renderer strategy: [`InMemRenderer`] builds `MilModule` trees for
//! downstream passes, [`IlAsmRenderer`] writes the textual exchange
//! format. Both sit behind [`MilRenderer`], and a `MilModule` can be
//! replayed through any renderer via [`MilModule::render`].

mod emitter;
mod module;
mod op;
mod render;

pub use emitter::MilEmitter;
pub use module::{
    MilAggKind, MilField, MilItem, MilLocal, MilModule, MilProcKind, MilProcedure,
    MilTypeDefKind,
};
pub use op::{MilConst, MilOp, MilQuali, MilSize};
pub use render::{IlAsmRenderer, InMemRenderer, MilRenderer};
