//! The in-memory MIL module tree: `MilModule → MilProcedure → MilOp`.

use crate::render::MilRenderer;
use crate::{MilConst, MilOp, MilQuali};

/// A named local or parameter slot.
#[derive(Clone, Debug)]
pub struct MilLocal {
    pub name: String,
    pub ty: MilQuali,
}

#[derive(Clone, Debug)]
pub struct MilField {
    pub name: String,
    pub ty: MilQuali,
    pub public: bool,
}

/// Body of a `type` item.
#[derive(Clone, Debug)]
pub enum MilTypeDefKind {
    Struct { fields: Vec<MilField> },
    Union { fields: Vec<MilField> },
    Object { fields: Vec<MilField> },
    Pointer { base: MilQuali },
    /// `len == 0` is an open array.
    Array { base: MilQuali, len: u32 },
    Alias { base: MilQuali },
    Enum { members: Vec<String> },
    ProcType { params: Vec<MilQuali>, ret: Option<MilQuali> },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MilProcKind {
    Normal,
    Extern,
    /// The module body, run at load time.
    ModuleInit,
}

#[derive(Clone, Debug)]
pub struct MilProcedure {
    pub name: String,
    pub public: bool,
    pub kind: MilProcKind,
    pub params: Vec<MilLocal>,
    pub locals: Vec<MilLocal>,
    pub ret: Option<MilQuali>,
    pub body: Vec<MilOp>,
}

impl MilProcedure {
    pub fn new(name: impl Into<String>, kind: MilProcKind) -> Self {
        MilProcedure {
            name: name.into(),
            public: false,
            kind,
            params: Vec::new(),
            locals: Vec::new(),
            ret: None,
            body: Vec::new(),
        }
    }
}

/// Module member in declaration order.
#[derive(Clone, Debug)]
pub enum MilItem {
    Type {
        name: String,
        public: bool,
        kind: MilTypeDefKind,
    },
    Const {
        name: String,
        ty: MilQuali,
        value: MilConst,
        public: bool,
    },
    Var {
        name: String,
        ty: MilQuali,
        public: bool,
    },
    Proc(MilProcedure),
}

/// One compiled module.
#[derive(Clone, Debug, Default)]
pub struct MilModule {
    pub name: String,
    pub source: String,
    pub imports: Vec<String>,
    pub items: Vec<MilItem>,
}

impl MilModule {
    /// Replay the module through a renderer, reproducing the call
    /// sequence the emitter originally made.
    pub fn render(&self, r: &mut dyn MilRenderer) {
        r.begin_module(&self.name, &self.source);
        for import in &self.imports {
            r.add_import(import);
        }
        for item in &self.items {
            match item {
                MilItem::Type { name, public, kind } => match kind {
                    MilTypeDefKind::Struct { fields }
                    | MilTypeDefKind::Union { fields }
                    | MilTypeDefKind::Object { fields } => {
                        r.begin_type(name, *public, kind_tag(kind));
                        for f in fields {
                            r.add_field(&f.name, &f.ty, f.public);
                        }
                        r.end_type();
                    }
                    _ => r.add_type(name, *public, kind.clone()),
                },
                MilItem::Const {
                    name,
                    ty,
                    value,
                    public,
                } => r.add_const(ty, name, value.clone(), *public),
                MilItem::Var { name, ty, public } => r.add_variable(ty, name, *public),
                MilItem::Proc(p) => r.add_procedure(p.clone()),
            }
        }
        r.end_module();
    }
}

/// Aggregate discriminator passed to `begin_type`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MilAggKind {
    Struct,
    Union,
    Object,
}

fn kind_tag(kind: &MilTypeDefKind) -> MilAggKind {
    match kind {
        MilTypeDefKind::Struct { .. } => MilAggKind::Struct,
        MilTypeDefKind::Union { .. } => MilAggKind::Union,
        MilTypeDefKind::Object { .. } => MilAggKind::Object,
        _ => unreachable!("not an aggregate type"),
    }
}
