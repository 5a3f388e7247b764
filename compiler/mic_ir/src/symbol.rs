//! String interning.
//!
//! All identifiers are interned once per compilation session, so name
//! comparison anywhere in the compiler is a `u32` compare. The interner
//! is scoped to the session (no process-global state) so tests run in
//! isolation.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Handle to an interned string with pointer-equality semantics.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    /// The empty string, pre-interned at index 0.
    pub const EMPTY: Symbol = Symbol(0);

    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

struct Inner {
    map: FxHashMap<&'static str, u32>,
    strings: Vec<&'static str>,
}

/// Per-compilation string interner behind a shared handle.
///
/// Cloning the handle is cheap; all clones share the same storage.
/// Interned strings are leaked for `'static` access, which is bounded by
/// the one-shot nature of a compiler process.
#[derive(Clone)]
pub struct Symbols(Arc<RwLock<Inner>>);

impl Symbols {
    pub fn new() -> Self {
        let mut inner = Inner {
            map: FxHashMap::default(),
            strings: Vec::with_capacity(256),
        };
        inner.map.insert("", 0);
        inner.strings.push("");
        Symbols(Arc::new(RwLock::new(inner)))
    }

    /// Intern a string, returning its stable handle.
    pub fn intern(&self, s: &str) -> Symbol {
        {
            let guard = self.0.read();
            if let Some(&idx) = guard.map.get(s) {
                return Symbol(idx);
            }
        }
        let mut guard = self.0.write();
        if let Some(&idx) = guard.map.get(s) {
            return Symbol(idx);
        }
        let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
        let idx = u32::try_from(guard.strings.len())
            .unwrap_or_else(|_| panic!("interner exceeded u32::MAX strings"));
        guard.strings.push(leaked);
        guard.map.insert(leaked, idx);
        Symbol(idx)
    }

    /// Look up the string for a symbol.
    pub fn resolve(&self, sym: Symbol) -> &'static str {
        self.0.read().strings[sym.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.0.read().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

impl Default for Symbols {
    fn default() -> Self {
        Symbols::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_identity() {
        let syms = Symbols::new();
        let a = syms.intern("alpha");
        let b = syms.intern("beta");
        let a2 = syms.intern("alpha");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(syms.resolve(a), "alpha");
        assert_eq!(syms.resolve(b), "beta");
    }

    #[test]
    fn test_empty_preinterned() {
        let syms = Symbols::new();
        assert_eq!(syms.intern(""), Symbol::EMPTY);
    }

    #[test]
    fn test_shared_handle() {
        let syms = Symbols::new();
        let clone = syms.clone();
        assert_eq!(syms.intern("x"), clone.intern("x"));
    }
}
