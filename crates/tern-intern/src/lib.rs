//! String interning for the Tern compiler.
//!
//! Identifiers appear many times across a compilation, so they are
//! stored once in a global interner and passed around as [`Symbol`],
//! a 4-byte copyable handle with O(1) equality and hashing.

#![warn(missing_docs)]

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::OnceLock;

/// An interned string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(from = "String")]
pub struct Symbol(u32);

impl Symbol {
    /// Intern a string, returning its symbol.
    pub fn intern(s: &str) -> Self {
        interner().intern(s)
    }

    /// Get the string this symbol refers to.
    ///
    /// The returned reference is `'static` because interned strings
    /// are never freed.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        interner().get(self)
    }

    /// Reconstruct a symbol from its raw index.
    ///
    /// # Safety
    ///
    /// `raw` must have been produced by [`Symbol::intern`] in this
    /// process.
    #[must_use]
    pub const unsafe fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw index of this symbol.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self::intern(&s)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::intern(s)
    }
}

struct Interner {
    inner: RwLock<InternerInner>,
}

struct InternerInner {
    map: FxHashMap<&'static str, Symbol>,
    strings: Vec<&'static str>,
}

impl Interner {
    fn intern(&self, s: &str) -> Symbol {
        if let Some(&sym) = self.inner.read().map.get(s) {
            return sym;
        }

        let mut inner = self.inner.write();
        // Re-check: another thread may have interned it between locks.
        if let Some(&sym) = inner.map.get(s) {
            return sym;
        }

        let sym = Symbol(inner.strings.len() as u32);
        let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
        inner.strings.push(leaked);
        inner.map.insert(leaked, sym);
        sym
    }

    fn get(&self, sym: Symbol) -> &'static str {
        self.inner.read().strings[sym.0 as usize]
    }
}

fn interner() -> &'static Interner {
    static INTERNER: OnceLock<Interner> = OnceLock::new();
    INTERNER.get_or_init(|| Interner {
        inner: RwLock::new(InternerInner {
            map: FxHashMap::default(),
            strings: Vec::new(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_dedups() {
        let a = Symbol::intern("x");
        let b = Symbol::intern("x");
        let c = Symbol::intern("y");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_as_str_roundtrip() {
        let sym = Symbol::intern("escape");
        assert_eq!(sym.as_str(), "escape");
    }

    #[test]
    fn test_display() {
        let sym = Symbol::intern("p0");
        assert_eq!(sym.to_string(), "p0");
    }
}
