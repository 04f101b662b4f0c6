//! Typed indices and index-keyed vectors for the Tern compiler.
//!
//! Compiler passes refer to IR entities through small integer IDs
//! rather than references. This crate provides the [`Idx`] trait that
//! all ID newtypes implement, an [`IndexVec`] keyed by such IDs, and
//! the [`newtype_index!`] macro for declaring them.

#![warn(missing_docs)]

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A type that can be used as a dense index.
pub trait Idx: Copy + Eq + fmt::Debug + 'static {
    /// Create an index from a raw position.
    fn new(idx: usize) -> Self;

    /// Get the raw position of this index.
    fn index(self) -> usize;
}

/// Declare a `u32`-backed index newtype implementing [`Idx`].
#[macro_export]
macro_rules! newtype_index {
    ($(#[$attr:meta])* $vis:vis struct $name:ident) => {
        $(#[$attr])*
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        #[repr(transparent)]
        $vis struct $name(pub u32);

        impl $name {
            /// Create from a raw `u32`.
            #[must_use]
            pub const fn from_u32(raw: u32) -> Self {
                Self(raw)
            }

            /// The raw `u32` value.
            #[must_use]
            pub const fn as_u32(self) -> u32 {
                self.0
            }
        }

        impl $crate::Idx for $name {
            fn new(idx: usize) -> Self {
                Self(u32::try_from(idx).expect("index overflows u32"))
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}

/// A vector keyed by a typed index instead of `usize`.
///
/// Pushing returns the index of the new element, which makes this the
/// natural arena for IR entities with stable IDs.
#[derive(Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexVec<I: Idx, T> {
    raw: Vec<T>,
    #[serde(skip)]
    _marker: PhantomData<fn(I)>,
}

impl<I: Idx, T> IndexVec<I, T> {
    /// Create an empty vector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            raw: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Create an empty vector with the given capacity.
    #[must_use]
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            raw: Vec::with_capacity(cap),
            _marker: PhantomData,
        }
    }

    /// Push an element, returning its index.
    pub fn push(&mut self, value: T) -> I {
        let idx = I::new(self.raw.len());
        self.raw.push(value);
        idx
    }

    /// The index the next pushed element will receive.
    #[must_use]
    pub fn next_index(&self) -> I {
        I::new(self.raw.len())
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// True if the vector holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Get an element, or `None` if the index is out of bounds.
    #[must_use]
    pub fn get(&self, idx: I) -> Option<&T> {
        self.raw.get(idx.index())
    }

    /// Mutable variant of [`IndexVec::get`].
    pub fn get_mut(&mut self, idx: I) -> Option<&mut T> {
        self.raw.get_mut(idx.index())
    }

    /// Iterate over elements in index order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.raw.iter()
    }

    /// Iterate over elements mutably in index order.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.raw.iter_mut()
    }

    /// Iterate over `(index, element)` pairs.
    pub fn iter_enumerated(&self) -> impl Iterator<Item = (I, &T)> {
        self.raw.iter().enumerate().map(|(i, t)| (I::new(i), t))
    }

    /// Iterate over all valid indices.
    pub fn indices(&self) -> impl Iterator<Item = I> + 'static {
        (0..self.raw.len()).map(I::new)
    }
}

impl<I: Idx, T> Default for IndexVec<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Idx, T> Index<I> for IndexVec<I, T> {
    type Output = T;

    fn index(&self, idx: I) -> &T {
        &self.raw[idx.index()]
    }
}

impl<I: Idx, T> IndexMut<I> for IndexVec<I, T> {
    fn index_mut(&mut self, idx: I) -> &mut T {
        &mut self.raw[idx.index()]
    }
}

impl<I: Idx, T: fmt::Debug> fmt::Debug for IndexVec<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.raw, f)
    }
}

impl<I: Idx, T> FromIterator<T> for IndexVec<I, T> {
    fn from_iter<It: IntoIterator<Item = T>>(iter: It) -> Self {
        Self {
            raw: Vec::from_iter(iter),
            _marker: PhantomData,
        }
    }
}

impl<'a, I: Idx, T> IntoIterator for &'a IndexVec<I, T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.raw.iter()
    }
}
