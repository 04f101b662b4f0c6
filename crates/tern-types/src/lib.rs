//! Type representation for the Tern compiler middle-end.
//!
//! Escape analysis does not need the full surface type system; it
//! needs shape queries ("does this type contain pointers", "is a
//! value of this type stored directly inside an interface word") and
//! width computation for the too-large-for-stack checks. This crate
//! provides a structural [`Ty`] answering exactly those queries.
//!
//! Widths are computed for a 64-bit target: pointers are 8 bytes,
//! strings are pointer+length, slices are pointer+length+capacity,
//! and interface values are two words (type word + data word).

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use tern_intern::Symbol;

/// Size of a machine pointer on the target, in bytes.
pub const PTR_SIZE: u64 = 8;

/// A structural type.
///
/// Named types are flattened to their underlying structure; escape
/// analysis is insensitive to names.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ty {
    /// `bool`.
    Bool,
    /// Machine integer (all widths are modeled as one word).
    Int,
    /// An unsigned integer wide enough to hold a pointer value.
    ///
    /// Not a pointer for escape purposes, but subject to the
    /// unsafe-uintptr rules at call boundaries.
    Uintptr,
    /// A raw pointer that escapes the type system (`unsafe.Pointer`
    /// equivalent).
    UnsafePtr,
    /// Floating point (one word).
    Float,
    /// An immutable string: data pointer + length.
    String,
    /// A typed pointer.
    Ptr(Box<Ty>),
    /// A slice: data pointer + length + capacity.
    Slice(Box<Ty>),
    /// A fixed-size array, stored inline.
    Array(Box<Ty>, u64),
    /// A struct with fields stored inline.
    Struct(Vec<Field>),
    /// A hash map reference (bucket storage lives on the heap).
    Map(Box<Ty>, Box<Ty>),
    /// A channel reference.
    Chan(Box<Ty>),
    /// An interface value: type word + data word.
    Interface,
    /// A function value.
    Func(Box<FnSig>),
}

/// A struct field.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    /// The field name.
    pub name: Symbol,
    /// The field type.
    pub ty: Ty,
}

/// A function signature.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FnSig {
    /// Parameter names (if any) and types, receiver included as
    /// parameter zero for methods.
    pub params: Vec<SigParam>,
    /// Result names (if any) and types.
    pub results: Vec<SigParam>,
    /// Whether the final parameter is variadic (`...T`, typed as a
    /// slice).
    pub variadic: bool,
}

/// A single parameter or result in a signature.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SigParam {
    /// The declared name, if the parameter is named.
    pub name: Option<Symbol>,
    /// The parameter type.
    pub ty: Ty,
}

impl SigParam {
    /// A named parameter.
    #[must_use]
    pub fn named(name: &str, ty: Ty) -> Self {
        Self {
            name: Some(Symbol::intern(name)),
            ty,
        }
    }

    /// An unnamed parameter.
    #[must_use]
    pub fn anon(ty: Ty) -> Self {
        Self { name: None, ty }
    }
}

impl Ty {
    /// Shorthand for a pointer to `elem`.
    #[must_use]
    pub fn ptr(elem: Ty) -> Self {
        Self::Ptr(Box::new(elem))
    }

    /// Shorthand for a slice of `elem`.
    #[must_use]
    pub fn slice(elem: Ty) -> Self {
        Self::Slice(Box::new(elem))
    }

    /// Shorthand for an array of `len` `elem`s.
    #[must_use]
    pub fn array(elem: Ty, len: u64) -> Self {
        Self::Array(Box::new(elem), len)
    }

    /// Does a value of this type contain any pointers?
    ///
    /// Assignments of pointer-free values never create flow edges.
    #[must_use]
    pub fn has_pointers(&self) -> bool {
        match self {
            Self::Bool | Self::Int | Self::Uintptr | Self::Float => false,
            Self::String
            | Self::UnsafePtr
            | Self::Ptr(_)
            | Self::Slice(_)
            | Self::Map(_, _)
            | Self::Chan(_)
            | Self::Interface
            | Self::Func(_) => true,
            Self::Array(elem, len) => *len > 0 && elem.has_pointers(),
            Self::Struct(fields) => fields.iter().any(|f| f.ty.has_pointers()),
        }
    }

    /// The width of a value of this type, in bytes.
    #[must_use]
    pub fn width(&self) -> u64 {
        match self {
            Self::Bool => 1,
            Self::Int | Self::Uintptr | Self::Float => PTR_SIZE,
            Self::UnsafePtr | Self::Ptr(_) | Self::Map(_, _) | Self::Chan(_) | Self::Func(_) => {
                PTR_SIZE
            }
            Self::String | Self::Interface => 2 * PTR_SIZE,
            Self::Slice(_) => 3 * PTR_SIZE,
            Self::Array(elem, len) => elem.width().max(1) * len,
            Self::Struct(fields) => {
                // One-word alignment is enough fidelity for the
                // too-large-for-stack checks.
                let mut w: u64 = 0;
                for f in fields {
                    let fw = f.ty.width();
                    let align = fw.clamp(1, PTR_SIZE);
                    w = w.div_ceil(align) * align + fw;
                }
                w.div_ceil(PTR_SIZE) * PTR_SIZE
            }
        }
    }

    /// Is this an interface type?
    #[must_use]
    pub fn is_interface(&self) -> bool {
        matches!(self, Self::Interface)
    }

    /// Is this a slice type?
    #[must_use]
    pub fn is_slice(&self) -> bool {
        matches!(self, Self::Slice(_))
    }

    /// Is this a fixed-size array type?
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_, _))
    }

    /// Is this a struct type?
    #[must_use]
    pub fn is_struct(&self) -> bool {
        matches!(self, Self::Struct(_))
    }

    /// Is this the string type?
    #[must_use]
    pub fn is_string(&self) -> bool {
        matches!(self, Self::String)
    }

    /// Is this the uintptr type?
    #[must_use]
    pub fn is_uintptr(&self) -> bool {
        matches!(self, Self::Uintptr)
    }

    /// Is this the unsafe pointer type?
    #[must_use]
    pub fn is_unsafe_ptr(&self) -> bool {
        matches!(self, Self::UnsafePtr)
    }

    /// The element type of a pointer, slice, array, or channel.
    ///
    /// # Panics
    ///
    /// Panics if the type has no element type; callers are expected
    /// to have shape-checked first.
    #[must_use]
    pub fn elem(&self) -> &Ty {
        match self {
            Self::Ptr(e) | Self::Slice(e) | Self::Chan(e) | Self::Array(e, _) => e,
            _ => panic!("elem of non-element type {self:?}"),
        }
    }

    /// Is a value of this concrete type stored directly in an
    /// interface's data word, without a separate allocation?
    ///
    /// Mirrors the runtime's direct-interface representation: a type
    /// is direct if it is pointer-shaped, including single-field
    /// structs and length-1 arrays wrapping a pointer-shaped type.
    #[must_use]
    pub fn is_direct_iface(&self) -> bool {
        match self {
            Self::Ptr(_) | Self::UnsafePtr | Self::Map(_, _) | Self::Chan(_) | Self::Func(_) => {
                true
            }
            Self::Array(elem, 1) => elem.is_direct_iface(),
            Self::Struct(fields) => fields.len() == 1 && fields[0].ty.is_direct_iface(),
            _ => false,
        }
    }
}

impl std::fmt::Display for Ty {
    /// Compact rendering for diagnostics, e.g. `*[]int`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::Uintptr => f.write_str("uintptr"),
            Self::UnsafePtr => f.write_str("unsafeptr"),
            Self::Float => f.write_str("float"),
            Self::String => f.write_str("string"),
            Self::Ptr(e) => write!(f, "*{e}"),
            Self::Slice(e) => write!(f, "[]{e}"),
            Self::Array(e, n) => write!(f, "[{n}]{e}"),
            Self::Struct(_) => f.write_str("struct{...}"),
            Self::Map(k, v) => write!(f, "map[{k}]{v}"),
            Self::Chan(e) => write!(f, "chan {e}"),
            Self::Interface => f.write_str("interface{}"),
            Self::Func(_) => f.write_str("func"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_pointers() {
        assert!(!Ty::Int.has_pointers());
        assert!(!Ty::Uintptr.has_pointers());
        assert!(Ty::UnsafePtr.has_pointers());
        assert!(Ty::ptr(Ty::Int).has_pointers());
        assert!(Ty::String.has_pointers());
        assert!(!Ty::array(Ty::Int, 4).has_pointers());
        assert!(Ty::array(Ty::ptr(Ty::Int), 4).has_pointers());
        assert!(!Ty::array(Ty::ptr(Ty::Int), 0).has_pointers());

        let s = Ty::Struct(vec![
            Field {
                name: Symbol::intern("n"),
                ty: Ty::Int,
            },
            Field {
                name: Symbol::intern("next"),
                ty: Ty::ptr(Ty::Int),
            },
        ]);
        assert!(s.has_pointers());
    }

    #[test]
    fn test_widths() {
        assert_eq!(Ty::Int.width(), 8);
        assert_eq!(Ty::String.width(), 16);
        assert_eq!(Ty::slice(Ty::Int).width(), 24);
        assert_eq!(Ty::array(Ty::Int, 10).width(), 80);
        assert_eq!(Ty::Interface.width(), 16);
    }

    #[test]
    fn test_direct_iface() {
        assert!(Ty::ptr(Ty::Int).is_direct_iface());
        assert!(!Ty::Int.is_direct_iface());
        assert!(!Ty::String.is_direct_iface());

        let wrapper = Ty::Struct(vec![Field {
            name: Symbol::intern("p"),
            ty: Ty::ptr(Ty::Bool),
        }]);
        assert!(wrapper.is_direct_iface());
        assert!(Ty::array(Ty::ptr(Ty::Bool), 1).is_direct_iface());
        assert!(!Ty::array(Ty::ptr(Ty::Bool), 2).is_direct_iface());
    }
}
