//! Parameter leak summaries and their tag encoding.
//!
//! When a function is analyzed, each pointer-carrying parameter gets a
//! [`Leaks`] summary: the shortest dereference path (if any) from the
//! parameter to the heap and to each of the function's leading result
//! slots. Summaries are serialized into compact string tags
//! ([`ParamTag::encode`]) so that later compilation of callers can
//! model calls without re-analyzing the callee.

use serde::{Deserialize, Serialize};

/// Address of the parameter reaches the heap (level 0).
const HEAP: u16 = 1 << 0;
/// Content of the parameter reaches the heap (level 1).
const CONTENT: u16 = 1 << 1;

const RESULT_SHIFT: u32 = 4;
const BITS_PER_RESULT: u32 = 3;
const RESULT_MASK: u16 = (1 << BITS_PER_RESULT) - 1;

/// How many leading result slots a summary can record flows to.
/// Flows to later results are coarsened to heap leaks.
pub const NUM_TAGGED_RESULTS: usize = ((16 - RESULT_SHIFT) / BITS_PER_RESULT) as usize;

/// Deepest dereference level a result flow records; deeper paths are
/// clamped.
pub const MAX_LEVEL: i32 = 6;

/// A parameter's leak summary, packed into sixteen bits.
///
/// Bits 0 and 1 encode the heap path length (0 or 1). Each result
/// slot gets [`BITS_PER_RESULT`] bits holding `level + 1`, with zero
/// meaning no recorded flow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaks(u16);

impl Leaks {
    /// No recorded leaks.
    pub const NONE: Leaks = Leaks(0);

    /// A summary with a direct heap leak, used for parameters of
    /// unannotated external functions.
    #[must_use]
    pub fn full() -> Self {
        Leaks(HEAP)
    }

    /// True if nothing leaks.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The dereference level at which this parameter reaches the
    /// heap: 0 for the address itself, 1 for its content.
    #[must_use]
    pub fn heap(self) -> Option<i32> {
        if self.0 & HEAP != 0 {
            Some(0)
        } else if self.0 & CONTENT != 0 {
            Some(1)
        } else {
            None
        }
    }

    /// The recorded dereference level of the flow to result `i`.
    #[must_use]
    pub fn result(self, i: usize) -> Option<i32> {
        let v = (self.0 >> Self::shift(i)) & RESULT_MASK;
        if v == 0 {
            None
        } else {
            Some(i32::from(v) - 1)
        }
    }

    /// Record a heap leak at the given dereference level. A direct
    /// leak (level 0) subsumes everything else, so it clears any
    /// recorded result flows.
    pub fn add_heap(&mut self, derefs: i32) {
        if self.heap() == Some(0) {
            return;
        }
        if derefs > 0 {
            self.0 |= CONTENT;
        } else {
            self.0 = HEAP;
        }
    }

    /// Record a flow to result `i` at the given dereference level,
    /// keeping the shortest path seen so far.
    ///
    /// # Panics
    ///
    /// Panics if `i >= NUM_TAGGED_RESULTS`; callers coarsen such
    /// flows to heap leaks instead.
    pub fn add_result(&mut self, i: usize, derefs: i32) {
        let derefs = derefs.clamp(0, MAX_LEVEL);
        match self.result(i) {
            Some(old) if old <= derefs => {}
            _ => {
                let shift = Self::shift(i);
                self.0 &= !(RESULT_MASK << shift);
                self.0 |= ((derefs + 1) as u16) << shift;
            }
        }
    }

    /// Drop redundant records: a content leak already implies every
    /// result flow of level one or deeper.
    pub fn optimize(&mut self) {
        if self.0 & CONTENT == 0 {
            return;
        }
        for i in 0..NUM_TAGGED_RESULTS {
            if let Some(x) = self.result(i) {
                if x >= 1 {
                    self.0 &= !(RESULT_MASK << Self::shift(i));
                }
            }
        }
    }

    fn shift(i: usize) -> u32 {
        assert!(i < NUM_TAGGED_RESULTS, "result index {i} out of range");
        RESULT_SHIFT + i as u32 * BITS_PER_RESULT
    }
}

/// Sentinel tag for uintptr parameters of external functions, which
/// may really hold pointers that must stay live across the call.
pub const UNSAFE_UINTPTR_TAG: &str = "unsafe-uintptr";

/// Sentinel tag for uintptr parameters of functions carrying the
/// uintptr-escapes pragma.
pub const UINTPTR_ESCAPES_TAG: &str = "uintptr-escapes";

/// The analysis verdict attached to one parameter of a function
/// signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamTag {
    /// Nothing is known; callers must assume the argument escapes.
    /// Also used for pointer-free parameters, where it is vacuous.
    Unknown,
    /// An analyzed leak summary.
    Leaks(Leaks),
    /// The uintptr argument may hold a pointer and must be kept live.
    UnsafeUintptr,
    /// The uintptr argument is really a pointer and escapes.
    UintptrEscapes,
}

impl ParamTag {
    /// Serialize to the wire form stored in export data.
    #[must_use]
    pub fn encode(self) -> String {
        match self {
            ParamTag::Unknown => String::new(),
            ParamTag::Leaks(l) => format!("esc:{:#x}", l.0),
            ParamTag::UnsafeUintptr => UNSAFE_UINTPTR_TAG.to_owned(),
            ParamTag::UintptrEscapes => UINTPTR_ESCAPES_TAG.to_owned(),
        }
    }

    /// Parse a tag previously produced by [`Self::encode`].
    /// Unrecognized text decodes to [`ParamTag::Unknown`], which is
    /// always safe.
    #[must_use]
    pub fn decode(tag: &str) -> Self {
        match tag {
            "" => ParamTag::Unknown,
            UNSAFE_UINTPTR_TAG => ParamTag::UnsafeUintptr,
            UINTPTR_ESCAPES_TAG => ParamTag::UintptrEscapes,
            _ => match tag
                .strip_prefix("esc:0x")
                .and_then(|hex| u16::from_str_radix(hex, 16).ok())
            {
                Some(bits) => ParamTag::Leaks(Leaks(bits)),
                None => ParamTag::Unknown,
            },
        }
    }
}
