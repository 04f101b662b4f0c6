//! Source location tracking for the Tern compiler.
//!
//! Escape analysis decisions are reported against source positions
//! ("moved to heap: x" at file:line:col), so IR nodes carry a [`Span`]
//! and the session maps spans back to line/column through a
//! [`SourceFile`].

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};

/// A byte offset into a source file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BytePos(pub u32);

impl BytePos {
    /// The zero position.
    pub const ZERO: Self = Self(0);

    /// Create a new byte position.
    #[must_use]
    pub const fn new(pos: u32) -> Self {
        Self(pos)
    }

    /// Get the raw byte offset.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// A span of source code, a half-open byte range `[lo, hi)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// The start of the span (inclusive).
    pub lo: BytePos,
    /// The end of the span (exclusive).
    pub hi: BytePos,
}

impl Span {
    /// A dummy span for synthesized nodes.
    pub const DUMMY: Self = Self {
        lo: BytePos::ZERO,
        hi: BytePos::ZERO,
    };

    /// Create a new span from byte positions.
    #[must_use]
    pub const fn new(lo: BytePos, hi: BytePos) -> Self {
        Self { lo, hi }
    }

    /// Create a span from raw byte offsets.
    #[must_use]
    pub const fn from_raw(lo: u32, hi: u32) -> Self {
        Self {
            lo: BytePos(lo),
            hi: BytePos(hi),
        }
    }

    /// Check if this is a dummy span.
    #[must_use]
    pub const fn is_dummy(self) -> bool {
        self.lo.0 == 0 && self.hi.0 == 0
    }

    /// Merge two spans into one that covers both.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            lo: BytePos(self.lo.0.min(other.lo.0)),
            hi: BytePos(self.hi.0.max(other.hi.0)),
        }
    }
}

impl Default for Span {
    fn default() -> Self {
        Self::DUMMY
    }
}

/// Line and column information for a source location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineCol {
    /// 1-indexed line number.
    pub line: u32,
    /// 1-indexed column number.
    pub col: u32,
}

/// A source file with line-start offsets for position lookup.
#[derive(Clone, Debug)]
pub struct SourceFile {
    /// The file name or path.
    pub name: String,
    /// The source code content.
    pub src: String,
    line_starts: Vec<BytePos>,
}

impl SourceFile {
    /// Create a new source file, precomputing line starts.
    #[must_use]
    pub fn new(name: String, src: String) -> Self {
        let line_starts = std::iter::once(BytePos::ZERO)
            .chain(
                src.match_indices('\n')
                    .map(|(i, _)| BytePos::new(i as u32 + 1)),
            )
            .collect();

        Self {
            name,
            src,
            line_starts,
        }
    }

    /// Get the line/column for a byte position.
    #[must_use]
    pub fn lookup_line_col(&self, pos: BytePos) -> LineCol {
        let line_idx = self
            .line_starts
            .partition_point(|&start| start.0 <= pos.0)
            .saturating_sub(1);

        let line_start = self.line_starts[line_idx];
        LineCol {
            line: line_idx as u32 + 1,
            col: pos.0 - line_start.0 + 1,
        }
    }

    /// Render a span's start position as `name:line:col`.
    #[must_use]
    pub fn pos_str(&self, span: Span) -> String {
        let lc = self.lookup_line_col(span.lo);
        format!("{}:{}:{}", self.name, lc.line, lc.col)
    }
}
