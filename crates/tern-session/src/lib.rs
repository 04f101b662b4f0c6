//! Compiler session state for the Tern middle-end.
//!
//! A [`Session`] holds everything that persists across a compilation
//! unit: analysis options, the optional source file for rendering
//! positions, and the diagnostic sink. Escape analysis reports its
//! per-decision trace ("moved to heap: x", "p does not escape")
//! through the session, gated on the verbosity level, and the
//! regression corpus asserts on exactly those messages.

#![warn(missing_docs)]

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tern_span::{SourceFile, Span};

/// Analysis options.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Options {
    /// Diagnostic verbosity. 0 is silent; 1 reports per-decision
    /// escape messages; higher levels add analysis tracing.
    pub verbosity: u8,
    /// Variables wider than this are heap-allocated outright.
    pub max_stack_var_size: u64,
    /// Implicit allocations (`new`, literals, non-constant `make`)
    /// wider than this are heap-allocated outright.
    pub max_implicit_stack_var_size: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            verbosity: 0,
            max_stack_var_size: 10 << 20,
            max_implicit_stack_var_size: 64 << 10,
        }
    }
}

/// The severity of a collected diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// A user-authoring error (e.g. pragma misuse). Compilation
    /// fails, but analysis continues so multiple errors can be
    /// reported per invocation.
    Error,
    /// An informational analysis decision.
    Note,
}

/// A position-tagged diagnostic message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity.
    pub severity: Severity,
    /// The source span the message refers to.
    pub span: Span,
    /// The message text.
    pub msg: String,
}

/// Session state for one compilation unit.
#[derive(Debug, Default)]
pub struct Session {
    /// Analysis options.
    pub opts: Options,
    /// The source file, when position rendering is wanted.
    pub source: Option<SourceFile>,
    diags: RwLock<Vec<Diagnostic>>,
}

impl Session {
    /// Create a session with the given options.
    #[must_use]
    pub fn new(opts: Options) -> Self {
        Self {
            opts,
            source: None,
            diags: RwLock::new(Vec::new()),
        }
    }

    /// Create a session with default options and the given verbosity.
    #[must_use]
    pub fn with_verbosity(verbosity: u8) -> Self {
        Self::new(Options {
            verbosity,
            ..Options::default()
        })
    }

    /// Record an analysis note at the given position.
    ///
    /// Notes are dropped entirely below verbosity 1.
    pub fn note(&self, span: Span, msg: impl Into<String>) {
        if self.opts.verbosity >= 1 {
            self.diags.write().push(Diagnostic {
                severity: Severity::Note,
                span,
                msg: msg.into(),
            });
        }
    }

    /// Record a user-facing error at the given position.
    pub fn error(&self, span: Span, msg: impl Into<String>) {
        self.diags.write().push(Diagnostic {
            severity: Severity::Error,
            span,
            msg: msg.into(),
        });
    }

    /// All collected diagnostics, in emission order.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diags.read().clone()
    }

    /// The message texts of all collected notes, in emission order.
    #[must_use]
    pub fn notes(&self) -> Vec<String> {
        self.diags
            .read()
            .iter()
            .filter(|d| d.severity == Severity::Note)
            .map(|d| d.msg.clone())
            .collect()
    }

    /// True if any error diagnostic was recorded.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diags
            .read()
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Render a diagnostic with its position, `file:line:col: msg`.
    #[must_use]
    pub fn render(&self, diag: &Diagnostic) -> String {
        match &self.source {
            Some(file) => format!("{}: {}", file.pos_str(diag.span), diag.msg),
            None => diag.msg.clone(),
        }
    }
}
