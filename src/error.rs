//! Compiler errors and macros for formatting diagnostics.

use std::fmt;

use thiserror::Error;

/// Format a generic error message into a `String`.
#[macro_export]
macro_rules! fmt_err {
    ($program:expr, $($arg:tt)+) => {{
        format!("\x1b[1;1m{}\x1b[0m: \x1b[1;31merror:\x1b[0m {}", $program, format!($($arg)+))
    }};
}

/// Format a generic error message with context into a `String`.
#[macro_export]
macro_rules! fmt_ctx_err {
    ($file:expr, $line:expr, $col:expr, $($arg:tt)+) => {{
        format!(
            "\x1b[1;1m{}:{}:{}:\x1b[0m \x1b[1;31merror:\x1b[0m {}",
            $file, $line, $col, format!($($arg)+)
        )
    }};
}

/// Position of a construct in the original source file (1-based).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLoc {
    pub line: usize,
    pub col: usize,
}

impl SourceLoc {
    #[inline]
    #[must_use]
    pub const fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Errors raised while building or optimizing the _IR_.
///
/// Every variant is fatal to the construct that raised it: the enclosing
/// function (or global declaration) during construction, or the whole module
/// during optimization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("use of undeclared identifier '{name}'")]
    UnboundIdentifier { name: String, loc: SourceLoc },

    #[error("redeclaration of '{name}'")]
    DuplicateDeclaration { name: String, loc: SourceLoc },

    #[error("malformed control-flow in function '{function}': {reason}")]
    MalformedControlFlow { function: String, reason: String },

    #[error("ill-formed dominance in function '{function}': {reason}")]
    IllFormedDominance { function: String, reason: String },

    #[error("initializer of '{name}' is not a compile-time constant")]
    NonConstantInitializer { name: String, loc: SourceLoc },

    #[error("'break' statement not within a loop or switch")]
    BreakOutsideLoop { loc: SourceLoc },

    #[error("'continue' statement not within a loop")]
    ContinueOutsideLoop { loc: SourceLoc },

    #[error("duplicate case value '{value}'")]
    DuplicateCase { value: i64, loc: SourceLoc },

    #[error("function '{name}' expects {expected} argument(s), found {found}")]
    ArgumentCountMismatch {
        name: String,
        expected: usize,
        found: usize,
        loc: SourceLoc,
    },
}

impl CompileError {
    /// Returns the source location of the offending construct, or `None` for
    /// internal invariant violations.
    #[must_use]
    pub const fn loc(&self) -> Option<SourceLoc> {
        match self {
            CompileError::UnboundIdentifier { loc, .. }
            | CompileError::DuplicateDeclaration { loc, .. }
            | CompileError::NonConstantInitializer { loc, .. }
            | CompileError::BreakOutsideLoop { loc }
            | CompileError::ContinueOutsideLoop { loc }
            | CompileError::DuplicateCase { loc, .. }
            | CompileError::ArgumentCountMismatch { loc, .. } => Some(*loc),
            CompileError::MalformedControlFlow { .. } | CompileError::IllFormedDominance { .. } => {
                None
            }
        }
    }

    /// Returns `true` if the error signals a defect in the compiler itself
    /// rather than in the user's program.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(
            self,
            CompileError::MalformedControlFlow { .. } | CompileError::IllFormedDominance { .. }
        )
    }

    /// Formats the error as a diagnostic for the given input `file`.
    #[must_use]
    pub fn render(&self, file: &str) -> String {
        match self.loc() {
            Some(loc) => crate::fmt_ctx_err!(file, loc.line, loc.col, "{}", self),
            None => crate::fmt_err!(file, "{}", self),
        }
    }
}
