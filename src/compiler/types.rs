//! _C--_ Types
//!
//! Types of source-level declarations and of _IR_ values.

use std::fmt;

/// Equivalent to the _C--_ `int` type (64-bit, signed).
#[allow(non_camel_case_types)]
pub type cmm_int = i64;

/// Value type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// No value (function return type, side-effect-only instructions).
    Void,
    /// Result of an integer comparison. Never produced by source-level
    /// declarations.
    I1,
    /// 64-bit integer.
    I64,
    /// Pointer to a value of the inner type.
    Ptr(Box<Type>),
}

impl Type {
    /// Returns a pointer type to `self`.
    #[inline]
    #[must_use]
    pub fn ptr_to(self) -> Self {
        Type::Ptr(Box::new(self))
    }

    /// Returns the type pointed to, or `None` if `self` is not a pointer.
    #[inline]
    #[must_use]
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Ptr(inner) => Some(inner),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    #[inline]
    #[must_use]
    pub const fn is_ptr(&self) -> bool {
        matches!(self, Type::Ptr(_))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::I1 => write!(f, "i1"),
            Type::I64 => write!(f, "i64"),
            Type::Ptr(inner) => write!(f, "{inner}*"),
        }
    }
}
