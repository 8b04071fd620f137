//! Symbol Table
//!
//! Lexically scoped mapping from identifiers to their storage locations.

use rustc_hash::FxHashMap;

use crate::Result;
use crate::error::{CompileError, SourceLoc};

/// Stack of lexical scopes, innermost last.
///
/// The module scope (globals) is always present at the bottom of the stack
/// and is never popped.
#[derive(Debug)]
pub struct SymbolTable<V> {
    /// Currently active scopes.
    scopes: Vec<FxHashMap<String, V>>,
}

impl<V: Clone> SymbolTable<V> {
    /// Index of the module scope on the stack.
    pub const MODULE_SCOPE: usize = 0;

    /// Returns a new table with only the module scope open.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: vec![FxHashMap::default()],
        }
    }

    #[inline]
    pub fn push_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    /// Closes the innermost scope, making its bindings unreachable.
    #[inline]
    pub fn pop_scope(&mut self) {
        debug_assert!(!self.at_module_scope(), "attempting to exit module scope");

        if !self.at_module_scope() {
            self.scopes.pop();
        }
    }

    /// Binds `name` in the innermost scope, shadowing any binding of the same
    /// name in an enclosing scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the innermost scope already binds `name`.
    pub fn insert(&mut self, name: &str, value: V, loc: SourceLoc) -> Result<()> {
        let scope = self
            .scopes
            .last_mut()
            .expect("module scope should always be on the stack");

        if scope.contains_key(name) {
            return Err(CompileError::DuplicateDeclaration {
                name: name.to_string(),
                loc,
            });
        }

        scope.insert(name.to_string(), value);
        Ok(())
    }

    /// Returns the nearest binding of `name`, searching from the innermost
    /// scope outward.
    ///
    /// # Errors
    ///
    /// Returns an error if no active scope binds `name`.
    pub fn find(&self, name: &str, loc: SourceLoc) -> Result<V> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .cloned()
            .ok_or_else(|| CompileError::UnboundIdentifier {
                name: name.to_string(),
                loc,
            })
    }

    /// Number of open scopes, including the module scope.
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    #[inline]
    #[must_use]
    pub fn at_module_scope(&self) -> bool {
        self.scopes.len() == Self::MODULE_SCOPE + 1
    }

    /// Closes every scope except the module scope.
    #[inline]
    pub fn reset(&mut self) {
        self.scopes.truncate(Self::MODULE_SCOPE + 1);
    }
}

impl<V: Clone> Default for SymbolTable<V> {
    fn default() -> Self {
        Self::new()
    }
}
