//! Escapable control-flow contexts (loops and switches) used to resolve the
//! targets of `break` and `continue` while lowering a function body.

use crate::Result;
use crate::compiler::ir::BlockId;
use crate::error::{CompileError, SourceLoc};

/// Kind of escapable control-flow statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeKind {
    /// A loop statement (`for`, `while`, `do-while`), with the block a
    /// `continue` transfers to.
    Loop { continue_to: BlockId },
    /// A switch statement. Only `break` can target it.
    Switch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EscapeTarget {
    kind: EscapeKind,
    /// Block a `break` transfers to.
    exit: BlockId,
}

/// Stack of the loops and switches enclosing the statement being lowered,
/// innermost last.
#[derive(Debug, Default)]
pub struct EscapeStack {
    targets: Vec<EscapeTarget>,
}

impl EscapeStack {
    /// Begins a loop context.
    #[inline]
    pub fn enter_loop(&mut self, continue_to: BlockId, exit: BlockId) {
        self.targets.push(EscapeTarget {
            kind: EscapeKind::Loop { continue_to },
            exit,
        });
    }

    /// Begins a switch context.
    #[inline]
    pub fn enter_switch(&mut self, exit: BlockId) {
        self.targets.push(EscapeTarget {
            kind: EscapeKind::Switch,
            exit,
        });
    }

    /// Ends the most recent context.
    #[inline]
    pub fn exit_ctx(&mut self) {
        debug_assert!(!self.targets.is_empty(), "no control-flow context to exit");
        self.targets.pop();
    }

    /// Returns the block a `break` at `loc` transfers to.
    ///
    /// # Errors
    ///
    /// Returns an error if no loop or switch is active.
    pub fn break_target(&self, loc: SourceLoc) -> Result<BlockId> {
        self.targets
            .last()
            .map(|target| target.exit)
            .ok_or(CompileError::BreakOutsideLoop { loc })
    }

    /// Returns the block a `continue` at `loc` transfers to, skipping any
    /// enclosing switches.
    ///
    /// # Errors
    ///
    /// Returns an error if no loop is active.
    pub fn continue_target(&self, loc: SourceLoc) -> Result<BlockId> {
        self.targets
            .iter()
            .rev()
            .find_map(|target| match target.kind {
                EscapeKind::Loop { continue_to } => Some(continue_to),
                EscapeKind::Switch => None,
            })
            .ok_or(CompileError::ContinueOutsideLoop { loc })
    }

    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOC: SourceLoc = SourceLoc::new(3, 5);

    #[test]
    fn escape_continue_skips_switch() {
        let mut stack = EscapeStack::default();
        stack.enter_loop(BlockId(1), BlockId(2));
        stack.enter_switch(BlockId(5));

        assert_eq!(stack.break_target(LOC), Ok(BlockId(5)));
        assert_eq!(stack.continue_target(LOC), Ok(BlockId(1)));

        stack.exit_ctx();
        assert_eq!(stack.break_target(LOC), Ok(BlockId(2)));
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn escape_outside_any_context() {
        let mut stack = EscapeStack::default();

        assert_eq!(
            stack.break_target(LOC),
            Err(CompileError::BreakOutsideLoop { loc: LOC })
        );

        stack.enter_switch(BlockId(4));
        assert_eq!(stack.break_target(LOC), Ok(BlockId(4)));
        assert_eq!(
            stack.continue_target(LOC),
            Err(CompileError::ContinueOutsideLoop { loc: LOC })
        );
    }
}
