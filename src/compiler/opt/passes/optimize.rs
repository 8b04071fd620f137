//! Optimization Pipeline
//!
//! Executes machine-independent optimization passes on an intermediate
//! representation (_IR_) based on user-specified options.

use std::fmt;
use std::ops::AddAssign;

use crate::compiler::ir::{Function, Global, Module};
use crate::compiler::opt::passes::{self, CseStats};
use crate::compiler::opt::verify::verify_function;
use crate::{Opts, Result};

/// Number of instructions erased by the pipeline, per category.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OptSummary {
    /// Erased by dead-code elimination.
    pub dead: usize,
    /// Literal duplicates erased by common-subexpression elimination.
    pub cse: usize,
    /// Replaced by a constant.
    pub folded: usize,
    /// Redundant loads.
    pub loads: usize,
    /// Stores overwritten before being read.
    pub stores: usize,
    /// Loads forwarded the value just stored.
    pub load_after_store: usize,
}

impl OptSummary {
    #[inline]
    #[must_use]
    pub const fn total(&self) -> usize {
        self.dead + self.cse + self.folded + self.loads + self.stores + self.load_after_store
    }
}

impl AddAssign for OptSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.dead += rhs.dead;
        self.cse += rhs.cse;
        self.folded += rhs.folded;
        self.loads += rhs.loads;
        self.stores += rhs.stores;
        self.load_after_store += rhs.load_after_store;
    }
}

impl AddAssign<CseStats> for OptSummary {
    fn add_assign(&mut self, rhs: CseStats) {
        self.cse += rhs.eliminated;
        self.loads += rhs.loads;
        self.stores += rhs.stores;
        self.load_after_store += rhs.load_after_store;
    }
}

impl fmt::Display for OptSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = [
            ("CSE_Dead", self.dead),
            ("CSE_Basic", self.cse),
            ("CSE_Simplify", self.folded),
            ("CSE_RLd", self.loads),
            ("CSE_RSt", self.stores),
            ("CSE_LdSt", self.load_after_store),
        ];

        // Labels are dot-padded to a common column.
        for (label, count) in rows {
            writeln!(f, "{label:.<14}{count}")?;
        }

        Ok(())
    }
}

/// Runs dead-code elimination, constant folding and common-subexpression
/// elimination, in that order, over every function of `module`, according to
/// the specified `opts`.
///
/// # Errors
///
/// Returns an error if `opts.verify` is set and a function violates an _IR_
/// invariant before or after any pass, or if common-subexpression
/// elimination finds a use not dominated by its definition.
pub fn optimize_module(module: &mut Module, opts: &Opts) -> Result<OptSummary> {
    let mut summary = OptSummary::default();

    for func in &mut module.functions {
        summary += optimize_function(func, &module.globals, opts)?;
    }

    tracing::info!(
        dead = summary.dead,
        folded = summary.folded,
        cse = summary.cse,
        loads = summary.loads,
        stores = summary.stores,
        load_after_store = summary.load_after_store,
        "optimized module"
    );

    Ok(summary)
}

/// Optimizes a single _IR_ function, applying the specified optimization
/// passes.
fn optimize_function(func: &mut Function, globals: &[Global], opts: &Opts) -> Result<OptSummary> {
    let mut summary = OptSummary::default();

    if opts.verify {
        verify_function(func)?;
    }

    if opts.dce {
        summary.dead = passes::eliminate_dead_code(func);

        if opts.verify {
            verify_function(func)?;
        }
    }

    if opts.fold {
        summary.folded = passes::fold_constants(func);

        if opts.verify {
            verify_function(func)?;
        }
    }

    if opts.cse {
        summary += passes::eliminate_common_subexpressions(func, globals)?;

        if opts.verify {
            verify_function(func)?;
        }
    }

    tracing::debug!(
        function = %func.name,
        dead = summary.dead,
        folded = summary.folded,
        cse = summary.cse,
        memory = summary.loads + summary.stores + summary.load_after_store,
        "optimized function"
    );

    Ok(summary)
}
