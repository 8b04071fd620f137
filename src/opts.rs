//! Options controlling which optimization passes run over the _IR_.

/// Optimization options.
///
/// Passes always run in the fixed order: dead-code elimination, constant
/// folding, common-subexpression elimination. Disabling a pass skips it
/// without changing the order of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opts {
    /// Dead-code elimination.
    pub dce: bool,
    /// Constant folding.
    pub fold: bool,
    /// Dominance-based common-subexpression elimination.
    pub cse: bool,
    /// Check the structural and dominance invariants after construction and
    /// after every pass.
    pub verify: bool,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            dce: true,
            fold: true,
            cse: true,
            verify: true,
        }
    }
}

impl Opts {
    /// Returns options with every pass disabled (verification stays on).
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self {
            dce: false,
            fold: false,
            cse: false,
            verify: true,
        }
    }

    #[inline]
    #[must_use]
    pub const fn with_dce(mut self, enabled: bool) -> Self {
        self.dce = enabled;
        self
    }

    #[inline]
    #[must_use]
    pub const fn with_fold(mut self, enabled: bool) -> Self {
        self.fold = enabled;
        self
    }

    #[inline]
    #[must_use]
    pub const fn with_cse(mut self, enabled: bool) -> Self {
        self.cse = enabled;
        self
    }

    #[inline]
    #[must_use]
    pub const fn with_verify(mut self, enabled: bool) -> Self {
        self.verify = enabled;
        self
    }

    /// Returns `true` if at least one optimization pass is enabled.
    #[inline]
    #[must_use]
    pub const fn any_passes_enabled(&self) -> bool {
        self.dce || self.fold || self.cse
    }
}
