//! Machine-independent Optimization
//!
//! Optimization passes that transform an intermediate representation (_IR_) in
//! a target-agnostic way.

pub mod cse;
pub mod dce;
pub mod fold;
pub mod optimize;

pub use cse::{CseStats, eliminate_common_subexpressions};
pub use dce::eliminate_dead_code;
pub use fold::{fold_constants, try_fold_ast};
pub use optimize::{OptSummary, optimize_module};
