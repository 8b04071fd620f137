//! Compiler Optimization
//!
//! Analyses and machine-independent passes over the intermediate
//! representation (_IR_), which aim to reduce redundancy without changing
//! observable behavior.

pub mod dominance;
pub mod passes;
pub mod verify;

pub use dominance::DomTree;
