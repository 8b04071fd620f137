//! C-- Compiler Backend
//!
//! Lowers abstract _C--_ syntax into a control-flow-graph intermediate
//! representation (_IR_) and simplifies it with dead-code elimination,
//! constant folding and dominance-based common-subexpression elimination.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::use_self)]
#![allow(clippy::redundant_else)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod compiler;
pub mod error;
pub mod opts;

pub use compiler::driver::{Compilation, compile};
pub use error::{CompileError, SourceLoc};
pub use opts::Opts;

pub type Result<T> = std::result::Result<T, CompileError>;
