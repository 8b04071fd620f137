//! Compiler
//!
//! Stages that take an abstract _C--_ translation unit to an optimized
//! intermediate representation (_IR_).

pub mod ast;
pub mod driver;
pub mod ir;
pub mod lower;
pub mod opt;
pub mod symbols;
pub mod types;
