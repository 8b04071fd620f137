//! Constant Folding
//!
//! Evaluates arithmetic on literal operands at compile-time, both in the
//! _IR_ and in _AST_ expressions that must be compile-time constants (global
//! initializers and `case` labels).

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::compiler::ast::{self, BinaryOperator, UnaryOperator};
use crate::compiler::ir::{BinaryOp, Function, InstId, InstKind, Instruction, Value};
use crate::compiler::types::cmm_int;

/// Replaces every foldable instruction of `func` by its literal result and
/// erases it, until a fixed point is reached. Returns the number of folds.
///
/// Only `add`, `sub`, `mul`, `sdiv`, `udiv`, `srem` and `urem` fold.
/// Division or remainder by zero, and signed `i64::MIN / -1`, are left in
/// place.
pub fn fold_constants(func: &mut Function) -> usize {
    let mut worklist: VecDeque<InstId> = func.inst_ids().collect();
    let mut queued: FxHashSet<InstId> = worklist.iter().copied().collect();

    let mut folded = 0;

    while let Some(id) = worklist.pop_front() {
        queued.remove(&id);

        let Some(value) = func.try_inst(id).and_then(try_fold_inst) else {
            continue;
        };

        let users = func.replace_all_uses(id, Value::Const(value));
        func.remove_inst(id);

        folded += 1;
        tracing::trace!(function = %func.name, inst = id.0, value, "folded constant");

        // Users may now have only literal operands.
        for user in users {
            if func.is_live(user) && queued.insert(user) {
                worklist.push_back(user);
            }
        }
    }

    folded
}

/// Returns the literal result of `inst`, or `None` if it cannot be folded.
fn try_fold_inst(inst: &Instruction) -> Option<cmm_int> {
    let InstKind::Binary(op) = inst.kind else {
        return None;
    };

    match inst.operands.as_slice() {
        [Value::Const(lhs), Value::Const(rhs)] => eval_ir_binary(op, *lhs, *rhs),
        _ => None,
    }
}

/// Evaluates a foldable _IR_ binary operator on two literals.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_wrap)]
fn eval_ir_binary(op: BinaryOp, lhs: cmm_int, rhs: cmm_int) -> Option<cmm_int> {
    match op {
        BinaryOp::Add => Some(lhs.wrapping_add(rhs)),
        BinaryOp::Sub => Some(lhs.wrapping_sub(rhs)),
        BinaryOp::Mul => Some(lhs.wrapping_mul(rhs)),
        // `None` for a zero divisor and for `MIN / -1`.
        BinaryOp::SDiv => lhs.checked_div(rhs),
        BinaryOp::SRem => lhs.checked_rem(rhs),
        BinaryOp::UDiv => (lhs as u64).checked_div(rhs as u64).map(|v| v as cmm_int),
        BinaryOp::URem => (lhs as u64).checked_rem(rhs as u64).map(|v| v as cmm_int),
        BinaryOp::And
        | BinaryOp::Or
        | BinaryOp::Xor
        | BinaryOp::Shl
        | BinaryOp::AShr
        | BinaryOp::LShr => None,
    }
}

/// Attempts to fold and return the provided _AST_ expression as a single
/// constant value, or `None` if the expression cannot be evaluated to a
/// compile-time constant.
#[must_use]
pub fn try_fold_ast(expr: &ast::Expression) -> Option<cmm_int> {
    match expr {
        ast::Expression::IntConstant(v) => Some(*v),
        ast::Expression::Unary { op, expr } => {
            let val = try_fold_ast(expr)?;

            Some(match op {
                UnaryOperator::Negate => val.wrapping_neg(),
                UnaryOperator::Plus => val,
                UnaryOperator::Complement => !val,
            })
        }
        ast::Expression::Binary { op, lhs, rhs } => {
            let lhs = try_fold_ast(lhs)?;
            let rhs = try_fold_ast(rhs)?;

            eval_ast_binary(*op, lhs, rhs)
        }
        // Integer/pointer conversions keep the bit pattern.
        ast::Expression::Cast { expr, .. } => try_fold_ast(expr),
        ast::Expression::Load(_)
        | ast::Expression::AddressOf(_)
        | ast::Expression::Assignment { .. }
        | ast::Expression::FuncCall { .. } => None,
    }
}

/// Evaluates a source-level binary operator on two constant operands, or
/// returns `None` if the result is undefined (zero divisor, overflowing
/// division, out-of-range shift).
#[inline]
#[must_use]
fn eval_ast_binary(op: BinaryOperator, lhs: cmm_int, rhs: cmm_int) -> Option<cmm_int> {
    let shift = || u32::try_from(rhs).ok().filter(|s| *s < cmm_int::BITS);

    match op {
        BinaryOperator::Add => Some(lhs.wrapping_add(rhs)),
        BinaryOperator::Subtract => Some(lhs.wrapping_sub(rhs)),
        BinaryOperator::Multiply => Some(lhs.wrapping_mul(rhs)),
        BinaryOperator::Divide => lhs.checked_div(rhs),
        BinaryOperator::Modulo => lhs.checked_rem(rhs),
        BinaryOperator::BitAnd => Some(lhs & rhs),
        BinaryOperator::BitOr => Some(lhs | rhs),
        BinaryOperator::BitXor => Some(lhs ^ rhs),
        BinaryOperator::ShiftLeft => shift().map(|s| lhs << s),
        BinaryOperator::ShiftRight => shift().map(|s| lhs >> s),
        BinaryOperator::Eq => Some(cmm_int::from(lhs == rhs)),
        BinaryOperator::NotEq => Some(cmm_int::from(lhs != rhs)),
        BinaryOperator::OrdLess => Some(cmm_int::from(lhs < rhs)),
        BinaryOperator::OrdLessEq => Some(cmm_int::from(lhs <= rhs)),
        BinaryOperator::OrdGreater => Some(cmm_int::from(lhs > rhs)),
        BinaryOperator::OrdGreaterEq => Some(cmm_int::from(lhs >= rhs)),
    }
}
