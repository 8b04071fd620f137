//! Common Subexpression Elimination
//!
//! Replaces recomputations of an expression by an earlier, dominating,
//! computation. Redundant memory accesses are removed within each basic
//! block first, which exposes more literal duplicates, and the two steps
//! repeat until neither finds anything.

use std::ops::AddAssign;

use crate::Result;
use crate::compiler::ir::{BlockId, Function, Global, InstId, InstKind, Value};
use crate::compiler::opt::DomTree;
use crate::compiler::opt::verify::verify_dominance;
use crate::compiler::types::Type;

/// Number of instructions erased by each part of the pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CseStats {
    /// Literal duplicates replaced by a dominating instruction.
    pub eliminated: usize,
    /// Loads replaced by an earlier load of the same address.
    pub loads: usize,
    /// Stores overwritten before being read.
    pub stores: usize,
    /// Loads replaced by the value just stored to their address.
    pub load_after_store: usize,
}

impl CseStats {
    #[inline]
    #[must_use]
    pub const fn total(&self) -> usize {
        self.eliminated + self.loads + self.stores + self.load_after_store
    }
}

impl AddAssign for CseStats {
    fn add_assign(&mut self, rhs: Self) {
        self.eliminated += rhs.eliminated;
        self.loads += rhs.loads;
        self.stores += rhs.stores;
        self.load_after_store += rhs.load_after_store;
    }
}

/// Runs common-subexpression elimination over `func`.
///
/// # Errors
///
/// Returns an error if some definition of `func` does not dominate one of its
/// uses.
pub fn eliminate_common_subexpressions(
    func: &mut Function,
    globals: &[Global],
) -> Result<CseStats> {
    let dom = DomTree::compute(func);
    verify_dominance(func, &dom)?;

    let mut stats = CseStats::default();

    // Merging duplicate addresses exposes new memory redundancies, so iterate
    // until a round erases nothing. Terminators are never touched, the
    // dominator tree stays valid across rounds.
    loop {
        let mut round = CseStats::default();

        for block in func.block_ids() {
            eliminate_redundant_memory(func, globals, block, &mut round);
        }

        round.eliminated = eliminate_literal_duplicates(func, &dom);

        if round.total() == 0 {
            break;
        }

        stats += round;
    }

    Ok(stats)
}

/// Returns `true` if `value` is the address of a distinct object: a stack
/// slot or a global.
fn is_identified_object(func: &Function, value: Value) -> bool {
    match value {
        Value::Global(_) => true,
        Value::Inst(id) => matches!(
            func.try_inst(id).map(|inst| &inst.kind),
            Some(InstKind::Alloca(_))
        ),
        Value::Const(_) | Value::Param(_) => false,
    }
}

/// Returns `false` only if `a` and `b` provably address different memory.
fn may_alias(func: &Function, a: Value, b: Value) -> bool {
    a == b || !(is_identified_object(func, a) && is_identified_object(func, b))
}

/// Memory facts known at a point of a block.
#[derive(Debug, Default)]
struct MemoryState {
    /// Loads whose result is still the current content of their address.
    loads: Vec<(Value, Type, InstId)>,
    /// Values last stored to an address and not since overwritten.
    stored: Vec<(Value, Value)>,
    /// Stores not yet observed by any read.
    unread: Vec<(Value, InstId)>,
}

impl MemoryState {
    fn clear(&mut self) {
        self.loads.clear();
        self.stored.clear();
        self.unread.clear();
    }
}

/// Forwards stored values to loads, reuses earlier loads and erases stores
/// overwritten before being read, all within `block`.
///
/// Calls and volatile accesses invalidate everything known about memory.
fn eliminate_redundant_memory(
    func: &mut Function,
    globals: &[Global],
    block: BlockId,
    stats: &mut CseStats,
) {
    let mut state = MemoryState::default();
    let insts = func.block(block).insts().to_vec();

    for id in insts {
        let Some(inst) = func.try_inst(id) else {
            continue;
        };
        let (kind, operands, ty) = (inst.kind.clone(), inst.operands.clone(), inst.ty.clone());

        match kind {
            InstKind::Load { volatile: false } => {
                let addr = operands[0];

                let forwarded = state
                    .stored
                    .iter()
                    .find(|(stored_addr, value)| {
                        *stored_addr == addr && func.value_type(*value, globals) == ty
                    })
                    .map(|(_, value)| *value);

                if let Some(value) = forwarded {
                    func.replace_all_uses(id, value);
                    func.remove_inst(id);
                    stats.load_after_store += 1;
                    tracing::trace!(
                        function = %func.name,
                        inst = id.0,
                        "forwarded stored value to load"
                    );
                    continue;
                }

                let earlier = state
                    .loads
                    .iter()
                    .find(|(load_addr, load_ty, _)| *load_addr == addr && *load_ty == ty)
                    .map(|(_, _, load)| *load);

                if let Some(earlier) = earlier {
                    func.replace_all_uses(id, Value::Inst(earlier));
                    func.remove_inst(id);
                    stats.loads += 1;
                    tracing::trace!(function = %func.name, inst = id.0, "reused earlier load");
                    continue;
                }

                state.unread.retain(|(store_addr, _)| !may_alias(func, *store_addr, addr));
                state.loads.push((addr, ty, id));
            }
            InstKind::Store { volatile: false } => {
                let value = operands[0];
                let addr = operands[1];

                if let Some(pos) = state
                    .unread
                    .iter()
                    .position(|(store_addr, _)| *store_addr == addr)
                {
                    let (_, overwritten) = state.unread.swap_remove(pos);
                    func.remove_inst(overwritten);
                    stats.stores += 1;
                    tracing::trace!(
                        function = %func.name,
                        inst = overwritten.0,
                        "erased overwritten store"
                    );
                }

                state.loads.retain(|(load_addr, _, _)| !may_alias(func, *load_addr, addr));
                state.stored.retain(|(stored_addr, _)| !may_alias(func, *stored_addr, addr));

                state.stored.push((addr, value));
                state.unread.push((addr, id));
            }
            InstKind::Load { volatile: true }
            | InstKind::Store { volatile: true }
            | InstKind::Call { .. } => {
                state.clear();
            }
            _ => {}
        }
    }
}

/// Replaces every instruction identical to a dominating one, visiting blocks
/// in dominator-tree preorder and then the unreachable blocks. Returns the
/// number of instructions erased.
fn eliminate_literal_duplicates(func: &mut Function, dom: &DomTree) -> usize {
    if func.num_blocks() == 0 {
        return 0;
    }

    let mut order = dom.preorder(Function::ENTRY);
    order.extend(func.block_ids().filter(|block| !dom.is_reachable(*block)));

    let mut eliminated = 0;

    for block in order {
        let mut pos = 0;

        while let Some(id) = func.block(block).insts().get(pos).copied() {
            pos += 1;

            if !func.inst(id).kind.is_cse_candidate() {
                continue;
            }

            // Rest of the block, then every block it dominates.
            let rest = func.block(block).insts()[pos..].to_vec();
            eliminated += replace_duplicates_of(func, id, &rest);

            if dom.is_reachable(block) {
                for dominated in dom.preorder(block).into_iter().skip(1) {
                    let insts = func.block(dominated).insts().to_vec();
                    eliminated += replace_duplicates_of(func, id, &insts);
                }
            }
        }
    }

    eliminated
}

/// Replaces each instruction of `candidates` identical to `id` by `id`.
fn replace_duplicates_of(func: &mut Function, id: InstId, candidates: &[InstId]) -> usize {
    let mut replaced = 0;

    for other in candidates {
        let is_duplicate = func
            .try_inst(*other)
            .is_some_and(|inst| inst.is_identical_to(func.inst(id)));

        if is_duplicate {
            func.replace_all_uses(*other, Value::Inst(id));
            func.remove_inst(*other);
            replaced += 1;
            tracing::trace!(
                function = %func.name,
                inst = other.0,
                with = id.0,
                "replaced common subexpression"
            );
        }
    }

    replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{BinaryOp, FunctionBuilder, Param, Predicate};
    use crate::error::CompileError;
    use pretty_assertions::assert_eq;

    fn int_params(names: &[&str]) -> Vec<Param> {
        names
            .iter()
            .map(|name| Param {
                name: (*name).to_string(),
                ty: Type::I64,
            })
            .collect()
    }

    #[test]
    fn cse_same_block_duplicates() {
        let mut b = FunctionBuilder::new("f", Type::I64, int_params(&["a", "b"]));
        let first = b.binary(BinaryOp::Add, Value::Param(0), Value::Param(1)).unwrap();
        let second = b.binary(BinaryOp::Add, Value::Param(0), Value::Param(1)).unwrap();
        // Operand order matters.
        let swapped = b.binary(BinaryOp::Add, Value::Param(1), Value::Param(0)).unwrap();
        let sum = b.binary(BinaryOp::Add, first, second).unwrap();
        let total = b.binary(BinaryOp::Add, sum, swapped).unwrap();
        b.ret(Some(total)).unwrap();

        let mut func = b.finish();
        let stats = eliminate_common_subexpressions(&mut func, &[]).unwrap();

        assert_eq!(stats.eliminated, 1);
        assert!(!func.is_live(second.as_inst().unwrap()));
        assert!(func.is_live(swapped.as_inst().unwrap()));
        assert_eq!(func.inst(sum.as_inst().unwrap()).operands, vec![first, first]);
    }

    #[test]
    fn cse_only_dominated_blocks() {
        // entry computes a + 1; `left` and `right` each compute a * 2.
        let mut b = FunctionBuilder::new("f", Type::I64, int_params(&["a"]));
        let left = b.create_block("left");
        let right = b.create_block("right");

        let inc = b.binary(BinaryOp::Add, Value::Param(0), Value::Const(1)).unwrap();
        let cmp = b.icmp(Predicate::Ne, inc, Value::Const(0)).unwrap();
        b.cond_br(cmp, left, right).unwrap();

        b.position_at_end(left);
        let left_inc = b.binary(BinaryOp::Add, Value::Param(0), Value::Const(1)).unwrap();
        let left_dbl = b.binary(BinaryOp::Mul, left_inc, Value::Const(2)).unwrap();
        b.ret(Some(left_dbl)).unwrap();

        b.position_at_end(right);
        let right_inc = b.binary(BinaryOp::Add, Value::Param(0), Value::Const(1)).unwrap();
        let right_dbl = b.binary(BinaryOp::Mul, right_inc, Value::Const(2)).unwrap();
        b.ret(Some(right_dbl)).unwrap();

        let mut func = b.finish();
        let stats = eliminate_common_subexpressions(&mut func, &[]).unwrap();

        // Both `a + 1` in the arms go; then each arm's `* 2` uses the same
        // operands, but neither arm dominates the other.
        assert_eq!(stats.eliminated, 2);
        assert!(func.is_live(left_dbl.as_inst().unwrap()));
        assert!(func.is_live(right_dbl.as_inst().unwrap()));
        assert_eq!(func.inst(right_dbl.as_inst().unwrap()).operands[0], inc);
    }

    #[test]
    fn cse_memory_forwarding() {
        let mut b = FunctionBuilder::new("f", Type::I64, int_params(&["x"]));
        let slot = b.alloca(Type::I64, "x").unwrap();
        let other = b.alloca(Type::I64, "y").unwrap();
        b.store(Value::Param(0), slot).unwrap();
        b.store(Value::Const(5), other).unwrap();
        let first = b.load(slot, Type::I64).unwrap();
        let second = b.load(other, Type::I64).unwrap();
        let again = b.load(other, Type::I64).unwrap();
        let sum = b.binary(BinaryOp::Add, first, second).unwrap();
        let total = b.binary(BinaryOp::Add, sum, again).unwrap();
        b.ret(Some(total)).unwrap();

        let mut func = b.finish();
        let stats = eliminate_common_subexpressions(&mut func, &[]).unwrap();

        assert_eq!(stats.load_after_store, 3);
        assert_eq!(stats.loads, 0);
        assert_eq!(
            func.inst(sum.as_inst().unwrap()).operands,
            vec![Value::Param(0), Value::Const(5)]
        );
    }

    #[test]
    fn cse_redundant_loads_and_stores() {
        let mut b = FunctionBuilder::new(
            "f",
            Type::I64,
            vec![Param {
                name: "p".into(),
                ty: Type::I64.ptr_to(),
            }],
        );
        let ptr = Value::Param(0);
        let first = b.load(ptr, Type::I64).unwrap();
        let second = b.load(ptr, Type::I64).unwrap();
        let dead_store = b.store(Value::Const(1), ptr).unwrap();
        let live_store = b.store(Value::Const(2), ptr).unwrap();
        b.call("g", vec![], Type::Void).unwrap();
        let after_call = b.load(ptr, Type::I64).unwrap();
        let sum = b.binary(BinaryOp::Add, first, second).unwrap();
        let total = b.binary(BinaryOp::Add, sum, after_call).unwrap();
        b.ret(Some(total)).unwrap();

        let mut func = b.finish();
        let stats = eliminate_common_subexpressions(&mut func, &[]).unwrap();

        assert_eq!(stats.loads, 1);
        assert_eq!(stats.stores, 1);
        assert_eq!(stats.load_after_store, 0);
        assert!(!func.is_live(dead_store));
        assert!(func.is_live(live_store));
        assert!(func.is_live(after_call.as_inst().unwrap()));
    }

    #[test]
    fn cse_store_kept_when_read_through_alias() {
        let mut b = FunctionBuilder::new(
            "f",
            Type::I64,
            vec![Param {
                name: "p".into(),
                ty: Type::I64.ptr_to(),
            }],
        );
        let slot = b.alloca(Type::I64, "x").unwrap();
        let first = b.store(Value::Const(1), slot).unwrap();
        // `p` may point at the slot.
        let read = b.load(Value::Param(0), Type::I64).unwrap();
        b.store(Value::Const(2), slot).unwrap();
        b.ret(Some(read)).unwrap();

        let mut func = b.finish();
        let stats = eliminate_common_subexpressions(&mut func, &[]).unwrap();

        assert_eq!(stats.stores, 0);
        assert!(func.is_live(first));
    }

    #[test]
    fn cse_is_idempotent() {
        let mut b = FunctionBuilder::new("f", Type::I64, int_params(&["a"]));
        let slot = b.alloca(Type::I64, "a").unwrap();
        b.store(Value::Param(0), slot).unwrap();
        let x = b.load(slot, Type::I64).unwrap();
        let y = b.load(slot, Type::I64).unwrap();
        let m1 = b.binary(BinaryOp::Mul, x, x).unwrap();
        let m2 = b.binary(BinaryOp::Mul, y, y).unwrap();
        let sum = b.binary(BinaryOp::Add, m1, m2).unwrap();
        b.ret(Some(sum)).unwrap();

        let mut func = b.finish();

        let first = eliminate_common_subexpressions(&mut func, &[]).unwrap();
        assert!(first.total() > 0);

        let snapshot = func.to_string();
        let second = eliminate_common_subexpressions(&mut func, &[]).unwrap();

        assert_eq!(second, CseStats::default());
        assert_eq!(func.to_string(), snapshot);
    }

    #[test]
    fn cse_merged_addresses_expose_redundant_loads() {
        let mut b = FunctionBuilder::new(
            "f",
            Type::I64,
            vec![
                Param {
                    name: "p".into(),
                    ty: Type::I64.ptr_to(),
                },
                Param {
                    name: "i".into(),
                    ty: Type::I64,
                },
            ],
        );
        let first_addr = b.gep(Value::Param(0), Value::Param(1), Type::I64.ptr_to()).unwrap();
        let first = b.load(first_addr, Type::I64).unwrap();
        let second_addr = b.gep(Value::Param(0), Value::Param(1), Type::I64.ptr_to()).unwrap();
        let second = b.load(second_addr, Type::I64).unwrap();
        let sum = b.binary(BinaryOp::Add, first, second).unwrap();
        b.ret(Some(sum)).unwrap();

        let mut func = b.finish();
        let stats = eliminate_common_subexpressions(&mut func, &[]).unwrap();

        assert_eq!(
            stats,
            CseStats {
                eliminated: 1,
                loads: 1,
                stores: 0,
                load_after_store: 0,
            }
        );
        assert!(!func.is_live(second.as_inst().unwrap()));
        assert_eq!(func.inst(sum.as_inst().unwrap()).operands, vec![first, first]);

        let again = eliminate_common_subexpressions(&mut func, &[]).unwrap();
        assert_eq!(again, CseStats::default());
    }

    #[test]
    fn cse_volatile_store_clears_memory_facts() {
        let mut b = FunctionBuilder::new("f", Type::I64, int_params(&["a"]));
        let slot = b.alloca(Type::I64, "x").unwrap();
        let other = b.alloca(Type::I64, "y").unwrap();
        let stored = b.store(Value::Param(0), slot).unwrap();
        b.store_volatile(Value::Const(1), other).unwrap();
        let read = b.load(slot, Type::I64).unwrap();
        b.store(Value::Const(2), slot).unwrap();
        b.ret(Some(read)).unwrap();

        let mut func = b.finish();
        let stats = eliminate_common_subexpressions(&mut func, &[]).unwrap();

        assert_eq!(stats, CseStats::default());
        assert!(func.is_live(stored));
        assert!(func.is_live(read.as_inst().unwrap()));
    }

    #[test]
    fn cse_rejects_ill_formed_dominance() {
        let mut b = FunctionBuilder::new("f", Type::I64, vec![]);
        let left = b.create_block("left");
        let right = b.create_block("right");
        b.cond_br(Value::Const(1), left, right).unwrap();

        b.position_at_end(left);
        let value = b.binary(BinaryOp::Add, Value::Const(1), Value::Const(2)).unwrap();
        b.ret(Some(value)).unwrap();

        b.position_at_end(right);
        b.ret(Some(value)).unwrap();

        let mut func = b.finish();
        assert!(matches!(
            eliminate_common_subexpressions(&mut func, &[]),
            Err(CompileError::IllFormedDominance { .. })
        ));
    }
}
