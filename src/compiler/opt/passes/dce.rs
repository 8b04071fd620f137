//! Dead Code Elimination
//!
//! Erases instructions whose results are never used and whose execution has
//! no other observable effect.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::compiler::ir::{Function, InstId, Value};

/// Erases every pure instruction with no remaining uses, until a fixed point
/// is reached. Returns the number of instructions erased.
///
/// Stores, calls, volatile loads and terminators are never erased.
pub fn eliminate_dead_code(func: &mut Function) -> usize {
    let mut worklist: VecDeque<InstId> = func.inst_ids().collect();
    let mut queued: FxHashSet<InstId> = worklist.iter().copied().collect();

    let mut erased = 0;

    while let Some(id) = worklist.pop_front() {
        queued.remove(&id);

        let Some(inst) = func.try_inst(id) else {
            continue;
        };

        if !inst.kind.is_pure() || inst.has_uses() {
            continue;
        }

        let Some(inst) = func.remove_inst(id) else {
            continue;
        };

        erased += 1;
        tracing::trace!(
            function = %func.name,
            inst = id.0,
            kind = ?inst.kind,
            "erased dead instruction"
        );

        // Producers of the operands may have lost their last use.
        for operand in inst.operands {
            if let Value::Inst(def) = operand
                && func.is_live(def)
                && queued.insert(def)
            {
                worklist.push_back(def);
            }
        }
    }

    erased
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{BinaryOp, FunctionBuilder, InstKind, Param};
    use crate::compiler::types::Type;

    #[test]
    fn dce_erases_unused_chain() {
        let mut b = FunctionBuilder::new("f", Type::Void, vec![]);
        let slot = b.alloca(Type::I64, "x").unwrap();
        let load = b.load(slot, Type::I64).unwrap();
        let sum = b.binary(BinaryOp::Add, load, Value::Const(1)).unwrap();
        b.binary(BinaryOp::Mul, sum, sum).unwrap();
        b.ret(None).unwrap();

        let mut func = b.finish();

        // mul, then add, then load, then the now unused alloca.
        assert_eq!(eliminate_dead_code(&mut func), 4);
        assert_eq!(func.num_insts(), 1);
        assert_eq!(eliminate_dead_code(&mut func), 0);
    }

    #[test]
    fn dce_keeps_side_effects() {
        let mut b = FunctionBuilder::new(
            "f",
            Type::I64,
            vec![Param {
                name: "p".into(),
                ty: Type::I64.ptr_to(),
            }],
        );
        let ptr = Value::Param(0);
        b.store(Value::Const(1), ptr).unwrap();
        b.load_volatile(ptr, Type::I64).unwrap();
        b.call("g", vec![], Type::I64).unwrap();
        let unused = b.load(ptr, Type::I64).unwrap();
        b.ret(Some(Value::Const(0))).unwrap();

        let mut func = b.finish();

        assert_eq!(eliminate_dead_code(&mut func), 1);
        assert!(!func.is_live(unused.as_inst().unwrap()));

        let kinds: Vec<_> = func.inst_ids().map(|id| func.inst(id).kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                InstKind::Store { volatile: false },
                InstKind::Load { volatile: true },
                InstKind::Call { callee: "g".into() },
                InstKind::Ret,
            ]
        );
    }

    #[test]
    fn dce_keeps_used_values() {
        let mut b = FunctionBuilder::new("f", Type::I64, vec![]);
        let sum = b.binary(BinaryOp::Add, Value::Const(1), Value::Const(2)).unwrap();
        b.ret(Some(sum)).unwrap();

        let mut func = b.finish();
        assert_eq!(eliminate_dead_code(&mut func), 0);
        assert_eq!(func.num_insts(), 2);
    }
}
