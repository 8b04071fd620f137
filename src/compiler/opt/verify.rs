//! IR Verification
//!
//! Structural and dominance invariants every function must satisfy after
//! construction and after each optimization pass.

use rustc_hash::FxHashSet;

use crate::Result;
use crate::compiler::ir::{Function, Module, Value};
use crate::compiler::opt::DomTree;
use crate::error::CompileError;

/// Verifies every function of `module`.
///
/// # Errors
///
/// Returns the first invariant violation found.
pub fn verify_module(module: &Module) -> Result<()> {
    for func in &module.functions {
        verify_function(func)?;
    }

    Ok(())
}

/// Verifies the structure of `func`, then that every definition dominates
/// its uses.
///
/// # Errors
///
/// Returns an error if either check fails.
pub fn verify_function(func: &Function) -> Result<()> {
    verify_structure(func)?;
    verify_dominance(func, &DomTree::compute(func))
}

/// Checks that every block ends in exactly one terminator and that every
/// branch targets a block of the function.
///
/// # Errors
///
/// Returns `MalformedControlFlow` describing the first violation.
pub fn verify_structure(func: &Function) -> Result<()> {
    let malformed = |reason: String| CompileError::MalformedControlFlow {
        function: func.name.clone(),
        reason,
    };

    if func.num_blocks() == 0 {
        return Err(malformed("function has no blocks".to_string()));
    }

    for block_id in func.block_ids() {
        let block = func.block(block_id);

        let Some((last, body)) = block.insts().split_last() else {
            return Err(malformed(format!("block '{}' is empty", block.name)));
        };

        if !func.inst(*last).kind.is_terminator() {
            return Err(malformed(format!(
                "block '{}' does not end in a terminator",
                block.name
            )));
        }

        if body.iter().any(|id| func.inst(*id).kind.is_terminator()) {
            return Err(malformed(format!(
                "block '{}' has a terminator before its end",
                block.name
            )));
        }

        for id in block.insts() {
            if func.inst(*id).block != block_id {
                return Err(malformed(format!(
                    "instruction %{} is listed in block '{}' but owned by another",
                    id.0, block.name
                )));
            }
        }

        for succ in func.successors(block_id) {
            if succ.0 >= func.num_blocks() {
                return Err(malformed(format!(
                    "block '{}' branches to unknown block #{}",
                    block.name, succ.0
                )));
            }
        }
    }

    Ok(())
}

/// Checks that each instruction operand is defined by an instruction that
/// dominates the use. Uses in unreachable blocks are exempt.
///
/// # Errors
///
/// Returns `IllFormedDominance` describing the first violation.
pub fn verify_dominance(func: &Function, dom: &DomTree) -> Result<()> {
    let ill_formed = |reason: String| CompileError::IllFormedDominance {
        function: func.name.clone(),
        reason,
    };

    for block_id in func.block_ids() {
        let block = func.block(block_id);
        let mut defined = FxHashSet::default();

        for id in block.insts() {
            let inst = func.inst(*id);

            for operand in &inst.operands {
                let def_id = match operand {
                    Value::Inst(def_id) => *def_id,
                    Value::Param(idx) if *idx >= func.params.len() => {
                        return Err(ill_formed(format!(
                            "%{} uses parameter #{idx} of a function with {} parameter(s)",
                            id.0,
                            func.params.len()
                        )));
                    }
                    _ => continue,
                };

                let Some(def) = func.try_inst(def_id) else {
                    return Err(ill_formed(format!(
                        "%{} uses erased instruction %{}",
                        id.0, def_id.0
                    )));
                };

                if !dom.is_reachable(block_id) {
                    continue;
                }

                let dominated = if def.block == block_id {
                    defined.contains(&def_id)
                } else {
                    dom.dominates(def.block, block_id)
                };

                if !dominated {
                    return Err(ill_formed(format!(
                        "definition of %{} does not dominate its use in %{} (block '{}')",
                        def_id.0, id.0, block.name
                    )));
                }
            }

            defined.insert(*id);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{BinaryOp, FunctionBuilder, InstKind};
    use crate::compiler::types::Type;

    #[test]
    fn verify_accepts_well_formed() {
        let mut b = FunctionBuilder::new("f", Type::I64, vec![]);
        let next = b.create_block("next");
        let sum = b.binary(BinaryOp::Add, Value::Const(1), Value::Const(2)).unwrap();
        b.br(next).unwrap();
        b.position_at_end(next);
        b.ret(Some(sum)).unwrap();

        assert_eq!(verify_function(&b.finish()), Ok(()));
    }

    #[test]
    fn verify_rejects_unterminated_block() {
        let mut b = FunctionBuilder::new("f", Type::Void, vec![]);
        b.binary(BinaryOp::Add, Value::Const(1), Value::Const(2)).unwrap();

        assert!(matches!(
            verify_function(&b.finish()),
            Err(CompileError::MalformedControlFlow { .. })
        ));
    }

    #[test]
    fn verify_rejects_use_in_sibling_branch() {
        let mut b = FunctionBuilder::new("f", Type::I64, vec![]);
        let left = b.create_block("left");
        let right = b.create_block("right");

        b.cond_br(Value::Const(1), left, right).unwrap();

        b.position_at_end(left);
        let value = b.binary(BinaryOp::Mul, Value::Const(3), Value::Const(4)).unwrap();
        b.ret(Some(value)).unwrap();

        // Not dominated: `left` is a sibling of `right`.
        b.position_at_end(right);
        b.ret(Some(value)).unwrap();

        assert!(matches!(
            verify_function(&b.finish()),
            Err(CompileError::IllFormedDominance { .. })
        ));
    }

    #[test]
    fn verify_rejects_use_before_def_in_block() {
        let mut func = Function::new("f", Type::I64, vec![]);
        let entry = func.add_block("entry");

        // %0 uses %1, which is defined after it.
        let first = func.append_inst(
            entry,
            InstKind::Binary(BinaryOp::Add),
            vec![Value::Inst(crate::compiler::ir::InstId(1)), Value::Const(1)],
            Type::I64,
            None,
        );
        func.append_inst(
            entry,
            InstKind::Binary(BinaryOp::Add),
            vec![Value::Const(1), Value::Const(1)],
            Type::I64,
            None,
        );
        func.append_inst(entry, InstKind::Ret, vec![Value::Inst(first)], Type::Void, None);

        assert!(matches!(
            verify_dominance(&func, &DomTree::compute(&func)),
            Err(CompileError::IllFormedDominance { .. })
        ));
    }

    #[test]
    fn verify_exempts_unreachable_blocks() {
        let mut b = FunctionBuilder::new("f", Type::I64, vec![]);
        let dead = b.create_block("dead");
        b.ret(Some(Value::Const(0))).unwrap();

        b.position_at_end(dead);
        let value = b.binary(BinaryOp::Add, Value::Const(1), Value::Const(1)).unwrap();
        b.ret(Some(value)).unwrap();

        assert_eq!(verify_function(&b.finish()), Ok(()));
    }
}
