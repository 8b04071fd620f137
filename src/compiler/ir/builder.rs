//! Instruction Builder
//!
//! Cursor over a function under construction. Every emitter appends at the
//! end of the current block and refuses to append past a terminator.

use super::{BinaryOp, BlockId, CastOp, Function, InstId, InstKind, Param, Predicate, Value};
use crate::Result;
use crate::compiler::types::Type;
use crate::error::CompileError;

/// Appends instructions to a [`Function`] at a movable insertion point.
#[derive(Debug)]
pub struct FunctionBuilder {
    func: Function,
    /// Block instructions are currently appended to.
    cursor: BlockId,
}

impl FunctionBuilder {
    /// Returns a builder for a new function, positioned at the end of its
    /// (empty) `entry` block.
    #[must_use]
    pub fn new(name: &str, ret_ty: Type, params: Vec<Param>) -> Self {
        let mut func = Function::new(name, ret_ty, params);
        let entry = func.add_block("entry");

        Self {
            func,
            cursor: entry,
        }
    }

    /// Creates a new block without moving the insertion point.
    #[inline]
    pub fn create_block(&mut self, name: &str) -> BlockId {
        self.func.add_block(name)
    }

    /// Moves the insertion point to the end of `block`.
    #[inline]
    pub const fn position_at_end(&mut self, block: BlockId) {
        self.cursor = block;
    }

    #[inline]
    #[must_use]
    pub const fn current_block(&self) -> BlockId {
        self.cursor
    }

    /// Returns `true` if the current block already ends in a terminator.
    #[inline]
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.func.terminator(self.cursor).is_some()
    }

    #[inline]
    #[must_use]
    pub const fn func(&self) -> &Function {
        &self.func
    }

    /// Consumes the builder, returning the constructed function.
    #[inline]
    #[must_use]
    pub fn finish(self) -> Function {
        self.func
    }

    fn push(
        &mut self,
        kind: InstKind,
        operands: Vec<Value>,
        ty: Type,
        name: Option<&str>,
    ) -> Result<InstId> {
        if self.is_terminated() {
            return Err(CompileError::MalformedControlFlow {
                function: self.func.name.clone(),
                reason: format!(
                    "instruction appended after terminator of block '{}'",
                    self.func.block(self.cursor).name
                ),
            });
        }

        Ok(self.func.append_inst(
            self.cursor,
            kind,
            operands,
            ty,
            name.map(str::to_string),
        ))
    }

    /// Emits a stack slot for a value of type `ty`, returning its address.
    ///
    /// # Errors
    ///
    /// Returns an error if the current block is already terminated (as do all
    /// emitters below).
    pub fn alloca(&mut self, ty: Type, name: &str) -> Result<Value> {
        let ptr_ty = ty.clone().ptr_to();
        self.push(InstKind::Alloca(ty), vec![], ptr_ty, Some(name))
            .map(Value::Inst)
    }

    pub fn load(&mut self, ptr: Value, ty: Type) -> Result<Value> {
        self.push(InstKind::Load { volatile: false }, vec![ptr], ty, None)
            .map(Value::Inst)
    }

    pub fn load_volatile(&mut self, ptr: Value, ty: Type) -> Result<Value> {
        self.push(InstKind::Load { volatile: true }, vec![ptr], ty, None)
            .map(Value::Inst)
    }

    pub fn store(&mut self, value: Value, ptr: Value) -> Result<InstId> {
        self.push(
            InstKind::Store { volatile: false },
            vec![value, ptr],
            Type::Void,
            None,
        )
    }

    pub fn store_volatile(&mut self, value: Value, ptr: Value) -> Result<InstId> {
        self.push(
            InstKind::Store { volatile: true },
            vec![value, ptr],
            Type::Void,
            None,
        )
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
        self.push(InstKind::Binary(op), vec![lhs, rhs], Type::I64, None)
            .map(Value::Inst)
    }

    pub fn icmp(&mut self, pred: Predicate, lhs: Value, rhs: Value) -> Result<Value> {
        self.push(InstKind::ICmp(pred), vec![lhs, rhs], Type::I1, None)
            .map(Value::Inst)
    }

    pub fn select(
        &mut self,
        cond: Value,
        then_val: Value,
        else_val: Value,
        ty: Type,
    ) -> Result<Value> {
        self.push(InstKind::Select, vec![cond, then_val, else_val], ty, None)
            .map(Value::Inst)
    }

    pub fn cast(&mut self, op: CastOp, value: Value, ty: Type) -> Result<Value> {
        self.push(InstKind::Cast(op), vec![value], ty, None)
            .map(Value::Inst)
    }

    /// Emits the address of element `index` past `base`. `ty` is the
    /// resulting pointer type.
    pub fn gep(&mut self, base: Value, index: Value, ty: Type) -> Result<Value> {
        self.push(InstKind::GetElementPtr, vec![base, index], ty, None)
            .map(Value::Inst)
    }

    pub fn call(&mut self, callee: &str, args: Vec<Value>, ret_ty: Type) -> Result<Value> {
        self.push(
            InstKind::Call {
                callee: callee.to_string(),
            },
            args,
            ret_ty,
            None,
        )
        .map(Value::Inst)
    }

    pub fn br(&mut self, dest: BlockId) -> Result<()> {
        self.push(InstKind::Br { dest }, vec![], Type::Void, None)
            .map(|_| ())
    }

    pub fn cond_br(&mut self, cond: Value, then_dest: BlockId, else_dest: BlockId) -> Result<()> {
        self.push(
            InstKind::CondBr {
                then_dest,
                else_dest,
            },
            vec![cond],
            Type::Void,
            None,
        )
        .map(|_| ())
    }

    pub fn ret(&mut self, value: Option<Value>) -> Result<()> {
        self.push(InstKind::Ret, value.into_iter().collect(), Type::Void, None)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_append_after_terminator() {
        let mut builder = FunctionBuilder::new("f", Type::I64, vec![]);
        builder.ret(Some(Value::Const(0))).unwrap();

        assert!(builder.is_terminated());
        assert!(matches!(
            builder.binary(BinaryOp::Add, Value::Const(1), Value::Const(2)),
            Err(CompileError::MalformedControlFlow { .. })
        ));
        assert!(builder.br(Function::ENTRY).is_err());
    }

    #[test]
    fn builder_moves_between_blocks() {
        let mut builder = FunctionBuilder::new("f", Type::Void, vec![]);
        let next = builder.create_block("next");

        assert_eq!(builder.current_block(), Function::ENTRY);
        builder.br(next).unwrap();

        builder.position_at_end(next);
        assert!(!builder.is_terminated());
        let slot = builder.alloca(Type::I64, "x").unwrap();
        builder.store(Value::Const(4), slot).unwrap();
        builder.ret(None).unwrap();

        let func = builder.finish();
        assert_eq!(func.successors(Function::ENTRY), vec![next]);
        assert_eq!(func.block(next).insts().len(), 3);
        assert_eq!(func.value_type(slot, &[]), Type::I64.ptr_to());
    }
}
