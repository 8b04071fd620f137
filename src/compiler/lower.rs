//! IR Generation
//!
//! Lowers an _AST_ into the control-flow-graph _IR_. Functions are built one
//! at a time through a [`FunctionBuilder`] cursor; an error aborts only the
//! function (or global) that raised it.

pub mod ctrl_flow;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::Result;
use crate::compiler::ast::{
    self, BinaryOperator, Block, CastOperator, Declaration, ExternalDecl, Expression, GlobalDecl,
    LValue, Statement, SwitchArm, TranslationUnit, UnaryOperator,
};
use crate::compiler::ir::{
    BinaryOp, BlockId, CastOp, Function, FunctionBuilder, Global, GlobalId, Module, Param,
    Predicate, Value,
};
use crate::compiler::opt::passes::fold::try_fold_ast;
use crate::compiler::symbols::SymbolTable;
use crate::compiler::types::{Type, cmm_int};
use crate::error::{CompileError, SourceLoc};

use ctrl_flow::EscapeStack;

/// Storage bound to an identifier.
#[derive(Debug, Clone)]
struct Slot {
    /// Address of the storage (stack slot or global).
    addr: Value,
    /// Type of the stored value.
    ty: Type,
}

#[derive(Debug, Clone)]
struct Signature {
    ret_ty: Type,
    params: Vec<Type>,
}

/// Outcome of lowering a translation unit.
#[derive(Debug, Default)]
pub struct Lowered {
    /// Every function and global that was built successfully.
    pub module: Module,
    /// Errors of the declarations that were discarded, in the order they
    /// were raised.
    pub errors: Vec<CompileError>,
}

/// Lowers every external declaration of `unit` into a [`Module`].
///
/// All function signatures are registered first, so a call may name a
/// function defined later in the unit. A declaration that fails is left out
/// of the module and its error recorded; lowering continues with the next.
#[must_use]
pub fn build_module(unit: &TranslationUnit) -> Lowered {
    let mut module = Module::new();
    let mut errors = vec![];

    let mut signatures = FxHashMap::default();
    let mut duplicates = FxHashSet::default();

    for (idx, item) in unit.items.iter().enumerate() {
        if let ExternalDecl::Func(func) = item {
            if signatures.contains_key(&func.ident) {
                errors.push(CompileError::DuplicateDeclaration {
                    name: func.ident.clone(),
                    loc: func.loc,
                });
                duplicates.insert(idx);
                continue;
            }

            signatures.insert(
                func.ident.clone(),
                Signature {
                    ret_ty: func.ret_ty.to_type(),
                    params: func.params.iter().map(|param| param.ty.to_type()).collect(),
                },
            );
        }
    }

    let mut symbols = SymbolTable::new();

    for (idx, item) in unit.items.iter().enumerate() {
        if duplicates.contains(&idx) {
            continue;
        }

        match item {
            ExternalDecl::Global(decl) => {
                if let Err(err) = declare_global(decl, &signatures, &mut module, &mut symbols) {
                    tracing::warn!(global = %decl.ident, %err, "discarding global declaration");
                    errors.push(err);
                }
            }
            ExternalDecl::Func(func) => {
                let lowerer = FnLowerer::new(func, &signatures, &mut symbols);

                match lowerer.lower() {
                    Ok(built) => {
                        tracing::debug!(
                            function = %built.name,
                            blocks = built.num_blocks(),
                            insts = built.num_insts(),
                            "built function"
                        );
                        module.functions.push(built);
                    }
                    Err(err) => {
                        tracing::warn!(function = %func.ident, %err, "discarding function");
                        errors.push(err);
                    }
                }

                symbols.reset();
            }
        }
    }

    Lowered { module, errors }
}

fn declare_global(
    decl: &GlobalDecl,
    signatures: &FxHashMap<String, Signature>,
    module: &mut Module,
    symbols: &mut SymbolTable<Slot>,
) -> Result<()> {
    if signatures.contains_key(&decl.ident) {
        return Err(CompileError::DuplicateDeclaration {
            name: decl.ident.clone(),
            loc: decl.loc,
        });
    }

    let init = match &decl.init {
        Some(expr) => Some(try_fold_ast(expr).ok_or_else(|| {
            CompileError::NonConstantInitializer {
                name: decl.ident.clone(),
                loc: decl.loc,
            }
        })?),
        None => None,
    };

    let ty = decl.ty.to_type();

    // Bind first, so a duplicate leaves the module untouched.
    let id = GlobalId(module.globals.len());
    symbols.insert(
        &decl.ident,
        Slot {
            addr: Value::Global(id),
            ty: ty.clone(),
        },
        decl.loc,
    )?;

    module.add_global(Global {
        name: decl.ident.clone(),
        ty,
        init,
    });

    Ok(())
}

/// How a source binary operator maps onto _IR_ instructions.
#[derive(Debug, Clone, Copy)]
enum BinaryLowering {
    Arith(BinaryOp),
    /// `icmp` followed by `select cmp, 1, 0`.
    Compare(Predicate),
}

const fn classify_binary(op: BinaryOperator) -> BinaryLowering {
    match op {
        BinaryOperator::Add => BinaryLowering::Arith(BinaryOp::Add),
        BinaryOperator::Subtract => BinaryLowering::Arith(BinaryOp::Sub),
        BinaryOperator::Multiply => BinaryLowering::Arith(BinaryOp::Mul),
        BinaryOperator::Divide => BinaryLowering::Arith(BinaryOp::SDiv),
        BinaryOperator::Modulo => BinaryLowering::Arith(BinaryOp::SRem),
        BinaryOperator::BitAnd => BinaryLowering::Arith(BinaryOp::And),
        BinaryOperator::BitOr => BinaryLowering::Arith(BinaryOp::Or),
        BinaryOperator::BitXor => BinaryLowering::Arith(BinaryOp::Xor),
        BinaryOperator::ShiftLeft => BinaryLowering::Arith(BinaryOp::Shl),
        BinaryOperator::ShiftRight => BinaryLowering::Arith(BinaryOp::AShr),
        BinaryOperator::Eq => BinaryLowering::Compare(Predicate::Eq),
        BinaryOperator::NotEq => BinaryLowering::Compare(Predicate::Ne),
        BinaryOperator::OrdLess => BinaryLowering::Compare(Predicate::Slt),
        BinaryOperator::OrdLessEq => BinaryLowering::Compare(Predicate::Sle),
        BinaryOperator::OrdGreater => BinaryLowering::Compare(Predicate::Sgt),
        BinaryOperator::OrdGreaterEq => BinaryLowering::Compare(Predicate::Sge),
    }
}

/// Lowers a single function definition.
#[derive(Debug)]
struct FnLowerer<'a> {
    func: &'a ast::Function,
    builder: FunctionBuilder,
    signatures: &'a FxHashMap<String, Signature>,
    symbols: &'a mut SymbolTable<Slot>,
    escapes: EscapeStack,
}

impl<'a> FnLowerer<'a> {
    fn new(
        func: &'a ast::Function,
        signatures: &'a FxHashMap<String, Signature>,
        symbols: &'a mut SymbolTable<Slot>,
    ) -> Self {
        let params = func
            .params
            .iter()
            .map(|param| Param {
                name: param.ident.clone(),
                ty: param.ty.to_type(),
            })
            .collect();

        Self {
            func,
            builder: FunctionBuilder::new(&func.ident, func.ret_ty.to_type(), params),
            signatures,
            symbols,
            escapes: EscapeStack::default(),
        }
    }

    fn lower(mut self) -> Result<Function> {
        let func = self.func;

        self.symbols.push_scope();

        for (idx, param) in func.params.iter().enumerate() {
            let ty = param.ty.to_type();
            let slot = self.builder.alloca(ty.clone(), &param.ident)?;
            self.builder.store(Value::Param(idx), slot)?;
            self.symbols
                .insert(&param.ident, Slot { addr: slot, ty }, param.loc)?;
        }

        self.lower_block(&func.body)?;

        if !self.builder.is_terminated() {
            self.default_return()?;
        }

        self.symbols.pop_scope();
        debug_assert_eq!(self.escapes.depth(), 0);

        Ok(self.builder.finish())
    }

    /// Appends the implicit return of a function whose body falls off its
    /// end.
    fn default_return(&mut self) -> Result<()> {
        match self.builder.func().ret_ty.clone() {
            Type::Void => self.builder.ret(None),
            ty @ Type::Ptr(_) => {
                let null = self.builder.cast(CastOp::IntToPtr, Value::Const(0), ty)?;
                self.builder.ret(Some(null))
            }
            Type::I64 | Type::I1 => self.builder.ret(Some(Value::Const(0))),
        }
    }

    /// Moves the cursor to a fresh block (with no predecessors) if the
    /// current block is already terminated.
    fn ensure_open_block(&mut self) {
        if self.builder.is_terminated() {
            let block = self.builder.create_block("unreachable");
            self.builder.position_at_end(block);
        }
    }

    /// Branches to `dest` unless the current block is already terminated.
    fn branch_if_open(&mut self, dest: BlockId) -> Result<()> {
        if self.builder.is_terminated() {
            Ok(())
        } else {
            self.builder.br(dest)
        }
    }

    fn lower_block(&mut self, block: &Block) -> Result<()> {
        self.symbols.push_scope();

        for decl in &block.decls {
            self.lower_decl(decl)?;
        }

        for stmt in &block.stmts {
            self.lower_stmt(stmt)?;
        }

        self.symbols.pop_scope();

        Ok(())
    }

    fn lower_decl(&mut self, decl: &Declaration) -> Result<()> {
        self.ensure_open_block();

        let ty = decl.ty.to_type();
        let slot = self.builder.alloca(ty.clone(), &decl.ident)?;

        // The declared name is in scope within its own initializer.
        self.symbols
            .insert(&decl.ident, Slot { addr: slot, ty }, decl.loc)?;

        if let Some(init) = &decl.init {
            let (value, _) = self.lower_expr(init)?;
            self.builder.store(value, slot)?;
        }

        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Statement) -> Result<()> {
        if matches!(stmt, Statement::Empty) {
            return Ok(());
        }

        self.ensure_open_block();

        match stmt {
            Statement::Return { expr, .. } => {
                let value = match expr {
                    Some(expr) => Some(self.lower_expr(expr)?.0),
                    None => None,
                };
                self.builder.ret(value)?;
            }
            Statement::Expression(expr) => {
                self.lower_expr(expr)?;
            }
            Statement::Compound(block) => self.lower_block(block)?,
            Statement::If {
                cond,
                then,
                opt_else,
            } => {
                let then_block = self.builder.create_block("if.then");
                let else_block = opt_else
                    .as_ref()
                    .map(|_| self.builder.create_block("if.else"));
                let exit = self.builder.create_block("if.exit");

                let cmp = self.lower_cond(cond)?;
                self.builder
                    .cond_br(cmp, then_block, else_block.unwrap_or(exit))?;

                self.builder.position_at_end(then_block);
                self.lower_stmt(then)?;
                self.branch_if_open(exit)?;

                if let (Some(else_block), Some(else_stmt)) = (else_block, opt_else) {
                    self.builder.position_at_end(else_block);
                    self.lower_stmt(else_stmt)?;
                    self.branch_if_open(exit)?;
                }

                self.builder.position_at_end(exit);
            }
            Statement::While { cond, stmt } => {
                let header = self.builder.create_block("while.header");
                let body = self.builder.create_block("while.body");
                let exit = self.builder.create_block("while.exit");

                self.builder.br(header)?;

                self.builder.position_at_end(header);
                let cmp = self.lower_cond(cond)?;
                self.builder.cond_br(cmp, body, exit)?;

                self.builder.position_at_end(body);
                self.escapes.enter_loop(header, exit);
                self.lower_stmt(stmt)?;
                self.escapes.exit_ctx();
                self.branch_if_open(header)?;

                self.builder.position_at_end(exit);
            }
            Statement::Do { stmt, cond } => {
                let body = self.builder.create_block("do.body");
                let cond_block = self.builder.create_block("do.cond");
                let exit = self.builder.create_block("do.exit");

                self.builder.br(body)?;

                self.builder.position_at_end(body);
                self.escapes.enter_loop(cond_block, exit);
                self.lower_stmt(stmt)?;
                self.escapes.exit_ctx();
                self.branch_if_open(cond_block)?;

                self.builder.position_at_end(cond_block);
                let cmp = self.lower_cond(cond)?;
                self.builder.cond_br(cmp, body, exit)?;

                self.builder.position_at_end(exit);
            }
            Statement::For {
                opt_init,
                opt_cond,
                opt_post,
                stmt,
            } => {
                if let Some(init) = opt_init {
                    self.lower_expr(init)?;
                }

                let header = self.builder.create_block("for.header");
                let body = self.builder.create_block("for.body");
                let inc = self.builder.create_block("for.inc");
                let exit = self.builder.create_block("for.exit");

                self.builder.br(header)?;

                self.builder.position_at_end(header);
                match opt_cond {
                    Some(cond) => {
                        let cmp = self.lower_cond(cond)?;
                        self.builder.cond_br(cmp, body, exit)?;
                    }
                    None => self.builder.br(body)?,
                }

                self.builder.position_at_end(body);
                self.escapes.enter_loop(inc, exit);
                self.lower_stmt(stmt)?;
                self.escapes.exit_ctx();
                self.branch_if_open(inc)?;

                self.builder.position_at_end(inc);
                if let Some(post) = opt_post {
                    self.lower_expr(post)?;
                }
                self.builder.br(header)?;

                self.builder.position_at_end(exit);
            }
            Statement::Switch { cond, arms } => self.lower_switch(cond, arms)?,
            Statement::Break(loc) => {
                let target = self.escapes.break_target(*loc)?;
                self.builder.br(target)?;
            }
            Statement::Continue(loc) => {
                let target = self.escapes.continue_target(*loc)?;
                self.builder.br(target)?;
            }
            Statement::Empty => {}
        }

        Ok(())
    }

    fn lower_switch(&mut self, cond: &Expression, arms: &[SwitchArm]) -> Result<()> {
        // Labels are resolved before any instruction is emitted.
        let mut cases: Vec<(cmm_int, usize)> = vec![];
        let mut default = None;

        for (idx, arm) in arms.iter().enumerate() {
            match &arm.label {
                Some(label) => {
                    let value = try_fold_ast(label).ok_or_else(|| {
                        CompileError::NonConstantInitializer {
                            name: "case".to_string(),
                            loc: arm.loc,
                        }
                    })?;

                    if cases.iter().any(|(existing, _)| *existing == value) {
                        return Err(CompileError::DuplicateCase {
                            value,
                            loc: arm.loc,
                        });
                    }

                    cases.push((value, idx));
                }
                None if default.is_some() => {
                    return Err(CompileError::DuplicateDeclaration {
                        name: "default".to_string(),
                        loc: arm.loc,
                    });
                }
                None => default = Some(idx),
            }
        }

        let (scrutinee, _) = self.lower_expr(cond)?;

        let arm_blocks: Vec<BlockId> = arms
            .iter()
            .map(|_| self.builder.create_block("switch.case"))
            .collect();
        let exit = self.builder.create_block("switch.exit");
        let fallback = default.map_or(exit, |idx| arm_blocks[idx]);

        if cases.is_empty() {
            self.builder.br(fallback)?;
        }

        for (pos, (value, arm_idx)) in cases.iter().enumerate() {
            let cmp = self
                .builder
                .icmp(Predicate::Eq, scrutinee, Value::Const(*value))?;

            if pos + 1 == cases.len() {
                self.builder.cond_br(cmp, arm_blocks[*arm_idx], fallback)?;
            } else {
                let next_test = self.builder.create_block("switch.test");
                self.builder.cond_br(cmp, arm_blocks[*arm_idx], next_test)?;
                self.builder.position_at_end(next_test);
            }
        }

        self.escapes.enter_switch(exit);

        for (idx, arm) in arms.iter().enumerate() {
            self.builder.position_at_end(arm_blocks[idx]);

            for stmt in &arm.stmts {
                self.lower_stmt(stmt)?;
            }

            // Fall through to the next arm.
            let next = arm_blocks.get(idx + 1).copied().unwrap_or(exit);
            self.branch_if_open(next)?;
        }

        self.escapes.exit_ctx();
        self.builder.position_at_end(exit);

        Ok(())
    }

    /// Evaluates `cond` and compares it against zero, producing an `i1`.
    fn lower_cond(&mut self, cond: &Expression) -> Result<Value> {
        let (value, _) = self.lower_expr(cond)?;
        self.builder.icmp(Predicate::Ne, value, Value::Const(0))
    }

    /// Returns the address of `lvalue` and the type of the value stored
    /// there.
    fn lower_lvalue(&mut self, lvalue: &LValue) -> Result<(Value, Type)> {
        match lvalue {
            LValue::Var { ident, loc } => {
                let slot = self.symbols.find(ident, *loc)?;
                Ok((slot.addr, slot.ty))
            }
            LValue::Index { base, index } => {
                let (base_addr, base_ty) = self.lower_lvalue(base)?;
                let elem_ty = base_ty.pointee().cloned().unwrap_or(Type::I64);

                let ptr = self.builder.load(base_addr, base_ty)?;
                let (idx, _) = self.lower_expr(index)?;
                let addr = self.builder.gep(ptr, idx, elem_ty.clone().ptr_to())?;

                Ok((addr, elem_ty))
            }
            LValue::Deref(expr) => {
                let (ptr, ty) = self.lower_expr(expr)?;
                let elem_ty = ty.pointee().cloned().unwrap_or(Type::I64);
                Ok((ptr, elem_ty))
            }
        }
    }

    /// Lowers `expr`, returning its value and type.
    fn lower_expr(&mut self, expr: &Expression) -> Result<(Value, Type)> {
        match expr {
            Expression::IntConstant(v) => Ok((Value::Const(*v), Type::I64)),
            Expression::Load(lvalue) => {
                let (addr, ty) = self.lower_lvalue(lvalue)?;
                let value = self.builder.load(addr, ty.clone())?;
                Ok((value, ty))
            }
            Expression::AddressOf(lvalue) => {
                let (addr, ty) = self.lower_lvalue(lvalue)?;
                Ok((addr, ty.ptr_to()))
            }
            Expression::Assignment { lvalue, expr } => {
                let (addr, ty) = self.lower_lvalue(lvalue)?;
                let (value, _) = self.lower_expr(expr)?;
                self.builder.store(value, addr)?;
                Ok((value, ty))
            }
            Expression::Unary { op, expr } => {
                let (value, ty) = self.lower_expr(expr)?;

                match op {
                    UnaryOperator::Plus => Ok((value, ty)),
                    UnaryOperator::Negate => {
                        let neg = self.builder.binary(BinaryOp::Sub, Value::Const(0), value)?;
                        Ok((neg, Type::I64))
                    }
                    UnaryOperator::Complement => {
                        let not = self.builder.binary(BinaryOp::Xor, value, Value::Const(-1))?;
                        Ok((not, Type::I64))
                    }
                }
            }
            Expression::Binary { op, lhs, rhs } => {
                let (lhs, _) = self.lower_expr(lhs)?;
                let (rhs, _) = self.lower_expr(rhs)?;

                match classify_binary(*op) {
                    BinaryLowering::Arith(bin_op) => {
                        Ok((self.builder.binary(bin_op, lhs, rhs)?, Type::I64))
                    }
                    BinaryLowering::Compare(pred) => {
                        let cmp = self.builder.icmp(pred, lhs, rhs)?;
                        let value = self.builder.select(
                            cmp,
                            Value::Const(1),
                            Value::Const(0),
                            Type::I64,
                        )?;
                        Ok((value, Type::I64))
                    }
                }
            }
            Expression::Cast { op, expr } => {
                let (value, ty) = self.lower_expr(expr)?;

                let (cast_op, result_ty) = match op {
                    CastOperator::Bool => return Ok((value, ty)),
                    CastOperator::IntToPtr => {
                        (CastOp::IntToPtr, if ty.is_ptr() { ty } else { Type::I64.ptr_to() })
                    }
                    CastOperator::PtrToInt => (CastOp::PtrToInt, Type::I64),
                    CastOperator::SignExtend => (CastOp::SExt, Type::I64),
                    CastOperator::ZeroExtend => (CastOp::ZExt, Type::I64),
                };

                let value = self.builder.cast(cast_op, value, result_ty.clone())?;
                Ok((value, result_ty))
            }
            Expression::FuncCall { ident, args, loc } => self.lower_call(ident, args, *loc),
        }
    }

    fn lower_call(
        &mut self,
        ident: &str,
        args: &[Expression],
        loc: SourceLoc,
    ) -> Result<(Value, Type)> {
        let signature = self
            .signatures
            .get(ident)
            .ok_or_else(|| CompileError::UnboundIdentifier {
                name: ident.to_string(),
                loc,
            })?;

        if signature.params.len() != args.len() {
            return Err(CompileError::ArgumentCountMismatch {
                name: ident.to_string(),
                expected: signature.params.len(),
                found: args.len(),
                loc,
            });
        }

        let ret_ty = signature.ret_ty.clone();

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.lower_expr(arg)?.0);
        }

        let value = self.builder.call(ident, values, ret_ty.clone())?;
        Ok((value, ret_ty))
    }
}
