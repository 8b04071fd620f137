//! Intermediate Representation
//!
//! Control-flow-graph _IR_: a module owns functions and global storage, a
//! function owns basic blocks and an arena of instructions, and each basic
//! block is an ordered list of instruction IDs ending in exactly one
//! terminator.
//!
//! Every instruction records the instructions that use its result, so uses
//! can be rewritten and dead instructions detected without rescanning the
//! function.

pub mod builder;

use std::fmt;

use rustc_hash::FxHashMap;

use crate::compiler::types::{Type, cmm_int};

pub use builder::FunctionBuilder;

/// Index of an instruction in its function's arena. Stable for the lifetime
/// of the function, including after other instructions are erased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub usize);

/// Index of a basic block in its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

/// Index of a global in its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(pub usize);

/// _IR_ value, used as an instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    /// Result of an instruction.
    Inst(InstId),
    /// Literal 64-bit integer.
    Const(cmm_int),
    /// Function parameter, by position.
    Param(usize),
    /// Address of module-level storage.
    Global(GlobalId),
}

impl Value {
    /// Returns the producing instruction, if the value is an instruction
    /// result.
    #[inline]
    #[must_use]
    pub const fn as_inst(&self) -> Option<InstId> {
        match self {
            Value::Inst(id) => Some(*id),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_const(&self) -> Option<cmm_int> {
        match self {
            Value::Const(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    And,
    Or,
    Xor,
    Shl,
    AShr,
    LShr,
}

/// Signed integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Predicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    IntToPtr,
    PtrToInt,
    SExt,
    ZExt,
}

/// Instruction opcode, with any non-value attributes it carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstKind {
    /// `lhs op rhs`.
    Binary(BinaryOp),
    /// `lhs pred rhs`, producing an `i1`.
    ICmp(Predicate),
    /// `cond ? a : b`.
    Select,
    Cast(CastOp),
    /// Address of element `index` past pointer `base`.
    GetElementPtr,
    /// Stack slot holding a value of the given type.
    Alloca(Type),
    /// Read from the address operand.
    Load { volatile: bool },
    /// Write the first operand to the address in the second.
    Store { volatile: bool },
    Call { callee: String },
    Br { dest: BlockId },
    CondBr { then_dest: BlockId, else_dest: BlockId },
    /// Return, with an optional operand.
    Ret,
}

impl InstKind {
    /// Returns `true` for the control-transfer instructions that end a basic
    /// block.
    #[inline]
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(self, InstKind::Br { .. } | InstKind::CondBr { .. } | InstKind::Ret)
    }

    /// Returns `true` if the instruction has no observable effect beyond
    /// producing its result.
    #[inline]
    #[must_use]
    pub const fn is_pure(&self) -> bool {
        match self {
            InstKind::Binary(_)
            | InstKind::ICmp(_)
            | InstKind::Select
            | InstKind::Cast(_)
            | InstKind::GetElementPtr
            | InstKind::Alloca(_) => true,
            InstKind::Load { volatile } => !*volatile,
            InstKind::Store { .. }
            | InstKind::Call { .. }
            | InstKind::Br { .. }
            | InstKind::CondBr { .. }
            | InstKind::Ret => false,
        }
    }

    /// Returns `true` if two instructions of this kind with identical
    /// operands always compute the same value, so one can replace the other.
    ///
    /// Memory accesses, stack slots, calls and terminators never qualify.
    #[inline]
    #[must_use]
    pub const fn is_cse_candidate(&self) -> bool {
        matches!(
            self,
            InstKind::Binary(_)
                | InstKind::ICmp(_)
                | InstKind::Select
                | InstKind::Cast(_)
                | InstKind::GetElementPtr
        )
    }

    /// Returns the blocks control can transfer to after this instruction.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            InstKind::Br { dest } => vec![*dest],
            InstKind::CondBr {
                then_dest,
                else_dest,
            } => vec![*then_dest, *else_dest],
            _ => vec![],
        }
    }
}

/// _IR_ instruction.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub kind: InstKind,
    pub operands: Vec<Value>,
    /// Result type, `Type::Void` if the instruction produces no value.
    pub ty: Type,
    /// Optional name used when printing the result.
    pub name: Option<String>,
    /// Owning block.
    pub block: BlockId,
    /// Instructions using the result, once per operand occurrence.
    users: Vec<InstId>,
}

impl Instruction {
    #[inline]
    #[must_use]
    pub fn users(&self) -> &[InstId] {
        &self.users
    }

    #[inline]
    #[must_use]
    pub fn has_uses(&self) -> bool {
        !self.users.is_empty()
    }

    /// Returns `true` if `other` computes the same expression: identical
    /// opcode, operands (in order) and result type.
    #[inline]
    #[must_use]
    pub fn is_identical_to(&self, other: &Instruction) -> bool {
        self.kind == other.kind && self.operands == other.operands && self.ty == other.ty
    }
}

/// Ordered sequence of instructions.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub name: String,
    insts: Vec<InstId>,
}

impl BasicBlock {
    #[inline]
    #[must_use]
    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

/// _IR_ function definition.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub ret_ty: Type,
    pub params: Vec<Param>,
    blocks: Vec<BasicBlock>,
    /// Instruction arena, erased instructions are `None`.
    insts: Vec<Option<Instruction>>,
    /// Occurrences of each block name, used to keep labels unique.
    block_names: FxHashMap<String, usize>,
}

impl Function {
    /// Entry block of every function with at least one block.
    pub const ENTRY: BlockId = BlockId(0);

    #[must_use]
    pub fn new(name: &str, ret_ty: Type, params: Vec<Param>) -> Self {
        Self {
            name: name.to_string(),
            ret_ty,
            params,
            blocks: vec![],
            insts: vec![],
            block_names: FxHashMap::default(),
        }
    }

    /// Appends a new, empty, block. A numeric suffix is added to `name` if a
    /// block with the same name already exists.
    pub fn add_block(&mut self, name: &str) -> BlockId {
        let count = self.block_names.entry(name.to_string()).or_insert(0);
        let label = if *count == 0 {
            name.to_string()
        } else {
            format!("{name}{count}")
        };
        *count += 1;

        self.blocks.push(BasicBlock {
            name: label,
            insts: vec![],
        });

        BlockId(self.blocks.len() - 1)
    }

    #[inline]
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    /// Returns the block IDs in layout order.
    #[inline]
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + use<> {
        (0..self.blocks.len()).map(BlockId)
    }

    #[inline]
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Returns the first block with the given label.
    #[must_use]
    pub fn block_by_name(&self, name: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|block| block.name == name)
            .map(BlockId)
    }

    /// Returns the instruction for `id`.
    ///
    /// # Panics
    ///
    /// Panics if the instruction was erased.
    #[inline]
    #[must_use]
    pub fn inst(&self, id: InstId) -> &Instruction {
        self.insts[id.0]
            .as_ref()
            .expect("instruction should not be used after being erased")
    }

    /// Returns the instruction for `id`, or `None` if it was erased.
    #[inline]
    #[must_use]
    pub fn try_inst(&self, id: InstId) -> Option<&Instruction> {
        self.insts.get(id.0).and_then(Option::as_ref)
    }

    #[inline]
    #[must_use]
    pub fn is_live(&self, id: InstId) -> bool {
        self.try_inst(id).is_some()
    }

    /// Returns all live instructions, block by block in layout order.
    pub fn inst_ids(&self) -> impl Iterator<Item = InstId> + '_ {
        self.blocks.iter().flat_map(|block| block.insts.iter().copied())
    }

    /// Number of live instructions.
    #[must_use]
    pub fn num_insts(&self) -> usize {
        self.blocks.iter().map(|block| block.insts.len()).sum()
    }

    /// Returns the last instruction of `block` if it is a terminator.
    #[must_use]
    pub fn terminator(&self, block: BlockId) -> Option<&Instruction> {
        self.block(block)
            .insts
            .last()
            .map(|id| self.inst(*id))
            .filter(|inst| inst.kind.is_terminator())
    }

    /// Returns the blocks that control can reach directly from `block`.
    #[must_use]
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block)
            .map(|term| term.kind.successors())
            .unwrap_or_default()
    }

    /// Returns the predecessors of every block, indexed by block ID.
    #[must_use]
    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut preds = vec![vec![]; self.blocks.len()];

        for block in self.block_ids() {
            for succ in self.successors(block) {
                if let Some(list) = preds.get_mut(succ.0)
                    && !list.contains(&block)
                {
                    list.push(block);
                }
            }
        }

        preds
    }

    /// Appends an instruction at the end of `block`, registering it as a
    /// user of each of its instruction operands.
    pub fn append_inst(
        &mut self,
        block: BlockId,
        kind: InstKind,
        operands: Vec<Value>,
        ty: Type,
        name: Option<String>,
    ) -> InstId {
        let id = InstId(self.insts.len());

        for operand in &operands {
            if let Value::Inst(def) = operand
                && let Some(Some(def)) = self.insts.get_mut(def.0)
            {
                def.users.push(id);
            }
        }

        self.insts.push(Some(Instruction {
            kind,
            operands,
            ty,
            name,
            block,
            users: vec![],
        }));
        self.blocks[block.0].insts.push(id);

        id
    }

    /// Erases an instruction from its block, removing it from the use sets of
    /// its operands. Returns the erased instruction.
    ///
    /// The instruction's own result should have no remaining uses.
    pub fn remove_inst(&mut self, id: InstId) -> Option<Instruction> {
        let inst = self.insts.get_mut(id.0)?.take()?;

        debug_assert!(
            inst.users.is_empty(),
            "erasing an instruction whose result is still used"
        );

        self.blocks[inst.block.0].insts.retain(|i| *i != id);

        for operand in &inst.operands {
            if let Value::Inst(def) = operand
                && let Some(Some(def)) = self.insts.get_mut(def.0)
                && let Some(pos) = def.users.iter().position(|user| *user == id)
            {
                def.users.swap_remove(pos);
            }
        }

        Some(inst)
    }

    /// Rewrites every use of the result of `old` to use `new` instead.
    /// Returns the instructions whose operands changed.
    pub fn replace_all_uses(&mut self, old: InstId, new: Value) -> Vec<InstId> {
        if new == Value::Inst(old) {
            return vec![];
        }

        let Some(Some(old_inst)) = self.insts.get_mut(old.0) else {
            return vec![];
        };

        let mut users = std::mem::take(&mut old_inst.users);
        users.sort_unstable();
        users.dedup();

        for user in &users {
            if let Some(Some(inst)) = self.insts.get_mut(user.0) {
                for operand in &mut inst.operands {
                    if *operand == Value::Inst(old) {
                        *operand = new;
                    }
                }
            }
        }

        self.resync_users_of(new, &users);

        users
    }

    /// Recomputes the use entries contributed by `users` to the producer of
    /// `value`.
    fn resync_users_of(&mut self, value: Value, users: &[InstId]) {
        let Value::Inst(def) = value else {
            return;
        };

        let mut entries = vec![];
        for user in users {
            if let Some(Some(inst)) = self.insts.get(user.0) {
                let count = inst.operands.iter().filter(|op| **op == value).count();
                entries.extend(std::iter::repeat_n(*user, count));
            }
        }

        if let Some(Some(def_inst)) = self.insts.get_mut(def.0) {
            def_inst.users.retain(|user| !users.contains(user));
            def_inst.users.extend(entries);
        }
    }

    /// Returns the type of `value` within this function.
    #[must_use]
    pub fn value_type(&self, value: Value, globals: &[Global]) -> Type {
        match value {
            Value::Inst(id) => self.inst(id).ty.clone(),
            Value::Const(_) => Type::I64,
            Value::Param(idx) => self.params[idx].ty.clone(),
            Value::Global(id) => globals[id.0].ty.clone().ptr_to(),
        }
    }
}

/// Module-level storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    pub name: String,
    /// Type of the stored value. The global itself is a pointer to it.
    pub ty: Type,
    pub init: Option<cmm_int>,
}

/// Top-level owner of all functions and globals of a translation unit.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
}

impl Module {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_global(&mut self, global: Global) -> GlobalId {
        self.globals.push(global);
        GlobalId(self.globals.len() - 1)
    }

    #[must_use]
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|func| func.name == name)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for global in &self.globals {
            match global.init {
                Some(init) => writeln!(f, "@{} = global {} {init}", global.name, global.ty)?,
                None => writeln!(f, "@{} = global {} 0", global.name, global.ty)?,
            }
        }

        for func in &self.functions {
            writeln!(f)?;
            write_function(f, func, &self.globals)?;
        }

        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_function(f, self, &[])
    }
}

/// Writes the textual form of `func`. Globals missing from `globals` are
/// printed by index.
fn write_function(f: &mut fmt::Formatter<'_>, func: &Function, globals: &[Global]) -> fmt::Result {
    let fmt_value = |value: &Value| -> String {
        match value {
            Value::Inst(id) => match func.try_inst(*id).and_then(|inst| inst.name.as_ref()) {
                Some(name) => format!("%{name}.{}", id.0),
                None => format!("%{}", id.0),
            },
            Value::Const(v) => v.to_string(),
            Value::Param(idx) => func
                .params
                .get(*idx)
                .map_or_else(|| format!("%arg{idx}"), |param| format!("%{}", param.name)),
            Value::Global(id) => globals
                .get(id.0)
                .map_or_else(|| format!("@{}", id.0), |global| format!("@{}", global.name)),
        }
    };

    let params = func
        .params
        .iter()
        .map(|param| format!("{} %{}", param.ty, param.name))
        .collect::<Vec<_>>()
        .join(", ");

    writeln!(f, "define {} @{}({params}) {{", func.ret_ty, func.name)?;

    for block_id in func.block_ids() {
        let block = func.block(block_id);
        writeln!(f, "{}:", block.name)?;

        for id in block.insts() {
            let inst = func.inst(*id);
            let ops = inst.operands.iter().map(fmt_value).collect::<Vec<_>>();
            let label = |b: &BlockId| format!("%{}", func.block(*b).name);

            let body = match &inst.kind {
                InstKind::Binary(op) => {
                    format!("{} {} {}", format!("{op:?}").to_lowercase(), inst.ty, ops.join(", "))
                }
                InstKind::ICmp(pred) => {
                    format!("icmp {} {}", format!("{pred:?}").to_lowercase(), ops.join(", "))
                }
                InstKind::Select => format!("select {} {}", inst.ty, ops.join(", ")),
                InstKind::Cast(op) => {
                    let name = match op {
                        CastOp::IntToPtr => "inttoptr",
                        CastOp::PtrToInt => "ptrtoint",
                        CastOp::SExt => "sext",
                        CastOp::ZExt => "zext",
                    };
                    format!("{name} {} to {}", ops.join(", "), inst.ty)
                }
                InstKind::GetElementPtr => format!("getelementptr {}, {}", inst.ty, ops.join(", ")),
                InstKind::Alloca(ty) => format!("alloca {ty}"),
                InstKind::Load { volatile } => format!(
                    "load {}{}, {}",
                    if *volatile { "volatile " } else { "" },
                    inst.ty,
                    ops.join(", ")
                ),
                InstKind::Store { volatile } => format!(
                    "store {}{}",
                    if *volatile { "volatile " } else { "" },
                    ops.join(", ")
                ),
                InstKind::Call { callee } => {
                    format!("call {} @{callee}({})", inst.ty, ops.join(", "))
                }
                InstKind::Br { dest } => format!("br {}", label(dest)),
                InstKind::CondBr {
                    then_dest,
                    else_dest,
                } => format!("br {}, {}, {}", ops.join(", "), label(then_dest), label(else_dest)),
                InstKind::Ret => match ops.first() {
                    Some(v) => format!("ret {} {v}", func.ret_ty),
                    None => "ret void".to_string(),
                },
            };

            if inst.ty.is_void() {
                writeln!(f, "{:4}{body}", "")?;
            } else {
                writeln!(f, "{:4}{} = {body}", "", fmt_value(&Value::Inst(*id)))?;
            }
        }
    }

    writeln!(f, "}}")
}
