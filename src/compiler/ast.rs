//! Abstract Syntax Tree
//!
//! Already-parsed _C--_ constructs consumed by the control-flow builder. The
//! tokenizer and parser that produce these live outside this crate; every
//! construct that can fail carries the [`SourceLoc`] used in diagnostics.

use crate::compiler::types::{Type, cmm_int};
use crate::error::SourceLoc;

/// Abstract Syntax Tree (_AST_) of one translation unit.
#[derive(Debug, Clone, Default)]
pub struct TranslationUnit {
    pub items: Vec<ExternalDecl>,
}

/// Top-level declaration.
#[derive(Debug, Clone)]
pub enum ExternalDecl {
    Func(Function),
    Global(GlobalDecl),
}

/// Type specifier: `int`, `void`, or a pointer to another specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSpec {
    Int,
    Void,
    Ptr(Box<TypeSpec>),
}

impl TypeSpec {
    #[inline]
    #[must_use]
    pub fn ptr(inner: TypeSpec) -> Self {
        TypeSpec::Ptr(Box::new(inner))
    }

    /// Returns the _IR_ type for this specifier.
    #[must_use]
    pub fn to_type(&self) -> Type {
        match self {
            TypeSpec::Int => Type::I64,
            TypeSpec::Void => Type::Void,
            TypeSpec::Ptr(inner) => inner.to_type().ptr_to(),
        }
    }
}

/// _AST_ function definition.
#[derive(Debug, Clone)]
pub struct Function {
    pub ident: String,
    pub ret_ty: TypeSpec,
    pub params: Vec<Param>,
    pub body: Block,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub ident: String,
    pub ty: TypeSpec,
    pub loc: SourceLoc,
}

/// Module-level storage declaration (`int x = 4;`).
#[derive(Debug, Clone)]
pub struct GlobalDecl {
    pub ident: String,
    pub ty: TypeSpec,
    /// Must be a compile-time constant expression.
    pub init: Option<Expression>,
    pub loc: SourceLoc,
}

/// Local declaration at the start of a compound statement.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub ident: String,
    pub ty: TypeSpec,
    pub init: Option<Expression>,
    pub loc: SourceLoc,
}

/// Compound statement body: declarations precede statements.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub decls: Vec<Declaration>,
    pub stmts: Vec<Statement>,
}

/// One arm of a `switch` statement.
#[derive(Debug, Clone)]
pub struct SwitchArm {
    /// `None` marks the `default` arm.
    pub label: Option<Expression>,
    /// Statements up to the next label. Control falls through to the next
    /// arm unless they end in `break` (or another terminator).
    pub stmts: Vec<Statement>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Return {
        expr: Option<Expression>,
        loc: SourceLoc,
    },
    Expression(Expression),
    Compound(Block),
    If {
        /// Controlling expression.
        cond: Expression,
        /// Executes when the result of `cond` is non-zero.
        then: Box<Statement>,
        /// Optional statement to execute when result of `cond` is zero.
        opt_else: Option<Box<Statement>>,
    },
    While {
        cond: Expression,
        stmt: Box<Statement>,
    },
    Do {
        stmt: Box<Statement>,
        cond: Expression,
    },
    For {
        opt_init: Option<Expression>,
        /// An omitted condition is always true.
        opt_cond: Option<Expression>,
        opt_post: Option<Expression>,
        stmt: Box<Statement>,
    },
    Switch {
        /// Controlling expression, evaluated once.
        cond: Expression,
        arms: Vec<SwitchArm>,
    },
    Break(SourceLoc),
    Continue(SourceLoc),
    // Expression statement without an expression (';').
    Empty,
}

/// Location that can be read from or stored to.
#[derive(Debug, Clone)]
pub enum LValue {
    /// Named variable.
    Var { ident: String, loc: SourceLoc },
    /// `base[index]`, where `base` holds a pointer.
    Index {
        base: Box<LValue>,
        index: Box<Expression>,
    },
    /// `*(expr)`.
    Deref(Box<Expression>),
}

#[derive(Debug, Clone)]
pub enum Expression {
    IntConstant(cmm_int),
    /// Read of an lvalue.
    Load(LValue),
    /// `&lvalue`.
    AddressOf(LValue),
    /// `lvalue = expr`, evaluates to the stored value.
    Assignment {
        lvalue: LValue,
        expr: Box<Expression>,
    },
    Unary {
        op: UnaryOperator,
        expr: Box<Expression>,
    },
    Binary {
        op: BinaryOperator,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Cast {
        op: CastOperator,
        expr: Box<Expression>,
    },
    FuncCall {
        ident: String,
        args: Vec<Expression>,
        loc: SourceLoc,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// `-`
    Negate,
    /// `+`
    Plus,
    /// `~`
    Complement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    Eq,
    NotEq,
    OrdLess,
    OrdLessEq,
    OrdGreater,
    OrdGreaterEq,
}

/// Explicit conversion operators (`bool`, `i2p`, `p2i`, `sext`, `zext`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOperator {
    /// Yields its operand unchanged.
    Bool,
    IntToPtr,
    PtrToInt,
    SignExtend,
    ZeroExtend,
}

// Shorthand constructors, used by front ends and tests to assemble trees.

impl Expression {
    #[must_use]
    pub const fn int(v: cmm_int) -> Self {
        Expression::IntConstant(v)
    }

    #[must_use]
    pub fn var(ident: &str) -> Self {
        Expression::Load(LValue::var(ident))
    }

    #[must_use]
    pub fn binary(op: BinaryOperator, lhs: Expression, rhs: Expression) -> Self {
        Expression::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    #[must_use]
    pub fn unary(op: UnaryOperator, expr: Expression) -> Self {
        Expression::Unary {
            op,
            expr: Box::new(expr),
        }
    }

    #[must_use]
    pub fn cast(op: CastOperator, expr: Expression) -> Self {
        Expression::Cast {
            op,
            expr: Box::new(expr),
        }
    }

    #[must_use]
    pub fn assign(lvalue: LValue, expr: Expression) -> Self {
        Expression::Assignment {
            lvalue,
            expr: Box::new(expr),
        }
    }

    #[must_use]
    pub fn call(ident: &str, args: Vec<Expression>) -> Self {
        Expression::FuncCall {
            ident: ident.to_string(),
            args,
            loc: SourceLoc::default(),
        }
    }
}

impl LValue {
    #[must_use]
    pub fn var(ident: &str) -> Self {
        LValue::Var {
            ident: ident.to_string(),
            loc: SourceLoc::default(),
        }
    }

    #[must_use]
    pub fn index(base: LValue, index: Expression) -> Self {
        LValue::Index {
            base: Box::new(base),
            index: Box::new(index),
        }
    }
}

impl Statement {
    #[must_use]
    pub const fn ret(expr: Option<Expression>) -> Self {
        Statement::Return {
            expr,
            loc: SourceLoc::new(0, 0),
        }
    }

    #[must_use]
    pub fn assign(ident: &str, expr: Expression) -> Self {
        Statement::Expression(Expression::assign(LValue::var(ident), expr))
    }

    #[must_use]
    pub fn if_else(cond: Expression, then: Statement, opt_else: Option<Statement>) -> Self {
        Statement::If {
            cond,
            then: Box::new(then),
            opt_else: opt_else.map(Box::new),
        }
    }

    #[must_use]
    pub fn while_loop(cond: Expression, stmt: Statement) -> Self {
        Statement::While {
            cond,
            stmt: Box::new(stmt),
        }
    }

    #[must_use]
    pub fn block(decls: Vec<Declaration>, stmts: Vec<Statement>) -> Self {
        Statement::Compound(Block { decls, stmts })
    }
}

impl Declaration {
    #[must_use]
    pub fn int(ident: &str, init: Option<Expression>) -> Self {
        Declaration {
            ident: ident.to_string(),
            ty: TypeSpec::Int,
            init,
            loc: SourceLoc::default(),
        }
    }
}

impl Param {
    #[must_use]
    pub fn int(ident: &str) -> Self {
        Param {
            ident: ident.to_string(),
            ty: TypeSpec::Int,
            loc: SourceLoc::default(),
        }
    }
}

impl Function {
    #[must_use]
    pub fn new(ident: &str, ret_ty: TypeSpec, params: Vec<Param>, body: Block) -> Self {
        Function {
            ident: ident.to_string(),
            ret_ty,
            params,
            body,
            loc: SourceLoc::default(),
        }
    }
}
