//! Compiler driver that orchestrates building the intermediate representation
//! (_IR_) of a _C--_ translation unit and optimizing it.

use crate::compiler::ast::TranslationUnit;
use crate::compiler::ir::Module;
use crate::compiler::lower;
use crate::compiler::opt::passes::{OptSummary, optimize_module};
use crate::error::CompileError;
use crate::{Opts, Result};

/// Result of compiling a translation unit.
#[derive(Debug)]
pub struct Compilation {
    /// Optimized module, holding every declaration that was built.
    pub module: Module,
    /// Per-category counts of the instructions erased by the optimizer.
    pub summary: OptSummary,
    /// Errors of the declarations that were discarded while building.
    pub errors: Vec<CompileError>,
}

impl Compilation {
    /// Returns `true` if every declaration was built.
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Formats each build error as a diagnostic for the given input `file`.
    #[must_use]
    pub fn diagnostics(&self, file: &str) -> Vec<String> {
        self.errors.iter().map(|err| err.render(file)).collect()
    }
}

/// Executes the compilation pipeline: builds the _IR_ of `unit`, then runs
/// the optimization passes enabled in `opts`.
///
/// Errors in individual declarations do not stop the pipeline, they are
/// collected in [`Compilation::errors`].
///
/// # Errors
///
/// Returns an error if the built _IR_ violates a structural or dominance
/// invariant.
pub fn compile(unit: &TranslationUnit, opts: &Opts) -> Result<Compilation> {
    let lower::Lowered { mut module, errors } = lower::build_module(unit);

    if !errors.is_empty() {
        tracing::warn!(count = errors.len(), "declarations discarded while building");
    }

    let summary = optimize_module(&mut module, opts)?;

    Ok(Compilation {
        module,
        summary,
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::{
        BinaryOperator, Block, Declaration, ExternalDecl, Expression, Function, LValue, Param,
        Statement, TypeSpec,
    };
    use crate::compiler::ir::{self, BinaryOp, InstKind, Value};
    use crate::compiler::opt::passes::{CseStats, eliminate_common_subexpressions};
    use crate::error::SourceLoc;
    use pretty_assertions::assert_eq;

    fn unit_of(funcs: Vec<Function>) -> TranslationUnit {
        TranslationUnit {
            items: funcs.into_iter().map(ExternalDecl::Func).collect(),
        }
    }

    /// `int add(int x, int y) { int z = x + y; int w = x + y; return z + w; }`
    fn add_fn() -> Function {
        let sum = || {
            Expression::binary(
                BinaryOperator::Add,
                Expression::var("x"),
                Expression::var("y"),
            )
        };

        Function::new(
            "add",
            TypeSpec::Int,
            vec![Param::int("x"), Param::int("y")],
            Block {
                decls: vec![Declaration::int("z", Some(sum())), Declaration::int("w", Some(sum()))],
                stmts: vec![Statement::ret(Some(Expression::binary(
                    BinaryOperator::Add,
                    Expression::var("z"),
                    Expression::var("w"),
                )))],
            },
        )
    }

    fn adds(func: &ir::Function) -> Vec<Vec<Value>> {
        func.inst_ids()
            .map(|id| func.inst(id))
            .filter(|inst| inst.kind == InstKind::Binary(BinaryOp::Add))
            .map(|inst| inst.operands.clone())
            .collect()
    }

    #[test]
    fn compile_eliminates_repeated_sum() {
        let compilation = compile(&unit_of(vec![add_fn()]), &Opts::default()).unwrap();
        assert!(compilation.is_clean());

        let func = compilation.module.function("add").unwrap();
        let adds = adds(func);

        assert_eq!(adds.len(), 2);
        assert_eq!(adds[0], vec![Value::Param(0), Value::Param(1)]);

        let first = func
            .inst_ids()
            .find(|id| func.inst(*id).kind == InstKind::Binary(BinaryOp::Add))
            .unwrap();
        assert_eq!(adds[1], vec![Value::Inst(first), Value::Inst(first)]);

        assert_eq!(
            compilation.summary,
            OptSummary {
                dead: 0,
                cse: 1,
                folded: 0,
                loads: 0,
                stores: 0,
                load_after_store: 6,
            }
        );

        let text = compilation.module.to_string();
        assert_eq!(text.matches("add i64 %x, %y").count(), 1);
    }

    #[test]
    fn compile_cse_reaches_fixed_point_through_addresses() {
        // int f(int *p, int i) { return p[i] + p[i]; }
        let elem = || Expression::Load(LValue::index(LValue::var("p"), Expression::var("i")));
        let func = Function::new(
            "f",
            TypeSpec::Int,
            vec![
                Param {
                    ident: "p".into(),
                    ty: TypeSpec::ptr(TypeSpec::Int),
                    loc: SourceLoc::default(),
                },
                Param::int("i"),
            ],
            Block {
                decls: vec![],
                stmts: vec![Statement::ret(Some(Expression::binary(
                    BinaryOperator::Add,
                    elem(),
                    elem(),
                )))],
            },
        );

        let mut compilation = compile(&unit_of(vec![func]), &Opts::default()).unwrap();

        // Merging the two addresses lets the second element load go too.
        assert_eq!(
            compilation.summary,
            OptSummary {
                dead: 0,
                cse: 1,
                folded: 0,
                loads: 1,
                stores: 0,
                load_after_store: 4,
            }
        );

        let globals = compilation.module.globals.clone();
        let func = &mut compilation.module.functions[0];
        let snapshot = func.to_string();

        let again = eliminate_common_subexpressions(func, &globals).unwrap();
        assert_eq!(again, CseStats::default());
        assert_eq!(func.to_string(), snapshot);

        let sum = adds(func);
        assert_eq!(sum.len(), 1);
        assert_eq!(sum[0][0], sum[0][1]);
    }

    #[test]
    fn compile_without_passes_keeps_both_sums() {
        let compilation = compile(&unit_of(vec![add_fn()]), &Opts::none()).unwrap();
        let func = compilation.module.function("add").unwrap();

        assert_eq!(adds(func).len(), 3);
        assert_eq!(compilation.summary, OptSummary::default());
    }

    #[test]
    fn compile_keeps_constant_branches() {
        // int f() { if (1) return 5; else return 6; }
        let func = Function::new(
            "f",
            TypeSpec::Int,
            vec![],
            Block {
                decls: vec![],
                stmts: vec![Statement::if_else(
                    Expression::int(1),
                    Statement::ret(Some(Expression::int(5))),
                    Some(Statement::ret(Some(Expression::int(6)))),
                )],
            },
        );

        let compilation = compile(&unit_of(vec![func]), &Opts::default()).unwrap();
        let func = compilation.module.function("f").unwrap();

        assert_eq!(func.num_blocks(), 4);
        assert_eq!(compilation.summary, OptSummary::default());

        let then_block = func.block_by_name("if.then").unwrap();
        assert_eq!(
            func.terminator(then_block).unwrap().operands,
            vec![Value::Const(5)]
        );
    }

    #[test]
    fn compile_collects_errors_and_continues() {
        let broken = Function::new(
            "broken",
            TypeSpec::Int,
            vec![],
            Block {
                decls: vec![],
                stmts: vec![Statement::Break(SourceLoc::new(4, 9))],
            },
        );

        let compilation = compile(&unit_of(vec![broken, add_fn()]), &Opts::default()).unwrap();

        assert!(!compilation.is_clean());
        assert_eq!(compilation.module.functions.len(), 1);
        assert!(compilation.module.function("broken").is_none());
        assert_eq!(
            compilation.errors,
            vec![CompileError::BreakOutsideLoop {
                loc: SourceLoc::new(4, 9)
            }]
        );

        let diagnostics = compilation.diagnostics("prog.cmm");
        assert!(diagnostics[0].contains("prog.cmm:4:9:"));
        assert!(diagnostics[0].contains("'break' statement not within a loop or switch"));
    }

    #[test]
    fn compile_is_deterministic() {
        let unit = unit_of(vec![add_fn()]);

        let first = compile(&unit, &Opts::default()).unwrap();
        let second = compile(&unit, &Opts::default()).unwrap();

        assert_eq!(first.summary, second.summary);
        assert_eq!(first.module.to_string(), second.module.to_string());
        assert_eq!(first.summary.to_string(), second.summary.to_string());
    }
}
