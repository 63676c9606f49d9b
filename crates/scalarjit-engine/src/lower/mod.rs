//! Expression → IR lowering
//!
//! Walks an expression tree once, emitting a single-block IR function named
//! `scalar_expr`. Its parameters are the distinct input columns (in order of
//! first reference) followed by the hoisted literals, and it returns
//! `(error code, result)`.
//!
//! Checked arithmetic, casts and nullable comparisons are emitted as calls
//! into the runtime support module, which are then inlined by [`link`].
//! Error codes of the individual steps are merged in evaluation order, so
//! the first failure wins.

pub mod link;

use rustc_hash::FxHashMap;
use scalarjit_ir::runtime::{self as rt, ArithOp, NullSentinel, MERGE_ERROR};
use scalarjit_ir::{BinaryOp, CmpOp, Instr, IrBuilder, IrFunction, IrType, Optimizer, Reg, UnaryOp};

use crate::error::CodegenError;
use crate::expr::{
    ArithmeticKind, ArithmeticOp, ColumnKey, ColumnVar, Comparison, ComparisonKind, Constant,
    Datum, Expr, Logical, LogicalKind, SqlType, TypeInfo, UnaryExpr, UnaryKind,
};
use crate::options::{CompilationOptions, OptLevel};
use crate::runtime::RuntimeModule;
use crate::verify::verify_or_abort;

/// Symbol of the generated entry function
pub const ENTRY_NAME: &str = "scalar_expr";

/// The verified IR form of one expression
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    function: IrFunction,
    inputs: Vec<ColumnVar>,
    literals: Vec<Constant>,
    result_type: TypeInfo,
}

impl CompiledExpression {
    /// The linked, optimized and verified IR
    pub fn function(&self) -> &IrFunction {
        &self.function
    }

    /// Distinct input columns, in parameter order
    pub fn inputs(&self) -> &[ColumnVar] {
        &self.inputs
    }

    /// Hoisted literals, passed after the columns
    pub fn hoisted_literals(&self) -> &[Constant] {
        &self.literals
    }

    /// Values of the hoisted literals as they appeared in the tree
    pub fn literal_values(&self) -> Vec<Datum> {
        self.literals.iter().map(|c| c.value.clone()).collect()
    }

    pub fn result_type(&self) -> TypeInfo {
        self.result_type
    }

    /// Types of every argument slot: columns, then hoisted literals
    pub fn argument_types(&self) -> Vec<TypeInfo> {
        self.inputs.iter().map(|c| c.ty).chain(self.literals.iter().map(|c| c.ty)).collect()
    }
}

/// Lower, link, optimize and verify `expr`
///
/// With `fetch_inputs` unset, the expression may not reference columns.
pub fn compile(
    runtime: &RuntimeModule,
    expr: &Expr,
    fetch_inputs: bool,
    options: &CompilationOptions,
) -> Result<CompiledExpression, CodegenError> {
    let mut ctx = GenerationContext::new(runtime, fetch_inputs, options);
    let result = ctx.lower(expr)?;
    let mut compiled = ctx.finish(result)?;

    if options.debug {
        if options.opt_level != OptLevel::None {
            tracing::debug!(
                opt_level = ?options.opt_level,
                "Debug mode skips IR optimization; opt_level applies to Cranelift only"
            );
        }
        tracing::debug!(ir = %compiled.function, "Linked IR (unoptimized)");
    } else {
        let before = compiled.function.instr_count();
        optimizer_for(options.opt_level).optimize(&mut compiled.function);
        tracing::trace!(
            before,
            after = compiled.function.instr_count(),
            opt_level = ?options.opt_level,
            "Optimized expression IR"
        );
    }

    verify_or_abort(&compiled.function);

    tracing::debug!(
        inputs = compiled.inputs.len(),
        literals = compiled.literals.len(),
        instrs = compiled.function.instr_count(),
        result = %compiled.result_type,
        "Compiled scalar expression"
    );
    Ok(compiled)
}

fn optimizer_for(level: OptLevel) -> Optimizer {
    match level {
        OptLevel::None => Optimizer::empty(),
        OptLevel::Default => Optimizer::new(),
        OptLevel::Aggressive => Optimizer::aggressive(),
    }
}

/// A lowered subexpression
#[derive(Debug, Clone, Copy)]
struct Value {
    reg: Reg,
    ty: TypeInfo,
}

/// Per-compilation lowering state
struct GenerationContext<'a> {
    runtime: &'a RuntimeModule,
    options: &'a CompilationOptions,
    fetch_inputs: bool,
    func: IrFunction,
    inputs: Vec<ColumnVar>,
    /// Column identity → (parameter index, register holding it)
    input_regs: FxHashMap<ColumnKey, (usize, Reg)>,
    literals: Vec<Constant>,
    /// Positions of the `Param` instructions reading hoisted literals
    literal_params: Vec<usize>,
    /// Error codes of every checked step, in evaluation order
    errors: Vec<Reg>,
}

impl<'a> GenerationContext<'a> {
    fn new(runtime: &'a RuntimeModule, fetch_inputs: bool, options: &'a CompilationOptions) -> Self {
        GenerationContext {
            runtime,
            options,
            fetch_inputs,
            func: IrFunction::new(ENTRY_NAME, vec![], vec![]),
            inputs: Vec::new(),
            input_regs: FxHashMap::default(),
            literals: Vec::new(),
            literal_params: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn builder(&mut self) -> IrBuilder<'_> {
        IrBuilder::new(&mut self.func)
    }

    fn note(&mut self, text: impl FnOnce() -> String) {
        if self.options.debug {
            self.builder().note(text());
        }
    }

    fn lower(&mut self, expr: &Expr) -> Result<Value, CodegenError> {
        match expr {
            Expr::Constant(c) => self.lower_constant(c),
            Expr::ColumnVar(c) => self.lower_column(c),
            Expr::ArithmeticOp(op) => self.lower_arithmetic(op),
            Expr::Comparison(c) => self.lower_comparison(c),
            Expr::Logical(l) => self.lower_logical(l),
            Expr::Unary(u) => self.lower_unary(u),
            Expr::FunctionCall(call) => Err(CodegenError::unsupported(format!(
                "function call {}() cannot be compiled",
                call.name
            ))),
        }
    }

    fn lower_constant(&mut self, c: &Constant) -> Result<Value, CodegenError> {
        let ty = value_type(c.ty)?;
        match &c.value {
            Datum::Null if c.ty.not_null => {
                return Err(CodegenError::unsupported(format!("NULL literal of type {}", c.ty)));
            }
            Datum::Null => {}
            value if value.kind() != Some(c.ty.kind) => {
                return Err(CodegenError::unsupported(format!(
                    "literal {} does not match its type {}",
                    value, c.ty
                )));
            }
            _ => {}
        }

        if self.options.hoist_literals {
            // Parameter index fixed up in `finish`, once the column count is known
            let slot = self.literals.len();
            self.literals.push(c.clone());
            let position = self.builder().position();
            self.literal_params.push(position);
            let reg = self.builder().param(slot as u32, ty);
            self.note(|| format!("literal {} -> hoisted #{}", c.value, slot));
            return Ok(Value { reg, ty: c.ty });
        }

        let mut b = self.builder();
        let reg = match (&c.value, rt::null_sentinel(ty)) {
            (Datum::Null, NullSentinel::Int(v)) => b.iconst(ty, v),
            (Datum::Null, NullSentinel::Float(v)) => b.fconst(ty, v),
            (Datum::Bool(v), _) => b.bool_const(*v),
            (Datum::SmallInt(v), _) => b.iconst(ty, *v as i64),
            (Datum::Int(v), _) => b.iconst(ty, *v as i64),
            (Datum::BigInt(v), _) => b.iconst(ty, *v),
            (Datum::Float(v), _) => b.fconst(ty, *v as f64),
            (Datum::Double(v), _) => b.fconst(ty, *v),
            (Datum::Text(_), _) => return Err(CodegenError::unsupported("text literal")),
        };
        Ok(Value { reg, ty: c.ty })
    }

    fn lower_column(&mut self, col: &ColumnVar) -> Result<Value, CodegenError> {
        if !self.fetch_inputs {
            return Err(CodegenError::unsupported(format!(
                "column reference (table {}, column {}) while input fetching is disabled",
                col.table_id, col.column_id
            )));
        }
        let ty = value_type(col.ty)?;

        let key = col.key();
        if let Some(&(index, reg)) = self.input_regs.get(&key) {
            let first = &self.inputs[index];
            if first.ty != col.ty {
                return Err(CodegenError::unsupported(format!(
                    "column (table {}, column {}) referenced as both {} and {}",
                    col.table_id, col.column_id, first.ty, col.ty
                )));
            }
            return Ok(Value { reg, ty: col.ty });
        }

        let index = self.inputs.len();
        self.inputs.push(col.clone());
        let reg = self.builder().param(index as u32, ty);
        self.input_regs.insert(key, (index, reg));
        self.note(|| {
            format!(
                "column table={} column={} rte={} -> input #{}",
                col.table_id, col.column_id, col.rte_index, index
            )
        });
        Ok(Value { reg, ty: col.ty })
    }

    fn lower_arithmetic(&mut self, op: &ArithmeticOp) -> Result<Value, CodegenError> {
        let lhs = self.lower(&op.left)?;
        let rhs = self.lower(&op.right)?;
        let kind = op.ty.kind;
        if lhs.ty.kind != kind || rhs.ty.kind != kind {
            return Err(CodegenError::unsupported(format!(
                "{:?} of {} and {} producing {}",
                op.op, lhs.ty.kind, rhs.ty.kind, kind
            )));
        }
        if !kind.is_numeric() {
            return Err(CodegenError::unsupported(format!("{:?} on {}", op.op, kind)));
        }
        let ty = value_type(op.ty)?;
        let arith = match op.op {
            ArithmeticKind::Add => ArithOp::Add,
            ArithmeticKind::Sub => ArithOp::Sub,
            ArithmeticKind::Mul => ArithOp::Mul,
            ArithmeticKind::Div => ArithOp::Div,
            ArithmeticKind::Mod => ArithOp::Mod,
        };

        let nullable = lhs.ty.is_nullable() || rhs.ty.is_nullable();
        let result = TypeInfo { kind, not_null: !nullable };
        check_declared("arithmetic", op.ty, result)?;
        self.note(|| format!("{:?} {}", op.op, kind));
        let reg = self.call_checked(&rt::arith_helper(arith, ty, nullable), vec![lhs.reg, rhs.reg])?;
        Ok(Value { reg, ty: result })
    }

    fn lower_comparison(&mut self, cmp: &Comparison) -> Result<Value, CodegenError> {
        let lhs = self.lower(&cmp.left)?;
        let rhs = self.lower(&cmp.right)?;
        if lhs.ty.kind != rhs.ty.kind {
            return Err(CodegenError::unsupported(format!(
                "comparison of {} with {}",
                lhs.ty.kind, rhs.ty.kind
            )));
        }
        let operand_ty = value_type(lhs.ty)?;
        let op = match cmp.op {
            ComparisonKind::Eq => CmpOp::Eq,
            ComparisonKind::Ne => CmpOp::Ne,
            ComparisonKind::Lt => CmpOp::Lt,
            ComparisonKind::Le => CmpOp::Le,
            ComparisonKind::Gt => CmpOp::Gt,
            ComparisonKind::Ge => CmpOp::Ge,
        };
        if operand_ty == IrType::Bool && !matches!(op, CmpOp::Eq | CmpOp::Ne) {
            return Err(CodegenError::unsupported(format!("ordering comparison {:?} on BOOLEAN", cmp.op)));
        }

        let nullable = lhs.ty.is_nullable() || rhs.ty.is_nullable();
        let result = TypeInfo { kind: SqlType::Boolean, not_null: !nullable };
        check_declared("comparison", cmp.ty, result)?;
        let reg = if nullable {
            let results = self.call_runtime(&rt::compare_helper(op, operand_ty), vec![lhs.reg, rhs.reg])?;
            results[0]
        } else {
            self.builder().compare(op, lhs.reg, rhs.reg)
        };
        Ok(Value { reg, ty: result })
    }

    fn lower_logical(&mut self, logical: &Logical) -> Result<Value, CodegenError> {
        let lhs = self.lower(&logical.left)?;
        let rhs = self.lower(&logical.right)?;
        for side in [lhs.ty, rhs.ty] {
            if side.kind != SqlType::Boolean {
                return Err(CodegenError::unsupported(format!("{:?} on {}", logical.op, side.kind)));
            }
            if side.is_nullable() {
                return Err(CodegenError::unsupported(format!(
                    "{:?} on nullable BOOLEAN operands",
                    logical.op
                )));
            }
        }
        check_declared("logical", logical.ty, TypeInfo::not_null(SqlType::Boolean))?;
        let op = match logical.op {
            LogicalKind::And => BinaryOp::And,
            LogicalKind::Or => BinaryOp::Or,
        };
        let reg = self.builder().binary(op, lhs.reg, rhs.reg);
        Ok(Value { reg, ty: TypeInfo::not_null(SqlType::Boolean) })
    }

    fn lower_unary(&mut self, unary: &UnaryExpr) -> Result<Value, CodegenError> {
        let operand = self.lower(&unary.operand)?;
        let operand_ty = value_type(operand.ty)?;
        let nullable = operand.ty.is_nullable();

        match unary.op {
            UnaryKind::Negate => {
                if !operand.ty.kind.is_numeric() {
                    return Err(CodegenError::unsupported(format!("negation of {}", operand.ty.kind)));
                }
                check_declared("negation", unary.ty, operand.ty)?;
                let reg = self.call_checked(&rt::neg_helper(operand_ty, nullable), vec![operand.reg])?;
                Ok(Value { reg, ty: operand.ty })
            }
            UnaryKind::Not => {
                if operand.ty != TypeInfo::not_null(SqlType::Boolean) {
                    return Err(CodegenError::unsupported(format!("NOT on {}", operand.ty)));
                }
                check_declared("NOT", unary.ty, operand.ty)?;
                let reg = self.builder().unary(UnaryOp::Not, operand.reg);
                Ok(Value { reg, ty: operand.ty })
            }
            UnaryKind::IsNull => {
                check_declared("IS NULL", unary.ty, TypeInfo::not_null(SqlType::Boolean))?;
                let reg = if nullable {
                    let mut b = self.builder();
                    let sentinel = match rt::null_sentinel(operand_ty) {
                        NullSentinel::Int(v) => b.iconst(operand_ty, v),
                        NullSentinel::Float(v) => b.fconst(operand_ty, v),
                    };
                    b.compare(CmpOp::Eq, operand.reg, sentinel)
                } else {
                    self.builder().bool_const(false)
                };
                Ok(Value { reg, ty: TypeInfo::not_null(SqlType::Boolean) })
            }
            UnaryKind::Cast => {
                let target = value_type(unary.ty)?;
                let ty = TypeInfo { kind: unary.ty.kind, not_null: operand.ty.not_null };
                check_declared("cast", unary.ty, ty)?;
                if target == operand_ty {
                    return Ok(Value { reg: operand.reg, ty });
                }
                let reg = self.call_checked(&rt::cast_helper(operand_ty, target, nullable), vec![operand.reg])?;
                Ok(Value { reg, ty })
            }
        }
    }

    /// Call a helper returning `(value, error code)` and record the error
    fn call_checked(&mut self, name: &str, args: Vec<Reg>) -> Result<Reg, CodegenError> {
        let results = self.call_runtime(name, args)?;
        match results.as_slice() {
            [value, err] => {
                self.errors.push(*err);
                Ok(*value)
            }
            _ => Err(CodegenError::unsupported(format!("@{} does not report errors", name))),
        }
    }

    fn call_runtime(&mut self, name: &str, args: Vec<Reg>) -> Result<Vec<Reg>, CodegenError> {
        let helper = self
            .runtime
            .get(name)
            .ok_or_else(|| CodegenError::unsupported(format!("no runtime support for @{}", name)))?;
        let arg_types: Vec<IrType> = args.iter().filter_map(|r| self.func.reg_type(*r)).collect();
        if arg_types != helper.params {
            return Err(CodegenError::unsupported(format!(
                "@{} cannot be called with ({:?})",
                name, arg_types
            )));
        }
        let returns = helper.returns.clone();
        Ok(self.builder().call(name, args, &returns))
    }

    fn finish(mut self, result: Value) -> Result<CompiledExpression, CodegenError> {
        let result_ty = value_type(result.ty)?;
        let columns = self.inputs.len();
        for (slot, &pos) in self.literal_params.iter().enumerate() {
            if let Some(Instr::Param { index, .. }) = self.func.instrs.get_mut(pos) {
                *index = (columns + slot) as u32;
            }
        }

        let mut params = Vec::with_capacity(columns + self.literals.len());
        for ty in self.inputs.iter().map(|c| c.ty).chain(self.literals.iter().map(|c| c.ty)) {
            params.push(value_type(ty)?);
        }
        self.func.params = params;
        self.func.returns = vec![IrType::I32, result_ty];

        let errors = std::mem::take(&mut self.errors);
        let err = match errors.split_first() {
            None => self.builder().iconst(IrType::I32, 0),
            Some((first, rest)) => {
                let mut err = *first;
                for next in rest {
                    err = self.builder().call(MERGE_ERROR, vec![err, *next], &[IrType::I32])[0];
                }
                err
            }
        };
        self.builder().ret(vec![err, result.reg]);

        let runtime = self.runtime;
        link::link_runtime_calls(&mut self.func, runtime, self.options.debug)?;

        Ok(CompiledExpression {
            function: self.func,
            inputs: self.inputs,
            literals: self.literals,
            result_type: result.ty,
        })
    }
}

/// Reject a node whose declared type is not what its lowering produces
///
/// A nullable declaration over a NOT NULL result is accepted.
fn check_declared(node: &str, declared: TypeInfo, produced: TypeInfo) -> Result<(), CodegenError> {
    if declared.kind != produced.kind {
        return Err(CodegenError::unsupported(format!(
            "{} declared {} but producing {}",
            node, declared, produced.kind
        )));
    }
    if declared.not_null && produced.is_nullable() {
        return Err(CodegenError::unsupported(format!(
            "{} declared {} over nullable operands",
            node, declared
        )));
    }
    Ok(())
}

/// Machine type of a value, rejecting text
fn value_type(ty: TypeInfo) -> Result<IrType, CodegenError> {
    ty.ir_type()
        .ok_or_else(|| CodegenError::unsupported(format!("values of type {}", ty.kind)))
}
