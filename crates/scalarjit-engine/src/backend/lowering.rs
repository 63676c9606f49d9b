//! Scalar IR → Cranelift IR lowering
//!
//! Translates a verified, call-free IR function into a single Cranelift
//! block. Two entry ABIs are supported:
//!
//! - direct: `fn(error: *mut i32, result: *mut T, inputs...)`, inputs by value
//! - packed: `fn(slots: *const *mut u8)`, where slot 0 receives the error
//!   code, slot 1 the result and slots 2.. hold the inputs
//!
//! Checked arithmetic is lowered to plain arithmetic plus explicit overflow
//! tests, and no instruction emitted here can trap or needs a libcall.

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{self, types, AbiParam, InstBuilder, MemFlags};
use cranelift_codegen::isa::CallConv;
use cranelift_frontend::{FunctionBuilder, Variable};
use scalarjit_ir::{BinaryOp, CheckedOp, CmpOp, Instr, IrFunction, IrType, Reg, Terminator, UnaryOp};

/// Entry ABI of a generated function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryAbi {
    Direct,
    Packed,
}

/// Packed slot holding the error code
pub const ERROR_SLOT: usize = 0;
/// Packed slot holding the result
pub const RESULT_SLOT: usize = 1;
/// First packed input slot
pub const FIRST_INPUT_SLOT: usize = 2;

/// Errors during Cranelift lowering
#[derive(Debug, thiserror::Error)]
pub enum LowerError {
    #[error("Unsupported instruction: {0}")]
    UnsupportedInstruction(String),
    #[error("Unsupported signature: {0}")]
    UnsupportedSignature(String),
}

/// Cranelift type carrying values of an IR type
pub fn cl_type(ty: IrType) -> ir::Type {
    match ty {
        IrType::Bool => types::I8,
        IrType::I16 => types::I16,
        IrType::I32 => types::I32,
        IrType::I64 => types::I64,
        IrType::F32 => types::F32,
        IrType::F64 => types::F64,
    }
}

/// Cranelift signature of the entry function for `func` under `abi`
pub fn entry_signature(func: &IrFunction, abi: EntryAbi, call_conv: CallConv, ptr_ty: ir::Type) -> ir::Signature {
    let mut sig = ir::Signature::new(call_conv);
    match abi {
        EntryAbi::Direct => {
            sig.params.push(AbiParam::new(ptr_ty));
            sig.params.push(AbiParam::new(ptr_ty));
            for ty in &func.params {
                sig.params.push(AbiParam::new(cl_type(*ty)));
            }
        }
        EntryAbi::Packed => sig.params.push(AbiParam::new(ptr_ty)),
    }
    sig
}

/// Where inputs come from and results go
enum Slots {
    Direct { error_ptr: ir::Value, result_ptr: ir::Value, inputs: Vec<ir::Value> },
    Packed { array: ir::Value },
}

/// State maintained during lowering of a single function
pub struct LoweringContext<'a> {
    func: &'a IrFunction,
    /// IR register → Cranelift variable, indexed by register number
    reg_vars: Vec<Variable>,
    slots: Slots,
    ptr_ty: ir::Type,
}

impl<'a> LoweringContext<'a> {
    /// Lower `func` into the function owned by `builder`.
    /// Takes ownership of the FunctionBuilder since finalize() consumes it.
    pub fn lower(
        func: &'a IrFunction,
        abi: EntryAbi,
        ptr_ty: ir::Type,
        mut builder: FunctionBuilder<'_>,
    ) -> Result<(), LowerError> {
        if func.returns.len() != 2 || func.returns[0] != IrType::I32 {
            return Err(LowerError::UnsupportedSignature(format!(
                "@{} must return (i32, value), returns {:?}",
                func.name, func.returns
            )));
        }

        let block = builder.create_block();
        builder.append_block_params_for_function_params(block);
        builder.switch_to_block(block);
        builder.seal_block(block);

        let params = builder.block_params(block).to_vec();
        let slots = match abi {
            EntryAbi::Direct => Slots::Direct {
                error_ptr: params[0],
                result_ptr: params[1],
                inputs: params[2..].to_vec(),
            },
            EntryAbi::Packed => Slots::Packed { array: params[0] },
        };

        let mut ctx = LoweringContext { func, reg_vars: Vec::new(), slots, ptr_ty };
        ctx.declare_all_regs(&mut builder);

        for instr in &func.instrs {
            ctx.lower_instr(instr, &mut builder)?;
        }
        ctx.lower_terminator(&mut builder)?;

        builder.finalize();
        Ok(())
    }

    /// Declare all IR registers as Cranelift variables
    fn declare_all_regs(&mut self, builder: &mut FunctionBuilder<'_>) {
        self.reg_vars = self
            .func
            .reg_types
            .iter()
            .map(|ty| builder.declare_var(cl_type(*ty)))
            .collect();
    }

    fn reg_ty(&self, reg: Reg) -> IrType {
        self.func.reg_type(reg).unwrap_or(IrType::I64)
    }

    fn use_reg(&self, builder: &mut FunctionBuilder<'_>, reg: Reg) -> ir::Value {
        builder.use_var(self.reg_vars[reg.0 as usize])
    }

    fn def_reg(&self, builder: &mut FunctionBuilder<'_>, reg: Reg, val: ir::Value) {
        builder.def_var(self.reg_vars[reg.0 as usize], val);
    }

    /// Address stored in packed slot `slot`
    fn slot_address(&self, builder: &mut FunctionBuilder<'_>, array: ir::Value, slot: usize) -> ir::Value {
        let offset = (slot * self.ptr_ty.bytes() as usize) as i32;
        builder.ins().load(self.ptr_ty, MemFlags::trusted(), array, offset)
    }

    fn lower_param(&self, builder: &mut FunctionBuilder<'_>, index: u32, ty: IrType) -> Result<ir::Value, LowerError> {
        match &self.slots {
            Slots::Direct { inputs, .. } => inputs.get(index as usize).copied().ok_or_else(|| {
                LowerError::UnsupportedInstruction(format!("param {} out of range", index))
            }),
            Slots::Packed { array } => {
                let addr = self.slot_address(builder, *array, FIRST_INPUT_SLOT + index as usize);
                Ok(builder.ins().load(cl_type(ty), MemFlags::trusted(), addr, 0))
            }
        }
    }

    fn lower_instr(&mut self, instr: &Instr, builder: &mut FunctionBuilder<'_>) -> Result<(), LowerError> {
        match instr {
            Instr::Iconst { dest, ty, value } => {
                let val = builder.ins().iconst(cl_type(*ty), immediate(*ty, *value));
                self.def_reg(builder, *dest, val);
            }
            Instr::Fconst { dest, ty, value } => {
                let val = match ty {
                    IrType::F32 => builder.ins().f32const(*value as f32),
                    _ => builder.ins().f64const(*value),
                };
                self.def_reg(builder, *dest, val);
            }
            Instr::Param { dest, ty, index } => {
                let val = self.lower_param(builder, *index, *ty)?;
                self.def_reg(builder, *dest, val);
            }
            Instr::Binary { dest, op, left, right } => {
                let ty = self.reg_ty(*left);
                let a = self.use_reg(builder, *left);
                let b = self.use_reg(builder, *right);
                let val = lower_binary(builder, *op, ty, a, b)?;
                self.def_reg(builder, *dest, val);
            }
            Instr::CheckedBinary { dest, overflow, op, left, right } => {
                let ty = self.reg_ty(*left);
                let a = self.use_reg(builder, *left);
                let b = self.use_reg(builder, *right);
                let (val, of) = lower_checked(builder, *op, ty, a, b);
                self.def_reg(builder, *dest, val);
                self.def_reg(builder, *overflow, of);
            }
            Instr::Unary { dest, op, operand } => {
                let ty = self.reg_ty(*operand);
                let x = self.use_reg(builder, *operand);
                let val = match (op, ty.is_float()) {
                    (UnaryOp::Neg, true) => builder.ins().fneg(x),
                    (UnaryOp::Neg, false) => builder.ins().ineg(x),
                    (UnaryOp::Not, _) => builder.ins().bxor_imm(x, 1),
                };
                self.def_reg(builder, *dest, val);
            }
            Instr::Compare { dest, op, left, right } => {
                let ty = self.reg_ty(*left);
                let a = self.use_reg(builder, *left);
                let b = self.use_reg(builder, *right);
                let val = if ty.is_float() {
                    builder.ins().fcmp(float_cc(*op), a, b)
                } else {
                    builder.ins().icmp(int_cc(*op), a, b)
                };
                self.def_reg(builder, *dest, val);
            }
            Instr::Select { dest, cond, if_true, if_false } => {
                let c = self.use_reg(builder, *cond);
                let t = self.use_reg(builder, *if_true);
                let f = self.use_reg(builder, *if_false);
                let val = builder.ins().select(c, t, f);
                self.def_reg(builder, *dest, val);
            }
            Instr::Cast { dest, to, src } => {
                let from = self.reg_ty(*src);
                let x = self.use_reg(builder, *src);
                let val = lower_cast(builder, from, *to, x)?;
                self.def_reg(builder, *dest, val);
            }
            Instr::Move { dest, src } => {
                let val = self.use_reg(builder, *src);
                self.def_reg(builder, *dest, val);
            }
            Instr::Note { .. } => {}
            Instr::Call { callee, .. } => {
                return Err(LowerError::UnsupportedInstruction(format!(
                    "unresolved call to @{}",
                    callee
                )));
            }
        }
        Ok(())
    }

    fn lower_terminator(&self, builder: &mut FunctionBuilder<'_>) -> Result<(), LowerError> {
        let Terminator::Return(values) = &self.func.terminator else {
            return Err(LowerError::UnsupportedInstruction("missing terminator".to_string()));
        };
        let [err, result] = values.as_slice() else {
            return Err(LowerError::UnsupportedSignature(format!(
                "return of {} values",
                values.len()
            )));
        };

        let err = self.use_reg(builder, *err);
        let result = self.use_reg(builder, *result);
        let (error_ptr, result_ptr) = match &self.slots {
            Slots::Direct { error_ptr, result_ptr, .. } => (*error_ptr, *result_ptr),
            Slots::Packed { array } => {
                let error_ptr = self.slot_address(builder, *array, ERROR_SLOT);
                let result_ptr = self.slot_address(builder, *array, RESULT_SLOT);
                (error_ptr, result_ptr)
            }
        };
        builder.ins().store(MemFlags::trusted(), err, error_ptr, 0);
        builder.ins().store(MemFlags::trusted(), result, result_ptr, 0);
        builder.ins().return_(&[]);
        Ok(())
    }
}

/// Cranelift immediates for narrow types must fit the type's width
fn immediate(ty: IrType, value: i64) -> i64 {
    match ty.bits() {
        64 => value,
        bits => value & ((1i64 << bits) - 1),
    }
}

fn int_cc(op: CmpOp) -> IntCC {
    match op {
        CmpOp::Eq => IntCC::Equal,
        CmpOp::Ne => IntCC::NotEqual,
        CmpOp::Lt => IntCC::SignedLessThan,
        CmpOp::Le => IntCC::SignedLessThanOrEqual,
        CmpOp::Gt => IntCC::SignedGreaterThan,
        CmpOp::Ge => IntCC::SignedGreaterThanOrEqual,
    }
}

fn float_cc(op: CmpOp) -> FloatCC {
    match op {
        CmpOp::Eq => FloatCC::Equal,
        CmpOp::Ne => FloatCC::NotEqual,
        CmpOp::Lt => FloatCC::LessThan,
        CmpOp::Le => FloatCC::LessThanOrEqual,
        CmpOp::Gt => FloatCC::GreaterThan,
        CmpOp::Ge => FloatCC::GreaterThanOrEqual,
    }
}

fn lower_binary(
    builder: &mut FunctionBuilder<'_>,
    op: BinaryOp,
    ty: IrType,
    a: ir::Value,
    b: ir::Value,
) -> Result<ir::Value, LowerError> {
    let ins = builder.ins();
    let val = match (op, ty.is_float()) {
        (BinaryOp::Add, true) => ins.fadd(a, b),
        (BinaryOp::Sub, true) => ins.fsub(a, b),
        (BinaryOp::Mul, true) => ins.fmul(a, b),
        (BinaryOp::Div, true) => ins.fdiv(a, b),
        (BinaryOp::Add, false) => ins.iadd(a, b),
        (BinaryOp::Sub, false) => ins.isub(a, b),
        (BinaryOp::Mul, false) => ins.imul(a, b),
        // Divisors are made safe by the runtime helpers before reaching here
        (BinaryOp::Div, false) => ins.sdiv(a, b),
        (BinaryOp::Rem, false) => ins.srem(a, b),
        (BinaryOp::And, false) => ins.band(a, b),
        (BinaryOp::Or, false) => ins.bor(a, b),
        (BinaryOp::Xor, false) => ins.bxor(a, b),
        (op, true) => {
            return Err(LowerError::UnsupportedInstruction(format!("{:?} on {}", op, ty)));
        }
    };
    Ok(val)
}

/// Returns `(wrapped result, overflow flag)`
fn lower_checked(
    builder: &mut FunctionBuilder<'_>,
    op: CheckedOp,
    ty: IrType,
    a: ir::Value,
    b: ir::Value,
) -> (ir::Value, ir::Value) {
    match op {
        CheckedOp::Add => {
            // Overflow iff both operands differ in sign from the result
            let r = builder.ins().iadd(a, b);
            let ar = builder.ins().bxor(a, r);
            let br = builder.ins().bxor(b, r);
            let t = builder.ins().band(ar, br);
            let of = builder.ins().icmp_imm(IntCC::SignedLessThan, t, 0);
            (r, of)
        }
        CheckedOp::Sub => {
            // Overflow iff the operands differ in sign and the result differs from `a`
            let r = builder.ins().isub(a, b);
            let ab = builder.ins().bxor(a, b);
            let ar = builder.ins().bxor(a, r);
            let t = builder.ins().band(ab, ar);
            let of = builder.ins().icmp_imm(IntCC::SignedLessThan, t, 0);
            (r, of)
        }
        CheckedOp::Mul if ty == IrType::I64 => {
            let r = builder.ins().imul(a, b);
            let high = builder.ins().smulhi(a, b);
            let sign = builder.ins().sshr_imm(r, 63);
            let of = builder.ins().icmp(IntCC::NotEqual, high, sign);
            (r, of)
        }
        CheckedOp::Mul => {
            let wa = builder.ins().sextend(types::I64, a);
            let wb = builder.ins().sextend(types::I64, b);
            let wide = builder.ins().imul(wa, wb);
            let r = builder.ins().ireduce(cl_type(ty), wide);
            let back = builder.ins().sextend(types::I64, r);
            let of = builder.ins().icmp(IntCC::NotEqual, back, wide);
            (r, of)
        }
    }
}

fn lower_cast(
    builder: &mut FunctionBuilder<'_>,
    from: IrType,
    to: IrType,
    x: ir::Value,
) -> Result<ir::Value, LowerError> {
    let to_cl = cl_type(to);
    let val = match (from, to) {
        (_, IrType::Bool) => {
            return Err(LowerError::UnsupportedInstruction(format!("cast from {} to bool", from)));
        }
        (IrType::Bool, to) if to.is_int() => builder.ins().uextend(to_cl, x),
        (IrType::Bool, _) => {
            let wide = builder.ins().uextend(types::I32, x);
            builder.ins().fcvt_from_sint(to_cl, wide)
        }
        (from, to) if from.is_int() && to.is_int() => {
            if to.bits() > from.bits() {
                builder.ins().sextend(to_cl, x)
            } else {
                builder.ins().ireduce(to_cl, x)
            }
        }
        (IrType::I16, _) => {
            let wide = builder.ins().sextend(types::I32, x);
            builder.ins().fcvt_from_sint(to_cl, wide)
        }
        (from, _) if from.is_int() => builder.ins().fcvt_from_sint(to_cl, x),
        (_, IrType::I16) => {
            let wide = builder.ins().fcvt_to_sint_sat(types::I32, x);
            builder.ins().ireduce(types::I16, wide)
        }
        (_, to) if to.is_int() => builder.ins().fcvt_to_sint_sat(to_cl, x),
        (IrType::F32, IrType::F64) => builder.ins().fpromote(types::F64, x),
        (IrType::F64, IrType::F32) => builder.ins().fdemote(types::F32, x),
        (from, to) => {
            return Err(LowerError::UnsupportedInstruction(format!("cast from {} to {}", from, to)));
        }
    };
    Ok(val)
}
