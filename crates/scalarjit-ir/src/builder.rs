//! SSA builder helpers
//!
//! Utilities for emitting IR into a function, used by expression lowering
//! and by the runtime library.

use super::instr::{BinaryOp, CheckedOp, CmpOp, Instr, IrFunction, Reg, Terminator, UnaryOp};
use super::types::IrType;

/// Builder that simplifies IR construction
pub struct IrBuilder<'a> {
    func: &'a mut IrFunction,
}

impl<'a> IrBuilder<'a> {
    /// Create a builder appending to an existing function
    pub fn new(func: &'a mut IrFunction) -> Self {
        IrBuilder { func }
    }

    /// Allocate a new virtual register with the given type
    pub fn alloc_reg(&mut self, ty: IrType) -> Reg {
        self.func.alloc_reg(ty)
    }

    /// Emit an instruction
    pub fn emit(&mut self, instr: Instr) {
        self.func.instrs.push(instr);
    }

    /// Position the next instruction will occupy
    pub fn position(&self) -> usize {
        self.func.instrs.len()
    }

    /// Type of an already allocated register
    pub fn type_of(&self, reg: Reg) -> IrType {
        // Unknown registers are reported by the verifier
        self.func.reg_type(reg).unwrap_or(IrType::I64)
    }

    /// Read formal parameter `index`
    pub fn param(&mut self, index: u32, ty: IrType) -> Reg {
        let dest = self.alloc_reg(ty);
        self.emit(Instr::Param { dest, ty, index });
        dest
    }

    /// Emit an integer or boolean constant
    pub fn iconst(&mut self, ty: IrType, value: i64) -> Reg {
        let dest = self.alloc_reg(ty);
        self.emit(Instr::Iconst { dest, ty, value });
        dest
    }

    /// Emit a floating-point constant
    pub fn fconst(&mut self, ty: IrType, value: f64) -> Reg {
        let dest = self.alloc_reg(ty);
        self.emit(Instr::Fconst { dest, ty, value });
        dest
    }

    pub fn bool_const(&mut self, value: bool) -> Reg {
        self.iconst(IrType::Bool, value as i64)
    }

    /// Emit a zero of the given type
    pub fn zero(&mut self, ty: IrType) -> Reg {
        if ty.is_float() {
            self.fconst(ty, 0.0)
        } else {
            self.iconst(ty, 0)
        }
    }

    pub fn binary(&mut self, op: BinaryOp, left: Reg, right: Reg) -> Reg {
        let dest = self.alloc_reg(self.type_of(left));
        self.emit(Instr::Binary { dest, op, left, right });
        dest
    }

    /// Emit a checked integer operation, returning `(value, overflow)`
    pub fn checked(&mut self, op: CheckedOp, left: Reg, right: Reg) -> (Reg, Reg) {
        let dest = self.alloc_reg(self.type_of(left));
        let overflow = self.alloc_reg(IrType::Bool);
        self.emit(Instr::CheckedBinary { dest, overflow, op, left, right });
        (dest, overflow)
    }

    pub fn unary(&mut self, op: UnaryOp, operand: Reg) -> Reg {
        let dest = self.alloc_reg(self.type_of(operand));
        self.emit(Instr::Unary { dest, op, operand });
        dest
    }

    pub fn compare(&mut self, op: CmpOp, left: Reg, right: Reg) -> Reg {
        let dest = self.alloc_reg(IrType::Bool);
        self.emit(Instr::Compare { dest, op, left, right });
        dest
    }

    pub fn select(&mut self, cond: Reg, if_true: Reg, if_false: Reg) -> Reg {
        let dest = self.alloc_reg(self.type_of(if_true));
        self.emit(Instr::Select { dest, cond, if_true, if_false });
        dest
    }

    pub fn cast(&mut self, src: Reg, to: IrType) -> Reg {
        let dest = self.alloc_reg(to);
        self.emit(Instr::Cast { dest, to, src });
        dest
    }

    /// Emit a runtime call with the given result types
    pub fn call(&mut self, callee: impl Into<String>, args: Vec<Reg>, returns: &[IrType]) -> Vec<Reg> {
        let dests: Vec<Reg> = returns.iter().map(|ty| self.alloc_reg(*ty)).collect();
        self.emit(Instr::Call { dests: dests.clone(), callee: callee.into(), args });
        dests
    }

    pub fn mov(&mut self, src: Reg) -> Reg {
        let dest = self.alloc_reg(self.type_of(src));
        self.emit(Instr::Move { dest, src });
        dest
    }

    pub fn note(&mut self, text: impl Into<String>) {
        self.emit(Instr::Note { text: text.into() });
    }

    /// Terminate the function
    pub fn ret(&mut self, values: Vec<Reg>) {
        self.func.terminator = Terminator::Return(values);
    }

    /// Access the underlying function
    pub fn func(&self) -> &IrFunction {
        self.func
    }

    /// Access the underlying function mutably
    pub fn func_mut(&mut self) -> &mut IrFunction {
        self.func
    }
}
