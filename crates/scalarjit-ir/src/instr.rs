//! IR instructions and functions
//!
//! Defines the single-block SSA representation produced by expression
//! lowering. Instructions operate on typed virtual registers; a function ends
//! with exactly one terminator returning its results.

use serde::{Deserialize, Serialize};

use super::types::IrType;

/// Virtual register (SSA form)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reg(pub u32);

impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Unchecked binary operation. Integer arithmetic wraps; `Div`/`Rem` require
/// a divisor that is neither zero nor `-1` against the type minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
}

/// Integer operation that also produces an overflow flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckedOp {
    Add,
    Sub,
    Mul,
}

/// Comparison (signed for integers, ordered for floats except `Ne`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub const ALL: [CmpOp; 6] = [CmpOp::Eq, CmpOp::Ne, CmpOp::Lt, CmpOp::Le, CmpOp::Gt, CmpOp::Ge];

    pub fn mnemonic(&self) -> &'static str {
        match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Lt => "lt",
            CmpOp::Le => "le",
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Wrapping integer negation or float negation
    Neg,
    /// Boolean negation
    Not,
}

/// An IR instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    // ===== Constants =====
    Iconst { dest: Reg, ty: IrType, value: i64 },
    Fconst { dest: Reg, ty: IrType, value: f64 },

    // ===== Parameters =====
    /// Read formal parameter `index` of the enclosing function
    Param { dest: Reg, ty: IrType, index: u32 },

    // ===== Arithmetic =====
    Binary { dest: Reg, op: BinaryOp, left: Reg, right: Reg },
    CheckedBinary { dest: Reg, overflow: Reg, op: CheckedOp, left: Reg, right: Reg },
    Unary { dest: Reg, op: UnaryOp, operand: Reg },

    // ===== Comparison and selection =====
    Compare { dest: Reg, op: CmpOp, left: Reg, right: Reg },
    Select { dest: Reg, cond: Reg, if_true: Reg, if_false: Reg },

    // ===== Conversion =====
    /// Numeric conversion. Int narrowing truncates, float to int saturates
    /// toward zero, bool converts as 0/1.
    Cast { dest: Reg, to: IrType, src: Reg },

    // ===== Runtime linkage =====
    /// Call into the runtime support library; resolved by inlining before
    /// verification.
    Call { dests: Vec<Reg>, callee: String, args: Vec<Reg> },

    // ===== SSA =====
    Move { dest: Reg, src: Reg },

    // ===== Debug =====
    /// Annotation carried into debug dumps; emits no code
    Note { text: String },
}

impl Instr {
    /// Visit every register this instruction defines
    pub fn for_each_def(&self, mut f: impl FnMut(Reg)) {
        match self {
            Instr::Iconst { dest, .. }
            | Instr::Fconst { dest, .. }
            | Instr::Param { dest, .. }
            | Instr::Binary { dest, .. }
            | Instr::Unary { dest, .. }
            | Instr::Compare { dest, .. }
            | Instr::Select { dest, .. }
            | Instr::Cast { dest, .. }
            | Instr::Move { dest, .. } => f(*dest),
            Instr::CheckedBinary { dest, overflow, .. } => {
                f(*dest);
                f(*overflow);
            }
            Instr::Call { dests, .. } => dests.iter().copied().for_each(f),
            Instr::Note { .. } => {}
        }
    }

    /// Visit every register this instruction reads
    pub fn for_each_use(&self, mut f: impl FnMut(Reg)) {
        match self {
            Instr::Iconst { .. } | Instr::Fconst { .. } | Instr::Param { .. } | Instr::Note { .. } => {}
            Instr::Binary { left, right, .. }
            | Instr::CheckedBinary { left, right, .. }
            | Instr::Compare { left, right, .. } => {
                f(*left);
                f(*right);
            }
            Instr::Unary { operand, .. } => f(*operand),
            Instr::Select { cond, if_true, if_false, .. } => {
                f(*cond);
                f(*if_true);
                f(*if_false);
            }
            Instr::Cast { src, .. } | Instr::Move { src, .. } => f(*src),
            Instr::Call { args, .. } => args.iter().copied().for_each(f),
        }
    }

    /// Rewrite every register this instruction reads
    pub fn map_uses(&mut self, mut f: impl FnMut(Reg) -> Reg) {
        match self {
            Instr::Iconst { .. } | Instr::Fconst { .. } | Instr::Param { .. } | Instr::Note { .. } => {}
            Instr::Binary { left, right, .. }
            | Instr::CheckedBinary { left, right, .. }
            | Instr::Compare { left, right, .. } => {
                *left = f(*left);
                *right = f(*right);
            }
            Instr::Unary { operand, .. } => *operand = f(*operand),
            Instr::Select { cond, if_true, if_false, .. } => {
                *cond = f(*cond);
                *if_true = f(*if_true);
                *if_false = f(*if_false);
            }
            Instr::Cast { src, .. } | Instr::Move { src, .. } => *src = f(*src),
            Instr::Call { args, .. } => args.iter_mut().for_each(|a| *a = f(*a)),
        }
    }

    /// Rewrite every register this instruction defines
    pub fn map_defs(&mut self, mut f: impl FnMut(Reg) -> Reg) {
        match self {
            Instr::Iconst { dest, .. }
            | Instr::Fconst { dest, .. }
            | Instr::Param { dest, .. }
            | Instr::Binary { dest, .. }
            | Instr::Unary { dest, .. }
            | Instr::Compare { dest, .. }
            | Instr::Select { dest, .. }
            | Instr::Cast { dest, .. }
            | Instr::Move { dest, .. } => *dest = f(*dest),
            Instr::CheckedBinary { dest, overflow, .. } => {
                *dest = f(*dest);
                *overflow = f(*overflow);
            }
            Instr::Call { dests, .. } => dests.iter_mut().for_each(|d| *d = f(*d)),
            Instr::Note { .. } => {}
        }
    }

    /// Whether this instruction must survive dead-code elimination
    pub fn has_side_effects(&self) -> bool {
        matches!(self, Instr::Call { .. } | Instr::Note { .. })
    }
}

/// How a function terminates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    /// Return the listed registers, matching the function's return types
    Return(Vec<Reg>),
    /// Placeholder terminator (not yet assigned)
    None,
}

impl Terminator {
    pub fn map_uses(&mut self, mut f: impl FnMut(Reg) -> Reg) {
        if let Terminator::Return(values) = self {
            values.iter_mut().for_each(|v| *v = f(*v));
        }
    }
}

/// A complete IR function: one basic block plus its terminator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrFunction {
    /// Symbol name (also the runtime helper name for library functions)
    pub name: String,
    /// Formal parameter types
    pub params: Vec<IrType>,
    /// Return types
    pub returns: Vec<IrType>,
    pub instrs: Vec<Instr>,
    pub terminator: Terminator,
    /// Type of each register, indexed by register number
    pub reg_types: Vec<IrType>,
}

impl IrFunction {
    /// Create a new empty function
    pub fn new(name: impl Into<String>, params: Vec<IrType>, returns: Vec<IrType>) -> Self {
        IrFunction {
            name: name.into(),
            params,
            returns,
            instrs: vec![],
            terminator: Terminator::None,
            reg_types: vec![],
        }
    }

    /// Allocate a fresh virtual register with a given type
    pub fn alloc_reg(&mut self, ty: IrType) -> Reg {
        let reg = Reg(self.reg_types.len() as u32);
        self.reg_types.push(ty);
        reg
    }

    /// Get the type of a register
    pub fn reg_type(&self, reg: Reg) -> Option<IrType> {
        self.reg_types.get(reg.0 as usize).copied()
    }

    /// Number of allocated registers
    pub fn reg_count(&self) -> usize {
        self.reg_types.len()
    }

    /// Number of code-producing instructions (annotations excluded)
    pub fn instr_count(&self) -> usize {
        self.instrs.iter().filter(|i| !matches!(i, Instr::Note { .. })).count()
    }

    /// Whether any runtime call is still unresolved
    pub fn has_calls(&self) -> bool {
        self.instrs.iter().any(|i| matches!(i, Instr::Call { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_reg_assigns_sequential_numbers() {
        let mut func = IrFunction::new("f", vec![], vec![]);
        let r0 = func.alloc_reg(IrType::I32);
        let r1 = func.alloc_reg(IrType::F64);
        assert_eq!(r0, Reg(0));
        assert_eq!(r1, Reg(1));
        assert_eq!(func.reg_type(r1), Some(IrType::F64));
        assert_eq!(func.reg_type(Reg(7)), None);
    }

    #[test]
    fn test_defs_and_uses() {
        let instr = Instr::CheckedBinary {
            dest: Reg(2),
            overflow: Reg(3),
            op: CheckedOp::Add,
            left: Reg(0),
            right: Reg(1),
        };
        let mut defs = vec![];
        instr.for_each_def(|r| defs.push(r));
        let mut uses = vec![];
        instr.for_each_use(|r| uses.push(r));
        assert_eq!(defs, vec![Reg(2), Reg(3)]);
        assert_eq!(uses, vec![Reg(0), Reg(1)]);
    }

    #[test]
    fn test_map_uses_leaves_defs_alone() {
        let mut instr = Instr::Select { dest: Reg(4), cond: Reg(0), if_true: Reg(1), if_false: Reg(2) };
        instr.map_uses(|r| Reg(r.0 + 10));
        assert_eq!(instr, Instr::Select { dest: Reg(4), cond: Reg(10), if_true: Reg(11), if_false: Reg(12) });
    }

    #[test]
    fn test_instr_count_skips_notes() {
        let mut func = IrFunction::new("f", vec![], vec![IrType::I32]);
        let r0 = func.alloc_reg(IrType::I32);
        func.instrs.push(Instr::Note { text: "constant".into() });
        func.instrs.push(Instr::Iconst { dest: r0, ty: IrType::I32, value: 1 });
        assert_eq!(func.instr_count(), 1);
        assert!(!func.has_calls());
    }
}
