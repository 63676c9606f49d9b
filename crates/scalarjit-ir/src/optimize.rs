//! Optimization passes on IR
//!
//! Each pass implements the `OptPass` trait and transforms an `IrFunction` in
//! place. Every pass preserves the observable results of the function,
//! including error codes: folding never evaluates an operation whose native
//! counterpart would trap or report a domain error differently.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::instr::{BinaryOp, CheckedOp, CmpOp, Instr, IrFunction, Reg, UnaryOp};
use crate::types::IrType;

/// An optimization pass on IR
pub trait OptPass: Send + Sync {
    /// Name of this pass (for diagnostics)
    fn name(&self) -> &str;
    /// Run the pass, mutating the function in place
    fn run(&self, func: &mut IrFunction);
}

/// Optimizer that runs a sequence of passes
pub struct Optimizer {
    passes: Vec<Box<dyn OptPass>>,
}

impl Optimizer {
    /// Create an optimizer with the default pass pipeline
    pub fn new() -> Self {
        Optimizer {
            passes: vec![Box::new(CopyPropagation), Box::new(DeadCodeElimination)],
        }
    }

    /// Default pipeline plus constant folding
    pub fn aggressive() -> Self {
        Optimizer {
            passes: vec![
                Box::new(CopyPropagation),
                Box::new(ConstantFolding),
                Box::new(CopyPropagation),
                Box::new(DeadCodeElimination),
            ],
        }
    }

    /// Create an empty optimizer (no passes)
    pub fn empty() -> Self {
        Optimizer { passes: vec![] }
    }

    /// Add a pass to the pipeline
    pub fn add_pass(&mut self, pass: Box<dyn OptPass>) {
        self.passes.push(pass);
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run all passes in order
    pub fn optimize(&self, func: &mut IrFunction) {
        for pass in &self.passes {
            let before = func.instrs.len();
            pass.run(func);
            tracing::trace!(pass = pass.name(), before, after = func.instrs.len(), "ran optimization pass");
        }
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

// ===== Pass 1: Copy Propagation =====

/// Replaces uses of `Move { dest, src }` with direct use of `src`.
pub struct CopyPropagation;

impl OptPass for CopyPropagation {
    fn name(&self) -> &str {
        "copy-propagation"
    }

    fn run(&self, func: &mut IrFunction) {
        let mut copies: FxHashMap<Reg, Reg> = FxHashMap::default();
        for instr in &func.instrs {
            if let Instr::Move { dest, src } = instr {
                // Chains resolve in order because sources are defined first
                let root = copies.get(src).copied().unwrap_or(*src);
                copies.insert(*dest, root);
            }
        }

        if copies.is_empty() {
            return;
        }

        let subst = |reg: Reg| copies.get(&reg).copied().unwrap_or(reg);
        for instr in &mut func.instrs {
            if !matches!(instr, Instr::Move { .. }) {
                instr.map_uses(subst);
            }
        }
        func.terminator.map_uses(subst);
    }
}

// ===== Pass 2: Constant Folding =====

#[derive(Debug, Clone, Copy)]
enum Const {
    Int(i64),
    Float(f64),
}

/// Folds operations whose operands are all constants.
///
/// `checked_add(iconst 3, iconst 5)` becomes `iconst 8` plus a false overflow
/// flag; `select` on a constant condition becomes a `move`.
pub struct ConstantFolding;

impl OptPass for ConstantFolding {
    fn name(&self) -> &str {
        "constant-folding"
    }

    fn run(&self, func: &mut IrFunction) {
        let mut consts: FxHashMap<Reg, Const> = FxHashMap::default();
        let mut out = Vec::with_capacity(func.instrs.len());

        for instr in std::mem::take(&mut func.instrs) {
            let folded = fold_instr(func, &instr, &consts);
            match folded {
                Some(replacements) => {
                    for replacement in replacements {
                        record_const(&replacement, &mut consts);
                        out.push(replacement);
                    }
                }
                None => {
                    record_const(&instr, &mut consts);
                    out.push(instr);
                }
            }
        }

        func.instrs = out;
    }
}

fn record_const(instr: &Instr, consts: &mut FxHashMap<Reg, Const>) {
    match instr {
        Instr::Iconst { dest, value, .. } => {
            consts.insert(*dest, Const::Int(*value));
        }
        Instr::Fconst { dest, value, .. } => {
            consts.insert(*dest, Const::Float(*value));
        }
        _ => {}
    }
}

fn int_const(dest: Reg, ty: IrType, value: i64) -> Instr {
    Instr::Iconst { dest, ty, value: ty.wrap(value) }
}

fn float_const(dest: Reg, ty: IrType, value: f64) -> Instr {
    let value = if ty == IrType::F32 { value as f32 as f64 } else { value };
    Instr::Fconst { dest, ty, value }
}

fn fold_instr(func: &IrFunction, instr: &Instr, consts: &FxHashMap<Reg, Const>) -> Option<Vec<Instr>> {
    let ty_of = |r: Reg| func.reg_type(r).unwrap_or(IrType::I64);
    match instr {
        Instr::Binary { dest, op, left, right } => {
            let ty = ty_of(*dest);
            match (consts.get(left)?, consts.get(right)?) {
                (Const::Int(l), Const::Int(r)) => {
                    let (l, r) = (*l, *r);
                    let value = match op {
                        BinaryOp::Add => l.wrapping_add(r),
                        BinaryOp::Sub => l.wrapping_sub(r),
                        BinaryOp::Mul => l.wrapping_mul(r),
                        BinaryOp::Div | BinaryOp::Rem => {
                            let (min, _) = ty.int_range()?;
                            if r == 0 || (l == min && r == -1) {
                                return None;
                            }
                            if *op == BinaryOp::Div { l / r } else { l % r }
                        }
                        BinaryOp::And => l & r,
                        BinaryOp::Or => l | r,
                        BinaryOp::Xor => l ^ r,
                    };
                    Some(vec![int_const(*dest, ty, value)])
                }
                (Const::Float(l), Const::Float(r)) => {
                    let value = fold_float(ty, *op, *l, *r)?;
                    Some(vec![float_const(*dest, ty, value)])
                }
                _ => None,
            }
        }
        Instr::CheckedBinary { dest, overflow, op, left, right } => {
            let (Const::Int(l), Const::Int(r)) = (consts.get(left)?, consts.get(right)?) else {
                return None;
            };
            let ty = ty_of(*dest);
            let exact = match op {
                CheckedOp::Add => l.checked_add(*r),
                CheckedOp::Sub => l.checked_sub(*r),
                CheckedOp::Mul => l.checked_mul(*r),
            };
            let (value, overflowed) = match exact {
                Some(v) => (v, ty.wrap(v) != v),
                None => {
                    let wrapped = match op {
                        CheckedOp::Add => l.wrapping_add(*r),
                        CheckedOp::Sub => l.wrapping_sub(*r),
                        CheckedOp::Mul => l.wrapping_mul(*r),
                    };
                    (wrapped, true)
                }
            };
            Some(vec![
                int_const(*dest, ty, value),
                Instr::Iconst { dest: *overflow, ty: IrType::Bool, value: overflowed as i64 },
            ])
        }
        Instr::Unary { dest, op, operand } => {
            let ty = ty_of(*dest);
            match (op, consts.get(operand)?) {
                (UnaryOp::Neg, Const::Int(v)) => Some(vec![int_const(*dest, ty, v.wrapping_neg())]),
                (UnaryOp::Neg, Const::Float(v)) => Some(vec![float_const(*dest, ty, -*v)]),
                (UnaryOp::Not, Const::Int(v)) if *v == 0 || *v == 1 => {
                    Some(vec![Instr::Iconst { dest: *dest, ty, value: 1 - *v }])
                }
                _ => None,
            }
        }
        Instr::Compare { dest, op, left, right } => {
            let result = match (consts.get(left)?, consts.get(right)?) {
                (Const::Int(l), Const::Int(r)) => compare(*op, l, r),
                (Const::Float(l), Const::Float(r)) => compare(*op, l, r),
                _ => return None,
            };
            Some(vec![Instr::Iconst { dest: *dest, ty: IrType::Bool, value: result as i64 }])
        }
        Instr::Select { dest, cond, if_true, if_false } => match consts.get(cond)? {
            Const::Int(0) => Some(vec![Instr::Move { dest: *dest, src: *if_false }]),
            Const::Int(_) => Some(vec![Instr::Move { dest: *dest, src: *if_true }]),
            Const::Float(_) => None,
        },
        Instr::Cast { dest, to, src } => {
            let from = ty_of(*src);
            let konst = match consts.get(src)? {
                // Booleans widen with zero extension
                Const::Int(v) if from == IrType::Bool => Const::Int(*v as u8 as i64),
                other => *other,
            };
            let folded = match (&konst, to.is_float()) {
                (Const::Int(v), false) => int_const(*dest, *to, *v),
                (Const::Int(v), true) => {
                    let value = if *to == IrType::F32 { *v as f32 as f64 } else { *v as f64 };
                    float_const(*dest, *to, value)
                }
                (Const::Float(v), true) => float_const(*dest, *to, *v),
                (Const::Float(v), false) => {
                    // Saturating conversion through i32 for narrow targets
                    let value = match to {
                        IrType::I64 => *v as i64,
                        _ => *v as i32 as i64,
                    };
                    int_const(*dest, *to, value)
                }
            };
            Some(vec![folded])
        }
        _ => None,
    }
}

fn fold_float(ty: IrType, op: BinaryOp, l: f64, r: f64) -> Option<f64> {
    let value = if ty == IrType::F32 {
        let (l, r) = (l as f32, r as f32);
        let v = match op {
            BinaryOp::Add => l + r,
            BinaryOp::Sub => l - r,
            BinaryOp::Mul => l * r,
            BinaryOp::Div => l / r,
            _ => return None,
        };
        v as f64
    } else {
        match op {
            BinaryOp::Add => l + r,
            BinaryOp::Sub => l - r,
            BinaryOp::Mul => l * r,
            BinaryOp::Div => l / r,
            _ => return None,
        }
    };
    // NaN cannot round-trip through the library artifact or compare stably
    if value.is_nan() {
        None
    } else {
        Some(value)
    }
}

fn compare<T: PartialOrd>(op: CmpOp, l: &T, r: &T) -> bool {
    match op {
        CmpOp::Eq => l == r,
        CmpOp::Ne => l != r,
        CmpOp::Lt => l < r,
        CmpOp::Le => l <= r,
        CmpOp::Gt => l > r,
        CmpOp::Ge => l >= r,
    }
}

// ===== Pass 3: Dead Code Elimination =====

/// Removes instructions whose results are never used (and which have no side
/// effects), repeating until nothing changes.
pub struct DeadCodeElimination;

impl OptPass for DeadCodeElimination {
    fn name(&self) -> &str {
        "dead-code-elimination"
    }

    fn run(&self, func: &mut IrFunction) {
        loop {
            let mut used: FxHashSet<Reg> = FxHashSet::default();
            for instr in &func.instrs {
                instr.for_each_use(|r| {
                    used.insert(r);
                });
            }
            if let crate::instr::Terminator::Return(values) = &func.terminator {
                used.extend(values.iter().copied());
            }

            let before = func.instrs.len();
            func.instrs.retain(|instr| {
                if instr.has_side_effects() {
                    return true;
                }
                let mut live = false;
                instr.for_each_def(|d| live |= used.contains(&d));
                live
            });

            if func.instrs.len() == before {
                break;
            }
        }
    }
}
