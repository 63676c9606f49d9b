//! Structural verification of IR functions
//!
//! Checks that a function is well formed before native compilation: every
//! register is in range, defined exactly once and before use, operands have
//! the types their instruction requires, no runtime call is left unresolved,
//! and the terminator returns the declared types.

use std::fmt;

use super::instr::{BinaryOp, CmpOp, Instr, IrFunction, Reg, Terminator, UnaryOp};
use super::types::IrType;

/// Where in a function an error was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Instr(usize),
    Terminator,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Instr(i) => write!(f, "inst{}", i),
            Location::Terminator => write!(f, "terminator"),
        }
    }
}

/// A single verifier finding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{location}: {message}")]
pub struct VerifierError {
    pub location: Location,
    pub message: String,
}

/// All findings for one function
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerifierErrors(pub Vec<VerifierError>);

impl std::error::Error for VerifierErrors {}

impl fmt::Display for VerifierErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

/// Verify a function, collecting every error found
pub fn verify_function(func: &IrFunction) -> Result<(), VerifierErrors> {
    let mut verifier = Verifier {
        func,
        defined: vec![false; func.reg_count()],
        errors: vec![],
    };

    for (i, instr) in func.instrs.iter().enumerate() {
        verifier.check_instr(Location::Instr(i), instr);
    }
    verifier.check_terminator();

    if verifier.errors.is_empty() {
        Ok(())
    } else {
        Err(VerifierErrors(verifier.errors))
    }
}

struct Verifier<'a> {
    func: &'a IrFunction,
    defined: Vec<bool>,
    errors: Vec<VerifierError>,
}

impl Verifier<'_> {
    fn report(&mut self, location: Location, message: impl Into<String>) {
        self.errors.push(VerifierError { location, message: message.into() });
    }

    /// Type of a used register; reports out-of-range and use-before-def
    fn use_ty(&mut self, loc: Location, reg: Reg) -> Option<IrType> {
        match self.func.reg_type(reg) {
            None => {
                self.report(loc, format!("{} is out of range", reg));
                None
            }
            Some(ty) => {
                if !self.defined[reg.0 as usize] {
                    self.report(loc, format!("{} used before definition", reg));
                }
                Some(ty)
            }
        }
    }

    /// Type of a defined register; reports redefinition
    fn def_ty(&mut self, loc: Location, reg: Reg) -> Option<IrType> {
        match self.func.reg_type(reg) {
            None => {
                self.report(loc, format!("{} is out of range", reg));
                None
            }
            Some(ty) => {
                let already = std::mem::replace(&mut self.defined[reg.0 as usize], true);
                if already {
                    self.report(loc, format!("{} defined more than once", reg));
                }
                Some(ty)
            }
        }
    }

    fn expect(&mut self, loc: Location, reg: Reg, actual: Option<IrType>, expected: IrType) {
        if let Some(actual) = actual {
            if actual != expected {
                self.report(loc, format!("{} has type {}, expected {}", reg, actual, expected));
            }
        }
    }

    fn check_instr(&mut self, loc: Location, instr: &Instr) {
        let func = self.func;
        // Uses are checked before defs so self-referencing instructions fail
        match instr {
            Instr::Iconst { dest, ty, value } => {
                let d = self.def_ty(loc, *dest);
                self.expect(loc, *dest, d, *ty);
                match ty {
                    IrType::Bool => {
                        if ![0, 1, i8::MIN as i64].contains(value) {
                            self.report(loc, format!("boolean constant {} is not 0, 1 or null", value));
                        }
                    }
                    _ if ty.is_int() => {
                        if ty.wrap(*value) != *value {
                            self.report(loc, format!("constant {} does not fit {}", value, ty));
                        }
                    }
                    _ => self.report(loc, format!("iconst of non-integer type {}", ty)),
                }
            }
            Instr::Fconst { dest, ty, .. } => {
                let d = self.def_ty(loc, *dest);
                self.expect(loc, *dest, d, *ty);
                if !ty.is_float() {
                    self.report(loc, format!("fconst of non-float type {}", ty));
                }
            }
            Instr::Param { dest, ty, index } => {
                let d = self.def_ty(loc, *dest);
                self.expect(loc, *dest, d, *ty);
                match func.params.get(*index as usize) {
                    None => self.report(
                        loc,
                        format!("parameter {} out of range ({} params)", index, func.params.len()),
                    ),
                    Some(p) if p != ty => {
                        self.report(loc, format!("parameter {} has type {}, read as {}", index, p, ty))
                    }
                    Some(_) => {}
                }
            }
            Instr::Binary { dest, op, left, right } => {
                let l = self.use_ty(loc, *left);
                let r = self.use_ty(loc, *right);
                let d = self.def_ty(loc, *dest);
                if let Some(l) = l {
                    self.expect(loc, *right, r, l);
                    self.expect(loc, *dest, d, l);
                    let ok = match op {
                        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => l.is_numeric(),
                        BinaryOp::Rem => l.is_int(),
                        BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => l.is_int() || l == IrType::Bool,
                    };
                    if !ok {
                        self.report(loc, format!("{:?} is not defined on {}", op, l));
                    }
                }
            }
            Instr::CheckedBinary { dest, overflow, left, right, .. } => {
                let l = self.use_ty(loc, *left);
                let r = self.use_ty(loc, *right);
                let d = self.def_ty(loc, *dest);
                let o = self.def_ty(loc, *overflow);
                self.expect(loc, *overflow, o, IrType::Bool);
                if let Some(l) = l {
                    self.expect(loc, *right, r, l);
                    self.expect(loc, *dest, d, l);
                    if !l.is_int() {
                        self.report(loc, format!("checked arithmetic on non-integer type {}", l));
                    }
                }
            }
            Instr::Unary { dest, op, operand } => {
                let t = self.use_ty(loc, *operand);
                let d = self.def_ty(loc, *dest);
                if let Some(t) = t {
                    self.expect(loc, *dest, d, t);
                    let ok = match op {
                        UnaryOp::Neg => t.is_numeric(),
                        UnaryOp::Not => t == IrType::Bool,
                    };
                    if !ok {
                        self.report(loc, format!("{:?} is not defined on {}", op, t));
                    }
                }
            }
            Instr::Compare { dest, op, left, right } => {
                let l = self.use_ty(loc, *left);
                let r = self.use_ty(loc, *right);
                let d = self.def_ty(loc, *dest);
                self.expect(loc, *dest, d, IrType::Bool);
                if let Some(l) = l {
                    self.expect(loc, *right, r, l);
                    if l == IrType::Bool && !matches!(op, CmpOp::Eq | CmpOp::Ne) {
                        self.report(loc, format!("ordered comparison {:?} on bool", op));
                    }
                }
            }
            Instr::Select { dest, cond, if_true, if_false } => {
                let c = self.use_ty(loc, *cond);
                let t = self.use_ty(loc, *if_true);
                let e = self.use_ty(loc, *if_false);
                let d = self.def_ty(loc, *dest);
                self.expect(loc, *cond, c, IrType::Bool);
                if let Some(t) = t {
                    self.expect(loc, *if_false, e, t);
                    self.expect(loc, *dest, d, t);
                }
            }
            Instr::Cast { dest, to, src } => {
                let from = self.use_ty(loc, *src);
                let d = self.def_ty(loc, *dest);
                self.expect(loc, *dest, d, *to);
                if *to == IrType::Bool {
                    self.report(loc, "cast to bool; use a comparison");
                }
                if from == Some(*to) {
                    self.report(loc, format!("cast from {} to itself", to));
                }
            }
            Instr::Call { dests, callee, args } => {
                for arg in args {
                    self.use_ty(loc, *arg);
                }
                for dest in dests {
                    self.def_ty(loc, *dest);
                }
                self.report(loc, format!("unresolved call to runtime function @{}", callee));
            }
            Instr::Move { dest, src } => {
                let s = self.use_ty(loc, *src);
                let d = self.def_ty(loc, *dest);
                if let Some(s) = s {
                    self.expect(loc, *dest, d, s);
                }
            }
            Instr::Note { .. } => {}
        }
    }

    fn check_terminator(&mut self) {
        let loc = Location::Terminator;
        let func = self.func;
        match &func.terminator {
            Terminator::None => self.report(loc, "function has no terminator"),
            Terminator::Return(values) => {
                if values.len() != func.returns.len() {
                    self.report(
                        loc,
                        format!("returns {} values, signature declares {}", values.len(), func.returns.len()),
                    );
                }
                for (value, ty) in values.iter().zip(&func.returns) {
                    let actual = self.use_ty(loc, *value);
                    self.expect(loc, *value, actual, *ty);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IrBuilder;
    use crate::instr::CheckedOp;

    fn well_formed() -> IrFunction {
        let mut func = IrFunction::new("f", vec![IrType::I32], vec![IrType::I32, IrType::I32]);
        let mut b = IrBuilder::new(&mut func);
        let p = b.param(0, IrType::I32);
        let k = b.iconst(IrType::I32, 42);
        let (sum, overflow) = b.checked(CheckedOp::Add, p, k);
        let code = b.iconst(IrType::I32, 2);
        let zero = b.iconst(IrType::I32, 0);
        let err = b.select(overflow, code, zero);
        b.ret(vec![err, sum]);
        func
    }

    #[test]
    fn test_well_formed_function_verifies() {
        assert_eq!(verify_function(&well_formed()), Ok(()));
    }

    #[test]
    fn test_missing_terminator() {
        let mut func = well_formed();
        func.terminator = Terminator::None;
        let errors = verify_function(&func).unwrap_err();
        assert_eq!(errors.0.len(), 1);
        assert_eq!(errors.0[0].location, Location::Terminator);
    }

    #[test]
    fn test_use_before_definition() {
        let mut func = well_formed();
        func.instrs.swap(0, 2);
        let errors = verify_function(&func).unwrap_err();
        assert!(errors.0.iter().any(|e| e.message.contains("used before definition")));
    }

    #[test]
    fn test_double_definition() {
        let mut func = well_formed();
        let dup = func.instrs[1].clone();
        func.instrs.insert(2, dup);
        let errors = verify_function(&func).unwrap_err();
        assert!(errors.0.iter().any(|e| e.message.contains("defined more than once")));
    }

    #[test]
    fn test_type_mismatch() {
        let mut func = IrFunction::new("f", vec![], vec![IrType::I64]);
        let mut b = IrBuilder::new(&mut func);
        let a = b.iconst(IrType::I32, 1);
        let c = b.fconst(IrType::F64, 1.0);
        let sum = b.binary(BinaryOp::Add, a, c);
        b.ret(vec![sum]);
        let errors = verify_function(&func).unwrap_err();
        let text = errors.to_string();
        assert!(text.contains("has type f64, expected i32"));
        assert!(text.contains("has type i32, expected i64"));
    }

    #[test]
    fn test_unresolved_call_rejected() {
        let mut func = IrFunction::new("f", vec![], vec![IrType::I32]);
        let mut b = IrBuilder::new(&mut func);
        let a = b.iconst(IrType::I32, 1);
        let r = b.call("merge_error", vec![a, a], &[IrType::I32]);
        b.ret(r);
        let errors = verify_function(&func).unwrap_err();
        assert!(errors.to_string().contains("unresolved call to runtime function @merge_error"));
    }

    #[test]
    fn test_param_out_of_range() {
        let mut func = IrFunction::new("f", vec![], vec![IrType::I32]);
        let mut b = IrBuilder::new(&mut func);
        let p = b.param(3, IrType::I32);
        b.ret(vec![p]);
        let errors = verify_function(&func).unwrap_err();
        assert!(errors.0[0].message.contains("parameter 3 out of range"));
    }

    #[test]
    fn test_constant_range() {
        let mut func = IrFunction::new("f", vec![], vec![IrType::I16]);
        let mut b = IrBuilder::new(&mut func);
        let k = b.iconst(IrType::I16, 70_000);
        b.ret(vec![k]);
        assert!(verify_function(&func).is_err());
    }

    #[test]
    fn test_float_remainder_rejected() {
        let mut func = IrFunction::new("f", vec![], vec![IrType::F64]);
        let mut b = IrBuilder::new(&mut func);
        let a = b.fconst(IrType::F64, 1.0);
        let r = b.binary(BinaryOp::Rem, a, a);
        b.ret(vec![r]);
        assert!(verify_function(&func).unwrap_err().to_string().contains("Rem is not defined on f64"));
    }
}
