//! Pretty-printing for IR
//!
//! Display implementations used for debug dumps and verifier diagnostics.

use std::fmt;

use super::instr::{BinaryOp, CheckedOp, Instr, IrFunction, Terminator, UnaryOp};

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function @{}(", self.name)?;
        for (i, ty) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", ty)?;
        }
        write!(f, ") -> (")?;
        for (i, ty) in self.returns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", ty)?;
        }
        writeln!(f, ") {{")?;

        for instr in &self.instrs {
            match instr {
                Instr::Note { text } => writeln!(f, "    ; {}", text)?,
                _ => {
                    write!(f, "    {}", instr)?;
                    let mut types = vec![];
                    instr.for_each_def(|r| {
                        if let Some(ty) = self.reg_type(r) {
                            types.push(ty.to_string());
                        }
                    });
                    if types.is_empty() {
                        writeln!(f)?;
                    } else {
                        writeln!(f, "    ; {}", types.join(", "))?;
                    }
                }
            }
        }

        writeln!(f, "    {}", self.terminator)?;
        writeln!(f, "}}")
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Iconst { dest, ty, value } => write!(f, "{} = iconst.{} {}", dest, ty, value),
            Instr::Fconst { dest, ty, value } => write!(f, "{} = fconst.{} {:?}", dest, ty, value),
            Instr::Param { dest, ty, index } => write!(f, "{} = param.{} {}", dest, ty, index),
            Instr::Binary { dest, op, left, right } => {
                write!(f, "{} = {} {}, {}", dest, binary_mnemonic(*op), left, right)
            }
            Instr::CheckedBinary { dest, overflow, op, left, right } => {
                let name = match op {
                    CheckedOp::Add => "checked_add",
                    CheckedOp::Sub => "checked_sub",
                    CheckedOp::Mul => "checked_mul",
                };
                write!(f, "{}, {} = {} {}, {}", dest, overflow, name, left, right)
            }
            Instr::Unary { dest, op, operand } => {
                let name = match op {
                    UnaryOp::Neg => "neg",
                    UnaryOp::Not => "not",
                };
                write!(f, "{} = {} {}", dest, name, operand)
            }
            Instr::Compare { dest, op, left, right } => {
                write!(f, "{} = cmp.{} {}, {}", dest, op.mnemonic(), left, right)
            }
            Instr::Select { dest, cond, if_true, if_false } => {
                write!(f, "{} = select {}, {}, {}", dest, cond, if_true, if_false)
            }
            Instr::Cast { dest, to, src } => write!(f, "{} = cast.{} {}", dest, to, src),
            Instr::Call { dests, callee, args } => {
                let dests: Vec<String> = dests.iter().map(|d| d.to_string()).collect();
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{} = call @{}({})", dests.join(", "), callee, args.join(", "))
            }
            Instr::Move { dest, src } => write!(f, "{} = move {}", dest, src),
            Instr::Note { text } => write!(f, "; {}", text),
        }
    }
}

fn binary_mnemonic(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "add",
        BinaryOp::Sub => "sub",
        BinaryOp::Mul => "mul",
        BinaryOp::Div => "div",
        BinaryOp::Rem => "rem",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
        BinaryOp::Xor => "xor",
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Return(values) => {
                let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "return {}", values.join(", "))
            }
            Terminator::None => write!(f, "<no terminator>"),
        }
    }
}
