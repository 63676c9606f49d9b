//! Numeric runtime support library
//!
//! Branch-free helper routines written in IR: overflow-checked arithmetic,
//! range-checked casts and null-aware comparisons. The engine's build script
//! serializes [`build_library`] into the artifact it ships; generated
//! expression bodies call these helpers by name and the linker inlines them.
//!
//! Value-producing helpers return `(value, error_code)` where the error code
//! is `0` or a [`DomainError`] code. `_nullable` variants treat the type's
//! inline null sentinel as NULL: any NULL input yields a NULL result and no
//! error.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::builder::IrBuilder;
use crate::instr::{BinaryOp, CheckedOp, CmpOp, IrFunction, Reg, UnaryOp};
use crate::types::IrType;

/// Version of the serialized library layout
pub const LIBRARY_FORMAT_VERSION: u32 = 1;

/// Helper combining two error codes (first nonzero wins)
pub const MERGE_ERROR: &str = "merge_error";

/// Runtime domain errors, written to the error slot of generated code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum DomainError {
    DivideByZero = 1,
    Overflow = 2,
}

impl DomainError {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(DomainError::DivideByZero),
            2 => Some(DomainError::Overflow),
            _ => None,
        }
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::DivideByZero => write!(f, "division by zero"),
            DomainError::Overflow => write!(f, "overflow"),
        }
    }
}

/// Arithmetic helper families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    pub const ALL: [ArithOp; 5] = [ArithOp::Add, ArithOp::Sub, ArithOp::Mul, ArithOp::Div, ArithOp::Mod];

    pub fn mnemonic(&self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Mod => "mod",
        }
    }
}

fn nullable_suffix(nullable: bool) -> &'static str {
    if nullable {
        "_nullable"
    } else {
        ""
    }
}

/// `add_int32`, `div_fp64_nullable`, ...
pub fn arith_helper(op: ArithOp, ty: IrType, nullable: bool) -> String {
    format!("{}_{}{}", op.mnemonic(), ty.helper_suffix(), nullable_suffix(nullable))
}

/// `neg_int64`, `neg_fp32_nullable`, ...
pub fn neg_helper(ty: IrType, nullable: bool) -> String {
    format!("neg_{}{}", ty.helper_suffix(), nullable_suffix(nullable))
}

/// `lt_int32_nullable`, ... (non-nullable comparisons need no helper)
pub fn compare_helper(op: CmpOp, ty: IrType) -> String {
    format!("{}_{}_nullable", op.mnemonic(), ty.helper_suffix())
}

/// `cast_fp64_to_int32`, `cast_int16_to_bool_nullable`, ...
pub fn cast_helper(from: IrType, to: IrType, nullable: bool) -> String {
    format!("cast_{}_to_{}{}", from.helper_suffix(), to.helper_suffix(), nullable_suffix(nullable))
}

/// Inline null marker of a value type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NullSentinel {
    Int(i64),
    Float(f64),
}

pub fn null_sentinel(ty: IrType) -> NullSentinel {
    match ty {
        IrType::Bool => NullSentinel::Int(i8::MIN as i64),
        IrType::I16 => NullSentinel::Int(i16::MIN as i64),
        IrType::I32 => NullSentinel::Int(i32::MIN as i64),
        IrType::I64 => NullSentinel::Int(i64::MIN),
        IrType::F32 => NullSentinel::Float(f32::MIN_POSITIVE as f64),
        IrType::F64 => NullSentinel::Float(f64::MIN_POSITIVE),
    }
}

/// The complete helper library, as shipped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeLibrary {
    pub version: u32,
    pub functions: Vec<IrFunction>,
}

impl RuntimeLibrary {
    pub fn get(&self, name: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Build every helper routine
pub fn build_library() -> RuntimeLibrary {
    let mut functions = vec![];

    for ty in IrType::NUMERIC {
        for op in ArithOp::ALL {
            if op == ArithOp::Mod && ty.is_float() {
                continue;
            }
            for nullable in [false, true] {
                functions.push(arith(op, ty, nullable));
            }
        }
        for nullable in [false, true] {
            functions.push(negate(ty, nullable));
        }
        for op in CmpOp::ALL {
            functions.push(compare_nullable(op, ty));
        }
    }
    for op in [CmpOp::Eq, CmpOp::Ne] {
        functions.push(compare_nullable(op, IrType::Bool));
    }

    for from in IrType::ALL {
        for to in IrType::ALL {
            if from == to {
                continue;
            }
            for nullable in [false, true] {
                functions.push(cast(from, to, nullable));
            }
        }
    }

    functions.push(merge_error());

    RuntimeLibrary {
        version: LIBRARY_FORMAT_VERSION,
        functions,
    }
}

// ===== Construction helpers =====

fn helper(
    name: String,
    params: Vec<IrType>,
    returns: Vec<IrType>,
    body: impl FnOnce(&mut IrBuilder<'_>, &[Reg]) -> Vec<Reg>,
) -> IrFunction {
    let mut func = IrFunction::new(name, params.clone(), returns);
    let mut b = IrBuilder::new(&mut func);
    let args: Vec<Reg> = params
        .iter()
        .enumerate()
        .map(|(i, ty)| b.param(i as u32, *ty))
        .collect();
    let results = body(&mut b, &args);
    b.ret(results);
    func
}

fn sentinel(b: &mut IrBuilder<'_>, ty: IrType) -> Reg {
    match null_sentinel(ty) {
        NullSentinel::Int(v) => b.iconst(ty, v),
        NullSentinel::Float(v) => b.fconst(ty, v),
    }
}

fn is_null(b: &mut IrBuilder<'_>, value: Reg, ty: IrType) -> Reg {
    let s = sentinel(b, ty);
    b.compare(CmpOp::Eq, value, s)
}

fn ok(b: &mut IrBuilder<'_>) -> Reg {
    b.iconst(IrType::I32, 0)
}

/// `flag ? error : 0`
fn error_code(b: &mut IrBuilder<'_>, flag: Reg, error: DomainError) -> Reg {
    let code = b.iconst(IrType::I32, error.code() as i64);
    let zero = ok(b);
    b.select(flag, code, zero)
}

/// Replace the result with NULL and clear the error if any input is NULL
fn mask_nulls(
    b: &mut IrBuilder<'_>,
    input_ty: IrType,
    inputs: &[Reg],
    result_ty: IrType,
    value: Reg,
    err: Reg,
) -> Vec<Reg> {
    let mut any_null = is_null(b, inputs[0], input_ty);
    for input in &inputs[1..] {
        let n = is_null(b, *input, input_ty);
        any_null = b.binary(BinaryOp::Or, any_null, n);
    }
    let null = sentinel(b, result_ty);
    let value = b.select(any_null, null, value);
    let zero = ok(b);
    let err = b.select(any_null, zero, err);
    vec![value, err]
}

// ===== Arithmetic =====

fn arith(op: ArithOp, ty: IrType, nullable: bool) -> IrFunction {
    helper(arith_helper(op, ty, nullable), vec![ty, ty], vec![ty, IrType::I32], |b, args| {
        let (lhs, rhs) = (args[0], args[1]);
        let (value, err) = arith_body(b, op, ty, lhs, rhs);
        if nullable {
            mask_nulls(b, ty, args, ty, value, err)
        } else {
            vec![value, err]
        }
    })
}

fn arith_body(b: &mut IrBuilder<'_>, op: ArithOp, ty: IrType, lhs: Reg, rhs: Reg) -> (Reg, Reg) {
    let simple = match op {
        ArithOp::Add => Some((CheckedOp::Add, BinaryOp::Add)),
        ArithOp::Sub => Some((CheckedOp::Sub, BinaryOp::Sub)),
        ArithOp::Mul => Some((CheckedOp::Mul, BinaryOp::Mul)),
        ArithOp::Div | ArithOp::Mod => None,
    };

    match simple {
        Some((checked, _)) if ty.is_int() => {
            let (value, overflow) = b.checked(checked, lhs, rhs);
            let err = error_code(b, overflow, DomainError::Overflow);
            (value, err)
        }
        Some((_, plain)) => {
            let value = b.binary(plain, lhs, rhs);
            let err = ok(b);
            (value, err)
        }
        None if ty.is_float() => {
            let zero = b.zero(ty);
            let is_zero = b.compare(CmpOp::Eq, rhs, zero);
            let value = b.binary(BinaryOp::Div, lhs, rhs);
            let err = error_code(b, is_zero, DomainError::DivideByZero);
            (value, err)
        }
        None => int_division(b, op, ty, lhs, rhs),
    }
}

/// Integer `/` and `%` without trapping: zero and `-1` divisors are replaced
/// by `1`, then `x / -1` is recovered as a checked negation.
fn int_division(b: &mut IrBuilder<'_>, op: ArithOp, ty: IrType, lhs: Reg, rhs: Reg) -> (Reg, Reg) {
    let zero = b.iconst(ty, 0);
    let one = b.iconst(ty, 1);
    let minus_one = b.iconst(ty, -1);
    let is_zero = b.compare(CmpOp::Eq, rhs, zero);
    let is_minus_one = b.compare(CmpOp::Eq, rhs, minus_one);
    let unsafe_divisor = b.binary(BinaryOp::Or, is_zero, is_minus_one);
    let divisor = b.select(unsafe_divisor, one, rhs);

    if op == ArithOp::Mod {
        // x % -1 == x % 1 == 0
        let value = b.binary(BinaryOp::Rem, lhs, divisor);
        let err = error_code(b, is_zero, DomainError::DivideByZero);
        return (value, err);
    }

    let quotient = b.binary(BinaryOp::Div, lhs, divisor);
    let (negated, neg_overflow) = b.checked(CheckedOp::Sub, zero, quotient);
    let value = b.select(is_minus_one, negated, quotient);
    let overflow = b.binary(BinaryOp::And, is_minus_one, neg_overflow);
    let overflow_code = error_code(b, overflow, DomainError::Overflow);
    let div_zero_code = b.iconst(IrType::I32, DomainError::DivideByZero.code() as i64);
    let err = b.select(is_zero, div_zero_code, overflow_code);
    (value, err)
}

fn negate(ty: IrType, nullable: bool) -> IrFunction {
    helper(neg_helper(ty, nullable), vec![ty], vec![ty, IrType::I32], |b, args| {
        let x = args[0];
        let (value, err) = if ty.is_int() {
            let zero = b.iconst(ty, 0);
            let (value, overflow) = b.checked(CheckedOp::Sub, zero, x);
            (value, error_code(b, overflow, DomainError::Overflow))
        } else {
            let value = b.unary(UnaryOp::Neg, x);
            (value, ok(b))
        };
        if nullable {
            mask_nulls(b, ty, args, ty, value, err)
        } else {
            vec![value, err]
        }
    })
}

// ===== Comparison =====

fn compare_nullable(op: CmpOp, ty: IrType) -> IrFunction {
    helper(compare_helper(op, ty), vec![ty, ty], vec![IrType::Bool], |b, args| {
        let result = b.compare(op, args[0], args[1]);
        let lhs_null = is_null(b, args[0], ty);
        let rhs_null = is_null(b, args[1], ty);
        let any_null = b.binary(BinaryOp::Or, lhs_null, rhs_null);
        let null = sentinel(b, IrType::Bool);
        vec![b.select(any_null, null, result)]
    })
}

// ===== Casts =====

fn cast(from: IrType, to: IrType, nullable: bool) -> IrFunction {
    helper(cast_helper(from, to, nullable), vec![from], vec![to, IrType::I32], |b, args| {
        let (value, err) = cast_body(b, from, to, args[0]);
        if nullable {
            mask_nulls(b, from, args, to, value, err)
        } else {
            vec![value, err]
        }
    })
}

fn cast_body(b: &mut IrBuilder<'_>, from: IrType, to: IrType, x: Reg) -> (Reg, Reg) {
    if to == IrType::Bool {
        let zero = b.zero(from);
        let value = b.compare(CmpOp::Ne, x, zero);
        return (value, ok(b));
    }

    match (from.is_int(), to.int_range()) {
        // Integer narrowing: range check in the source type
        (true, Some((lo, hi))) if to.bits() < from.bits() => {
            let lo = b.iconst(from, lo);
            let hi = b.iconst(from, hi);
            let below = b.compare(CmpOp::Lt, x, lo);
            let above = b.compare(CmpOp::Gt, x, hi);
            let out_of_range = b.binary(BinaryOp::Or, below, above);
            let value = b.cast(x, to);
            (value, error_code(b, out_of_range, DomainError::Overflow))
        }
        // Float to integer truncates toward zero, so the accepted range is
        // (-2^(n-1) - 1, 2^(n-1)). NaN fails both comparisons
        (false, Some(_)) if from.is_float() => {
            let (lo_op, lo) = float_lower_bound(from, to);
            let hi = 2f64.powi(to.bits() as i32 - 1);
            let lo = b.fconst(from, lo);
            let hi = b.fconst(from, hi);
            let above_lo = b.compare(lo_op, x, lo);
            let below_hi = b.compare(CmpOp::Lt, x, hi);
            let in_range = b.binary(BinaryOp::And, above_lo, below_hi);
            let out_of_range = b.unary(UnaryOp::Not, in_range);
            let value = b.cast(x, to);
            (value, error_code(b, out_of_range, DomainError::Overflow))
        }
        // Widening, bool to number, int to float, float to float
        _ => {
            let value = b.cast(x, to);
            (value, ok(b))
        }
    }
}

/// Lower bound check for a float to integer cast
///
/// `x > -2^(n-1) - 1` when that bound is exact in the source float type.
/// Otherwise no float lies strictly between it and `-2^(n-1)`, and
/// `x >= -2^(n-1)` is the same test.
fn float_lower_bound(from: IrType, to: IrType) -> (CmpOp, f64) {
    let min = -(1i128 << (to.bits() - 1));
    let below = min - 1;
    let exact = match from {
        IrType::F32 => below as f32 as i128 == below,
        _ => below as f64 as i128 == below,
    };
    if exact {
        (CmpOp::Gt, below as f64)
    } else {
        (CmpOp::Ge, min as f64)
    }
}

// ===== Error merging =====

fn merge_error() -> IrFunction {
    helper(MERGE_ERROR.to_string(), vec![IrType::I32, IrType::I32], vec![IrType::I32], |b, args| {
        let zero = ok(b);
        let first_failed = b.compare(CmpOp::Ne, args[0], zero);
        vec![b.select(first_failed, args[0], args[1])]
    })
}
