//! IR type system
//!
//! Every register carries exactly one of these types. Booleans are byte
//! sized: `0`, `1`, or the nullable-boolean marker `i8::MIN`.

use serde::{Deserialize, Serialize};

/// IR value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IrType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl IrType {
    /// All value types, in widening order within each class
    pub const ALL: [IrType; 6] = [
        IrType::Bool,
        IrType::I16,
        IrType::I32,
        IrType::I64,
        IrType::F32,
        IrType::F64,
    ];

    /// Numeric types (everything but `Bool`)
    pub const NUMERIC: [IrType; 5] = [IrType::I16, IrType::I32, IrType::I64, IrType::F32, IrType::F64];

    /// Whether this is a signed integer type
    pub fn is_int(&self) -> bool {
        matches!(self, IrType::I16 | IrType::I32 | IrType::I64)
    }

    /// Whether this is a floating-point type
    pub fn is_float(&self) -> bool {
        matches!(self, IrType::F32 | IrType::F64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_int() || self.is_float()
    }

    /// Width in bits
    pub fn bits(&self) -> u32 {
        match self {
            IrType::Bool => 8,
            IrType::I16 => 16,
            IrType::I32 | IrType::F32 => 32,
            IrType::I64 | IrType::F64 => 64,
        }
    }

    /// Width in bytes
    pub fn bytes(&self) -> usize {
        (self.bits() / 8) as usize
    }

    /// Inclusive value range of an integer type (booleans are `i8`)
    pub fn int_range(&self) -> Option<(i64, i64)> {
        match self {
            IrType::Bool => Some((i8::MIN as i64, i8::MAX as i64)),
            IrType::I16 => Some((i16::MIN as i64, i16::MAX as i64)),
            IrType::I32 => Some((i32::MIN as i64, i32::MAX as i64)),
            IrType::I64 => Some((i64::MIN, i64::MAX)),
            IrType::F32 | IrType::F64 => None,
        }
    }

    /// Truncate a 64-bit value to this integer type's width, sign-extending
    /// the result back. Floats pass through unchanged.
    pub fn wrap(&self, value: i64) -> i64 {
        match self {
            IrType::Bool => value as i8 as i64,
            IrType::I16 => value as i16 as i64,
            IrType::I32 => value as i32 as i64,
            _ => value,
        }
    }

    /// Name fragment used in runtime helper symbols (`int32`, `fp64`, ...)
    pub fn helper_suffix(&self) -> &'static str {
        match self {
            IrType::Bool => "bool",
            IrType::I16 => "int16",
            IrType::I32 => "int32",
            IrType::I64 => "int64",
            IrType::F32 => "fp32",
            IrType::F64 => "fp64",
        }
    }
}

impl std::fmt::Display for IrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IrType::Bool => write!(f, "bool"),
            IrType::I16 => write!(f, "i16"),
            IrType::I32 => write!(f, "i32"),
            IrType::I64 => write!(f, "i64"),
            IrType::F32 => write!(f, "f32"),
            IrType::F64 => write!(f, "f64"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(IrType::I16.is_int());
        assert!(!IrType::Bool.is_int());
        assert!(IrType::F32.is_float());
        assert!(!IrType::Bool.is_numeric());
        assert_eq!(IrType::NUMERIC.len(), 5);
    }

    #[test]
    fn test_wrap_truncates_to_width() {
        assert_eq!(IrType::I32.wrap(i32::MAX as i64 + 1), i32::MIN as i64);
        assert_eq!(IrType::I16.wrap(65535), -1);
        assert_eq!(IrType::I64.wrap(i64::MIN), i64::MIN);
    }

    #[test]
    fn test_helper_suffix() {
        assert_eq!(IrType::I64.helper_suffix(), "int64");
        assert_eq!(IrType::F32.helper_suffix(), "fp32");
        assert_eq!(IrType::I32.to_string(), "i32");
    }
}
