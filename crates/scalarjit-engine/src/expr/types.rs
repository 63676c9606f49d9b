//! SQL value types as seen by the code generator

use std::fmt;

use scalarjit_ir::IrType;
use serde::{Deserialize, Serialize};

/// SQL type kinds an expression node can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Boolean,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    /// Present in trees but never lowered
    Text,
}

impl SqlType {
    /// Machine type used to carry a value of this kind, if it has one
    pub fn ir_type(self) -> Option<IrType> {
        match self {
            SqlType::Boolean => Some(IrType::Bool),
            SqlType::SmallInt => Some(IrType::I16),
            SqlType::Int => Some(IrType::I32),
            SqlType::BigInt => Some(IrType::I64),
            SqlType::Float => Some(IrType::F32),
            SqlType::Double => Some(IrType::F64),
            SqlType::Text => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, SqlType::Boolean | SqlType::Text)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, SqlType::SmallInt | SqlType::Int | SqlType::BigInt)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Int => "INT",
            SqlType::BigInt => "BIGINT",
            SqlType::Float => "FLOAT",
            SqlType::Double => "DOUBLE",
            SqlType::Text => "TEXT",
        };
        f.write_str(name)
    }
}

/// A SQL type plus its nullability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeInfo {
    pub kind: SqlType,
    #[serde(default)]
    pub not_null: bool,
}

impl TypeInfo {
    pub fn not_null(kind: SqlType) -> Self {
        TypeInfo { kind, not_null: true }
    }

    pub fn nullable(kind: SqlType) -> Self {
        TypeInfo { kind, not_null: false }
    }

    pub fn is_nullable(&self) -> bool {
        !self.not_null
    }

    pub fn ir_type(&self) -> Option<IrType> {
        self.kind.ir_type()
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.not_null {
            write!(f, "{} NOT NULL", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ir_type_mapping() {
        assert_eq!(SqlType::Boolean.ir_type(), Some(IrType::Bool));
        assert_eq!(SqlType::SmallInt.ir_type(), Some(IrType::I16));
        assert_eq!(SqlType::BigInt.ir_type(), Some(IrType::I64));
        assert_eq!(SqlType::Float.ir_type(), Some(IrType::F32));
        assert_eq!(SqlType::Text.ir_type(), None);
    }

    #[test]
    fn test_type_info_display() {
        assert_eq!(TypeInfo::not_null(SqlType::Int).to_string(), "INT NOT NULL");
        assert_eq!(TypeInfo::nullable(SqlType::Double).to_string(), "DOUBLE");
    }
}
