//! Scalar values and their slot encoding
//!
//! Every value crosses the native boundary through an 8-byte slot holding
//! the value in its natural width and native byte order. NULL is carried
//! in-band as the type's sentinel (see `scalarjit_ir::runtime::null_sentinel`).

use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::{SqlType, TypeInfo};

/// A single SQL value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datum {
    Null,
    Bool(bool),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Text(String),
}

/// Raw contents of one argument or result slot
pub type Slot = [u8; 8];

impl Datum {
    /// Kind of a non-NULL value
    pub fn kind(&self) -> Option<SqlType> {
        match self {
            Datum::Null => None,
            Datum::Bool(_) => Some(SqlType::Boolean),
            Datum::SmallInt(_) => Some(SqlType::SmallInt),
            Datum::Int(_) => Some(SqlType::Int),
            Datum::BigInt(_) => Some(SqlType::BigInt),
            Datum::Float(_) => Some(SqlType::Float),
            Datum::Double(_) => Some(SqlType::Double),
            Datum::Text(_) => Some(SqlType::Text),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Parse `text` as a value of `kind`; `null` (any case) is NULL
    pub fn parse(kind: SqlType, text: &str) -> Result<Datum, String> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("null") {
            return Ok(Datum::Null);
        }
        let invalid = |e: &dyn fmt::Display| format!("invalid {} literal '{}': {}", kind, text, e);
        match kind {
            SqlType::Boolean => match text.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Datum::Bool(true)),
                "false" | "f" | "0" => Ok(Datum::Bool(false)),
                _ => Err(invalid(&"expected true or false")),
            },
            SqlType::SmallInt => text.parse().map(Datum::SmallInt).map_err(|e| invalid(&e)),
            SqlType::Int => text.parse().map(Datum::Int).map_err(|e| invalid(&e)),
            SqlType::BigInt => text.parse().map(Datum::BigInt).map_err(|e| invalid(&e)),
            SqlType::Float => text.parse().map(Datum::Float).map_err(|e| invalid(&e)),
            SqlType::Double => text.parse().map(Datum::Double).map_err(|e| invalid(&e)),
            SqlType::Text => Ok(Datum::Text(text.to_string())),
        }
    }

    /// Encode into an argument slot of type `ty`
    ///
    /// Fails when the value does not belong to `ty`, when NULL is passed
    /// for a NOT NULL slot, or for text.
    pub fn to_slot(&self, ty: TypeInfo) -> Result<Slot, String> {
        let mut slot = [0u8; 8];
        match (self, ty.kind) {
            (Datum::Null, _) if ty.not_null => {
                return Err(format!("NULL passed for {}", ty));
            }
            (Datum::Null, kind) => return null_slot(kind),
            (Datum::Bool(v), SqlType::Boolean) => slot[0] = *v as u8,
            (Datum::SmallInt(v), SqlType::SmallInt) => slot[..2].copy_from_slice(&v.to_ne_bytes()),
            (Datum::Int(v), SqlType::Int) => slot[..4].copy_from_slice(&v.to_ne_bytes()),
            (Datum::BigInt(v), SqlType::BigInt) => slot.copy_from_slice(&v.to_ne_bytes()),
            (Datum::Float(v), SqlType::Float) => slot[..4].copy_from_slice(&v.to_ne_bytes()),
            (Datum::Double(v), SqlType::Double) => slot.copy_from_slice(&v.to_ne_bytes()),
            (value, _) => return Err(format!("{} is not a value of type {}", value, ty)),
        }
        Ok(slot)
    }

    /// Decode a result slot of type `ty`
    ///
    /// For nullable types the sentinel reads back as NULL.
    pub fn from_slot(ty: TypeInfo, slot: Slot) -> Datum {
        let value = match ty.kind {
            SqlType::Boolean => {
                if slot[0] == i8::MIN as u8 && ty.is_nullable() {
                    return Datum::Null;
                }
                Datum::Bool(slot[0] != 0)
            }
            SqlType::SmallInt => Datum::SmallInt(i16::from_ne_bytes([slot[0], slot[1]])),
            SqlType::Int => Datum::Int(i32::from_ne_bytes([slot[0], slot[1], slot[2], slot[3]])),
            SqlType::BigInt => Datum::BigInt(i64::from_ne_bytes(slot)),
            SqlType::Float => Datum::Float(f32::from_ne_bytes([slot[0], slot[1], slot[2], slot[3]])),
            SqlType::Double => Datum::Double(f64::from_ne_bytes(slot)),
            SqlType::Text => return Datum::Null,
        };
        if ty.is_nullable() && value.is_null_sentinel() {
            Datum::Null
        } else {
            value
        }
    }

    fn is_null_sentinel(&self) -> bool {
        match self {
            Datum::SmallInt(v) => *v == i16::MIN,
            Datum::Int(v) => *v == i32::MIN,
            Datum::BigInt(v) => *v == i64::MIN,
            Datum::Float(v) => *v == f32::MIN_POSITIVE,
            Datum::Double(v) => *v == f64::MIN_POSITIVE,
            _ => false,
        }
    }
}

fn null_slot(kind: SqlType) -> Result<Slot, String> {
    let mut slot = [0u8; 8];
    match kind {
        SqlType::Boolean => slot[0] = i8::MIN as u8,
        SqlType::SmallInt => slot[..2].copy_from_slice(&i16::MIN.to_ne_bytes()),
        SqlType::Int => slot[..4].copy_from_slice(&i32::MIN.to_ne_bytes()),
        SqlType::BigInt => slot.copy_from_slice(&i64::MIN.to_ne_bytes()),
        SqlType::Float => slot[..4].copy_from_slice(&f32::MIN_POSITIVE.to_ne_bytes()),
        SqlType::Double => slot.copy_from_slice(&f64::MIN_POSITIVE.to_ne_bytes()),
        SqlType::Text => return Err("text values cannot be passed to native code".to_string()),
    }
    Ok(slot)
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => f.write_str("NULL"),
            Datum::Bool(v) => write!(f, "{}", v),
            Datum::SmallInt(v) => write!(f, "{}", v),
            Datum::Int(v) => write!(f, "{}", v),
            Datum::BigInt(v) => write!(f, "{}", v),
            Datum::Float(v) => write!(f, "{}", v),
            Datum::Double(v) => write!(f, "{}", v),
            Datum::Text(v) => write!(f, "'{}'", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(Datum::parse(SqlType::Int, "17").unwrap(), Datum::Int(17));
        assert_eq!(Datum::parse(SqlType::Boolean, "T").unwrap(), Datum::Bool(true));
        assert_eq!(Datum::parse(SqlType::Double, " 2.5 ").unwrap(), Datum::Double(2.5));
        assert_eq!(Datum::parse(SqlType::BigInt, "NULL").unwrap(), Datum::Null);
        assert!(Datum::parse(SqlType::SmallInt, "40000").is_err());
        assert!(Datum::parse(SqlType::Boolean, "maybe").is_err());
    }

    #[test]
    fn test_slot_encoding() {
        let slot = Datum::Int(-5).to_slot(TypeInfo::not_null(SqlType::Int)).unwrap();
        assert_eq!(Datum::from_slot(TypeInfo::not_null(SqlType::Int), slot), Datum::Int(-5));

        let slot = Datum::Bool(true).to_slot(TypeInfo::nullable(SqlType::Boolean)).unwrap();
        assert_eq!(slot[0], 1);
    }

    #[test]
    fn test_null_slots_use_sentinels() {
        let ty = TypeInfo::nullable(SqlType::SmallInt);
        let slot = Datum::Null.to_slot(ty).unwrap();
        assert_eq!(i16::from_ne_bytes([slot[0], slot[1]]), i16::MIN);
        assert_eq!(Datum::from_slot(ty, slot), Datum::Null);

        let ty = TypeInfo::nullable(SqlType::Boolean);
        assert_eq!(Datum::from_slot(ty, Datum::Null.to_slot(ty).unwrap()), Datum::Null);

        // The same bits in a NOT NULL slot are an ordinary value
        let slot = i32::MIN.to_ne_bytes();
        let slot = [slot[0], slot[1], slot[2], slot[3], 0, 0, 0, 0];
        assert_eq!(Datum::from_slot(TypeInfo::not_null(SqlType::Int), slot), Datum::Int(i32::MIN));
    }

    #[test]
    fn test_slot_type_mismatch() {
        assert!(Datum::Int(1).to_slot(TypeInfo::not_null(SqlType::BigInt)).is_err());
        assert!(Datum::Null.to_slot(TypeInfo::not_null(SqlType::Int)).is_err());
        assert!(Datum::Text("x".into()).to_slot(TypeInfo::nullable(SqlType::Text)).is_err());
    }
}
