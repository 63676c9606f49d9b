//! Typed scalar expression trees
//!
//! Produced by query analysis and consumed read-only by the code generator.
//! Every node carries its result [`TypeInfo`].

mod datum;
mod types;

pub use datum::{Datum, Slot};
pub use types::{SqlType, TypeInfo};

use serde::{Deserialize, Serialize};

/// A scalar expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Constant(Constant),
    ColumnVar(ColumnVar),
    ArithmeticOp(ArithmeticOp),
    Comparison(Comparison),
    Logical(Logical),
    Unary(UnaryExpr),
    /// Never lowered; present so that analysis can hand over any tree
    FunctionCall(FunctionCall),
}

/// A literal; `Datum::Null` is the NULL literal of `ty`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constant {
    pub ty: TypeInfo,
    pub value: Datum,
}

impl Constant {
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }
}

/// Identity of a column reference, used to deduplicate inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnKey {
    pub table_id: i32,
    pub column_id: i32,
    pub rte_index: i32,
}

/// A reference to an input column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnVar {
    pub ty: TypeInfo,
    pub table_id: i32,
    pub column_id: i32,
    /// Range-table entry the column is read through
    #[serde(default)]
    pub rte_index: i32,
}

impl ColumnVar {
    pub fn key(&self) -> ColumnKey {
        ColumnKey { table_id: self.table_id, column_id: self.column_id, rte_index: self.rte_index }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArithmeticOp {
    pub ty: TypeInfo,
    pub op: ArithmeticKind,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonKind {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub ty: TypeInfo,
    pub op: ComparisonKind,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalKind {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Logical {
    pub ty: TypeInfo,
    pub op: LogicalKind,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryKind {
    Negate,
    Not,
    IsNull,
    /// Convert the operand to the node's own type
    Cast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpr {
    pub ty: TypeInfo,
    pub op: UnaryKind,
    pub operand: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub ty: TypeInfo,
    pub name: String,
    #[serde(default)]
    pub args: Vec<Expr>,
}

impl Expr {
    /// A NOT NULL literal typed after its value
    ///
    /// `Datum::Null` has no type of its own; use [`Expr::null`] for it.
    pub fn literal(value: Datum) -> Expr {
        let kind = value.kind().unwrap_or(SqlType::Int);
        Expr::Constant(Constant { ty: TypeInfo::not_null(kind), value })
    }

    pub fn null(ty: TypeInfo) -> Expr {
        Expr::Constant(Constant { ty, value: Datum::Null })
    }

    pub fn column(ty: TypeInfo, table_id: i32, column_id: i32, rte_index: i32) -> Expr {
        Expr::ColumnVar(ColumnVar { ty, table_id, column_id, rte_index })
    }

    pub fn arith(op: ArithmeticKind, ty: TypeInfo, left: Expr, right: Expr) -> Expr {
        Expr::ArithmeticOp(ArithmeticOp { ty, op, left: Box::new(left), right: Box::new(right) })
    }

    /// A comparison, nullable when either operand is
    pub fn compare(op: ComparisonKind, left: Expr, right: Expr) -> Expr {
        let not_null = left.ty().not_null && right.ty().not_null;
        let ty = TypeInfo { kind: SqlType::Boolean, not_null };
        Expr::Comparison(Comparison { ty, op, left: Box::new(left), right: Box::new(right) })
    }

    pub fn logical(op: LogicalKind, left: Expr, right: Expr) -> Expr {
        let not_null = left.ty().not_null && right.ty().not_null;
        let ty = TypeInfo { kind: SqlType::Boolean, not_null };
        Expr::Logical(Logical { ty, op, left: Box::new(left), right: Box::new(right) })
    }

    pub fn unary(op: UnaryKind, ty: TypeInfo, operand: Expr) -> Expr {
        Expr::Unary(UnaryExpr { ty, op, operand: Box::new(operand) })
    }

    /// Cast `operand` to `kind`, keeping its nullability
    pub fn cast(kind: SqlType, operand: Expr) -> Expr {
        let ty = TypeInfo { kind, not_null: operand.ty().not_null };
        Expr::unary(UnaryKind::Cast, ty, operand)
    }

    /// Result type of this node
    pub fn ty(&self) -> TypeInfo {
        match self {
            Expr::Constant(c) => c.ty,
            Expr::ColumnVar(c) => c.ty,
            Expr::ArithmeticOp(op) => op.ty,
            Expr::Comparison(c) => c.ty,
            Expr::Logical(l) => l.ty,
            Expr::Unary(u) => u.ty,
            Expr::FunctionCall(f) => f.ty,
        }
    }

    /// Short node name for diagnostics
    pub fn node_name(&self) -> &'static str {
        match self {
            Expr::Constant(_) => "Constant",
            Expr::ColumnVar(_) => "ColumnVar",
            Expr::ArithmeticOp(_) => "ArithmeticOp",
            Expr::Comparison(_) => "Comparison",
            Expr::Logical(_) => "Logical",
            Expr::Unary(_) => "Unary",
            Expr::FunctionCall(_) => "FunctionCall",
        }
    }
}
