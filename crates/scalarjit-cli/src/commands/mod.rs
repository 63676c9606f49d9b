pub mod compile;
pub mod eval;
pub mod runtime;

use std::path::Path;

use anyhow::Context;
use scalarjit_engine::Expr;

/// Read an expression tree from a JSON file
pub fn read_expression(path: &Path) -> anyhow::Result<Expr> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid expression tree in {}", path.display()))
}
