//! `scalarjit compile`: lower an expression and show the result.

use std::path::Path;

use scalarjit_engine::{CodegenConfig, CompilationOptions, ScalarCodeGenerator};

pub fn execute(
    config: CodegenConfig,
    file: &Path,
    options: CompilationOptions,
    fetch_inputs: bool,
    json: bool,
) -> anyhow::Result<()> {
    let expr = super::read_expression(file)?;
    let generator = ScalarCodeGenerator::with_config(config)?;
    let compiled = generator.compile(&expr, fetch_inputs, &options)?;

    if json {
        println!("{}", serde_json::to_string_pretty(compiled.function())?);
        return Ok(());
    }

    print!("{}", compiled.function());
    println!();
    println!("result: {}", compiled.result_type());
    for (i, col) in compiled.inputs().iter().enumerate() {
        println!(
            "input {}: table={} column={} rte={} {}",
            i, col.table_id, col.column_id, col.rte_index, col.ty
        );
    }
    let columns = compiled.inputs().len();
    for (i, literal) in compiled.hoisted_literals().iter().enumerate() {
        println!("input {}: literal {} {}", columns + i, literal.value, literal.ty);
    }
    Ok(())
}
