//! `scalarjit runtime`: inspect the runtime support module.

use std::path::Path;

use anyhow::Context;
use scalarjit_engine::{CodegenConfig, ScalarCodeGenerator};
use scalarjit_ir::runtime::LIBRARY_FORMAT_VERSION;
use scalarjit_ir::RuntimeLibrary;

pub fn execute(
    config: CodegenConfig,
    filter: Option<&str>,
    bodies: bool,
    export: Option<&Path>,
) -> anyhow::Result<()> {
    let generator = ScalarCodeGenerator::with_config(config)?;
    let runtime = generator.runtime();

    let names: Vec<&str> = runtime
        .names()
        .into_iter()
        .filter(|name| filter.is_none_or(|f| name.contains(f)))
        .collect();
    tracing::debug!(total = runtime.len(), shown = names.len(), "Listing runtime functions");

    for name in &names {
        let Some(func) = runtime.get(name) else { continue };
        if bodies {
            println!("{}", func);
        } else {
            let params: Vec<String> = func.params.iter().map(|t| t.to_string()).collect();
            let returns: Vec<String> = func.returns.iter().map(|t| t.to_string()).collect();
            println!("@{}({}) -> ({})", name, params.join(", "), returns.join(", "));
        }
    }

    if let Some(path) = export {
        let library = RuntimeLibrary {
            version: LIBRARY_FORMAT_VERSION,
            functions: names.iter().filter_map(|name| runtime.get(name).cloned()).collect(),
        };
        let bytes = serde_json::to_vec(&library)?;
        std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
        eprintln!("Wrote {} functions to {}", library.functions.len(), path.display());
    }
    Ok(())
}
