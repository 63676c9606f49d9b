//! `scalarjit eval`: compile, generate native code and run it once.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use scalarjit_engine::{
    CodegenConfig, CompilationOptions, CompiledExpression, Datum, DeviceType, Evaluation, ScalarCodeGenerator,
};

pub fn execute(
    config: CodegenConfig,
    file: &Path,
    options: CompilationOptions,
    fetch_inputs: bool,
    inputs: &[String],
    devices: usize,
) -> anyhow::Result<()> {
    let expr = super::read_expression(file)?;
    let mut generator = ScalarCodeGenerator::with_config(config)?;
    if options.device == DeviceType::Accelerator {
        generator = generator.with_devices(emulated_devices(devices)?);
    }

    let compiled = generator.compile(&expr, fetch_inputs, &options)?;
    let args = parse_arguments(&compiled, inputs)?;
    let native = generator.generate_native_code(&compiled, &options)?;
    tracing::debug!(device = ?native.device_type(), arguments = args.len(), "Evaluating expression");

    match native.device_type() {
        DeviceType::Host => print_evaluation("host", &native.invoke(&args)?),
        DeviceType::Accelerator => {
            for entry in native.entry_points() {
                if let Some((device, _)) = entry.device_kernel() {
                    let result = native.invoke_on_device(device, &args)?;
                    print_evaluation(&format!("device {}", device), &result);
                }
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn emulated_devices(count: usize) -> anyhow::Result<Arc<dyn scalarjit_engine::DeviceRuntime>> {
    Ok(Arc::new(scalarjit_engine::device::HostEmulatedDevices::new(count)))
}

#[cfg(not(unix))]
fn emulated_devices(_count: usize) -> anyhow::Result<Arc<dyn scalarjit_engine::DeviceRuntime>> {
    bail!("emulated accelerator devices are only available on unix hosts")
}

/// Parse `inputs` against the argument types; omitted hoisted literals
/// take the values they had in the expression
fn parse_arguments(compiled: &CompiledExpression, inputs: &[String]) -> anyhow::Result<Vec<Datum>> {
    let types = compiled.argument_types();
    let columns = compiled.inputs().len();
    if inputs.len() != columns && inputs.len() != types.len() {
        bail!("expected {} column inputs (or {} with hoisted literals), got {}", columns, types.len(), inputs.len());
    }

    let mut args = inputs
        .iter()
        .zip(&types)
        .enumerate()
        .map(|(i, (text, ty))| {
            Datum::parse(ty.kind, text)
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("input {}", i))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    if args.len() == columns {
        args.extend(compiled.literal_values());
    }
    Ok(args)
}

fn print_evaluation(label: &str, result: &Evaluation) {
    match result.domain_error() {
        None if result.is_ok() => println!("{}: error=0 result={}", label, result.value),
        Some(err) => println!("{}: error={} ({})", label, result.error_code, err),
        None => println!("{}: error={}", label, result.error_code),
    }
}
