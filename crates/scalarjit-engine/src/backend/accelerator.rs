//! Accelerator backend: one kernel per device
//!
//! Every device gets its own ISA and its own Cranelift context; kernels are
//! compiled sequentially or on scoped threads, then loaded in device order.
//! Kernel images must be self-contained, so code needing relocations is
//! rejected.

use std::sync::Arc;

use cranelift_codegen::control::ControlPlane;
use cranelift_codegen::ir::UserFuncName;
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use scalarjit_ir::IrFunction;

use super::isa;
use super::lowering::{entry_signature, EntryAbi, LoweringContext};
use crate::device::{DeviceRuntime, DeviceTarget, KernelHandle, KernelImage};
use crate::error::CodegenError;
use crate::lower::CompiledExpression;
use crate::options::CompilationOptions;

/// Kernels loaded on a device runtime, unloaded on drop
pub struct AcceleratorSession {
    devices: Arc<dyn DeviceRuntime>,
    kernels: Vec<(usize, KernelHandle)>,
}

impl AcceleratorSession {
    pub fn compile(
        compiled: &CompiledExpression,
        options: &CompilationOptions,
        devices: &Arc<dyn DeviceRuntime>,
        parallel: bool,
    ) -> Result<Self, CodegenError> {
        let count = devices.device_count();
        if count == 0 {
            return Err(CodegenError::DeviceBackend("no accelerator devices present".to_string()));
        }
        let targets = (0..count)
            .map(|device| devices.device_target(device))
            .collect::<Result<Vec<_>, _>>()?;

        let func = compiled.function();
        let images = if parallel && count > 1 {
            compile_parallel(func, &targets, options)?
        } else {
            targets
                .iter()
                .enumerate()
                .map(|(device, target)| compile_kernel(func, device, target, options))
                .collect::<Result<Vec<_>, _>>()?
        };

        // A failed load drops the session, unloading what was already loaded
        let mut session = AcceleratorSession { devices: Arc::clone(devices), kernels: Vec::with_capacity(count) };
        for image in &images {
            let handle = devices.load_kernel(image.device_index, image)?;
            session.kernels.push((image.device_index, handle));
        }
        tracing::debug!(devices = count, parallel, "Accelerator kernels loaded");
        Ok(session)
    }

    /// `(device index, kernel)` in device enumeration order
    pub fn kernels(&self) -> &[(usize, KernelHandle)] {
        &self.kernels
    }

    pub fn devices(&self) -> &Arc<dyn DeviceRuntime> {
        &self.devices
    }
}

impl Drop for AcceleratorSession {
    fn drop(&mut self) {
        for (device, kernel) in self.kernels.drain(..) {
            if let Err(err) = self.devices.unload_kernel(device, kernel) {
                tracing::warn!(device, error = %err, "Failed to unload kernel");
            }
        }
    }
}

fn compile_parallel(
    func: &IrFunction,
    targets: &[DeviceTarget],
    options: &CompilationOptions,
) -> Result<Vec<KernelImage>, CodegenError> {
    let results = crossbeam::thread::scope(|scope| {
        let handles: Vec<_> = targets
            .iter()
            .enumerate()
            .map(|(device, target)| scope.spawn(move |_| compile_kernel(func, device, target, options)))
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(device, handle)| {
                handle.join().unwrap_or_else(|_| {
                    Err(CodegenError::DeviceBackend(format!("device {}: compilation panicked", device)))
                })
            })
            .collect::<Vec<_>>()
    })
    .map_err(|_| CodegenError::DeviceBackend("device compilation panicked".to_string()))?;

    // First failure in device order
    results.into_iter().collect()
}

fn compile_kernel(
    func: &IrFunction,
    device: usize,
    target: &DeviceTarget,
    options: &CompilationOptions,
) -> Result<KernelImage, CodegenError> {
    let isa = isa::device_isa(target, options.opt_level)?;
    let ptr_ty = isa.pointer_type();
    let failure = |msg: String| CodegenError::DeviceBackend(format!("device {} ({}): {}", device, target.name, msg));

    let mut ctx = Context::new();
    let mut fb_ctx = FunctionBuilderContext::new();
    ctx.func.signature = entry_signature(func, EntryAbi::Packed, isa.default_call_conv(), ptr_ty);
    ctx.func.name = UserFuncName::user(0, device as u32);
    {
        let builder = FunctionBuilder::new(&mut ctx.func, &mut fb_ctx);
        LoweringContext::lower(func, EntryAbi::Packed, ptr_ty, builder)
            .map_err(|e| failure(format!("lowering failed: {}", e)))?;
    }
    if options.debug {
        tracing::debug!(device, clif = %ctx.func.display(), "Device Cranelift IR");
    }

    let mut ctrl_plane = ControlPlane::default();
    let code = ctx
        .compile(&*isa, &mut ctrl_plane)
        .map_err(|e| failure(format!("compilation failed: {}", e.inner)))?;

    let relocs = code.buffer.relocs().len();
    if relocs > 0 {
        return Err(failure(format!("kernel needs {} relocations", relocs)));
    }

    Ok(KernelImage {
        device_index: device,
        symbol: format!("{}_dev{}", func.name, device),
        code: code.code_buffer().to_vec(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::device::HostEmulatedDevices;
    use crate::expr::{Datum, Expr};
    use crate::lower::compile;
    use crate::runtime::RuntimeModule;

    fn constant_expression() -> CompiledExpression {
        compile(&RuntimeModule::shared(), &Expr::literal(Datum::Int(42)), true, &CompilationOptions::accelerator())
            .unwrap()
    }

    #[test]
    fn test_kernel_per_device() {
        let emulated = Arc::new(HostEmulatedDevices::new(3));
        let devices: Arc<dyn DeviceRuntime> = emulated.clone();
        let session =
            AcceleratorSession::compile(&constant_expression(), &CompilationOptions::accelerator(), &devices, true)
                .unwrap();
        let order: Vec<usize> = session.kernels().iter().map(|(d, _)| *d).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(emulated.loaded_kernels(1), 1);

        drop(session);
        assert_eq!(emulated.loaded_kernels(1), 0);
    }

    #[test]
    fn test_zero_devices() {
        let devices: Arc<dyn DeviceRuntime> = Arc::new(HostEmulatedDevices::new(0));
        let result =
            AcceleratorSession::compile(&constant_expression(), &CompilationOptions::accelerator(), &devices, false);
        assert!(matches!(result, Err(CodegenError::DeviceBackend(_))));
    }

    #[test]
    fn test_bad_target_fails_whole_compilation() {
        let targets = vec![
            DeviceTarget::host("good"),
            DeviceTarget::host("bad").with_shared_flag("opt_level", "fastest"),
        ];
        let emulated = Arc::new(HostEmulatedDevices::with_targets(targets));
        let devices: Arc<dyn DeviceRuntime> = emulated.clone();
        for parallel in [false, true] {
            let result =
                AcceleratorSession::compile(&constant_expression(), &CompilationOptions::accelerator(), &devices, parallel);
            assert!(matches!(result, Err(CodegenError::DeviceBackend(ref msg)) if msg.contains("bad")));
            assert_eq!(emulated.loaded_kernels(0), 0);
        }
    }
}
