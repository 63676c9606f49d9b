//! Host backend: in-process JIT
//!
//! Defines the entry function twice in one `JITModule`: once with the
//! direct ABI (handed out as the entry point) and once with the packed ABI
//! (used by the safe `NativeCode::invoke` path).

use cranelift_codegen::isa::CallConv;
use cranelift_codegen::ir;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use scalarjit_ir::IrFunction;

use super::isa;
use super::lowering::{entry_signature, EntryAbi, LoweringContext};
use crate::error::CodegenError;
use crate::expr::Slot;
use crate::lower::CompiledExpression;
use crate::options::CompilationOptions;

/// Symbol suffix of the packed-ABI twin
const PACKED_SUFFIX: &str = "_packed";

/// Host JIT module holding one compiled expression
pub struct HostSession {
    /// `None` only while dropping
    module: Option<JITModule>,
    entry: *const u8,
    packed: *const u8,
}

impl HostSession {
    pub fn compile(compiled: &CompiledExpression, options: &CompilationOptions) -> Result<Self, CodegenError> {
        let isa = isa::host_isa(options.opt_level)?;
        let ptr_ty = isa.pointer_type();
        let call_conv = isa.default_call_conv();
        let mut module = JITModule::new(JITBuilder::with_isa(isa, cranelift_module::default_libcall_names()));

        match define_entries(&mut module, compiled.function(), ptr_ty, call_conv, options.debug) {
            Ok((entry, packed)) => {
                tracing::debug!(symbol = %compiled.function().name, "Host code generated");
                Ok(HostSession { module: Some(module), entry, packed })
            }
            Err(err) => {
                // Nothing from this module escaped
                unsafe { module.free_memory() };
                Err(err)
            }
        }
    }

    /// Direct-ABI entry address
    pub fn entry(&self) -> *const u8 {
        self.entry
    }

    /// Run the packed twin, returning `(error code, result slot)`
    pub fn call_packed(&self, inputs: &[Slot]) -> (i32, Slot) {
        let mut error: u64 = 0;
        let mut result: u64 = 0;
        let mut values: Vec<u64> = inputs.iter().map(|slot| u64::from_ne_bytes(*slot)).collect();

        let mut table: Vec<*mut u64> = Vec::with_capacity(values.len() + 2);
        table.push(&mut error);
        table.push(&mut result);
        table.extend(values.iter_mut().map(|v| v as *mut u64));

        // SAFETY: `packed` was compiled from a signature taking one pointer, and
        // every slot it touches is an 8-byte aligned local that outlives the call
        unsafe {
            let func: extern "C" fn(*const *mut u64) = std::mem::transmute(self.packed);
            func(table.as_ptr());
        }

        let error = error.to_ne_bytes();
        (i32::from_ne_bytes([error[0], error[1], error[2], error[3]]), result.to_ne_bytes())
    }
}

fn define_entries(
    module: &mut JITModule,
    func: &IrFunction,
    ptr_ty: ir::Type,
    call_conv: CallConv,
    debug: bool,
) -> Result<(*const u8, *const u8), CodegenError> {
    let entry_id = define_function(module, func, EntryAbi::Direct, &func.name, ptr_ty, call_conv, debug)?;
    let packed_name = format!("{}{}", func.name, PACKED_SUFFIX);
    let packed_id = define_function(module, func, EntryAbi::Packed, &packed_name, ptr_ty, call_conv, debug)?;

    module
        .finalize_definitions()
        .map_err(|e| CodegenError::Backend(format!("Failed to finalize JIT module: {}", e)))?;

    Ok((module.get_finalized_function(entry_id), module.get_finalized_function(packed_id)))
}

fn define_function(
    module: &mut JITModule,
    func: &IrFunction,
    abi: EntryAbi,
    symbol: &str,
    ptr_ty: ir::Type,
    call_conv: CallConv,
    debug: bool,
) -> Result<FuncId, CodegenError> {
    let sig = entry_signature(func, abi, call_conv, ptr_ty);
    let id = module
        .declare_function(symbol, Linkage::Local, &sig)
        .map_err(|e| CodegenError::Backend(format!("Failed to declare {}: {}", symbol, e)))?;

    let mut ctx = module.make_context();
    ctx.func.signature = sig;
    let mut fb_ctx = FunctionBuilderContext::new();
    {
        let builder = FunctionBuilder::new(&mut ctx.func, &mut fb_ctx);
        LoweringContext::lower(func, abi, ptr_ty, builder)
            .map_err(|e| CodegenError::Backend(format!("Failed to lower {}: {}", symbol, e)))?;
    }
    if debug {
        tracing::debug!(symbol, clif = %ctx.func.display(), "Cranelift IR");
    }

    module
        .define_function(id, &mut ctx)
        .map_err(|e| CodegenError::Backend(format!("Failed to compile {}: {:?}", symbol, e)))?;
    module.clear_context(&mut ctx);
    Ok(id)
}

impl Drop for HostSession {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // SAFETY: entry points borrow the owning NativeCode, so none outlive this
            unsafe { module.free_memory() };
        }
    }
}
