//! Caller-side kernel invocation
//!
//! Prepares device-resident slots for one evaluation of a scalar kernel,
//! launches it, reads the error code and result back and releases the
//! slots again. Values travel in host byte order.

use crate::backend::{EntrySignature, Evaluation};
use crate::error::CodegenError;
use crate::expr::{Datum, Slot};

use super::{DeviceError, DevicePtr, DeviceRuntime, KernelHandle};

/// Device allocations released on drop
struct SlotAllocations<'a> {
    runtime: &'a dyn DeviceRuntime,
    device: usize,
    ptrs: Vec<DevicePtr>,
}

impl SlotAllocations<'_> {
    fn allocate(&mut self, size: usize) -> Result<DevicePtr, DeviceError> {
        let ptr = self.runtime.allocate(self.device, size)?;
        self.ptrs.push(ptr);
        Ok(ptr)
    }
}

impl Drop for SlotAllocations<'_> {
    fn drop(&mut self) {
        for ptr in self.ptrs.drain(..) {
            if let Err(err) = self.runtime.free(self.device, ptr) {
                tracing::warn!(device = self.device, error = %err, "Failed to free kernel slot");
            }
        }
    }
}

/// Evaluate a loaded scalar kernel once on `device`
pub fn run_scalar_kernel(
    runtime: &dyn DeviceRuntime,
    device: usize,
    kernel: KernelHandle,
    signature: &EntrySignature,
    inputs: &[Datum],
) -> Result<Evaluation, CodegenError> {
    let input_slots = signature.encode_inputs(inputs)?;
    let pointer_bytes = runtime.device_target(device)?.pointer_bytes()?;

    let mut allocations = SlotAllocations { runtime, device, ptrs: Vec::new() };
    let error_slot = allocations.allocate(8)?;
    let result_slot = allocations.allocate(8)?;
    let mut addresses = vec![error_slot, result_slot];
    for slot in &input_slots {
        let ptr = allocations.allocate(slot.len())?;
        runtime.copy_host_to_device(device, ptr, slot)?;
        addresses.push(ptr);
    }

    let mut table = Vec::with_capacity(addresses.len() * pointer_bytes);
    for ptr in &addresses {
        match pointer_bytes {
            8 => table.extend_from_slice(&ptr.0.to_ne_bytes()),
            4 => {
                let narrow = u32::try_from(ptr.0).map_err(|_| {
                    CodegenError::DeviceBackend(format!("device pointer {:#x} exceeds 32 bits", ptr.0))
                })?;
                table.extend_from_slice(&narrow.to_ne_bytes());
            }
            n => {
                return Err(CodegenError::DeviceBackend(format!("unsupported pointer width of {} bytes", n)));
            }
        }
    }
    let table_ptr = allocations.allocate(table.len())?;
    runtime.copy_host_to_device(device, table_ptr, &table)?;

    runtime.launch(device, kernel, table_ptr)?;

    let mut error = [0u8; 4];
    runtime.copy_device_to_host(device, &mut error, error_slot)?;
    let mut result: Slot = [0u8; 8];
    runtime.copy_device_to_host(device, &mut result, result_slot)?;

    Ok(signature.decode(i32::from_ne_bytes(error), result))
}
