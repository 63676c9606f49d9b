//! Host-emulated accelerator devices
//!
//! Each emulated device owns its allocations and loaded kernels. Device
//! memory is ordinary 8-byte aligned host memory and kernels are mapped
//! into executable pages, so a "device pointer" is a real host address.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use target_lexicon::Triple;

use super::{DeviceError, DevicePtr, DeviceRuntime, DeviceTarget, KernelHandle, KernelImage};

/// A kernel image in executable memory
struct CodeRegion {
    base: *mut libc::c_void,
    size: usize,
}

// The region is immutable once mapped
unsafe impl Send for CodeRegion {}

impl CodeRegion {
    /// Copy `code` into fresh pages and make them executable (W^X)
    fn map(code: &[u8]) -> Result<Self, String> {
        if code.is_empty() {
            return Err("empty kernel image".to_string());
        }
        unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                code.len(),
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err("mmap failed".to_string());
            }

            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr as *mut u8, code.len());

            if libc::mprotect(ptr, code.len(), libc::PROT_READ | libc::PROT_EXEC) != 0 {
                libc::munmap(ptr, code.len());
                return Err("mprotect failed".to_string());
            }
            flush_icache(ptr, code.len());

            Ok(CodeRegion { base: ptr, size: code.len() })
        }
    }
}

/// Make freshly written code visible to instruction fetch
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
unsafe fn flush_icache(_start: *mut libc::c_void, _len: usize) {}

#[cfg(all(target_vendor = "apple", not(any(target_arch = "x86", target_arch = "x86_64"))))]
unsafe fn flush_icache(start: *mut libc::c_void, len: usize) {
    extern "C" {
        fn sys_icache_invalidate(start: *mut libc::c_void, len: usize);
    }
    sys_icache_invalidate(start, len);
}

#[cfg(not(any(target_vendor = "apple", target_arch = "x86", target_arch = "x86_64")))]
unsafe fn flush_icache(start: *mut libc::c_void, len: usize) {
    extern "C" {
        fn __clear_cache(start: *mut libc::c_char, end: *mut libc::c_char);
    }
    let start = start as *mut libc::c_char;
    __clear_cache(start, start.add(len));
}

impl Drop for CodeRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base, self.size);
        }
    }
}

struct Allocation {
    words: Box<[u64]>,
    size: usize,
}

struct EmulatedDevice {
    target: DeviceTarget,
    memory: Mutex<FxHashMap<u64, Allocation>>,
    kernels: Mutex<FxHashMap<u64, (String, CodeRegion)>>,
}

/// A set of devices backed by host memory and the host CPU
pub struct HostEmulatedDevices {
    devices: Vec<EmulatedDevice>,
    next_kernel: AtomicU64,
}

impl HostEmulatedDevices {
    /// `count` devices, all executing the host instruction set
    pub fn new(count: usize) -> Self {
        Self::with_targets((0..count).map(|i| DeviceTarget::host(format!("emu{}", i))).collect())
    }

    pub fn with_targets(targets: Vec<DeviceTarget>) -> Self {
        let devices = targets
            .into_iter()
            .map(|target| EmulatedDevice {
                target,
                memory: Mutex::new(FxHashMap::default()),
                kernels: Mutex::new(FxHashMap::default()),
            })
            .collect();
        HostEmulatedDevices { devices, next_kernel: AtomicU64::new(1) }
    }

    /// Number of kernels currently loaded on `device`
    pub fn loaded_kernels(&self, device: usize) -> usize {
        self.devices.get(device).map_or(0, |d| d.kernels.lock().len())
    }

    /// Number of live allocations on `device`
    pub fn live_allocations(&self, device: usize) -> usize {
        self.devices.get(device).map_or(0, |d| d.memory.lock().len())
    }

    fn device(&self, device: usize) -> Result<&EmulatedDevice, DeviceError> {
        self.devices.get(device).ok_or(DeviceError::NoSuchDevice(device))
    }
}

/// Whether code built for `triple` can be called from this process
fn runs_on_host(triple: &Triple) -> bool {
    let host = Triple::host();
    triple.architecture == host.architecture
        && triple.default_calling_convention() == host.default_calling_convention()
}

impl DeviceRuntime for HostEmulatedDevices {
    fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn device_target(&self, device: usize) -> Result<DeviceTarget, DeviceError> {
        Ok(self.device(device)?.target.clone())
    }

    fn load_kernel(&self, device: usize, image: &KernelImage) -> Result<KernelHandle, DeviceError> {
        let dev = self.device(device)?;
        if !runs_on_host(&dev.target.triple) {
            return Err(DeviceError::Unsupported(format!(
                "device {} ({}): cannot execute {} code on a {} host",
                device,
                dev.target.name,
                dev.target.triple,
                Triple::host()
            )));
        }
        let region = CodeRegion::map(&image.code).map_err(|reason| DeviceError::Load {
            device,
            symbol: image.symbol.clone(),
            reason,
        })?;
        let handle = self.next_kernel.fetch_add(1, Ordering::Relaxed);
        dev.kernels.lock().insert(handle, (image.symbol.clone(), region));
        tracing::debug!(device, symbol = %image.symbol, bytes = image.code.len(), "Loaded kernel");
        Ok(KernelHandle(handle))
    }

    fn unload_kernel(&self, device: usize, kernel: KernelHandle) -> Result<(), DeviceError> {
        let dev = self.device(device)?;
        match dev.kernels.lock().remove(&kernel.0) {
            Some((symbol, _region)) => {
                tracing::debug!(device, %symbol, "Unloaded kernel");
                Ok(())
            }
            None => Err(DeviceError::UnknownKernel { device, handle: kernel.0 }),
        }
    }

    fn allocate(&self, device: usize, size: usize) -> Result<DevicePtr, DeviceError> {
        let dev = self.device(device)?;
        let words = size.div_ceil(8).max(1);
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(words)
            .map_err(|_| DeviceError::OutOfMemory { device, size })?;
        buffer.resize(words, 0u64);
        let words = buffer.into_boxed_slice();
        let addr = words.as_ptr() as u64;
        dev.memory.lock().insert(addr, Allocation { words, size });
        Ok(DevicePtr(addr))
    }

    fn free(&self, device: usize, ptr: DevicePtr) -> Result<(), DeviceError> {
        let dev = self.device(device)?;
        dev.memory
            .lock()
            .remove(&ptr.0)
            .map(|_| ())
            .ok_or(DeviceError::InvalidPointer { device, ptr: ptr.0 })
    }

    fn copy_host_to_device(&self, device: usize, dst: DevicePtr, src: &[u8]) -> Result<(), DeviceError> {
        let dev = self.device(device)?;
        let mut memory = dev.memory.lock();
        let alloc = memory
            .get_mut(&dst.0)
            .ok_or(DeviceError::InvalidPointer { device, ptr: dst.0 })?;
        if src.len() > alloc.size {
            return Err(DeviceError::OutOfBounds { device, len: src.len(), size: alloc.size });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), alloc.words.as_mut_ptr() as *mut u8, src.len());
        }
        Ok(())
    }

    fn copy_device_to_host(&self, device: usize, dst: &mut [u8], src: DevicePtr) -> Result<(), DeviceError> {
        let dev = self.device(device)?;
        let memory = dev.memory.lock();
        let alloc = memory
            .get(&src.0)
            .ok_or(DeviceError::InvalidPointer { device, ptr: src.0 })?;
        if dst.len() > alloc.size {
            return Err(DeviceError::OutOfBounds { device, len: dst.len(), size: alloc.size });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(alloc.words.as_ptr() as *const u8, dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    fn launch(&self, device: usize, kernel: KernelHandle, slots: DevicePtr) -> Result<(), DeviceError> {
        let dev = self.device(device)?;
        let kernels = dev.kernels.lock();
        let (_, region) = kernels
            .get(&kernel.0)
            .ok_or(DeviceError::UnknownKernel { device, handle: kernel.0 })?;
        // Held for the duration of the launch so that no slot is freed under the kernel
        let memory = dev.memory.lock();
        if !memory.contains_key(&slots.0) {
            return Err(DeviceError::InvalidPointer { device, ptr: slots.0 });
        }

        let entry: extern "C" fn(*const u64) = unsafe { std::mem::transmute(region.base) };
        entry(slots.0 as *const u64);
        drop(memory);
        Ok(())
    }
}
