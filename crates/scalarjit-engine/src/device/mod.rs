//! Accelerator device runtime
//!
//! The code generator only needs a small surface from a device runtime:
//! enumerate devices, describe each device's instruction set, load and
//! unload kernel images, and move scalar slots in and out of device memory.
//! [`DeviceRuntime`] is that surface; [`HostEmulatedDevices`] implements it
//! by treating host memory and the host CPU as devices.

#[cfg(unix)]
mod emulated;
mod launch;

#[cfg(unix)]
pub use emulated::HostEmulatedDevices;
pub use launch::run_scalar_kernel;

use target_lexicon::Triple;

/// An address in a device's memory space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(pub u64);

/// A kernel loaded on one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelHandle(pub u64);

/// Instruction set description of a device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTarget {
    pub name: String,
    pub triple: Triple,
    /// Cranelift shared settings (`settings::builder()`)
    pub shared_flags: Vec<(String, String)>,
    /// ISA-specific settings
    pub isa_flags: Vec<(String, String)>,
}

impl DeviceTarget {
    /// A device executing the host's instruction set
    pub fn host(name: impl Into<String>) -> Self {
        DeviceTarget {
            name: name.into(),
            triple: Triple::host(),
            shared_flags: Vec::new(),
            isa_flags: Vec::new(),
        }
    }

    pub fn with_shared_flag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.shared_flags.push((name.into(), value.into()));
        self
    }

    pub fn with_isa_flag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.isa_flags.push((name.into(), value.into()));
        self
    }

    /// Width of a device pointer in bytes
    pub fn pointer_bytes(&self) -> Result<usize, DeviceError> {
        self.triple
            .pointer_width()
            .map(|w| w.bytes() as usize)
            .map_err(|_| DeviceError::Unsupported(format!("unknown pointer width for {}", self.triple)))
    }
}

/// Position-independent machine code for one device
#[derive(Debug, Clone)]
pub struct KernelImage {
    pub device_index: usize,
    pub symbol: String,
    pub code: Vec<u8>,
}

/// Errors reported by a device runtime
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("No such device: {0}")]
    NoSuchDevice(usize),

    #[error("Device {device}: cannot allocate {size} bytes")]
    OutOfMemory { device: usize, size: usize },

    #[error("Device {device}: invalid device pointer {ptr:#x}")]
    InvalidPointer { device: usize, ptr: u64 },

    #[error("Device {device}: transfer of {len} bytes exceeds allocation of {size} bytes")]
    OutOfBounds { device: usize, len: usize, size: usize },

    #[error("Device {device}: failed to load kernel {symbol}: {reason}")]
    Load { device: usize, symbol: String, reason: String },

    #[error("Device {device}: unknown kernel {handle}")]
    UnknownKernel { device: usize, handle: u64 },

    #[error("{0}")]
    Unsupported(String),
}

/// Services the accelerator backend needs from a device runtime
///
/// Implementations are shared across threads: kernels for different
/// devices are compiled and loaded concurrently.
pub trait DeviceRuntime: Send + Sync {
    fn device_count(&self) -> usize;

    fn device_target(&self, device: usize) -> Result<DeviceTarget, DeviceError>;

    fn load_kernel(&self, device: usize, image: &KernelImage) -> Result<KernelHandle, DeviceError>;

    fn unload_kernel(&self, device: usize, kernel: KernelHandle) -> Result<(), DeviceError>;

    fn allocate(&self, device: usize, size: usize) -> Result<DevicePtr, DeviceError>;

    fn free(&self, device: usize, ptr: DevicePtr) -> Result<(), DeviceError>;

    fn copy_host_to_device(&self, device: usize, dst: DevicePtr, src: &[u8]) -> Result<(), DeviceError>;

    fn copy_device_to_host(&self, device: usize, dst: &mut [u8], src: DevicePtr) -> Result<(), DeviceError>;

    /// Run `kernel` once; `slots` is a device array of slot addresses
    fn launch(&self, device: usize, kernel: KernelHandle, slots: DevicePtr) -> Result<(), DeviceError>;
}
