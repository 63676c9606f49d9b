//! Target ISA construction
//!
//! The host ISA is detected at runtime and built without PIC (the JIT module
//! links in place). Device ISAs are looked up from each device's target
//! description and built position-independent, since kernel images are
//! loaded at addresses chosen by the device runtime.

use cranelift_codegen::isa::{self, OwnedTargetIsa};
use cranelift_codegen::settings::{self, Configurable};

use crate::device::DeviceTarget;
use crate::error::CodegenError;
use crate::options::OptLevel;

/// ISA for in-process code on this machine
pub fn host_isa(level: OptLevel) -> Result<OwnedTargetIsa, CodegenError> {
    let backend = |msg: String| CodegenError::Backend(msg);

    let mut flag_builder = settings::builder();
    flag_builder
        .set("opt_level", level.cranelift_setting())
        .map_err(|e| backend(format!("Failed to set opt_level: {}", e)))?;
    flag_builder
        .set("is_pic", "false")
        .map_err(|e| backend(format!("Failed to set is_pic: {}", e)))?;
    let flags = settings::Flags::new(flag_builder);

    cranelift_native::builder()
        .map_err(|e| backend(format!("Failed to create native ISA builder: {}", e)))?
        .finish(flags)
        .map_err(|e| backend(format!("Failed to finish ISA: {}", e)))
}

/// ISA for one accelerator device
pub fn device_isa(target: &DeviceTarget, level: OptLevel) -> Result<OwnedTargetIsa, CodegenError> {
    let device = |msg: String| CodegenError::DeviceBackend(format!("{} ({}): {}", target.name, target.triple, msg));

    let mut flag_builder = settings::builder();
    flag_builder
        .set("opt_level", level.cranelift_setting())
        .map_err(|e| device(format!("Failed to set opt_level: {}", e)))?;
    flag_builder
        .set("is_pic", "true")
        .map_err(|e| device(format!("Failed to set is_pic: {}", e)))?;
    for (name, value) in &target.shared_flags {
        flag_builder
            .set(name, value)
            .map_err(|e| device(format!("Failed to set {}={}: {}", name, value, e)))?;
    }

    let mut isa_builder = isa::lookup(target.triple.clone())
        .map_err(|e| device(format!("Target not supported: {}", e)))?;
    for (name, value) in &target.isa_flags {
        isa_builder
            .set(name, value)
            .map_err(|e| device(format!("Failed to set {}={}: {}", name, value, e)))?;
    }

    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| device(format!("Failed to finish ISA: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_isa() {
        let isa = host_isa(OptLevel::Default).unwrap();
        assert!(!isa.flags().is_pic());
        assert_eq!(isa.flags().opt_level(), settings::OptLevel::Speed);
    }

    #[test]
    fn test_device_isa_is_pic() {
        let isa = device_isa(&DeviceTarget::host("dev0"), OptLevel::None).unwrap();
        assert!(isa.flags().is_pic());
        assert_eq!(isa.flags().opt_level(), settings::OptLevel::None);
    }

    #[test]
    fn test_device_isa_rejects_unknown_flag() {
        let target = DeviceTarget::host("dev0").with_isa_flag("no_such_flag", "true");
        let result = device_isa(&target, OptLevel::Default);
        assert!(matches!(result, Err(CodegenError::DeviceBackend(ref msg)) if msg.contains("no_such_flag")));
    }
}
