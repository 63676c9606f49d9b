//! Top-level code generator: owns the runtime module and the device
//! runtime, and drives expressions through lowering and native codegen.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::accelerator::AcceleratorSession;
use crate::backend::host::HostSession;
use crate::backend::{EntrySignature, NativeCode};
use crate::device::DeviceRuntime;
use crate::error::CodegenError;
use crate::expr::Expr;
use crate::lower::{self, CompiledExpression};
use crate::options::{CompilationOptions, DeviceType};
use crate::runtime::RuntimeModule;

/// Configuration for the code generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenConfig {
    /// Compile per-device kernels on scoped threads (default: true)
    pub parallel_device_compilation: bool,
    /// Load the runtime support module from this file instead of the
    /// embedded copy (default: none)
    pub runtime_path: Option<PathBuf>,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        CodegenConfig { parallel_device_compilation: true, runtime_path: None }
    }
}

/// Scalar expression code generator
///
/// Holds only immutable shared state, so one generator can serve
/// concurrent compilations.
pub struct ScalarCodeGenerator {
    runtime: Arc<RuntimeModule>,
    devices: Option<Arc<dyn DeviceRuntime>>,
    config: CodegenConfig,
}

impl ScalarCodeGenerator {
    /// Create a generator using the embedded runtime module and no devices
    pub fn new() -> Self {
        ScalarCodeGenerator { runtime: RuntimeModule::shared(), devices: None, config: CodegenConfig::default() }
    }

    /// Create a generator with custom configuration
    pub fn with_config(config: CodegenConfig) -> Result<Self, CodegenError> {
        let runtime = match &config.runtime_path {
            Some(path) => Arc::new(RuntimeModule::load(path)?),
            None => RuntimeModule::shared(),
        };
        Ok(ScalarCodeGenerator { runtime, devices: None, config })
    }

    /// Attach the device runtime used for accelerator targets
    pub fn with_devices(mut self, devices: Arc<dyn DeviceRuntime>) -> Self {
        self.devices = Some(devices);
        self
    }

    pub fn runtime(&self) -> &RuntimeModule {
        &self.runtime
    }

    pub fn devices(&self) -> Option<&Arc<dyn DeviceRuntime>> {
        self.devices.as_ref()
    }

    pub fn config(&self) -> &CodegenConfig {
        &self.config
    }

    /// Lower `expr` to verified IR
    ///
    /// With `fetch_inputs` unset the caller supplies no input slots, so any
    /// column reference is rejected.
    pub fn compile(
        &self,
        expr: &Expr,
        fetch_inputs: bool,
        options: &CompilationOptions,
    ) -> Result<CompiledExpression, CodegenError> {
        tracing::debug!(root = expr.node_name(), ?options, "Compiling scalar expression");
        lower::compile(&self.runtime, expr, fetch_inputs, options)
    }

    /// Generate native code for `options.device`
    ///
    /// May be called any number of times for the same compiled expression.
    pub fn generate_native_code(
        &self,
        compiled: &CompiledExpression,
        options: &CompilationOptions,
    ) -> Result<NativeCode, CodegenError> {
        let signature = EntrySignature::of(compiled);
        match options.device {
            DeviceType::Host => {
                let session = HostSession::compile(compiled, options)?;
                Ok(NativeCode::host(session, signature))
            }
            DeviceType::Accelerator => {
                let devices = self
                    .devices
                    .as_ref()
                    .ok_or_else(|| CodegenError::DeviceBackend("no device runtime configured".to_string()))?;
                let session = AcceleratorSession::compile(
                    compiled,
                    options,
                    devices,
                    self.config.parallel_device_compilation,
                )
                .inspect_err(|err| tracing::warn!(error = %err, "Accelerator code generation failed"))?;
                Ok(NativeCode::accelerator(session, signature))
            }
        }
    }
}

impl Default for ScalarCodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Datum;

    #[test]
    fn test_generator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ScalarCodeGenerator>();
    }

    #[test]
    fn test_config_defaults() {
        let config: CodegenConfig = serde_json::from_str("{}").unwrap();
        assert!(config.parallel_device_compilation);
        assert!(config.runtime_path.is_none());
    }

    #[test]
    fn test_with_config_loads_runtime_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.json");
        std::fs::write(&path, serde_json::to_vec(&scalarjit_ir::build_library()).unwrap()).unwrap();

        let config = CodegenConfig { runtime_path: Some(path), ..Default::default() };
        let generator = ScalarCodeGenerator::with_config(config).unwrap();
        assert_eq!(generator.runtime().len(), RuntimeModule::shared().len());

        let missing = CodegenConfig { runtime_path: Some(dir.path().join("missing.json")), ..Default::default() };
        assert!(matches!(ScalarCodeGenerator::with_config(missing), Err(CodegenError::RuntimeLoad(_))));
    }

    #[test]
    fn test_accelerator_without_devices() {
        let generator = ScalarCodeGenerator::new();
        let options = CompilationOptions::accelerator();
        let compiled = generator.compile(&Expr::literal(Datum::Int(1)), true, &options).unwrap();
        assert!(matches!(
            generator.generate_native_code(&compiled, &options),
            Err(CodegenError::DeviceBackend(_))
        ));
    }
}
