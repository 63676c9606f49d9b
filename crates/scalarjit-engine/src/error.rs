//! Error types for expression compilation

use crate::device::DeviceError;
use crate::runtime::RuntimeLoadError;

/// Errors raised while compiling or invoking a scalar expression
///
/// IR verification failures are not represented here: they indicate a
/// compiler defect and abort the process (see [`crate::verify`]).
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    /// The expression (or one of its operand types) has no lowering
    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    /// Host native code generation failed
    #[error("Backend error: {0}")]
    Backend(String),

    /// Accelerator compilation, kernel loading or device access failed
    #[error("Device backend failure: {0}")]
    DeviceBackend(String),

    /// A compiled entry point was invoked with arguments not matching its signature
    #[error("Invalid invocation: {0}")]
    Invocation(String),

    /// A runtime support module given by path could not be loaded
    #[error(transparent)]
    RuntimeLoad(#[from] RuntimeLoadError),
}

impl CodegenError {
    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        CodegenError::UnsupportedExpression(message.into())
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, CodegenError::UnsupportedExpression(_))
    }
}

impl From<DeviceError> for CodegenError {
    fn from(err: DeviceError) -> Self {
        CodegenError::DeviceBackend(err.to_string())
    }
}
