//! Scalarjit engine
//!
//! Compiles typed scalar expression trees into native code:
//!
//! - `expr`: the expression tree handed over by query analysis
//! - `lower`: expression → IR lowering and runtime helper linking
//! - `runtime`: the precompiled numeric support module
//! - `backend`: Cranelift code generation for the host and for accelerators
//! - `device`: the accelerator device runtime collaborator
//! - `generator`: the `ScalarCodeGenerator` facade tying it together

pub mod backend;
pub mod device;
pub mod error;
pub mod expr;
pub mod generator;
pub mod lower;
pub mod options;
pub mod runtime;
pub mod verify;

pub use backend::{EntrySignature, Evaluation, NativeCode, NativeEntryPoint};
pub use device::{DeviceError, DevicePtr, DeviceRuntime, DeviceTarget, KernelHandle};
pub use error::CodegenError;
pub use expr::{
    ArithmeticKind, ColumnKey, ComparisonKind, Datum, Expr, LogicalKind, SqlType, TypeInfo,
    UnaryKind,
};
pub use generator::{CodegenConfig, ScalarCodeGenerator};
pub use lower::CompiledExpression;
pub use options::{CompilationOptions, DeviceType, OptLevel};
pub use runtime::{RuntimeLoadError, RuntimeModule};
pub use scalarjit_ir::DomainError;
