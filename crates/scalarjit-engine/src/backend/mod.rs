//! Native code generation backends
//!
//! Both backends lower the same verified IR through Cranelift:
//!
//! - [`host`]: an in-process `JITModule` holding the entry function
//! - [`accelerator`]: one position-independent kernel per device, handed to
//!   the device runtime
//!
//! The result is a [`NativeCode`] session that owns everything generated and
//! hands out borrowed [`NativeEntryPoint`]s.

pub mod accelerator;
pub mod host;
pub mod isa;
pub mod lowering;

use std::marker::PhantomData;

use scalarjit_ir::DomainError;

use crate::device::{run_scalar_kernel, KernelHandle};
use crate::error::CodegenError;
use crate::expr::{Datum, Slot, TypeInfo};
use crate::lower::CompiledExpression;
use crate::options::DeviceType;

use self::accelerator::AcceleratorSession;
use self::host::HostSession;

/// Argument and result types of a generated entry point
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySignature {
    /// Input slots: columns, then hoisted literals
    pub arguments: Vec<TypeInfo>,
    pub result: TypeInfo,
}

impl EntrySignature {
    pub fn of(compiled: &CompiledExpression) -> Self {
        EntrySignature { arguments: compiled.argument_types(), result: compiled.result_type() }
    }

    /// Encode call arguments into input slots, checking arity and types
    pub fn encode_inputs(&self, inputs: &[Datum]) -> Result<Vec<Slot>, CodegenError> {
        if inputs.len() != self.arguments.len() {
            return Err(CodegenError::Invocation(format!(
                "expected {} arguments, got {}",
                self.arguments.len(),
                inputs.len()
            )));
        }
        inputs
            .iter()
            .zip(&self.arguments)
            .enumerate()
            .map(|(i, (value, ty))| {
                value
                    .to_slot(*ty)
                    .map_err(|msg| CodegenError::Invocation(format!("argument {}: {}", i, msg)))
            })
            .collect()
    }

    /// Interpret the error code and result slot written by an entry point
    pub fn decode(&self, error_code: i32, result: Slot) -> Evaluation {
        let value = if error_code == 0 { Datum::from_slot(self.result, result) } else { Datum::Null };
        Evaluation { error_code, value }
    }
}

/// Outcome of one evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// 0 on success, otherwise a [`DomainError`] code
    pub error_code: i32,
    /// The result; `Datum::Null` whenever `error_code` is nonzero
    pub value: Datum,
}

impl Evaluation {
    pub fn is_ok(&self) -> bool {
        self.error_code == 0
    }

    pub fn domain_error(&self) -> Option<DomainError> {
        DomainError::from_code(self.error_code)
    }
}

/// What an entry point refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTarget {
    /// Address of a host function with the direct ABI
    Host { function: *const u8 },
    /// A kernel loaded on one device
    Device { device: usize, kernel: KernelHandle },
}

/// A launchable entry point, valid while its [`NativeCode`] lives
#[derive(Debug, Clone, Copy)]
pub struct NativeEntryPoint<'a> {
    target: EntryTarget,
    _session: PhantomData<&'a NativeCode>,
}

impl NativeEntryPoint<'_> {
    pub fn target(&self) -> EntryTarget {
        self.target
    }

    /// Host function address
    ///
    /// The function has the signature
    /// `extern "C" fn(*mut i32, *mut R, A0, A1, ...)` for result type `R`
    /// and argument types `Ai` of the compiled expression.
    pub fn host_function(&self) -> Option<*const u8> {
        match self.target {
            EntryTarget::Host { function } => Some(function),
            EntryTarget::Device { .. } => None,
        }
    }

    pub fn device_kernel(&self) -> Option<(usize, KernelHandle)> {
        match self.target {
            EntryTarget::Device { device, kernel } => Some((device, kernel)),
            EntryTarget::Host { .. } => None,
        }
    }
}

enum Session {
    Host(HostSession),
    Accelerator(AcceleratorSession),
}

/// Generated native code and the backend resources holding it
///
/// Dropping it frees the JIT memory or unloads the device kernels.
pub struct NativeCode {
    session: Session,
    signature: EntrySignature,
}

impl std::fmt::Debug for NativeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeCode")
            .field("device_type", &self.device_type())
            .field("entry_points", &self.entry_points().len())
            .field("signature", &self.signature)
            .finish()
    }
}

impl NativeCode {
    pub(crate) fn host(session: HostSession, signature: EntrySignature) -> Self {
        NativeCode { session: Session::Host(session), signature }
    }

    pub(crate) fn accelerator(session: AcceleratorSession, signature: EntrySignature) -> Self {
        NativeCode { session: Session::Accelerator(session), signature }
    }

    pub fn device_type(&self) -> DeviceType {
        match self.session {
            Session::Host(_) => DeviceType::Host,
            Session::Accelerator(_) => DeviceType::Accelerator,
        }
    }

    pub fn signature(&self) -> &EntrySignature {
        &self.signature
    }

    /// Entry points: one for the host, one per device in enumeration order
    pub fn entry_points(&self) -> Vec<NativeEntryPoint<'_>> {
        let targets: Vec<EntryTarget> = match &self.session {
            Session::Host(host) => vec![EntryTarget::Host { function: host.entry() }],
            Session::Accelerator(acc) => acc
                .kernels()
                .iter()
                .map(|&(device, kernel)| EntryTarget::Device { device, kernel })
                .collect(),
        };
        targets
            .into_iter()
            .map(|target| NativeEntryPoint { target, _session: PhantomData })
            .collect()
    }

    /// Evaluate host code with the given arguments (columns, then hoisted literals)
    pub fn invoke(&self, inputs: &[Datum]) -> Result<Evaluation, CodegenError> {
        match &self.session {
            Session::Host(host) => {
                let slots = self.signature.encode_inputs(inputs)?;
                let (error_code, result) = host.call_packed(&slots);
                Ok(self.signature.decode(error_code, result))
            }
            Session::Accelerator(_) => Err(CodegenError::Invocation(
                "accelerator code runs on a device; use invoke_on_device".to_string(),
            )),
        }
    }

    /// Evaluate the kernel loaded on `device`
    pub fn invoke_on_device(&self, device: usize, inputs: &[Datum]) -> Result<Evaluation, CodegenError> {
        let Session::Accelerator(acc) = &self.session else {
            return Err(CodegenError::Invocation("host code has no device kernels".to_string()));
        };
        let kernel = acc
            .kernels()
            .iter()
            .find(|(d, _)| *d == device)
            .map(|&(_, kernel)| kernel)
            .ok_or_else(|| CodegenError::Invocation(format!("no kernel loaded on device {}", device)))?;
        run_scalar_kernel(acc.devices().as_ref(), device, kernel, &self.signature, inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::SqlType;

    fn signature() -> EntrySignature {
        EntrySignature {
            arguments: vec![TypeInfo::not_null(SqlType::Int), TypeInfo::nullable(SqlType::Double)],
            result: TypeInfo::nullable(SqlType::Double),
        }
    }

    #[test]
    fn test_encode_checks_arity_and_types() {
        let sig = signature();
        assert!(matches!(sig.encode_inputs(&[Datum::Int(1)]), Err(CodegenError::Invocation(_))));
        assert!(matches!(
            sig.encode_inputs(&[Datum::BigInt(1), Datum::Double(1.0)]),
            Err(CodegenError::Invocation(_))
        ));
        assert_eq!(sig.encode_inputs(&[Datum::Int(1), Datum::Null]).unwrap().len(), 2);
    }

    #[test]
    fn test_decode() {
        let sig = signature();
        let ok = sig.decode(0, 2.5f64.to_ne_bytes());
        assert!(ok.is_ok());
        assert_eq!(ok.value, Datum::Double(2.5));

        let failed = sig.decode(2, 2.5f64.to_ne_bytes());
        assert_eq!(failed.domain_error(), Some(DomainError::Overflow));
        assert_eq!(failed.value, Datum::Null);

        let null = sig.decode(0, f64::MIN_POSITIVE.to_ne_bytes());
        assert_eq!(null.value, Datum::Null);
    }
}
