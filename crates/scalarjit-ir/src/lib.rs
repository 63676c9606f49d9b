//! Scalar IR
//!
//! Single-block SSA intermediate representation used by the scalarjit
//! expression compiler, together with its verifier, its optimization passes
//! and the numeric runtime support library written in it.

pub mod builder;
pub mod display;
pub mod instr;
pub mod optimize;
pub mod runtime;
pub mod types;
pub mod verify;

pub use builder::IrBuilder;
pub use instr::{BinaryOp, CheckedOp, CmpOp, Instr, IrFunction, Reg, Terminator, UnaryOp};
pub use optimize::{OptPass, Optimizer};
pub use runtime::{build_library, DomainError, RuntimeLibrary};
pub use types::IrType;
pub use verify::{verify_function, VerifierError, VerifierErrors};
