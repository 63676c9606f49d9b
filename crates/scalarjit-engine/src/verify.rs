//! Fatal IR verification
//!
//! Generated IR that fails verification is a code generator defect. The
//! process reports the function and aborts instead of returning an error.

use scalarjit_ir::{verify_function, IrFunction};

/// Verify `func`, aborting the process if it is malformed
pub fn verify_or_abort(func: &IrFunction) {
    if let Err(errors) = verify_function(func) {
        tracing::error!(function = %func.name, %errors, "Generated IR failed verification");
        eprintln!("{}", func);
        eprintln!("IR verification failed for @{}:\n{}", func.name, errors);
        std::process::abort();
    }
}
