//! Runtime helper linking
//!
//! Inlines every call to a runtime support function into the calling
//! function, so that the result is a closed IR function the verifier and
//! the native backends accept.

use rustc_hash::FxHashMap;
use scalarjit_ir::{Instr, IrFunction, Reg, Terminator};

use crate::error::CodegenError;
use crate::runtime::RuntimeModule;

/// Inline all runtime calls in `func`
///
/// When `annotate` is set, each inlined body is preceded by a note naming
/// the helper. Returns the number of calls inlined.
pub fn link_runtime_calls(
    func: &mut IrFunction,
    runtime: &RuntimeModule,
    annotate: bool,
) -> Result<usize, CodegenError> {
    if !func.has_calls() {
        return Ok(0);
    }

    let instrs = std::mem::take(&mut func.instrs);
    let mut linked = Vec::with_capacity(instrs.len() * 4);
    let mut inlined = 0;

    for instr in instrs {
        let Instr::Call { dests, callee, args } = instr else {
            linked.push(instr);
            continue;
        };
        let helper = runtime
            .get(&callee)
            .ok_or_else(|| CodegenError::unsupported(format!("no runtime support for @{}", callee)))?;
        if annotate {
            linked.push(Instr::Note { text: format!("inline @{}", callee) });
        }
        inline_helper(func, helper, &dests, &args, &mut linked)?;
        inlined += 1;
    }

    func.instrs = linked;
    tracing::trace!(function = %func.name, inlined, "Linked runtime calls");
    Ok(inlined)
}

fn inline_helper(
    caller: &mut IrFunction,
    helper: &IrFunction,
    dests: &[Reg],
    args: &[Reg],
    out: &mut Vec<Instr>,
) -> Result<(), CodegenError> {
    if args.len() != helper.params.len() {
        return Err(CodegenError::unsupported(format!(
            "@{} takes {} arguments, {} given",
            helper.name,
            helper.params.len(),
            args.len()
        )));
    }
    let Terminator::Return(values) = &helper.terminator else {
        return Err(CodegenError::unsupported(format!("@{} has no return", helper.name)));
    };
    if values.len() != dests.len() {
        return Err(CodegenError::unsupported(format!(
            "@{} returns {} values, {} expected",
            helper.name,
            values.len(),
            dests.len()
        )));
    }

    let mut regs: FxHashMap<Reg, Reg> = FxHashMap::default();
    for instr in &helper.instrs {
        match instr {
            // Parameters become the caller's argument registers
            Instr::Param { dest, index, .. } => {
                regs.insert(*dest, args[*index as usize]);
            }
            Instr::Call { callee, .. } => {
                return Err(CodegenError::unsupported(format!(
                    "@{} calls @{}; runtime helpers must be leaf functions",
                    helper.name, callee
                )));
            }
            _ => {
                let mut copy = instr.clone();
                copy.map_defs(|r| {
                    let ty = helper.reg_type(r).unwrap_or(scalarjit_ir::IrType::I64);
                    let fresh = caller.alloc_reg(ty);
                    regs.insert(r, fresh);
                    fresh
                });
                copy.map_uses(|r| regs.get(&r).copied().unwrap_or(r));
                out.push(copy);
            }
        }
    }

    for (dest, value) in dests.iter().zip(values) {
        let src = regs.get(value).copied().unwrap_or(*value);
        out.push(Instr::Move { dest: *dest, src });
    }
    Ok(())
}
