//! x86-64 code generation.
//!
//! Consumes the IL `sema.rs` produces and emits GAS-syntax assembly
//! for Linux (spec.md 4.6): per function, liveness (`liveness.rs`) and
//! graph-coloring register allocation with spilling (`regalloc.rs`)
//! run first, then `emit.rs` walks the (possibly spill-rewritten)
//! instruction stream once to produce text. Globals and the string
//! pool are laid out directly here since they need no allocation.

mod abi;
mod emit;
mod error;
mod liveness;
mod regalloc;

pub use error::CodeGenError;

use crate::il::{GlobalInit, IlModule};
use std::fmt::Write;

/// Generate a complete `.s` file for a translation unit: `.rodata`
/// (string pool), `.data`/`.bss` (globals), and `.text` (every
/// function), in that order so the data sections never forward-
/// reference a symbol the assembler hasn't seen yet.
pub fn generate(module: &IlModule) -> Result<String, CodeGenError> {
    let mut out = String::new();

    if !module.string_pool.is_empty() {
        writeln!(out, "    .section .rodata")?;
        for (i, bytes) in module.string_pool.iter().enumerate() {
            writeln!(out, ".Lstr{}:", i)?;
            emit_bytes(&mut out, bytes)?;
        }
    }

    let (zeroed, initialized): (Vec<_>, Vec<_>) = module
        .globals
        .iter()
        .partition(|g| matches!(g.init, GlobalInit::Zeroed));

    if !initialized.is_empty() {
        writeln!(out, "    .data")?;
        for g in &initialized {
            if g.is_external_linkage {
                writeln!(out, ".globl {}", g.label)?;
            }
            writeln!(out, "    .align {}", g.align)?;
            writeln!(out, "{}:", g.label)?;
            match &g.init {
                GlobalInit::Int(n) => emit_scalar(&mut out, *n, g.size)?,
                GlobalInit::Bytes(bytes) => {
                    emit_bytes(&mut out, bytes)?;
                    if (bytes.len() as i64) < g.size {
                        writeln!(out, "    .zero {}", g.size - bytes.len() as i64)?;
                    }
                }
                GlobalInit::Zeroed => unreachable!("partitioned out"),
            }
        }
    }

    if !zeroed.is_empty() {
        writeln!(out, "    .bss")?;
        for g in &zeroed {
            if g.is_external_linkage {
                writeln!(out, ".globl {}", g.label)?;
            }
            writeln!(out, "    .align {}", g.align)?;
            writeln!(out, "{}:", g.label)?;
            writeln!(out, "    .zero {}", g.size.max(1))?;
        }
    }

    writeln!(out, "    .text")?;
    for func in &module.functions {
        let mut body = func.body.clone();
        let mut locals = func.locals.clone();
        let mut next_temp = body
            .iter()
            .filter_map(|i| liveness::def_use(i).0)
            .filter_map(|v| match v {
                crate::il::Val::Temp(n) => Some(n + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        let alloc = regalloc::allocate(&mut body, &mut locals, &mut next_temp);
        out.push_str(&emit::emit_function(func, &body, &locals, &alloc));
    }

    Ok(out)
}

fn emit_bytes(out: &mut String, bytes: &[u8]) -> std::fmt::Result {
    if bytes.is_empty() {
        return Ok(());
    }
    let list = bytes
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    writeln!(out, "    .byte {}", list)
}

fn emit_scalar(out: &mut String, value: i64, size: i64) -> std::fmt::Result {
    match size {
        1 => writeln!(out, "    .byte {}", value as i8),
        2 => writeln!(out, "    .word {}", value as i16),
        4 => writeln!(out, "    .long {}", value as i32),
        _ => writeln!(out, "    .quad {}", value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::{Callee, IBinOp, IlBuilder, IlFunction, Inst, Val, Width};

    fn wrap(name: &str, builder: IlBuilder, params: Vec<Val>, param_widths: Vec<Width>) -> IlModule {
        IlModule {
            functions: vec![IlFunction {
                name: name.to_string(),
                params,
                param_widths,
                locals: builder.locals,
                body: builder.insts,
                is_external_linkage: true,
            }],
            globals: vec![],
            string_pool: vec![],
        }
    }

    #[test]
    fn a_constant_returning_function_emits_a_globl_label_and_ret() {
        let mut b = IlBuilder::new();
        let t0 = b.fresh_temp();
        b.push(Inst::Set { dst: t0, src: Val::Imm(0) });
        b.push(Inst::Return { value: Some((t0, Width::W4)) });
        let module = wrap("main", b, vec![], vec![]);

        let asm = generate(&module).unwrap();
        assert!(asm.contains(".globl main"));
        assert!(asm.contains("main:"));
        assert!(asm.contains("ret"));
    }

    #[test]
    fn a_64_bit_immediate_is_materialized_with_movabs() {
        let mut b = IlBuilder::new();
        let t0 = b.fresh_temp();
        b.push(Inst::Set { dst: t0, src: Val::Imm(1_099_511_627_776) });
        b.push(Inst::Return { value: Some((t0, Width::W8)) });
        let module = wrap("big_const", b, vec![], vec![]);

        let asm = generate(&module).unwrap();
        assert!(asm.contains("movabs $1099511627776"));
    }

    #[test]
    fn two_simultaneously_live_temps_get_distinct_registers() {
        let mut b = IlBuilder::new();
        let t0 = b.fresh_temp();
        let t1 = b.fresh_temp();
        let t2 = b.fresh_temp();
        b.push(Inst::Set { dst: t0, src: Val::Imm(2) });
        b.push(Inst::Set { dst: t1, src: Val::Imm(3) });
        b.push(Inst::Binary { dst: t2, op: IBinOp::Add, lhs: t0, rhs: t1, width: Width::W4 });
        b.push(Inst::Return { value: Some((t2, Width::W4)) });
        let module = wrap("add_two", b, vec![], vec![]);

        let asm = generate(&module).unwrap();
        assert!(asm.contains("addl"));
    }

    #[test]
    fn a_call_emits_argument_moves_and_reads_the_return_register() {
        let mut b = IlBuilder::new();
        let t0 = b.fresh_temp();
        b.push(Inst::Set { dst: t0, src: Val::Imm(5) });
        let t1 = b.fresh_temp();
        b.push(Inst::Call {
            dst: Some(t1),
            callee: Callee::Direct("f".to_string()),
            args: vec![(t0, Width::W4)],
            ret_width: Some(Width::W4),
        });
        b.push(Inst::Return { value: Some((t1, Width::W4)) });
        let module = wrap("calls_f", b, vec![], vec![]);

        let asm = generate(&module).unwrap();
        assert!(asm.contains("call f"));
        assert!(asm.contains("%edi"));
    }

    #[test]
    fn division_emits_a_sign_extension_before_idiv() {
        let mut b = IlBuilder::new();
        let t0 = b.fresh_temp();
        let t1 = b.fresh_temp();
        b.push(Inst::Set { dst: t0, src: Val::Imm(10) });
        b.push(Inst::Set { dst: t1, src: Val::Imm(3) });
        let t2 = b.fresh_temp();
        b.push(Inst::Binary { dst: t2, op: IBinOp::SDiv, lhs: t0, rhs: t1, width: Width::W4 });
        b.push(Inst::Return { value: Some((t2, Width::W4)) });
        let module = wrap("divides", b, vec![], vec![]);

        let asm = generate(&module).unwrap();
        assert!(asm.contains("cdq"));
        assert!(asm.contains("idivl"));
    }
}
