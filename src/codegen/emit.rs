//! Per-function assembly emission (spec.md 4.6 step 5).
//!
//! Every allocated value is either a physical register or a stack
//! slot; every instruction is expanded to a small, fixed pattern that
//! routes its operands through the `%r10`/`%r11` scratch pair rather
//! than reasoning about which reg/mem combinations each `x86-64`
//! opcode accepts directly. This costs a handful of redundant moves
//! per instruction but keeps the expansion rules uniform and free of
//! encoding edge cases; spec.md 1 excludes "optimization beyond dead-
//! store elimination implicit in liveness-driven allocation" in any
//! case.

use crate::codegen::abi::{ARG_REGS, PhysReg, RETURN_REG, SCRATCH1, SCRATCH2};
use crate::codegen::regalloc::{Allocation, Location};
use crate::il::{Callee, Cmp, IBinOp, Inst, IlFunction, LocalSlot, Val, Width};
use std::collections::HashMap;
use std::fmt::Write;

fn align_up(n: i64, align: i64) -> i64 {
    ((n + align - 1) / align) * align
}

/// Stack offsets (negative, relative to `%rbp`) for every local slot,
/// and the total frame size rounded so that `%rsp` is 16-byte aligned
/// immediately before any `call` once the fixed callee-saved pushes in
/// the prologue are accounted for.
struct Frame {
    offsets: HashMap<u32, i64>,
    size: i64,
}

fn layout_frame(locals: &[LocalSlot]) -> Frame {
    let mut cursor = 0i64;
    let mut offsets = HashMap::new();
    for local in locals {
        cursor += local.size.max(1);
        cursor = align_up(cursor, local.align.max(1));
        offsets.insert(local.id, -cursor);
    }
    // After `push %rbp` plus the five callee-saved pushes, %rsp sits at
    // rbp - 40. Rounding (cursor + 8) up to 16 and subtracting 8 keeps
    // the post-prologue %rsp a multiple of 16.
    let size = align_up(cursor + 8, 16) - 8;
    Frame { offsets, size }
}

fn width_suffix(w: Width) -> &'static str {
    match w {
        Width::W1 => "b",
        Width::W2 => "w",
        Width::W4 => "l",
        Width::W8 => "q",
    }
}

struct Emitter<'a> {
    out: String,
    locations: &'a HashMap<Val, Location>,
    frame: &'a Frame,
}

impl<'a> Emitter<'a> {
    fn mem(&self, local: Val) -> String {
        match local {
            Val::Local(id) => format!("{}(%rbp)", self.frame.offsets[&id]),
            other => unreachable!("not a local: {other:?}"),
        }
    }

    /// An operand suitable for most instructions: a register, a stack
    /// slot, or an immediate (materialized through a scratch register
    /// first if it doesn't fit a 32-bit sign-extended immediate field,
    /// spec.md 9 "immediate-64 handling").
    fn operand(&mut self, val: Val, width: Width, scratch: &str) -> String {
        match val {
            Val::Imm(n) => {
                if n >= i32::MIN as i64 && n <= i32::MAX as i64 {
                    format!("${}", n)
                } else {
                    writeln!(self.out, "    movabs ${}, {}", n, scratch).unwrap();
                    scratch.to_string()
                }
            }
            Val::Temp(_) => {
                let Location(r) = self.locations[&val];
                r.operand(width)
            }
            Val::Local(id) => format!("{}(%rbp)", self.frame.offsets[&id]),
        }
    }

    /// Load `val` into the named scratch register at `width`, returning
    /// the scratch operand string.
    fn load_into(&mut self, val: Val, width: Width, scratch: &str) -> String {
        let src = self.operand(val, width, scratch);
        if src != scratch {
            writeln!(self.out, "    mov{} {}, {}", width_suffix(width), src, scratch).unwrap();
        }
        scratch.to_string()
    }

    fn store_from(&mut self, scratch: &str, dst: Val, width: Width) {
        let dst_operand = self.operand(dst, width, scratch);
        if dst_operand != scratch {
            writeln!(self.out, "    mov{} {}, {}", width_suffix(width), scratch, dst_operand).unwrap();
        }
    }

    fn emit_label(&mut self, l: u32) {
        writeln!(self.out, ".L{}:", l).unwrap();
    }

    fn jcc(&self, cmp: Cmp) -> &'static str {
        match cmp {
            Cmp::Eq => "je",
            Cmp::Ne => "jne",
            Cmp::SLt => "jl",
            Cmp::SLe => "jle",
            Cmp::SGt => "jg",
            Cmp::SGe => "jge",
            Cmp::ULt => "jb",
            Cmp::ULe => "jbe",
            Cmp::UGt => "ja",
            Cmp::UGe => "jae",
        }
    }

    fn setcc(&self, cmp: Cmp) -> &'static str {
        match cmp {
            Cmp::Eq => "sete",
            Cmp::Ne => "setne",
            Cmp::SLt => "setl",
            Cmp::SLe => "setle",
            Cmp::SGt => "setg",
            Cmp::SGe => "setge",
            Cmp::ULt => "setb",
            Cmp::ULe => "setbe",
            Cmp::UGt => "seta",
            Cmp::UGe => "setae",
        }
    }

    fn movx_mnemonic(signed: bool, from: Width, to: Width) -> Option<&'static str> {
        use Width::*;
        Some(match (signed, from, to) {
            (true, W1, W2) => "movsbw",
            (true, W1, W4) => "movsbl",
            (true, W1, W8) => "movsbq",
            (true, W2, W4) => "movswl",
            (true, W2, W8) => "movswq",
            (true, W4, W8) => "movslq",
            (false, W1, W2) => "movzbw",
            (false, W1, W4) => "movzbl",
            (false, W1, W8) => "movzbq",
            (false, W2, W4) => "movzwl",
            (false, W2, W8) => "movzwq",
            (false, W4, W8) => return None, // plain 32-bit mov zero-extends
            _ => return None,
        })
    }

    fn emit_inst(&mut self, inst: &Inst) {
        match *inst {
            Inst::Set { dst, src } => {
                let w = Width::W8;
                let v = self.load_into(src, w, SCRATCH1);
                self.store_from(&v, dst, w);
            }
            Inst::Load { dst, local, width } => {
                let mem = self.mem(local);
                writeln!(self.out, "    mov{} {}, {}", width_suffix(width), mem, SCRATCH1).unwrap();
                self.store_from(SCRATCH1, dst, width);
            }
            Inst::Store { local, src, width } => {
                let v = self.load_into(src, width, SCRATCH1);
                let mem = self.mem(local);
                writeln!(self.out, "    mov{} {}, {}", width_suffix(width), v, mem).unwrap();
            }
            Inst::LoadMem { dst, addr, width } => {
                let a = self.load_into(addr, Width::W8, SCRATCH1);
                writeln!(self.out, "    mov{} ({}), {}", width_suffix(width), a, SCRATCH2).unwrap();
                self.store_from(SCRATCH2, dst, width);
            }
            Inst::StoreMem { addr, src, width } => {
                let a = self.load_into(addr, Width::W8, SCRATCH1);
                let v = self.load_into(src, width, SCRATCH2);
                writeln!(self.out, "    mov{} {}, ({})", width_suffix(width), v, a).unwrap();
            }
            Inst::AddrOfLocal { dst, local } => {
                let mem = self.mem(local);
                writeln!(self.out, "    leaq {}, {}", mem, SCRATCH1).unwrap();
                self.store_from(SCRATCH1, dst, Width::W8);
            }
            Inst::AddrOfSymbol { dst, ref symbol } => {
                writeln!(self.out, "    leaq {}(%rip), {}", symbol, SCRATCH1).unwrap();
                self.store_from(SCRATCH1, dst, Width::W8);
            }
            Inst::AddrOfStringLit { dst, index } => {
                writeln!(self.out, "    leaq .Lstr{}(%rip), {}", index, SCRATCH1).unwrap();
                self.store_from(SCRATCH1, dst, Width::W8);
            }
            Inst::Binary { dst, op, lhs, rhs, width } => self.emit_binary(dst, op, lhs, rhs, width),
            Inst::Neg { dst, src, width } => {
                let v = self.load_into(src, width, SCRATCH1);
                writeln!(self.out, "    neg{} {}", width_suffix(width), v).unwrap();
                self.store_from(&v, dst, width);
            }
            Inst::BitNot { dst, src, width } => {
                let v = self.load_into(src, width, SCRATCH1);
                writeln!(self.out, "    not{} {}", width_suffix(width), v).unwrap();
                self.store_from(&v, dst, width);
            }
            Inst::Not { dst, src, width } => {
                let v = self.load_into(src, width, SCRATCH1);
                writeln!(self.out, "    cmp{} $0, {}", width_suffix(width), v).unwrap();
                writeln!(self.out, "    sete %r11b").unwrap();
                writeln!(self.out, "    movzbl %r11b, %r11d").unwrap();
                self.store_from("%r11d", dst, Width::W4);
            }
            Inst::Compare { dst, cmp, lhs, rhs, width } => {
                let l = self.load_into(lhs, width, SCRATCH1);
                let r = self.operand(rhs, width, SCRATCH2);
                writeln!(self.out, "    cmp{} {}, {}", width_suffix(width), r, l).unwrap();
                writeln!(self.out, "    {} %r11b", self.setcc(cmp)).unwrap();
                writeln!(self.out, "    movzbl %r11b, %r11d").unwrap();
                self.store_from("%r11d", dst, Width::W4);
            }
            Inst::Trunc { dst, src, width } => {
                let v = self.load_into(src, width, SCRATCH1);
                self.store_from(&v, dst, width);
            }
            Inst::SExt { dst, src, from, to } | Inst::ZExt { dst, src, from, to } => {
                let signed = matches!(inst, Inst::SExt { .. });
                let src_op = self.operand(src, from, SCRATCH1);
                match Self::movx_mnemonic(signed, from, to) {
                    Some(mnemonic) => {
                        writeln!(self.out, "    {} {}, {}", mnemonic, src_op, SCRATCH1).unwrap();
                    }
                    None => {
                        // 32 -> 64 zero extension: a plain 32-bit mov
                        // into the destination register clears the
                        // upper 32 bits as a side effect of long mode.
                        if src_op != SCRATCH1 {
                            writeln!(self.out, "    movl {}, %r10d", src_op).unwrap();
                        }
                    }
                }
                self.store_from(SCRATCH1, dst, to);
            }
            Inst::Label(l) => self.emit_label(l),
            Inst::Jump(l) => {
                writeln!(self.out, "    jmp .L{}", l).unwrap();
            }
            Inst::JumpIfZero { cond, target, width } => {
                let v = self.load_into(cond, width, SCRATCH1);
                writeln!(self.out, "    cmp{} $0, {}", width_suffix(width), v).unwrap();
                writeln!(self.out, "    je .L{}", target).unwrap();
            }
            Inst::JumpIfNonZero { cond, target, width } => {
                let v = self.load_into(cond, width, SCRATCH1);
                writeln!(self.out, "    cmp{} $0, {}", width_suffix(width), v).unwrap();
                writeln!(self.out, "    jne .L{}", target).unwrap();
            }
            Inst::Call { dst, ref callee, ref args, ret_width } => self.emit_call(dst, callee, args, ret_width),
            Inst::Return { value } => self.emit_return(value),
        }
    }

    fn emit_binary(&mut self, dst: Val, op: IBinOp, lhs: Val, rhs: Val, width: Width) {
        match op {
            IBinOp::SDiv | IBinOp::UDiv | IBinOp::SMod | IBinOp::UMod => {
                self.emit_divmod(dst, op, lhs, rhs, width)
            }
            IBinOp::Shl | IBinOp::SShr | IBinOp::UShr => self.emit_shift(dst, op, lhs, rhs, width),
            _ => {
                let mnemonic = match op {
                    IBinOp::Add => "add",
                    IBinOp::Sub => "sub",
                    IBinOp::Mul => "imul",
                    IBinOp::And => "and",
                    IBinOp::Or => "or",
                    IBinOp::Xor => "xor",
                    _ => unreachable!(),
                };
                let l = self.load_into(lhs, width, SCRATCH1);
                let r = self.operand(rhs, width, SCRATCH2);
                writeln!(self.out, "    {}{} {}, {}", mnemonic, width_suffix(width), r, l).unwrap();
                self.store_from(&l, dst, width);
            }
        }
    }

    /// Narrower dividends are promoted to `W4` for the division itself
    /// (sema's usual-arithmetic-conversion already promotes every
    /// divide/modulo operand to at least `int`, so `width` in practice
    /// is always `W4` or `W8`; this is a defensive fallback, not a
    /// path the analyzer exercises).
    fn emit_divmod(&mut self, dst: Val, op: IBinOp, lhs: Val, rhs: Val, width: Width) {
        let signed = matches!(op, IBinOp::SDiv | IBinOp::SMod);
        let wants_remainder = matches!(op, IBinOp::SMod | IBinOp::UMod);
        let w = if matches!(width, Width::W8) { Width::W8 } else { Width::W4 };
        let rax = RETURN_REG.operand(w);
        let divisor = self.load_into(rhs, w, SCRATCH1);
        let l = self.operand(lhs, w, SCRATCH2);
        writeln!(self.out, "    mov{} {}, {}", width_suffix(w), l, rax).unwrap();
        match (signed, w) {
            (true, Width::W8) => writeln!(self.out, "    cqo").unwrap(),
            (true, _) => writeln!(self.out, "    cdq").unwrap(),
            (false, _) => writeln!(self.out, "    xor %edx, %edx").unwrap(),
        }
        let mnemonic = if signed { "idiv" } else { "div" };
        writeln!(self.out, "    {}{} {}", mnemonic, width_suffix(w), divisor).unwrap();
        let result = match (w, wants_remainder) {
            (Width::W8, false) => "%rax",
            (Width::W8, true) => "%rdx",
            (Width::W4, false) => "%eax",
            (Width::W4, true) => "%edx",
            _ => unreachable!(),
        };
        self.store_from(result, dst, w);
    }

    fn emit_shift(&mut self, dst: Val, op: IBinOp, lhs: Val, rhs: Val, width: Width) {
        let mnemonic = match op {
            IBinOp::Shl => "shl",
            IBinOp::SShr => "sar",
            IBinOp::UShr => "shr",
            _ => unreachable!(),
        };
        let l = self.load_into(lhs, width, SCRATCH1);
        match rhs {
            Val::Imm(n) => {
                writeln!(self.out, "    {}{} ${}, {}", mnemonic, width_suffix(width), n, l).unwrap();
            }
            _ => {
                let count = self.operand(rhs, Width::W1, "%cl");
                if count != "%cl" {
                    writeln!(self.out, "    movb {}, %cl", count).unwrap();
                }
                writeln!(self.out, "    {}{} %cl, {}", mnemonic, width_suffix(width), l).unwrap();
            }
        }
        self.store_from(&l, dst, width);
    }

    fn emit_call(&mut self, dst: Option<Val>, callee: &Callee, args: &[(Val, Width)], ret_width: Option<Width>) {
        for (i, &(val, width)) in args.iter().enumerate().take(6) {
            let reg = ARG_REGS[i].operand(width);
            let v = self.operand(val, width, SCRATCH1);
            if v != reg {
                writeln!(self.out, "    mov{} {}, {}", width_suffix(width), v, reg).unwrap();
            }
        }
        for (i, &(val, width)) in args.iter().enumerate().skip(6).rev() {
            let v = self.load_into(val, width, SCRATCH1);
            writeln!(self.out, "    push{} {}", width_suffix(Width::W8), SCRATCH1).unwrap();
            let _ = i;
            let _ = v;
        }
        writeln!(self.out, "    xor %eax, %eax").unwrap();
        match callee {
            Callee::Direct(name) => {
                writeln!(self.out, "    call {}", name).unwrap();
            }
            Callee::Indirect(v) => {
                let target = self.load_into(*v, Width::W8, SCRATCH2);
                writeln!(self.out, "    call *{}", target).unwrap();
            }
        }
        let stack_args = args.len().saturating_sub(6);
        if stack_args > 0 {
            writeln!(self.out, "    add ${}, %rsp", stack_args * 8).unwrap();
        }
        if let (Some(d), Some(w)) = (dst, ret_width) {
            let ret = RETURN_REG.operand(w);
            self.store_from(&ret, d, w);
        }
    }

    fn emit_return(&mut self, value: Option<(Val, Width)>) {
        if let Some((v, w)) = value {
            let ret = RETURN_REG.operand(w);
            let src = self.operand(v, w, SCRATCH1);
            if src != ret {
                writeln!(self.out, "    mov{} {}, {}", width_suffix(w), src, ret).unwrap();
            }
        }
        writeln!(self.out, "    jmp .Lepilogue").unwrap();
    }
}

/// Emit one function: prologue (frame + callee-saved + incoming
/// parameter homes), the instruction stream, and the shared epilogue.
pub fn emit_function(func: &IlFunction, body: &[Inst], locals: &[LocalSlot], alloc: &Allocation) -> String {
    let frame = layout_frame(locals);
    let mut out = String::new();

    if func.is_external_linkage {
        writeln!(out, ".globl {}", func.name).unwrap();
    }
    writeln!(out, "{}:", func.name).unwrap();
    writeln!(out, "    push %rbp").unwrap();
    writeln!(out, "    movq %rsp, %rbp").unwrap();
    for reg in crate::codegen::abi::CALLEE_SAVED {
        writeln!(out, "    push {}", reg.operand(Width::W8)).unwrap();
    }
    if frame.size > 0 {
        writeln!(out, "    sub ${}, %rsp", frame.size).unwrap();
    }

    for (i, &param) in func.params.iter().enumerate() {
        let width = func.param_widths[i];
        let Val::Local(id) = param else { continue };
        let mem = format!("{}(%rbp)", frame.offsets[&id]);
        if i < 6 {
            let reg = ARG_REGS[i].operand(width);
            writeln!(out, "    mov{} {}, {}", width_suffix(width), reg, mem).unwrap();
        } else {
            let incoming = format!("{}(%rbp)", 16 + (i - 6) * 8);
            writeln!(out, "    mov{} {}, {}", width_suffix(width), incoming, SCRATCH1).unwrap();
            writeln!(out, "    mov{} {}, {}", width_suffix(width), SCRATCH1, mem).unwrap();
        }
    }

    let mut emitter = Emitter {
        out: String::new(),
        locations: &alloc.locations,
        frame: &frame,
    };
    for inst in body {
        emitter.emit_inst(inst);
    }
    out.push_str(&emitter.out);

    writeln!(out, ".Lepilogue:").unwrap();
    if frame.size > 0 {
        writeln!(out, "    add ${}, %rsp", frame.size).unwrap();
    }
    for reg in crate::codegen::abi::CALLEE_SAVED.iter().rev() {
        let _: PhysReg = *reg;
        writeln!(out, "    pop {}", reg.operand(Width::W8)).unwrap();
    }
    writeln!(out, "    pop %rbp").unwrap();
    writeln!(out, "    ret").unwrap();
    out
}
