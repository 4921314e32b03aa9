//! System V AMD64 register set and calling-convention tables.
//!
//! `rsp`/`rbp` are reserved for the frame; `r10`/`r11` are reserved as
//! scratch for immediate materialization and ABI-constrained copies
//! (spec.md 4.6's "splitting live ranges at the constrained use with
//! copies"), so neither appears in [`ALLOCATABLE`].

use crate::il::Width;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysReg {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    R8,
    R9,
    R12,
    R13,
    R14,
    R15,
}

impl PhysReg {
    /// The register name at a given operand width, e.g. `rax`/`eax`/`ax`/`al`.
    pub fn name(self, width: Width) -> &'static str {
        use PhysReg::*;
        use Width::*;
        match (self, width) {
            (Rax, W8) => "rax",
            (Rax, W4) => "eax",
            (Rax, W2) => "ax",
            (Rax, W1) => "al",
            (Rbx, W8) => "rbx",
            (Rbx, W4) => "ebx",
            (Rbx, W2) => "bx",
            (Rbx, W1) => "bl",
            (Rcx, W8) => "rcx",
            (Rcx, W4) => "ecx",
            (Rcx, W2) => "cx",
            (Rcx, W1) => "cl",
            (Rdx, W8) => "rdx",
            (Rdx, W4) => "edx",
            (Rdx, W2) => "dx",
            (Rdx, W1) => "dl",
            (Rsi, W8) => "rsi",
            (Rsi, W4) => "esi",
            (Rsi, W2) => "si",
            (Rsi, W1) => "sil",
            (Rdi, W8) => "rdi",
            (Rdi, W4) => "edi",
            (Rdi, W2) => "di",
            (Rdi, W1) => "dil",
            (R8, W8) => "r8",
            (R8, W4) => "r8d",
            (R8, W2) => "r8w",
            (R8, W1) => "r8b",
            (R9, W8) => "r9",
            (R9, W4) => "r9d",
            (R9, W2) => "r9w",
            (R9, W1) => "r9b",
            (R12, W8) => "r12",
            (R12, W4) => "r12d",
            (R12, W2) => "r12w",
            (R12, W1) => "r12b",
            (R13, W8) => "r13",
            (R13, W4) => "r13d",
            (R13, W2) => "r13w",
            (R13, W1) => "r13b",
            (R14, W8) => "r14",
            (R14, W4) => "r14d",
            (R14, W2) => "r14w",
            (R14, W1) => "r14b",
            (R15, W8) => "r15",
            (R15, W4) => "r15d",
            (R15, W2) => "r15w",
            (R15, W1) => "r15b",
        }
    }

    /// AT&T operand syntax: `%rax`, `%eax`, ...
    pub fn operand(self, width: Width) -> String {
        format!("%{}", self.name(width))
    }

    pub fn is_callee_saved(self) -> bool {
        matches!(
            self,
            PhysReg::Rbx | PhysReg::R12 | PhysReg::R13 | PhysReg::R14 | PhysReg::R15
        )
    }
}

/// The 12 general-purpose registers the allocator may assign to a
/// value, in spill-preference order (callee-saved registers are tried
/// last since they cost a push/pop in the prologue/epilogue only once
/// per function, not per call).
pub const ALLOCATABLE: [PhysReg; 12] = [
    PhysReg::Rax,
    PhysReg::Rcx,
    PhysReg::Rdx,
    PhysReg::Rsi,
    PhysReg::Rdi,
    PhysReg::R8,
    PhysReg::R9,
    PhysReg::Rbx,
    PhysReg::R12,
    PhysReg::R13,
    PhysReg::R14,
    PhysReg::R15,
];

/// Registers a `call` instruction clobbers under the System V ABI.
/// Any value live across a call is forced to color with a
/// callee-saved register instead (see `regalloc.rs`), so no save/
/// restore sequence is needed around call sites.
pub const CALLER_SAVED: [PhysReg; 7] = [
    PhysReg::Rax,
    PhysReg::Rcx,
    PhysReg::Rdx,
    PhysReg::Rsi,
    PhysReg::Rdi,
    PhysReg::R8,
    PhysReg::R9,
];

pub const CALLEE_SAVED: [PhysReg; 5] = [
    PhysReg::Rbx,
    PhysReg::R12,
    PhysReg::R13,
    PhysReg::R14,
    PhysReg::R15,
];

/// Integer argument registers in order, per System V AMD64; arguments
/// beyond the sixth go on the stack.
pub const ARG_REGS: [PhysReg; 6] = [
    PhysReg::Rdi,
    PhysReg::Rsi,
    PhysReg::Rdx,
    PhysReg::Rcx,
    PhysReg::R8,
    PhysReg::R9,
];

pub const RETURN_REG: PhysReg = PhysReg::Rax;

/// Scratch register for immediate-64 materialization (spec.md 9
/// "immediate-64 handling"). Never assigned by the allocator.
pub const SCRATCH1: &str = "%r10";
/// Second scratch register, used when an instruction needs two free
/// temporaries at once (e.g. saving the incumbent of a constrained
/// register before overwriting it for a division or shift).
pub const SCRATCH2: &str = "%r11";
