//! Graph-coloring register allocation with spilling (spec.md 4.6 steps
//! 2-3).
//!
//! Values live across a `Call` are given a synthetic interference edge
//! against every caller-saved register (`abi::CALLER_SAVED`), which
//! forces them to color with a callee-saved register instead. That
//! sidesteps save/restore sequences around call sites entirely and is
//! the same "honor the constraint with a copy at the constrained use"
//! philosophy spec.md 4.6 item 4 prescribes for divide/shift, just
//! applied once per call rather than per use.

use crate::codegen::abi::{ALLOCATABLE, ARG_REGS, CALLER_SAVED, PhysReg};
use crate::codegen::liveness::{self, Liveness};
use crate::il::{IBinOp, Inst, Val, Width};
use std::collections::{HashMap, HashSet};

/// Spilling is handled by rewriting the IL (`rewrite_spill`) rather
/// than by allocation location, so every value that survives to a
/// final `try_color` pass gets a real register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location(pub PhysReg);

pub struct Allocation {
    pub locations: HashMap<Val, Location>,
}

struct Graph {
    adjacency: HashMap<Val, HashSet<Val>>,
    forbidden: HashMap<Val, HashSet<PhysReg>>,
}

fn all_temps(body: &[Inst], live: &Liveness) -> HashSet<Val> {
    let mut out = HashSet::new();
    for d in live.def.iter().flatten() {
        out.insert(*d);
    }
    for u in &live.uses {
        out.extend(u.iter().copied());
    }
    let _ = body;
    out
}

fn build_graph(body: &[Inst], live: &Liveness) -> Graph {
    let mut adjacency: HashMap<Val, HashSet<Val>> = HashMap::new();
    let mut forbidden: HashMap<Val, HashSet<PhysReg>> = HashMap::new();
    for v in all_temps(body, live) {
        adjacency.entry(v).or_default();
        forbidden.entry(v).or_default();
    }

    for (i, inst) in body.iter().enumerate() {
        if let Some(d) = live.def[i] {
            for &other in &live.live_out[i] {
                if other != d {
                    adjacency.entry(d).or_default().insert(other);
                    adjacency.entry(other).or_default().insert(d);
                }
            }
        }
        match inst {
            Inst::Call { args, .. } => {
                for &v in &live.live_out[i] {
                    forbidden.entry(v).or_default().extend(CALLER_SAVED);
                }
                // Each register-passed argument was given its own
                // pinned temp by `lower_call_args`; force it to its
                // ABI slot by forbidding every other allocatable color.
                for (idx, &(val, _)) in args.iter().enumerate().take(ARG_REGS.len()) {
                    let target = ARG_REGS[idx];
                    forbidden
                        .entry(val)
                        .or_default()
                        .extend(ALLOCATABLE.iter().copied().filter(|&r| r != target));
                }
            }
            // `idiv`/`div` clobber %rax/%rdx; `shl`/`sar`/`shr` by a
            // non-constant count clobber %rcx. Forbidding those colors
            // on anything still live past the instruction (other than
            // its own result) is the same "constrained-use copy"
            // treatment spec.md 4.6 item 4 describes for calls,
            // generalized to these opcodes so emission never needs to
            // save/restore a clobbered register around them.
            Inst::Binary { dst, op, .. }
                if matches!(op, IBinOp::SDiv | IBinOp::UDiv | IBinOp::SMod | IBinOp::UMod) =>
            {
                for &v in &live.live_out[i] {
                    if v != *dst {
                        forbidden
                            .entry(v)
                            .or_default()
                            .extend([PhysReg::Rax, PhysReg::Rdx]);
                    }
                }
            }
            Inst::Binary { dst, op, .. }
                if matches!(op, IBinOp::Shl | IBinOp::SShr | IBinOp::UShr) =>
            {
                for &v in &live.live_out[i] {
                    if v != *dst {
                        forbidden.entry(v).or_default().insert(PhysReg::Rcx);
                    }
                }
            }
            _ => {}
        }
    }

    Graph { adjacency, forbidden }
}

/// Simplify/spill a copy of the graph, returning a color for every
/// node or `None` (meaning: allocation needs another rewrite pass with
/// this node spilled).
fn try_color(graph: &Graph) -> Result<HashMap<Val, PhysReg>, Val> {
    let k = ALLOCATABLE.len();
    let mut degree: HashMap<Val, usize> = graph
        .adjacency
        .iter()
        .map(|(v, adj)| (*v, adj.len()))
        .collect();
    let mut removed: HashSet<Val> = HashSet::new();
    let mut stack = Vec::new();

    while removed.len() < graph.adjacency.len() {
        let candidate = graph
            .adjacency
            .keys()
            .find(|v| !removed.contains(*v) && degree[*v] < k)
            .copied();
        let pick = match candidate {
            Some(v) => v,
            None => {
                // No node has degree < k: pick the highest-degree
                // remaining node as a potential spill and keep going:
                // it may still find a color once its neighbors are
                // removed and recolored.
                *graph
                    .adjacency
                    .keys()
                    .filter(|v| !removed.contains(*v))
                    .max_by_key(|v| degree[*v])
                    .expect("non-empty remaining set")
            }
        };
        removed.insert(pick);
        for &neighbor in &graph.adjacency[&pick] {
            if let Some(d) = degree.get_mut(&neighbor) {
                *d = d.saturating_sub(1);
            }
        }
        stack.push(pick);
    }

    let mut colors: HashMap<Val, PhysReg> = HashMap::new();
    while let Some(v) = stack.pop() {
        let mut used: HashSet<PhysReg> = graph.forbidden.get(&v).cloned().unwrap_or_default();
        for neighbor in &graph.adjacency[&v] {
            if let Some(c) = colors.get(neighbor) {
                used.insert(*c);
            }
        }
        match ALLOCATABLE.iter().find(|r| !used.contains(r)) {
            Some(&r) => {
                colors.insert(v, r);
            }
            None => return Err(v),
        }
    }
    Ok(colors)
}

/// Rewrite `body`/`locals` so that `spilled` is loaded from a fresh
/// stack slot immediately before each use and stored to it immediately
/// after its definition, replacing every occurrence with a fresh temp
/// local to that use/def site. This shrinks the spilled value's live
/// range to a single instruction, guaranteeing the next coloring
/// attempt can make progress.
fn rewrite_spill(
    body: &mut Vec<Inst>,
    locals: &mut Vec<crate::il::LocalSlot>,
    next_temp: &mut u32,
    spilled: Val,
) {
    let slot_id = locals.iter().map(|l| l.id).max().map_or(0, |m| m + 1);
    locals.push(crate::il::LocalSlot {
        id: slot_id,
        size: 8,
        align: 8,
    });
    let slot = Val::Local(slot_id);

    let mut fresh = || {
        let t = Val::Temp(*next_temp);
        *next_temp += 1;
        t
    };

    let mut new_body = Vec::with_capacity(body.len());
    for inst in body.drain(..) {
        let (def, uses) = liveness::def_use(&inst);
        let mut replacement_for_use: Option<Val> = None;
        if uses.contains(&spilled) {
            let t = fresh();
            new_body.push(Inst::Load {
                dst: t,
                local: slot,
                width: Width::W8,
            });
            replacement_for_use = Some(t);
        }
        let rewritten = substitute(inst, spilled, replacement_for_use);
        let redefines_spilled = def == Some(spilled);
        new_body.push(rewritten);
        if redefines_spilled {
            new_body.push(Inst::Store {
                local: slot,
                src: spilled,
                width: Width::W8,
            });
        }
    }
    *body = new_body;
}

/// Replace every occurrence of `old` in an instruction's use operands
/// with `new` (when `new` is `Some`); definitions are left alone (the
/// defining instruction still writes the original virtual name, which
/// `rewrite_spill` immediately spills via an appended `Store`).
fn substitute(inst: Inst, old: Val, new: Option<Val>) -> Inst {
    let Some(new) = new else { return inst };
    let r = |v: Val| if v == old { new } else { v };
    match inst {
        Inst::Set { dst, src } => Inst::Set { dst, src: r(src) },
        Inst::Store { local, src, width } => Inst::Store { local, src: r(src), width },
        Inst::LoadMem { dst, addr, width } => Inst::LoadMem { dst, addr: r(addr), width },
        Inst::StoreMem { addr, src, width } => {
            Inst::StoreMem { addr: r(addr), src: r(src), width }
        }
        Inst::Binary { dst, op, lhs, rhs, width } => Inst::Binary {
            dst,
            op,
            lhs: r(lhs),
            rhs: r(rhs),
            width,
        },
        Inst::Neg { dst, src, width } => Inst::Neg { dst, src: r(src), width },
        Inst::Not { dst, src, width } => Inst::Not { dst, src: r(src), width },
        Inst::BitNot { dst, src, width } => Inst::BitNot { dst, src: r(src), width },
        Inst::Compare { dst, cmp, lhs, rhs, width } => Inst::Compare {
            dst,
            cmp,
            lhs: r(lhs),
            rhs: r(rhs),
            width,
        },
        Inst::Trunc { dst, src, width } => Inst::Trunc { dst, src: r(src), width },
        Inst::SExt { dst, src, from, to } => Inst::SExt { dst, src: r(src), from, to },
        Inst::ZExt { dst, src, from, to } => Inst::ZExt { dst, src: r(src), from, to },
        Inst::JumpIfZero { cond, target, width } => {
            Inst::JumpIfZero { cond: r(cond), target, width }
        }
        Inst::JumpIfNonZero { cond, target, width } => {
            Inst::JumpIfNonZero { cond: r(cond), target, width }
        }
        Inst::Call { dst, callee, args, ret_width } => {
            let callee = match callee {
                crate::il::Callee::Indirect(v) => crate::il::Callee::Indirect(r(v)),
                direct => direct,
            };
            let args = args.into_iter().map(|(v, w)| (r(v), w)).collect();
            Inst::Call { dst, callee, args, ret_width }
        }
        Inst::Return { value } => Inst::Return { value: value.map(|(v, w)| (r(v), w)) },
        other => other,
    }
}

/// Give every register-passed call argument its own single-use temp,
/// copied from the original value immediately before the `Call`. This
/// is what lets `build_graph` pin each one to its ABI register: without
/// a dedicated temp per argument, the ordinary def/live-out
/// interference edges below have nothing value-specific to attach the
/// pin to, and two arguments already sitting in each other's target
/// registers (e.g. `a` in `%rsi`, `b` in `%rdi`, calling `f(a, b)`)
/// would have their sequential moves in `emit_call` silently swap and
/// corrupt them — the classic parallel-move hazard. With the copy in
/// place, the existing "def interferes with live_out" rule forces the
/// original values apart from the pinned argument registers for free,
/// the same way a constrained div/mod/shift operand is split from its
/// other live users.
fn lower_call_args(body: &mut Vec<Inst>, next_temp: &mut u32) {
    let mut new_body = Vec::with_capacity(body.len());
    for inst in body.drain(..) {
        if let Inst::Call { dst, callee, mut args, ret_width } = inst {
            for (val, _width) in args.iter_mut().take(ARG_REGS.len()) {
                let pinned = Val::Temp(*next_temp);
                *next_temp += 1;
                new_body.push(Inst::Set { dst: pinned, src: *val });
                *val = pinned;
            }
            new_body.push(Inst::Call { dst, callee, args, ret_width });
        } else {
            new_body.push(inst);
        }
    }
    *body = new_body;
}

/// Allocate registers for one function body, spilling and retrying
/// until every remaining virtual value colors. Bounded iteration count:
/// each retry strictly shrinks one value's live range to a single
/// instruction, so convergence is guaranteed well within the bound;
/// exceeding it indicates a malformed IL (treated as fatal, spec.md
/// 4.6 "allocator bugs are treated as fatal internal errors").
pub fn allocate(
    body: &mut Vec<Inst>,
    locals: &mut Vec<crate::il::LocalSlot>,
    next_temp: &mut u32,
) -> Allocation {
    lower_call_args(body, next_temp);
    for _ in 0..10_000 {
        let live = liveness::analyze(body);
        let graph = build_graph(body, &live);
        match try_color(&graph) {
            Ok(colors) => {
                let locations = colors.into_iter().map(|(v, r)| (v, Location(r))).collect();
                return Allocation { locations };
            }
            Err(spill) => rewrite_spill(body, locals, next_temp, spill),
        }
    }
    panic!("register allocator failed to converge: malformed IL");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::{IBinOp, LocalSlot};

    #[test]
    fn two_interfering_temps_get_different_registers() {
        let mut body = vec![
            Inst::Set { dst: Val::Temp(0), src: Val::Imm(1) },
            Inst::Set { dst: Val::Temp(1), src: Val::Imm(2) },
            Inst::Binary {
                dst: Val::Temp(2),
                op: IBinOp::Add,
                lhs: Val::Temp(0),
                rhs: Val::Temp(1),
                width: Width::W4,
            },
            Inst::Return { value: Some((Val::Temp(2), Width::W4)) },
        ];
        let mut locals: Vec<LocalSlot> = vec![];
        let mut next_temp = 3;
        let alloc = allocate(&mut body, &mut locals, &mut next_temp);
        let r0 = alloc.locations[&Val::Temp(0)];
        let r1 = alloc.locations[&Val::Temp(1)];
        assert_ne!(r0, r1);
    }

    #[test]
    fn a_value_live_across_a_call_is_never_caller_saved() {
        let mut body = vec![
            Inst::Set { dst: Val::Temp(0), src: Val::Imm(42) },
            Inst::Call {
                dst: Some(Val::Temp(1)),
                callee: crate::il::Callee::Direct("f".to_string()),
                args: vec![],
                ret_width: Some(Width::W4),
            },
            Inst::Binary {
                dst: Val::Temp(2),
                op: IBinOp::Add,
                lhs: Val::Temp(0),
                rhs: Val::Temp(1),
                width: Width::W4,
            },
            Inst::Return { value: Some((Val::Temp(2), Width::W4)) },
        ];
        let mut locals: Vec<LocalSlot> = vec![];
        let mut next_temp = 3;
        let alloc = allocate(&mut body, &mut locals, &mut next_temp);
        let Location(r) = alloc.locations[&Val::Temp(0)];
        assert!(r.is_callee_saved());
    }

    #[test]
    fn two_call_arguments_are_pinned_to_distinct_abi_registers() {
        // With only two values live at the call, an unconstrained
        // allocator is free to color them into each other's argument
        // slots (e.g. arg0 -> %rsi, arg1 -> %rdi); emit_call's
        // sequential moves would then silently swap them.
        let mut body = vec![
            Inst::Set { dst: Val::Temp(0), src: Val::Imm(11) },
            Inst::Set { dst: Val::Temp(1), src: Val::Imm(22) },
            Inst::Call {
                dst: None,
                callee: crate::il::Callee::Direct("f".to_string()),
                args: vec![(Val::Temp(0), Width::W4), (Val::Temp(1), Width::W4)],
                ret_width: None,
            },
            Inst::Return { value: None },
        ];
        let mut locals: Vec<LocalSlot> = vec![];
        let mut next_temp = 2;
        let alloc = allocate(&mut body, &mut locals, &mut next_temp);

        let args = body
            .iter()
            .find_map(|inst| match inst {
                Inst::Call { args, .. } => Some(args.clone()),
                _ => None,
            })
            .expect("call survives allocation");

        let Location(r0) = alloc.locations[&args[0].0];
        let Location(r1) = alloc.locations[&args[1].0];
        assert_eq!(r0, PhysReg::Rdi);
        assert_eq!(r1, PhysReg::Rsi);
    }
}
