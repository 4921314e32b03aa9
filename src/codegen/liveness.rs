//! Backward liveness dataflow over a linearized IL function body
//! (spec.md 4.6 step 1).
//!
//! The CFG is implicit in the instruction stream: `Label` marks a block
//! entry, `Jump`/`JumpIfZero`/`JumpIfNonZero` are the only non-fallthrough
//! edges, and `Return` has no successor. Only `Val::Temp` values carry
//! liveness; `Local`s are always memory (addressed via `Load`/`Store`)
//! and `Imm`s need no register at all.

use crate::il::{Callee, Inst, Val};
use std::collections::{HashMap, HashSet};

/// `def`/`use` for one instruction, restricted to `Val::Temp` operands.
pub(crate) fn def_use(inst: &Inst) -> (Option<Val>, Vec<Val>) {
    fn t(v: Val) -> Option<Val> {
        matches!(v, Val::Temp(_)).then_some(v)
    }

    match *inst {
        Inst::Set { dst, src } => (Some(dst), t(src).into_iter().collect()),
        Inst::Load { dst, .. } => (Some(dst), vec![]),
        Inst::Store { src, .. } => (None, t(src).into_iter().collect()),
        Inst::LoadMem { dst, addr, .. } => (Some(dst), t(addr).into_iter().collect()),
        Inst::StoreMem { addr, src, .. } => {
            (None, [t(addr), t(src)].into_iter().flatten().collect())
        }
        Inst::AddrOfLocal { dst, .. } => (Some(dst), vec![]),
        Inst::AddrOfSymbol { dst, .. } => (Some(dst), vec![]),
        Inst::Binary { dst, lhs, rhs, .. } => {
            (Some(dst), [t(lhs), t(rhs)].into_iter().flatten().collect())
        }
        Inst::Neg { dst, src, .. } => (Some(dst), t(src).into_iter().collect()),
        Inst::Not { dst, src, .. } => (Some(dst), t(src).into_iter().collect()),
        Inst::BitNot { dst, src, .. } => (Some(dst), t(src).into_iter().collect()),
        Inst::Compare { dst, lhs, rhs, .. } => {
            (Some(dst), [t(lhs), t(rhs)].into_iter().flatten().collect())
        }
        Inst::Trunc { dst, src, .. } => (Some(dst), t(src).into_iter().collect()),
        Inst::SExt { dst, src, .. } => (Some(dst), t(src).into_iter().collect()),
        Inst::ZExt { dst, src, .. } => (Some(dst), t(src).into_iter().collect()),
        Inst::Label(_) | Inst::Jump(_) => (None, vec![]),
        Inst::JumpIfZero { cond, .. } => (None, t(cond).into_iter().collect()),
        Inst::JumpIfNonZero { cond, .. } => (None, t(cond).into_iter().collect()),
        Inst::Call {
            dst,
            ref callee,
            ref args,
            ..
        } => {
            let mut uses: Vec<Val> = args.iter().filter_map(|(v, _)| t(*v)).collect();
            if let Callee::Indirect(v) = callee {
                uses.extend(t(*v));
            }
            (dst, uses)
        }
        Inst::Return { value } => (None, value.and_then(|(v, _)| t(v)).into_iter().collect()),
        Inst::AddrOfStringLit { dst, .. } => (Some(dst), vec![]),
    }
}

/// Successor instruction indices for `body[i]`, resolved against a
/// label -> index map. `Return` has no successors; conditional jumps
/// have two (fallthrough and target); everything else falls through.
fn successors(body: &[Inst], i: usize, label_index: &HashMap<u32, usize>) -> Vec<usize> {
    match body[i] {
        Inst::Jump(l) => vec![label_index[&l]],
        Inst::JumpIfZero { target, .. } | Inst::JumpIfNonZero { target, .. } => {
            let mut out = vec![label_index[&target]];
            if i + 1 < body.len() {
                out.push(i + 1);
            }
            out
        }
        Inst::Return { .. } => vec![],
        _ => {
            if i + 1 < body.len() {
                vec![i + 1]
            } else {
                vec![]
            }
        }
    }
}

pub struct Liveness {
    /// Values live immediately after instruction `i` executes.
    pub live_out: Vec<HashSet<Val>>,
    pub def: Vec<Option<Val>>,
    pub uses: Vec<Vec<Val>>,
}

pub fn analyze(body: &[Inst]) -> Liveness {
    let mut label_index = HashMap::new();
    for (i, inst) in body.iter().enumerate() {
        if let Inst::Label(l) = inst {
            label_index.insert(*l, i);
        }
    }

    let (defs, uses): (Vec<_>, Vec<_>) = body.iter().map(def_use).unzip();
    let succ: Vec<Vec<usize>> = (0..body.len())
        .map(|i| successors(body, i, &label_index))
        .collect();

    let mut live_in: Vec<HashSet<Val>> = vec![HashSet::new(); body.len()];
    let mut live_out: Vec<HashSet<Val>> = vec![HashSet::new(); body.len()];

    let mut changed = true;
    while changed {
        changed = false;
        for i in (0..body.len()).rev() {
            let mut out = HashSet::new();
            for &s in &succ[i] {
                out.extend(live_in[s].iter().copied());
            }
            let mut inn = out.clone();
            if let Some(d) = defs[i] {
                inn.remove(&d);
            }
            inn.extend(uses[i].iter().copied());

            if out != live_out[i] {
                live_out[i] = out;
                changed = true;
            }
            if inn != live_in[i] {
                live_in[i] = inn;
                changed = true;
            }
        }
    }

    Liveness {
        live_out,
        def: defs,
        uses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::Width;

    #[test]
    fn a_value_used_after_a_jump_target_is_live_across_the_jump() {
        // t0 = 1; jump L; label L; use(t0) via return.
        let body = vec![
            Inst::Set { dst: Val::Temp(0), src: Val::Imm(1) },
            Inst::Jump(0),
            Inst::Label(0),
            Inst::Return { value: Some((Val::Temp(0), Width::W4)) },
        ];
        let live = analyze(&body);
        assert!(live.live_out[0].contains(&Val::Temp(0)));
        assert!(live.live_out[1].contains(&Val::Temp(0)));
    }

    #[test]
    fn dead_value_is_not_live_out_of_its_definition() {
        let body = vec![
            Inst::Set { dst: Val::Temp(0), src: Val::Imm(1) },
            Inst::Return { value: None },
        ];
        let live = analyze(&body);
        assert!(!live.live_out[0].contains(&Val::Temp(0)));
    }
}
