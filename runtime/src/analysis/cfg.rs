//! Basic-block scan, Cooper-Harvey-Kennedy immediate dominators and the
//! T1/T2 reducibility check, all over the pre-processed instruction list.

use crate::analysis::NO_IDOM;
use crate::rt::method::ExceptionHandler;
use skadi_common::instruction::{Insn, InsnKind};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// First instruction index of the block.
    pub start: u32,
    /// One past the last instruction index.
    pub end: u32,
    /// Successor block indices, deduplicated.
    pub successors: Vec<u32>,
}

/// Successor *instruction* indices of `index`, including fall-through.
/// `jsr` is treated as an unconditional branch to its target; `ret` ends
/// control flow.
fn insn_successors(insns: &[Insn], index: usize, out: &mut Vec<u32>) {
    let kind = &insns[index].kind;
    match kind {
        InsnKind::Goto(t) | InsnKind::Jsr(t) => {
            out.clear();
            out.push(*t);
        }
        InsnKind::TableSwitch(_) | InsnKind::LookupSwitch(_) => {
            kind.collect_targets(out);
        }
        InsnKind::Return
        | InsnKind::Ireturn
        | InsnKind::Lreturn
        | InsnKind::Freturn
        | InsnKind::Dreturn
        | InsnKind::Areturn
        | InsnKind::Athrow
        | InsnKind::Ret(_) => out.clear(),
        _ if kind.is_conditional_branch() => {
            kind.collect_targets(out);
            if index + 1 < insns.len() {
                out.push(index as u32 + 1);
            }
        }
        _ => {
            out.clear();
            if index + 1 < insns.len() {
                out.push(index as u32 + 1);
            }
        }
    }
}

/// Reverse post-order rank per instruction, with exception-handler entries
/// treated as extra roots. Unreachable instructions rank last.
pub(super) fn insn_rpo_rank(insns: &[Insn], exception_table: &[ExceptionHandler]) -> Vec<u32> {
    let n = insns.len();
    let mut postorder: Vec<u32> = Vec::with_capacity(n);
    let mut visited = vec![false; n];
    let mut scratch = Vec::new();

    let mut roots = vec![0u32];
    roots.extend(exception_table.iter().map(|h| h.handler_insn));

    // Iterative DFS; the explicit stack carries (node, next-successor-slot).
    let mut stack: Vec<(u32, usize)> = Vec::new();
    for root in roots {
        if (root as usize) >= n || visited[root as usize] {
            continue;
        }
        visited[root as usize] = true;
        stack.push((root, 0));
        while let Some((node, cursor)) = stack.pop() {
            insn_successors(insns, node as usize, &mut scratch);
            if cursor < scratch.len() {
                stack.push((node, cursor + 1));
                let next = scratch[cursor];
                if (next as usize) < n && !visited[next as usize] {
                    visited[next as usize] = true;
                    stack.push((next, 0));
                }
            } else {
                postorder.push(node);
            }
        }
    }

    let mut rank = vec![u32::MAX; n];
    let reachable = postorder.len() as u32;
    for (i, node) in postorder.iter().enumerate() {
        rank[*node as usize] = reachable - 1 - i as u32;
    }
    rank
}

/// Cuts the instruction list into basic blocks: at every branch target, at
/// every exception-handler target, and after every instruction that
/// branches or ends control flow.
pub(super) fn scan_basic_blocks(
    insns: &[Insn],
    exception_table: &[ExceptionHandler],
) -> Vec<BasicBlock> {
    if insns.is_empty() {
        return Vec::new();
    }
    let n = insns.len() as u32;

    let mut leaders: BTreeSet<u32> = BTreeSet::new();
    leaders.insert(0);
    let mut targets = Vec::new();
    for (i, insn) in insns.iter().enumerate() {
        let kind = &insn.kind;
        if kind.is_branch() || matches!(kind, InsnKind::Jsr(_)) {
            kind.collect_targets(&mut targets);
            leaders.extend(targets.iter().copied());
        }
        let falls_through = !(kind.ends_block() || matches!(kind, InsnKind::Jsr(_)));
        if (!falls_through || kind.is_conditional_branch()) && (i as u32 + 1) < n {
            leaders.insert(i as u32 + 1);
        }
    }
    for handler in exception_table {
        leaders.insert(handler.handler_insn);
    }
    leaders.retain(|l| *l < n);

    let starts: Vec<u32> = leaders.into_iter().collect();
    let block_of: HashMap<u32, u32> = starts
        .iter()
        .enumerate()
        .map(|(b, start)| (*start, b as u32))
        .collect();

    let mut blocks = Vec::with_capacity(starts.len());
    let mut scratch = Vec::new();
    for (b, &start) in starts.iter().enumerate() {
        let end = starts.get(b + 1).copied().unwrap_or(n);
        insn_successors(insns, end as usize - 1, &mut scratch);
        let mut successors: Vec<u32> = scratch
            .iter()
            .filter_map(|t| block_of.get(t).copied())
            .collect();
        successors.sort_unstable();
        successors.dedup();
        blocks.push(BasicBlock {
            start,
            end,
            successors,
        });
    }
    blocks
}

/// Iterative immediate-dominator computation over the block CFG with block
/// 0 as entry. Unreachable blocks get [`NO_IDOM`].
pub(super) fn compute_dominator_tree(blocks: &[BasicBlock]) -> Vec<u32> {
    let n = blocks.len();
    if n == 0 {
        return Vec::new();
    }

    // Reverse post-order over blocks.
    let mut postorder = Vec::with_capacity(n);
    let mut visited = vec![false; n];
    let mut stack: Vec<(u32, usize)> = vec![(0, 0)];
    visited[0] = true;
    while let Some((node, cursor)) = stack.pop() {
        let succs = &blocks[node as usize].successors;
        if cursor < succs.len() {
            stack.push((node, cursor + 1));
            let next = succs[cursor];
            if !visited[next as usize] {
                visited[next as usize] = true;
                stack.push((next, 0));
            }
        } else {
            postorder.push(node);
        }
    }
    let mut rpo_num = vec![u32::MAX; n];
    let reachable = postorder.len() as u32;
    for (i, node) in postorder.iter().enumerate() {
        rpo_num[*node as usize] = reachable - 1 - i as u32;
    }
    let mut rpo_order: Vec<u32> = postorder.iter().rev().copied().collect();
    rpo_order.retain(|b| *b != 0);

    let mut preds: Vec<Vec<u32>> = vec![Vec::new(); n];
    for (b, block) in blocks.iter().enumerate() {
        for succ in &block.successors {
            preds[*succ as usize].push(b as u32);
        }
    }

    let mut idom = vec![NO_IDOM; n];
    idom[0] = 0;

    let intersect = |idom: &[u32], mut a: u32, mut b: u32| -> u32 {
        while a != b {
            while rpo_num[a as usize] > rpo_num[b as usize] {
                a = idom[a as usize];
            }
            while rpo_num[b as usize] > rpo_num[a as usize] {
                b = idom[b as usize];
            }
        }
        a
    };

    let mut changed = true;
    while changed {
        changed = false;
        for &b in &rpo_order {
            let mut new_idom = NO_IDOM;
            for &p in &preds[b as usize] {
                if idom[p as usize] == NO_IDOM {
                    continue;
                }
                new_idom = if new_idom == NO_IDOM {
                    p
                } else {
                    intersect(&idom, p, new_idom)
                };
            }
            if new_idom != NO_IDOM && idom[b as usize] != new_idom {
                idom[b as usize] = new_idom;
                changed = true;
            }
        }
    }
    idom
}

/// T1 (self-loop removal) / T2 (single-predecessor merge) reduction.
/// Returns whether the reachable CFG collapses to a single node.
pub(super) fn attempt_reduce(blocks: &[BasicBlock]) -> bool {
    let n = blocks.len();
    if n == 0 {
        return true;
    }

    let mut alive = vec![false; n];
    let mut stack = vec![0usize];
    alive[0] = true;
    while let Some(b) = stack.pop() {
        for &s in &blocks[b].successors {
            if !alive[s as usize] {
                alive[s as usize] = true;
                stack.push(s as usize);
            }
        }
    }

    let mut succs: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    let mut preds: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    for (b, block) in blocks.iter().enumerate() {
        if !alive[b] {
            continue;
        }
        for &s in &block.successors {
            succs[b].insert(s as usize);
            preds[s as usize].insert(b);
        }
    }

    loop {
        let mut changed = false;

        // T1: drop self loops.
        for v in 0..n {
            if alive[v] && succs[v].remove(&v) {
                preds[v].remove(&v);
                changed = true;
            }
        }

        // T2: a node with a unique predecessor folds into it.
        for v in 1..n {
            if !alive[v] || preds[v].len() != 1 {
                continue;
            }
            let p = *preds[v].iter().next().expect("len checked");
            if p == v {
                continue;
            }
            alive[v] = false;
            succs[p].remove(&v);
            preds[v].clear();
            let moved = std::mem::take(&mut succs[v]);
            for s in moved {
                preds[s].remove(&v);
                succs[p].insert(s);
                preds[s].insert(p);
            }
            changed = true;
        }

        if !changed {
            break;
        }
    }

    alive.iter().filter(|a| **a).count() == 1
}
