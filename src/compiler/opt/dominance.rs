//! Dominance Analysis
//!
//! Dominator tree of a function's control-flow graph, computed with the
//! iterative algorithm of Cooper, Harvey and Kennedy over reverse postorder.

use crate::compiler::ir::{BlockId, Function};

/// Immediate-dominator tree over the blocks reachable from the entry.
///
/// Blocks unreachable from the entry are not part of the tree. Every block
/// is treated as dominating an unreachable block.
#[derive(Debug, Clone)]
pub struct DomTree {
    /// Immediate dominator of each block, `None` for the entry and for
    /// unreachable blocks.
    idom: Vec<Option<BlockId>>,
    children: Vec<Vec<BlockId>>,
    /// Position of each reachable block in `rpo`.
    rpo_index: Vec<Option<usize>>,
    /// Reachable blocks in reverse postorder, starting at the entry.
    rpo: Vec<BlockId>,
}

impl DomTree {
    /// Computes the dominator tree of `func`.
    #[must_use]
    pub fn compute(func: &Function) -> Self {
        let num_blocks = func.num_blocks();
        let rpo = reverse_postorder(func);

        let mut rpo_index = vec![None; num_blocks];
        for (idx, block) in rpo.iter().enumerate() {
            rpo_index[block.0] = Some(idx);
        }

        let preds = func.predecessors();

        // Indexed by block, holds the current immediate dominator estimate.
        let mut doms: Vec<Option<BlockId>> = vec![None; num_blocks];

        if let Some(entry) = rpo.first() {
            doms[entry.0] = Some(*entry);
        }

        let mut changed = true;
        while changed {
            changed = false;

            for block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;

                for pred in &preds[block.0] {
                    if doms[pred.0].is_none() {
                        continue;
                    }

                    new_idom = Some(match new_idom {
                        None => *pred,
                        Some(current) => intersect(&doms, &rpo_index, *pred, current),
                    });
                }

                if new_idom.is_some() && doms[block.0] != new_idom {
                    doms[block.0] = new_idom;
                    changed = true;
                }
            }
        }

        let mut idom = vec![None; num_blocks];
        let mut children = vec![vec![]; num_blocks];

        for block in rpo.iter().skip(1) {
            if let Some(parent) = doms[block.0] {
                idom[block.0] = Some(parent);
                children[parent.0].push(*block);
            }
        }

        // Layout order.
        for list in &mut children {
            list.sort_unstable();
        }

        Self {
            idom,
            children,
            rpo_index,
            rpo,
        }
    }

    /// Returns the immediate dominator of `block`, or `None` for the entry
    /// and unreachable blocks.
    #[inline]
    #[must_use]
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(block.0).copied().flatten()
    }

    /// Returns the blocks immediately dominated by `block`.
    #[inline]
    #[must_use]
    pub fn children(&self, block: BlockId) -> &[BlockId] {
        self.children.get(block.0).map_or(&[], Vec::as_slice)
    }

    #[inline]
    #[must_use]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo_index.get(block.0).copied().flatten().is_some()
    }

    /// Reachable blocks in reverse postorder.
    #[inline]
    #[must_use]
    pub fn reverse_postorder(&self) -> &[BlockId] {
        &self.rpo
    }

    /// Returns `true` if every path from the entry to `b` passes through
    /// `a`. A block dominates itself.
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(b) {
            return true;
        }

        if !self.is_reachable(a) {
            return false;
        }

        let mut current = b;
        loop {
            if current == a {
                return true;
            }

            match self.idom(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Returns `root` followed by every block it dominates, in depth-first
    /// preorder of the tree.
    #[must_use]
    pub fn preorder(&self, root: BlockId) -> Vec<BlockId> {
        let mut order = vec![];
        let mut stack = vec![root];

        while let Some(block) = stack.pop() {
            order.push(block);

            // Reversed so children are visited in the order they were added.
            stack.extend(self.children(block).iter().rev());
        }

        order
    }
}

/// Walks both fingers up the current dominator estimates until they meet.
fn intersect(
    doms: &[Option<BlockId>],
    rpo_index: &[Option<usize>],
    mut b1: BlockId,
    mut b2: BlockId,
) -> BlockId {
    let index = |block: BlockId| rpo_index[block.0].unwrap_or(usize::MAX);

    while b1 != b2 {
        while index(b1) > index(b2) {
            match doms[b1.0] {
                Some(parent) => b1 = parent,
                None => return b2,
            }
        }

        while index(b2) > index(b1) {
            match doms[b2.0] {
                Some(parent) => b2 = parent,
                None => return b1,
            }
        }
    }

    b1
}

/// Returns the blocks reachable from the entry in reverse postorder.
fn reverse_postorder(func: &Function) -> Vec<BlockId> {
    let num_blocks = func.num_blocks();
    if num_blocks == 0 {
        return vec![];
    }

    let mut visited = vec![false; num_blocks];
    let mut post = Vec::with_capacity(num_blocks);

    // Iterative depth-first search: (block, successors, next successor).
    let mut stack = vec![(Function::ENTRY, func.successors(Function::ENTRY), 0)];
    visited[Function::ENTRY.0] = true;

    while let Some((block, succs, next)) = stack.last_mut() {
        if let Some(succ) = succs.get(*next).copied() {
            *next += 1;

            if succ.0 < num_blocks && !visited[succ.0] {
                visited[succ.0] = true;
                stack.push((succ, func.successors(succ), 0));
            }
        } else {
            post.push(*block);
            stack.pop();
        }
    }

    post.reverse();
    post
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{FunctionBuilder, Value};
    use crate::compiler::types::Type;
    use pretty_assertions::assert_eq;

    /// entry -> (a | b) -> join, plus an unreachable block.
    fn diamond() -> (Function, [BlockId; 4]) {
        let mut b = FunctionBuilder::new("f", Type::Void, vec![]);
        let left = b.create_block("left");
        let right = b.create_block("right");
        let join = b.create_block("join");
        let dead = b.create_block("dead");

        b.cond_br(Value::Const(1), left, right).unwrap();
        b.position_at_end(left);
        b.br(join).unwrap();
        b.position_at_end(right);
        b.br(join).unwrap();
        b.position_at_end(join);
        b.ret(None).unwrap();
        b.position_at_end(dead);
        b.br(join).unwrap();

        (b.finish(), [left, right, join, dead])
    }

    #[test]
    fn dominance_diamond() {
        let (func, [left, right, join, dead]) = diamond();
        let dom = DomTree::compute(&func);

        assert_eq!(dom.idom(Function::ENTRY), None);
        assert_eq!(dom.idom(left), Some(Function::ENTRY));
        assert_eq!(dom.idom(right), Some(Function::ENTRY));
        assert_eq!(dom.idom(join), Some(Function::ENTRY));
        assert_eq!(dom.children(Function::ENTRY), &[left, right, join]);

        assert!(dom.dominates(Function::ENTRY, join));
        assert!(!dom.dominates(left, join));
        assert!(dom.dominates(join, join));

        assert!(!dom.is_reachable(dead));
        assert!(dom.dominates(left, dead));
        assert!(!dom.dominates(dead, left));
    }

    #[test]
    fn dominance_loop() {
        // entry -> header <-> body, header -> exit
        let mut b = FunctionBuilder::new("f", Type::Void, vec![]);
        let header = b.create_block("header");
        let body = b.create_block("body");
        let exit = b.create_block("exit");

        b.br(header).unwrap();
        b.position_at_end(header);
        b.cond_br(Value::Const(1), body, exit).unwrap();
        b.position_at_end(body);
        b.br(header).unwrap();
        b.position_at_end(exit);
        b.ret(None).unwrap();

        let func = b.finish();
        let dom = DomTree::compute(&func);

        assert_eq!(dom.idom(header), Some(Function::ENTRY));
        assert_eq!(dom.idom(body), Some(header));
        assert_eq!(dom.idom(exit), Some(header));
        assert!(!dom.dominates(body, header));
        assert_eq!(dom.reverse_postorder()[0], Function::ENTRY);
        assert_eq!(dom.preorder(header), vec![header, body, exit]);
    }
}
