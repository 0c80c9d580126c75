//! # Persistent Operand Stack
//!
//! The abstract value stack simulated during interpretation. Cells live in an
//! append-only arena and are never mutated after creation, so a [`StackRef`] is
//! a cheap, immutable snapshot. Blocks and instruction states hold snapshots
//! freely; pushing onto one never disturbs another.

use super::ast::Node;

/// Handle to the top cell of a stack, or the empty stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StackRef(Option<u32>);

impl StackRef {
    /// The empty stack
    pub const EMPTY: StackRef = StackRef(None);

    /// Whether this reference denotes the empty stack
    pub fn is_empty(self) -> bool {
        self.0.is_none()
    }
}

#[derive(Debug, Clone)]
struct StackCell {
    value: Node,
    next: StackRef,
    depth: usize,
}

/// Arena owning every stack cell created during one decompilation pass
#[derive(Debug, Clone, Default)]
pub struct OperandStack {
    cells: Vec<StackCell>,
}

impl OperandStack {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, r: StackRef) -> Option<&StackCell> {
        r.0.map(|idx| &self.cells[idx as usize])
    }

    /// Push `node` on top of `r`, returning the new head. `r` stays valid.
    pub fn push(&mut self, r: StackRef, node: Node) -> StackRef {
        let depth = self.depth(r) + 1;
        let idx = self.cells.len() as u32;
        self.cells.push(StackCell {
            value: node,
            next: r,
            depth,
        });
        StackRef(Some(idx))
    }

    /// Top value and the remainder, or `None` on an empty stack
    pub fn try_pop(&self, r: StackRef) -> Option<(&Node, StackRef)> {
        self.cell(r).map(|cell| (&cell.value, cell.next))
    }

    /// Pop the top value
    ///
    /// An empty stack yields a sentinel node and logs the underflow; the
    /// returned reference is then still the empty stack.
    pub fn pop(&self, r: StackRef) -> (Node, StackRef) {
        match self.try_pop(r) {
            Some((node, next)) => (node.clone(), next),
            None => {
                tracing::warn!("node stack underflow");
                (Node::sentinel(), StackRef::EMPTY)
            }
        }
    }

    /// Pop `count` values, returned in push order (deepest first)
    pub fn pop_n(&self, mut r: StackRef, count: usize) -> (Vec<Node>, StackRef) {
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let (node, next) = self.pop(r);
            values.push(node);
            r = next;
        }
        values.reverse();
        (values, r)
    }

    /// Top value without consuming it; a sentinel on an empty stack
    pub fn peek(&self, r: StackRef) -> Node {
        match self.try_pop(r) {
            Some((node, _)) => node.clone(),
            None => {
                tracing::warn!("node stack underflow");
                Node::sentinel()
            }
        }
    }

    /// Number of values reachable from `r`
    pub fn depth(&self, r: StackRef) -> usize {
        self.cell(r).map_or(0, |cell| cell.depth)
    }

    /// Values reachable from `r`, top first
    pub fn iter(&self, r: StackRef) -> StackIter<'_> {
        StackIter { stack: self, at: r }
    }

    /// Total cells allocated in the arena
    pub fn allocated(&self) -> usize {
        self.cells.len()
    }
}

/// Iterator over a stack snapshot, top first
pub struct StackIter<'a> {
    stack: &'a OperandStack,
    at: StackRef,
}

impl<'a> Iterator for StackIter<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let (node, next) = self.stack.try_pop(self.at)?;
        self.at = next;
        Some(node)
    }
}
