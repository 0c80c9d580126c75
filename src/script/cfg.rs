//! # Control Flow Graph Recovery
//!
//! Splits a function's instruction stream into basic blocks and links them.
//! Blocks are keyed by start address; rediscovering an address returns the
//! existing block, which keeps join points and loop headers single-instanced.

use super::ast::Node;
use super::stack::StackRef;
use super::stream::InstructionStream;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Range;

/// A basic block in the control flow graph
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Address of the first instruction
    pub start_address: u32,
    /// Positions of this block's instructions in the function's stream
    pub window: Range<usize>,
    /// Statements emitted while interpreting the block
    pub statements: Vec<Node>,
    /// Predecessor start addresses
    pub ins: BTreeSet<u32>,
    /// Successor start addresses
    pub outs: BTreeSet<u32>,
    /// Address of the owning function
    pub function: u32,
    /// Stack live on entry, set by the first predecessor interpreted
    pub entry_stack: Option<StackRef>,
    /// Stack live after the last instruction
    pub exit_stack: Option<StackRef>,
    /// Whether some instruction branches here explicitly
    pub is_branch_target: bool,
}

impl BasicBlock {
    fn new(start_address: u32, function: u32) -> Self {
        Self {
            start_address,
            window: 0..0,
            statements: Vec::new(),
            ins: BTreeSet::new(),
            outs: BTreeSet::new(),
            function,
            entry_stack: None,
            exit_stack: None,
            is_branch_target: false,
        }
    }

    /// Append a statement
    pub fn emit(&mut self, stmt: Node) {
        self.statements.push(stmt);
    }

    /// Number of instructions in the block
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Whether the block covers no instructions
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Whether more than one predecessor flows here
    pub fn is_join_point(&self) -> bool {
        self.ins.len() > 1
    }
}

/// Link `from -> to` on both sides
pub fn add_edge(blocks: &mut BTreeMap<u32, BasicBlock>, from: u32, to: u32) {
    if let Some(block) = blocks.get_mut(&from) {
        block.outs.insert(to);
    }
    if let Some(block) = blocks.get_mut(&to) {
        block.ins.insert(from);
    }
}

/// Addresses that must start a block: the entry, every branch target, and
/// every instruction following a control transfer
pub fn find_leaders(stream: &InstructionStream) -> BTreeSet<u32> {
    let mut leaders = BTreeSet::new();
    let mut instructions = stream.instructions().peekable();

    if let Some(first) = instructions.peek() {
        leaders.insert(first.address);
    }

    while let Some(instr) = instructions.next() {
        if !instr.is_control_transfer() {
            continue;
        }
        leaders.extend(instr.branch_targets());
        if let Some(next) = instructions.peek() {
            leaders.insert(next.address);
        }
    }

    leaders
}

/// Discover all blocks reachable from `entry`
///
/// Each address is visited once; a branch back to a visited address only adds
/// the edge. Returns addresses in visit order.
pub fn discover(
    stream: &InstructionStream,
    entry: u32,
    function: u32,
    blocks: &mut BTreeMap<u32, BasicBlock>,
    visited: &mut HashSet<u32>,
) -> Vec<u32> {
    let leaders = find_leaders(stream);
    let mut order = Vec::new();
    let mut worklist = vec![entry];

    while let Some(address) = worklist.pop() {
        if !visited.insert(address) {
            continue;
        }

        let Some(start) = stream.index_of(address) else {
            tracing::warn!(
                "block address 0x{:06x} is not an instruction boundary",
                address
            );
            continue;
        };
        order.push(address);

        // Extend the window to the next control transfer or leader
        let mut end = start;
        while let Some(instr) = stream.get(end) {
            end += 1;
            if instr.is_control_transfer() {
                break;
            }
            match stream.get(end) {
                Some(next) if leaders.contains(&next.address) => break,
                _ => {}
            }
        }

        blocks
            .entry(address)
            .or_insert_with(|| BasicBlock::new(address, function))
            .window = start..end;

        let Some(last) = stream.get(end - 1) else {
            continue;
        };

        let mut successors: Vec<(u32, bool)> = Vec::new();
        for target in last.branch_targets() {
            if stream.index_of(target).is_some() {
                successors.push((target, true));
            } else {
                tracing::warn!(
                    "branch at 0x{:06x} targets 0x{:06x} outside the function",
                    last.address,
                    target
                );
            }
        }
        if last.kind.falls_through() {
            if let Some(next) = stream.get(end) {
                successors.push((next.address, false));
            }
        }

        for &(succ, is_branch) in &successors {
            let block = blocks
                .entry(succ)
                .or_insert_with(|| BasicBlock::new(succ, function));
            block.is_branch_target |= is_branch;
            add_edge(blocks, address, succ);
        }

        // Fall-through is pushed last so it is popped and explored first
        for &(succ, _) in &successors {
            if !visited.contains(&succ) {
                worklist.push(succ);
            }
        }
    }

    tracing::debug!(
        "discovered {} blocks from entry 0x{:06x}",
        order.len(),
        entry
    );
    order
}
