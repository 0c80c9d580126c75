//! Property-based tests for the operand stack, block discovery and the
//! interpreter
//!
//! These tests use proptest to generate random inputs and verify that:
//! 1. Stack snapshots are immutable and pop in LIFO order
//! 2. Block edges are always symmetric and every instruction has one block
//! 3. Decompilation never panics and is deterministic

use proptest::prelude::*;
use ragescript::script::ast::Node;
use ragescript::script::instruction::{BinaryOperator, Instruction};
use ragescript::script::stack::{OperandStack, StackRef};
use ragescript::script::{DecompileOptions, Decoder, Machine};
use ragescript::Arch;
use std::collections::HashSet;

// =============================================================================
// STRATEGY GENERATORS
// =============================================================================

/// Straight-line and branching instructions at one-byte addresses
fn instruction(address: u32, len: u32) -> impl Strategy<Value = Instruction> {
    prop_oneof![
        (-100i32..100).prop_map(move |v| Instruction::push_int(address, v)),
        Just(Instruction::binary(address, BinaryOperator::Add)),
        Just(Instruction::binary(address, BinaryOperator::Lt)),
        (0..len).prop_map(move |t| Instruction::jump_if_false(address, t)),
        (0..len).prop_map(move |t| Instruction::jump(address, t)),
        Just(Instruction::ret(address, 0)),
    ]
}

fn program() -> impl Strategy<Value = Vec<Instruction>> {
    (1u32..24).prop_flat_map(|len| {
        let body: Vec<_> = (0..len - 1).map(|a| instruction(a, len).boxed()).collect();
        body.prop_map(move |mut code| {
            code.push(Instruction::ret(len - 1, 0));
            code
        })
    })
}

// =============================================================================
// STACK LAWS
// =============================================================================

proptest! {
    #[test]
    fn prop_stack_is_lifo(values in prop::collection::vec(any::<i32>(), 0..64)) {
        let mut arena = OperandStack::new();
        let mut top = StackRef::EMPTY;
        for v in &values {
            top = arena.push(top, Node::int(*v));
        }
        prop_assert_eq!(arena.depth(top), values.len());

        for v in values.iter().rev() {
            let (node, rest) = arena.pop(top);
            prop_assert_eq!(node, Node::int(*v));
            top = rest;
        }
        prop_assert!(top.is_empty());
    }

    #[test]
    fn prop_snapshots_are_immutable(base in 0usize..16, extra in 1usize..16) {
        let mut arena = OperandStack::new();
        let mut snapshot = StackRef::EMPTY;
        for i in 0..base {
            snapshot = arena.push(snapshot, Node::int(i as i32));
        }
        let before: Vec<Node> = arena.iter(snapshot).cloned().collect();

        let mut branch = snapshot;
        for i in 0..extra {
            branch = arena.push(branch, Node::var(format!("v{}", i)));
        }
        let (_, _) = arena.pop(branch);

        let after: Vec<Node> = arena.iter(snapshot).cloned().collect();
        prop_assert_eq!(before, after);
        prop_assert_eq!(arena.depth(snapshot), base);
    }

    #[test]
    fn prop_peek_matches_pop(values in prop::collection::vec(any::<i32>(), 1..16)) {
        let mut arena = OperandStack::new();
        let mut top = StackRef::EMPTY;
        for v in &values {
            top = arena.push(top, Node::int(*v));
        }
        let peeked = arena.peek(top);
        let (popped, _) = arena.pop(top);
        prop_assert_eq!(peeked, popped);
    }
}

// =============================================================================
// CONTROL FLOW AND INTERPRETATION
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_decompile_is_total_and_deterministic(code in program()) {
        let run = || Machine::new("p", code.clone(), DecompileOptions::default()).decompile();
        let (first, second) = match (run(), run()) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(a), Err(b)) => {
                prop_assert_eq!(a.to_string(), b.to_string());
                return Ok(());
            }
            _ => return Err(TestCaseError::fail("runs disagree")),
        };
        prop_assert_eq!(first.render(), second.render());
        prop_assert_eq!(first.warnings, second.warnings);
    }

    #[test]
    fn prop_edges_are_symmetric(code in program()) {
        let len = code.len();
        let Ok(file) = Machine::new("p", code, DecompileOptions::default()).decompile() else {
            return Ok(());
        };
        let function = &file.functions[0];

        let mut seen = HashSet::new();
        for (address, block) in &function.blocks {
            for index in block.window.clone() {
                prop_assert!(seen.insert(index));
            }
            for succ in &block.outs {
                prop_assert!(function.blocks[succ].ins.contains(address));
            }
            for pred in &block.ins {
                prop_assert!(function.blocks[pred].outs.contains(address));
            }
        }
        prop_assert!(seen.len() <= len);
    }

    #[test]
    fn prop_decoder_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let mut region = (bytes.len() as u32).to_le_bytes().to_vec();
        region.extend_from_slice(&0u32.to_le_bytes());
        region.extend_from_slice(&bytes);
        let _ = Decoder::new(Arch::Pc, None).decode_all(&region);
    }
}
